//! §4.5 Reload Controller.

pub mod controller;

pub use controller::ReloadController;
