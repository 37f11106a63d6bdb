//! §4.3 Adapter Instance.

pub mod instance;

pub use instance::{AdapterInstance, ValidateKeyResult};
