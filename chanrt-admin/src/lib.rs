//! §6.1 Administrative HTTP API: catalogue CRUD, validate/test, reload, and
//! the ambient health/metrics endpoints.

pub mod handlers;
pub mod middleware;
pub mod server;

pub use server::{AdminServer, AdminState};
