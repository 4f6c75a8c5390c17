//! Per-function execution backend: builds an image for a function, keeps warm
//! containers per (function, backend), hot-swaps the source into a checked-out
//! container and runs it under a timeout.

pub mod api;
pub mod config;
pub mod container;
pub mod error;
pub mod executor;
pub mod models;
pub mod security;
pub mod state;

pub use config::Config;
pub use error::{ErrorKind, ExecError, ExecResult};
pub use executor::ExecutionService;
pub use models::{Backend, ExecutionResult, FunctionSpec, Language};
