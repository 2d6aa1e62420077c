//! Environment configuration and logging bootstrap shared by the coach services.

pub mod env;
pub mod tracing_init;

pub use env::AppConfig;
pub use tracing_init::init_tracing;
