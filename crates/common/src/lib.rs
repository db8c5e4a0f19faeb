pub mod config;
pub mod error;
pub mod identity;
pub mod redis_pool;
pub mod types;

pub use error::{NotifyError, Result};
