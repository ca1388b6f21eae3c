pub mod config;
pub mod error;

pub use config::ChatboxConfig;
pub use error::{ChatboxError, Result};
