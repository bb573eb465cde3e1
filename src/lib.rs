pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
