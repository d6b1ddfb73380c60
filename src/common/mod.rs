pub mod config;
pub mod error;
pub mod paths;

pub use config::Config;
pub use error::{KioskError, Result};
pub use paths::DataLayout;
