pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{Result, VerdictError};
pub use event::ProgressBus;
pub use types::*;
