pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod status;
pub mod varian;

pub use error::{AppError, Result};
