pub mod error;
pub mod http_client;

pub use error::{AppError, AppResult};
