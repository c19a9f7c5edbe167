pub mod api;
pub mod config;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

pub use api::error::{ErrorCode, UploadError};
pub use config::StorageConfig;
pub use services::engine::UploadEngine;
