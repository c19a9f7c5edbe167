use std::sync::Arc;

use crate::models::{File, FileInit};

/// Derives the physical storage name of an upload.
pub type NamingFn = Arc<dyn Fn(&File) -> String + Send + Sync>;

/// Derives an upload id when the creation request carries none.
pub type IdFn = Arc<dyn Fn(&FileInit) -> String + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Copy,
    Move,
}

impl TransferMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferMode::Copy => "copy",
            TransferMode::Move => "move",
        }
    }
}
