pub mod batch;
pub mod file;

pub use batch::{BatchError, BatchOperationResponse, BatchOperationResult, PurgeResult, TransferItem};
pub use file::{
    ByteStream, File, FileHash, FileInit, FilePart, FileQuery, FileStream, FileWithContent,
    PartInfo, RemoteSession, UploadStatus, WriteRequest,
};
