pub mod disk;
pub mod engine;
pub mod hooks;
pub mod meta_store;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod s3;
pub mod scanner;
pub mod storage;
pub mod worker;
