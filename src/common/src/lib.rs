pub mod asset;
pub mod cli;
pub mod config;
pub mod document;
pub mod event;
pub mod storage;

pub use storage::{Bucket, BucketRegistry, StorageError};
