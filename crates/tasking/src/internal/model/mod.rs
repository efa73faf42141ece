pub mod group;
pub mod storage;
pub mod subject;
pub mod task;

use crate::internal::common::ids::{BucketId, FileId};

/// Declares the buckets and files a model row keeps alive.
///
/// Reapers walk every row implementing this trait; a bucket or file that no
/// row refers to is eventually deleted.
pub trait Referencing {
    fn bucket_refs(&self) -> Vec<BucketId> {
        Vec::new()
    }

    fn file_refs(&self) -> Vec<FileId> {
        Vec::new()
    }
}
