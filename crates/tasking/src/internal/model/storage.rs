use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::internal::common::ids::{BucketId, FileId};

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub id: BucketId,
    pub create_time: DateTime<Utc>,
    pub path: PathBuf,
    pub expiration: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct File {
    pub id: FileId,
    pub create_time: DateTime<Utc>,
    pub name: String,
    pub path: PathBuf,
    pub expiration: Option<DateTime<Utc>>,
}
