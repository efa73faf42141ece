use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, TimeDelta, Utc};

use crate::internal::common::Set;
use crate::internal::common::ids::{BucketId, FileId};
use crate::internal::store::Store;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Step {
    Keep,
    Save,
    Delete,
}

/// Expiration bookkeeping shared by buckets and files.
///
/// A referenced row never expires. An unreferenced row gets an expiration
/// `ttl` minutes ahead and is deleted once it has passed.
fn step(expiration: &mut Option<DateTime<Utc>>, referenced: bool, ttl: i64) -> Step {
    if referenced {
        return match expiration.take() {
            Some(_) => Step::Save,
            None => Step::Keep,
        };
    }
    match expiration {
        None => {
            *expiration = Some(Utc::now() + TimeDelta::minutes(ttl));
            Step::Save
        }
        Some(at) if Utc::now() > *at => Step::Delete,
        Some(_) => Step::Keep,
    }
}

fn tolerate_missing(result: std::io::Result<()>) -> std::io::Result<()> {
    match result {
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
        result => result,
    }
}

/// Ids of every bucket and file still referenced by a stored row.
fn references(store: &dyn Store) -> crate::Result<(Set<BucketId>, Set<FileId>)> {
    let mut buckets = Set::new();
    let mut files = Set::new();
    store.visit_references(&mut |row| {
        buckets.extend(row.bucket_refs());
        files.extend(row.file_refs());
    })?;
    Ok((buckets, files))
}

/// Deletes buckets nothing refers to once their TTL expired.
pub struct BucketReaper<'a> {
    pub store: &'a dyn Store,
    /// Minutes.
    pub ttl: i64,
}

impl BucketReaper<'_> {
    pub fn run(&self) -> crate::Result<()> {
        log::debug!("Reaping buckets.");
        let buckets = self.store.list_buckets()?;
        if buckets.is_empty() {
            return Ok(());
        }
        let (referenced, _) = references(self.store)?;
        for mut bucket in buckets {
            let is_referenced = referenced.contains(&bucket.id);
            match step(&mut bucket.expiration, is_referenced, self.ttl) {
                Step::Keep => {}
                Step::Save => {
                    if !is_referenced {
                        log::info!("Bucket {} (orphan) found: {}", bucket.id, bucket.path.display());
                    }
                    self.store.update_bucket(&bucket)?;
                }
                Step::Delete => {
                    if let Err(error) = self.delete(bucket.id, &bucket.path) {
                        log::error!("Bucket {} not deleted: {error}", bucket.id);
                    }
                }
            }
        }
        Ok(())
    }

    fn delete(&self, id: BucketId, path: &Path) -> crate::Result<()> {
        tolerate_missing(std::fs::remove_dir_all(path))?;
        self.store.delete_bucket(id)?;
        log::info!("Bucket {id} (orphan) deleted: {}", path.display());
        Ok(())
    }
}

/// Deletes files nothing refers to once their TTL expired.
pub struct FileReaper<'a> {
    pub store: &'a dyn Store,
    /// Minutes.
    pub ttl: i64,
}

impl FileReaper<'_> {
    pub fn run(&self) -> crate::Result<()> {
        log::debug!("Reaping files.");
        let files = self.store.list_files()?;
        if files.is_empty() {
            return Ok(());
        }
        let (_, referenced) = references(self.store)?;
        for mut file in files {
            let is_referenced = referenced.contains(&file.id);
            match step(&mut file.expiration, is_referenced, self.ttl) {
                Step::Keep => {}
                Step::Save => {
                    if !is_referenced {
                        log::info!("File {} (orphan) found: {}", file.id, file.name);
                    }
                    self.store.update_file(&file)?;
                }
                Step::Delete => {
                    if let Err(error) = self.delete(file.id, &file.path) {
                        log::error!("File {} not deleted: {error}", file.id);
                    }
                }
            }
        }
        Ok(())
    }

    fn delete(&self, id: FileId, path: &Path) -> crate::Result<()> {
        tolerate_missing(std::fs::remove_file(path))?;
        self.store.delete_file(id)?;
        log::info!("File {id} (orphan) deleted: {}", path.display());
        Ok(())
    }
}
