use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;

use crate::internal::common::Map;
use crate::internal::common::error::TaskingError;
use crate::internal::common::ids::{
    ApplicationId, BucketId, FileId, PlatformId, TagCategoryId, TagId, TaskGroupId, TaskId,
};
use crate::internal::model::Referencing;
use crate::internal::model::group::TaskGroup;
use crate::internal::model::storage::{Bucket, File};
use crate::internal::model::subject::{Application, Platform, Tag, TagCategory};
use crate::internal::model::task::Task;
use crate::internal::store::{Store, TaskFilter};

#[derive(Default)]
struct Tables {
    task_seq: u64,
    group_seq: u64,
    bucket_seq: u64,
    file_seq: u64,
    tasks: Map<TaskId, Task>,
    groups: Map<TaskGroupId, TaskGroup>,
    buckets: Map<BucketId, Bucket>,
    files: Map<FileId, File>,
    applications: Map<ApplicationId, Application>,
    platforms: Map<PlatformId, Platform>,
    tags: Map<TagId, Tag>,
    categories: Map<TagCategoryId, TagCategory>,
}

/// Store kept in memory. Bucket directories and file contents live on disk
/// under `root`.
pub struct MemoryStore {
    root: PathBuf,
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new(root: &Path) -> crate::Result<Self> {
        std::fs::create_dir_all(root.join("bucket"))?;
        std::fs::create_dir_all(root.join("file"))?;
        Ok(MemoryStore {
            root: root.to_path_buf(),
            tables: Default::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn insert_application(&self, application: Application) {
        self.tables
            .write()
            .applications
            .insert(application.id, application);
    }

    pub fn insert_platform(&self, platform: Platform) {
        self.tables.write().platforms.insert(platform.id, platform);
    }

    pub fn insert_tag(&self, tag: Tag) {
        self.tables.write().tags.insert(tag.id, tag);
    }

    pub fn insert_tag_category(&self, category: TagCategory) {
        self.tables.write().categories.insert(category.id, category);
    }
}

fn not_found(what: &str, id: impl std::fmt::Display) -> TaskingError {
    TaskingError::NotFound(format!("{what} ({id})"))
}

impl Store for MemoryStore {
    fn create_task(&self, mut task: Task) -> crate::Result<Task> {
        let mut tables = self.tables.write();
        tables.task_seq += 1;
        task.id = TaskId::new(tables.task_seq);
        task.create_time = Utc::now();
        tables.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    fn get_task(&self, id: TaskId) -> crate::Result<Option<Task>> {
        Ok(self.tables.read().tasks.get(&id).cloned())
    }

    fn find_tasks(&self, filter: &TaskFilter) -> crate::Result<Vec<Task>> {
        let tables = self.tables.read();
        let mut tasks: Vec<Task> = tables
            .tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }

    fn update_task(&self, task: &Task) -> crate::Result<()> {
        let mut tables = self.tables.write();
        match tables.tasks.get_mut(&task.id) {
            Some(row) => {
                *row = task.clone();
                Ok(())
            }
            None => Err(not_found("Task", task.id)),
        }
    }

    fn update_tasks(&self, tasks: &[Task]) -> crate::Result<()> {
        let mut tables = self.tables.write();
        if let Some(missing) = tasks.iter().find(|t| !tables.tasks.contains_key(&t.id)) {
            return Err(not_found("Task", missing.id));
        }
        for task in tasks {
            tables.tasks.insert(task.id, task.clone());
        }
        Ok(())
    }

    fn delete_task(&self, id: TaskId) -> crate::Result<()> {
        let mut tables = self.tables.write();
        if let Some(task) = tables.tasks.remove(&id) {
            if let Some(group) = task.task_group.and_then(|g| tables.groups.get_mut(&g)) {
                group.tasks.retain(|t| *t != id);
            }
        }
        Ok(())
    }

    fn create_group(&self, mut group: TaskGroup) -> crate::Result<TaskGroup> {
        let mut tables = self.tables.write();
        tables.group_seq += 1;
        group.id = TaskGroupId::new(tables.group_seq);
        group.create_time = Utc::now();
        tables.groups.insert(group.id, group.clone());
        Ok(group)
    }

    fn get_group(&self, id: TaskGroupId) -> crate::Result<Option<TaskGroup>> {
        Ok(self.tables.read().groups.get(&id).cloned())
    }

    fn list_groups(&self) -> crate::Result<Vec<TaskGroup>> {
        Ok(self
            .tables
            .read()
            .groups
            .sorted_values()
            .into_iter()
            .cloned()
            .collect())
    }

    fn update_group(&self, group: &TaskGroup) -> crate::Result<()> {
        let mut tables = self.tables.write();
        match tables.groups.get_mut(&group.id) {
            Some(row) => {
                *row = group.clone();
                Ok(())
            }
            None => Err(not_found("TaskGroup", group.id)),
        }
    }

    fn delete_group(&self, id: TaskGroupId) -> crate::Result<()> {
        let mut tables = self.tables.write();
        tables.groups.remove(&id);
        tables.tasks.retain(|_, t| t.task_group != Some(id));
        Ok(())
    }

    fn create_bucket(&self) -> crate::Result<Bucket> {
        let mut tables = self.tables.write();
        tables.bucket_seq += 1;
        let id = BucketId::new(tables.bucket_seq);
        let path = self.root.join("bucket").join(id.to_string());
        std::fs::create_dir_all(&path)?;
        let bucket = Bucket {
            id,
            create_time: Utc::now(),
            path,
            expiration: None,
        };
        tables.buckets.insert(id, bucket.clone());
        Ok(bucket)
    }

    fn list_buckets(&self) -> crate::Result<Vec<Bucket>> {
        Ok(self
            .tables
            .read()
            .buckets
            .sorted_values()
            .into_iter()
            .cloned()
            .collect())
    }

    fn update_bucket(&self, bucket: &Bucket) -> crate::Result<()> {
        let mut tables = self.tables.write();
        match tables.buckets.get_mut(&bucket.id) {
            Some(row) => {
                *row = bucket.clone();
                Ok(())
            }
            None => Err(not_found("Bucket", bucket.id)),
        }
    }

    fn delete_bucket(&self, id: BucketId) -> crate::Result<()> {
        self.tables.write().buckets.remove(&id);
        Ok(())
    }

    fn create_file(&self, name: &str) -> crate::Result<File> {
        let mut tables = self.tables.write();
        tables.file_seq += 1;
        let id = FileId::new(tables.file_seq);
        let path = self.root.join("file").join(id.to_string());
        std::fs::File::create(&path)?;
        let file = File {
            id,
            create_time: Utc::now(),
            name: name.to_string(),
            path,
            expiration: None,
        };
        tables.files.insert(id, file.clone());
        Ok(file)
    }

    fn get_file(&self, id: FileId) -> crate::Result<Option<File>> {
        Ok(self.tables.read().files.get(&id).cloned())
    }

    fn list_files(&self) -> crate::Result<Vec<File>> {
        Ok(self
            .tables
            .read()
            .files
            .sorted_values()
            .into_iter()
            .cloned()
            .collect())
    }

    fn update_file(&self, file: &File) -> crate::Result<()> {
        let mut tables = self.tables.write();
        match tables.files.get_mut(&file.id) {
            Some(row) => {
                *row = file.clone();
                Ok(())
            }
            None => Err(not_found("File", file.id)),
        }
    }

    fn delete_file(&self, id: FileId) -> crate::Result<()> {
        self.tables.write().files.remove(&id);
        Ok(())
    }

    fn application(&self, id: ApplicationId) -> crate::Result<Option<Application>> {
        Ok(self.tables.read().applications.get(&id).cloned())
    }

    fn platform(&self, id: PlatformId) -> crate::Result<Option<Platform>> {
        Ok(self.tables.read().platforms.get(&id).cloned())
    }

    fn tag(&self, id: TagId) -> crate::Result<Option<Tag>> {
        Ok(self.tables.read().tags.get(&id).cloned())
    }

    fn tag_category_by_name(&self, name: &str) -> crate::Result<Option<TagCategory>> {
        Ok(self
            .tables
            .read()
            .categories
            .values()
            .find(|c| c.name == name)
            .cloned())
    }

    fn visit_references(&self, visitor: &mut dyn FnMut(&dyn Referencing)) -> crate::Result<()> {
        let tables = self.tables.read();
        for task in tables.tasks.values() {
            visitor(task);
        }
        for group in tables.groups.values() {
            visitor(group);
        }
        for application in tables.applications.values() {
            visitor(application);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::model::task::TaskState;

    fn store() -> (tempfile::TempDir, MemoryStore) {
        let dir = tempfile::TempDir::with_prefix("tasking").unwrap();
        let store = MemoryStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_find_tasks_order() {
        let (_dir, store) = store();
        for priority in [1, 5, 5, 3] {
            store
                .create_task(Task {
                    priority,
                    state: TaskState::Ready,
                    ..Default::default()
                })
                .unwrap();
        }
        let ids: Vec<u64> = store
            .find_tasks(&TaskFilter::states(&[TaskState::Ready]))
            .unwrap()
            .iter()
            .map(|t| t.id.as_num())
            .collect();
        assert_eq!(ids, vec![2, 3, 4, 1]);
    }

    #[test]
    fn test_update_tasks_is_atomic() {
        let (_dir, store) = store();
        let mut task = store.create_task(Task::default()).unwrap();
        task.name = "changed".into();
        let missing = Task {
            id: TaskId::new(99),
            ..Default::default()
        };
        assert!(store.update_tasks(&[task.clone(), missing]).is_err());
        assert_eq!(store.get_task(task.id).unwrap().unwrap().name, "");
        store.update_tasks(&[task.clone()]).unwrap();
        assert_eq!(store.get_task(task.id).unwrap().unwrap().name, "changed");
    }

    #[test]
    fn test_bucket_and_file_on_disk() {
        let (_dir, store) = store();
        let bucket = store.create_bucket().unwrap();
        assert!(bucket.path.is_dir());
        let file = store.create_file("pod.yaml").unwrap();
        assert!(file.path.is_file());
        assert_eq!(store.get_file(file.id).unwrap().unwrap().name, "pod.yaml");
    }

    #[test]
    fn test_delete_task_detaches_from_group() {
        let (_dir, store) = store();
        let mut group = store.create_group(TaskGroup::default()).unwrap();
        let task = store
            .create_task(Task {
                task_group: Some(group.id),
                ..Default::default()
            })
            .unwrap();
        group.tasks.push(task.id);
        store.update_group(&group).unwrap();
        store.delete_task(task.id).unwrap();
        assert!(store.get_group(group.id).unwrap().unwrap().tasks.is_empty());
    }
}
