#![deny(clippy::await_holding_lock)]

#[macro_use]
pub(crate) mod internal;

pub use crate::internal::common::ids::{
    ApplicationId, BucketId, FileId, PlatformId, TagCategoryId, TagId, TaskGroupId, TaskId,
};
pub use crate::internal::common::{Map, Set};

// Priority: Bigger number -> Higher priority
pub type Priority = i32;

pub type Error = internal::common::error::TaskingError;
pub type Result<T> = std::result::Result<T, Error>;

pub use crate::internal::common::error::SoftError;
pub use crate::internal::configuration::{
    AddonConfiguration, CacheConfiguration, DEFAULT_WAITING_TERMINAL, PodRetention,
    ReaperConfiguration, TaskingConfiguration,
};

pub mod model {
    pub use crate::internal::model::Referencing;
    pub use crate::internal::model::group::{GroupMode, TaskGroup};
    pub use crate::internal::model::storage::{Bucket, File};
    pub use crate::internal::model::subject::{Application, Platform, Subject, Tag, TagCategory};
    pub use crate::internal::model::task::{
        Attachment, EventKind, Task, TaskError, TaskEvent, TaskPolicy, TaskState, Ttl,
    };
}

pub mod store {
    pub use crate::internal::store::{MemoryStore, Store, TaskFilter};
}

pub mod cluster {
    pub use crate::internal::cluster::simulator;
    pub use crate::internal::cluster::{
        APP_LABEL, Addon, AddonSpec, Cluster, ClusterClient, ClusterError, ClusterResult,
        Extension, ExtensionSpec, GROUP, LogStream, ROLE_LABEL, ResourceCondition,
        ResourceStatus, TASK_LABEL, Tackle, TaskKind, TaskKindSpec, VERSION,
    };
}

pub mod auth {
    pub use crate::internal::auth::{
        ADDON_ROLE, AuthError, Builtin, Claims, NoAuth, Provider, Scope, TaskValidator, Validator,
    };
}

pub mod scheduler {
    pub use crate::internal::scheduler::capacity::{CapacityMonitor, capacity_process};
    pub use crate::internal::scheduler::group::submit;
    pub use crate::internal::scheduler::manager::{Manager, manager_process};
}

pub mod reaper {
    pub use crate::internal::reaper::{reap, reaper_process};
}
