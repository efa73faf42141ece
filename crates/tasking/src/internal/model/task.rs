use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Priority;
use crate::internal::common::ids::{BucketId, FileId, TaskGroupId, TaskId};
use crate::internal::model::Referencing;
use crate::internal::model::subject::Subject;

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    #[default]
    Created,
    Ready,
    Postponed,
    QuotaBlocked,
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl TaskState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    #[inline]
    pub fn is_in(&self, states: &[TaskState]) -> bool {
        states.contains(self)
    }
}

impl Display for TaskState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Created => "Created",
            Self::Ready => "Ready",
            Self::Postponed => "Postponed",
            Self::QuotaBlocked => "QuotaBlocked",
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Canceled => "Canceled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    AddonSelected,
    ExtensionSelected,
    ImageError,
    PodNotFound,
    PodCreated,
    PodPending,
    PodUnschedulable,
    PodRunning,
    Preempted,
    PodSucceeded,
    PodFailed,
    PodDeleted,
    Escalated,
    Released,
    ContainerKilled,
    Postponed,
    QuotaBlocked,
    Canceled,
}

impl Display for EventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskPolicy {
    pub isolated: bool,
    pub preempt_enabled: bool,
    pub preempt_exempt: bool,
}

/// Time-to-live per state, in minutes. Zero means unset.
#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Ttl {
    pub created: i64,
    pub pending: i64,
    pub running: i64,
    pub succeeded: i64,
    pub failed: i64,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub severity: String,
    pub description: String,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub kind: EventKind,
    pub count: u32,
    pub reason: String,
    pub last: DateTime<Utc>,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: FileId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub create_time: DateTime<Utc>,
    pub create_user: String,
    pub update_user: String,
    pub name: String,
    pub kind: String,
    pub addon: String,
    pub extensions: Vec<String>,
    pub state: TaskState,
    pub locator: String,
    pub priority: Priority,
    pub policy: TaskPolicy,
    pub ttl: Ttl,
    pub data: serde_json::Value,
    pub started: Option<DateTime<Utc>>,
    pub terminated: Option<DateTime<Utc>>,
    pub retained: bool,
    pub reaped: bool,
    pub errors: Vec<TaskError>,
    pub events: Vec<TaskEvent>,
    /// Pod reference as `namespace/name`; empty when the task has no pod.
    pub pod: String,
    pub retries: u32,
    pub attached: Vec<Attachment>,
    pub subject: Option<Subject>,
    pub task_group: Option<TaskGroupId>,
    pub bucket: Option<BucketId>,
}

impl Default for Task {
    fn default() -> Self {
        Self {
            id: TaskId::default(),
            create_time: Utc::now(),
            create_user: String::new(),
            update_user: String::new(),
            name: String::new(),
            kind: String::new(),
            addon: String::new(),
            extensions: Vec::new(),
            state: TaskState::Created,
            locator: String::new(),
            priority: 0,
            policy: TaskPolicy::default(),
            ttl: Ttl::default(),
            data: serde_json::Value::Null,
            started: None,
            terminated: None,
            retained: false,
            reaped: false,
            errors: Vec::new(),
            events: Vec::new(),
            pod: String::new(),
            retries: 0,
            attached: Vec::new(),
            subject: None,
            task_group: None,
            bucket: None,
        }
    }
}

impl Task {
    #[inline]
    pub fn state_in(&self, states: &[TaskState]) -> bool {
        self.state.is_in(states)
    }

    /// Records an event. Repeating the latest event of the same kind with the
    /// same reason only bumps its count.
    pub fn event(&mut self, kind: EventKind, reason: impl Into<String>) {
        let reason = reason.into();
        let now = Utc::now();
        if let Some(last) = self.events.iter_mut().rev().find(|e| e.kind == kind) {
            if last.reason == reason {
                last.count += 1;
                last.last = now;
                return;
            }
        }
        self.events.push(TaskEvent {
            kind,
            count: 1,
            reason,
            last: now,
        });
    }

    /// The most recent event of the given kind.
    pub fn last_event(&self, kind: EventKind) -> Option<&TaskEvent> {
        self.events.iter().rev().find(|e| e.kind == kind)
    }

    pub fn error(&mut self, severity: impl Into<String>, description: impl Into<String>) {
        self.errors.push(TaskError {
            severity: severity.into(),
            description: description.into(),
        });
    }

    pub fn attach(&mut self, id: FileId, name: impl Into<String>) {
        self.attached.push(Attachment {
            id,
            name: name.into(),
        });
    }

    /// Pod name without the namespace.
    pub fn pod_name(&self) -> Option<&str> {
        if self.pod.is_empty() {
            return None;
        }
        Some(match self.pod.split_once('/') {
            Some((_, name)) => name,
            None => self.pod.as_str(),
        })
    }

    pub fn has_pod(&self) -> bool {
        !self.pod.is_empty()
    }

    /// Whether any field owned by the scheduler differs from `stored`.
    pub fn scheduler_changed(&self, stored: &Task) -> bool {
        self.addon != stored.addon
            || self.extensions != stored.extensions
            || self.state != stored.state
            || self.priority != stored.priority
            || self.started != stored.started
            || self.terminated != stored.terminated
            || self.retained != stored.retained
            || self.events != stored.events
            || self.errors != stored.errors
            || self.retries != stored.retries
            || self.attached != stored.attached
            || self.pod != stored.pod
            || self.bucket != stored.bucket
    }

    /// Copies the fields owned by the scheduler from `other`, keeping the
    /// user owned fields of `self`.
    pub fn set_scheduler_fields(&mut self, other: &Task) {
        self.addon.clone_from(&other.addon);
        self.extensions.clone_from(&other.extensions);
        self.state = other.state;
        self.priority = other.priority;
        self.started = other.started;
        self.terminated = other.terminated;
        self.retained = other.retained;
        self.events.clone_from(&other.events);
        self.errors.clone_from(&other.errors);
        self.retries = other.retries;
        self.attached.clone_from(&other.attached);
        self.pod.clone_from(&other.pod);
        self.bucket = other.bucket;
    }

    /// Marks the task failed with the error appended.
    pub fn fail(&mut self, description: impl Into<String>) {
        self.error("Error", description);
        self.terminated = Some(Utc::now());
        self.state = TaskState::Failed;
    }
}

impl Referencing for Task {
    fn bucket_refs(&self) -> Vec<BucketId> {
        self.bucket.into_iter().collect()
    }

    fn file_refs(&self) -> Vec<FileId> {
        self.attached.iter().map(|a| a.id).collect()
    }
}
