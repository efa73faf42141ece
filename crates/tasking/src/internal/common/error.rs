use thiserror::Error;

use crate::internal::auth::AuthError;
use crate::internal::cluster::ClusterError;

#[allow(clippy::enum_variant_names)]
#[derive(Debug, Error)]
pub enum TaskingError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Cluster error: {0}")]
    ClusterError(#[from] ClusterError),
    #[error("Store error: {0}")]
    StoreError(String),
    #[error(transparent)]
    SoftError(#[from] SoftError),
    #[error("Auth error: {0}")]
    AuthError(#[from] AuthError),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Dependency cycle: {0}")]
    DependencyCyclic(String),
    #[error("Error: {0}")]
    GenericError(String),
}

impl TaskingError {
    /// Returns the soft error if this error is one.
    pub fn as_soft(&self) -> Option<&SoftError> {
        match self {
            Self::SoftError(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_not_reconciled(&self) -> bool {
        matches!(self, Self::SoftError(SoftError::NotReconciled { .. }))
    }
}

impl From<serde_json::error::Error> for TaskingError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

impl From<serde_yaml::Error> for TaskingError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

impl From<String> for TaskingError {
    fn from(e: String) -> Self {
        Self::GenericError(e)
    }
}

impl From<&str> for TaskingError {
    fn from(e: &str) -> Self {
        Self::GenericError(e.to_string())
    }
}

/// Errors local to a single task.
///
/// The scheduler turns these into task state instead of aborting the tick.
/// Errors that are not retried fail the task with their message appended
/// to the task errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SoftError {
    #[error("Task (kind): '{0}' not-found.")]
    KindNotFound(String),
    #[error("Addon: '{0}' not-found.")]
    AddonNotFound(String),
    #[error("Addon not selected.")]
    AddonNotSelected,
    #[error("({kind}) '{name}' not ready: {reason}.")]
    NotReady {
        kind: String,
        name: String,
        reason: String,
    },
    #[error("({kind}) '{name}' not reconciled.")]
    NotReconciled { kind: String, name: String },
    #[error("Extension: '{0}' not-found.")]
    ExtensionNotFound(String),
    #[error("Extension: '{name}' not-valid with addon '{addon}'.")]
    ExtensionNotValid { name: String, addon: String },
    #[error("Selector '{selector}' not valid. {reason}.")]
    SelectorNotValid { selector: String, reason: String },
    #[error("Extension '{name}' addon ref not valid. reason: {reason}")]
    ExtAddonNotValid { name: String, reason: String },
    #[error("Addon '{name}' task ref not valid. reason: {reason}")]
    AddonTaskNotValid { name: String, reason: String },
    #[error("PriorityClass {0} not-found.")]
    PriorityNotFound(String),
    #[error("Pod rejected: {0}")]
    PodRejected(String),
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),
}

impl SoftError {
    /// The task should stay schedulable and be tried again on a later tick.
    pub fn retry(&self) -> bool {
        matches!(self, Self::QuotaExceeded(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_quota_is_retried() {
        assert!(SoftError::QuotaExceeded("pods=1".into()).retry());
        assert!(!SoftError::AddonNotSelected.retry());
        assert!(!SoftError::PodRejected("denied".into()).retry());
    }

    #[test]
    fn test_soft_messages() {
        assert_eq!(
            SoftError::ExtensionNotValid {
                name: "java".into(),
                addon: "tech-discovery".into()
            }
            .to_string(),
            "Extension: 'java' not-valid with addon 'tech-discovery'."
        );
        assert_eq!(
            SoftError::KindNotFound("analyzer".into()).to_string(),
            "Task (kind): 'analyzer' not-found."
        );
        let error: TaskingError = SoftError::NotReconciled {
            kind: "Addon".into(),
            name: "analyzer".into(),
        }
        .into();
        assert!(error.is_not_reconciled());
        assert_eq!(error.to_string(), "(Addon) 'analyzer' not reconciled.");
    }
}
