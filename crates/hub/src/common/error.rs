use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Tasking error: {0}")]
    TaskingError(#[from] tasking::Error),
    #[error("Kubernetes error: {0}")]
    KubeError(#[from] kube::Error),
    #[error("Auth error: {0}")]
    AuthError(#[from] tasking::auth::AuthError),
}
