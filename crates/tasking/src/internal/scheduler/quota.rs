use std::fmt::{Display, Formatter};

use crate::internal::cluster::{Cluster, POD_FAILED, POD_SUCCEEDED, pod_phase};

/// Pod quota admission for one scheduling pass.
///
/// The limit is the most restrictive `pods` quota in the namespace. Every
/// non-terminal pod counts against it, task pods and other pods alike, plus
/// the pods created during the pass.
#[derive(Debug, Default)]
pub struct Quota {
    limit: Option<usize>,
    used: usize,
    created: usize,
}

impl Quota {
    pub fn new(cluster: &Cluster) -> Self {
        let used = cluster.task_pods_scheduled().len()
            + cluster
                .other_pods()
                .iter()
                .filter(|pod| !matches!(pod_phase(pod), POD_SUCCEEDED | POD_FAILED))
                .count();
        Quota {
            limit: cluster.pod_quota(),
            used,
            created: 0,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.limit
            .is_some_and(|limit| self.used + self.created >= limit)
    }

    pub fn created(&mut self) {
        self.created += 1;
    }
}

impl Display for Quota {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.limit {
            Some(limit) => write!(
                f,
                "pods: quota={limit}, used={}, created={}",
                self.used, self.created
            ),
            None => write!(f, "pods: quota=none, created={}", self.created),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_exhausted() {
        let mut quota = Quota {
            limit: Some(2),
            used: 1,
            created: 0,
        };
        assert!(!quota.exhausted());
        quota.created();
        assert!(quota.exhausted());
        assert_eq!(quota.to_string(), "pods: quota=2, used=1, created=1");
    }

    #[test]
    fn test_no_quota() {
        let mut quota = Quota::default();
        for _ in 0..100 {
            quota.created();
        }
        assert!(!quota.exhausted());
    }
}
