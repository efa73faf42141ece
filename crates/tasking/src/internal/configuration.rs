use std::time::Duration;

/// Waiting reasons that mean a pending container will never start.
pub const DEFAULT_WAITING_TERMINAL: [&str; 4] = ["invalid", "error", "never", "cannot"];

#[derive(Debug, Clone)]
pub struct AddonConfiguration {
    pub home_dir: String,
    pub shared_dir: String,
    pub cache_dir: String,
    pub hub_url: String,
}

#[derive(Debug, Clone)]
pub struct CacheConfiguration {
    /// ReadWriteMany volumes are supported; the cache is a shared PVC.
    pub rwx: bool,
    pub pvc: String,
}

/// Reaper thresholds, in minutes.
#[derive(Debug, Clone)]
pub struct ReaperConfiguration {
    pub created: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub bucket_ttl: i64,
    pub file_ttl: i64,
    pub interval: Duration,
}

/// How long pods of terminated tasks are kept, in seconds.
#[derive(Debug, Clone)]
pub struct PodRetention {
    pub succeeded: i64,
    pub failed: i64,
}

#[derive(Debug, Clone)]
pub struct TaskingConfiguration {
    pub enabled: bool,
    pub service_account: String,
    pub uid: i64,
    /// Restarts allowed after a container is OOM killed.
    pub retries: u32,
    pub interval: Duration,
    pub pod_retention: PodRetention,
    pub reaper: ReaperConfiguration,
    pub addon: AddonConfiguration,
    pub cache: CacheConfiguration,
    /// Lower-case substrings of container waiting reasons that fail the task.
    pub waiting_terminal: Vec<String>,
}

impl Default for TaskingConfiguration {
    fn default() -> Self {
        TaskingConfiguration {
            enabled: true,
            service_account: "tackle-hub".to_string(),
            uid: 1001,
            retries: 1,
            interval: Duration::from_secs(1),
            pod_retention: PodRetention {
                succeeded: 1,
                failed: 4320,
            },
            reaper: ReaperConfiguration {
                created: 4320,
                succeeded: 4320,
                failed: 43200,
                bucket_ttl: 1,
                file_ttl: 720,
                interval: Duration::from_secs(60),
            },
            addon: AddonConfiguration {
                home_dir: "/addon".to_string(),
                shared_dir: "/shared".to_string(),
                cache_dir: "/cache".to_string(),
                hub_url: "http://localhost:8080".to_string(),
            },
            cache: CacheConfiguration {
                rwx: false,
                pvc: "cache".to_string(),
            },
            waiting_terminal: DEFAULT_WAITING_TERMINAL
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl TaskingConfiguration {
    /// Adds operator supplied markers to the default terminal waiting markers.
    pub fn with_waiting_terminal(mut self, extra: &[String]) -> Self {
        for marker in extra {
            let marker = marker.trim().to_lowercase();
            if !marker.is_empty() && !self.waiting_terminal.contains(&marker) {
                self.waiting_terminal.push(marker);
            }
        }
        self
    }

    pub fn is_waiting_terminal(&self, reason: &str) -> bool {
        let reason = reason.to_lowercase();
        self.waiting_terminal
            .iter()
            .any(|marker| reason.contains(marker.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waiting_terminal_markers() {
        let config = TaskingConfiguration::default();
        assert!(config.is_waiting_terminal("InvalidImageName"));
        assert!(config.is_waiting_terminal("ErrImageNeverPull"));
        assert!(config.is_waiting_terminal("CreateContainerConfigError"));
        assert!(!config.is_waiting_terminal("ContainerCreating"));
        assert!(!config.is_waiting_terminal("ImagePullBackOff"));

        let config = config.with_waiting_terminal(&["BackOff".to_string(), " ".to_string()]);
        assert!(config.is_waiting_terminal("ImagePullBackOff"));
        assert_eq!(config.waiting_terminal.len(), 5);
    }
}
