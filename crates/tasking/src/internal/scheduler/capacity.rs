use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::internal::cluster::{Cluster, POD_PENDING, POD_RUNNING, pod_phase, pod_unschedulable};

const GROWTH_RATE: f64 = 1.05;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct Counters {
    capacity: usize,
    scheduled: usize,
    unscheduled: usize,
}

/// Running estimate of how many task pods the cluster can schedule.
///
/// The estimate grows while every pod gets scheduled and shrinks when the
/// scheduler starts reporting unschedulable pods.
pub struct CapacityMonitor {
    counters: Mutex<Counters>,
}

impl Default for CapacityMonitor {
    fn default() -> Self {
        Self::new(1)
    }
}

impl CapacityMonitor {
    /// Monitor starting from the given estimate.
    pub fn new(capacity: usize) -> Self {
        CapacityMonitor {
            counters: Mutex::new(Counters {
                capacity,
                scheduled: 0,
                unscheduled: 0,
            }),
        }
    }

    pub fn reset(&self) {
        *self.counters.lock() = Counters {
            capacity: 1,
            scheduled: 0,
            unscheduled: 0,
        };
    }

    /// Updates the estimate from the current task pods.
    pub fn adjust(&self, pods: &[Arc<Pod>]) {
        let mut scheduled = 0;
        let mut unscheduled = 0;
        for pod in pods {
            match pod_phase(pod) {
                POD_PENDING => {
                    if pod_unschedulable(pod).is_some() {
                        unscheduled += 1;
                    } else {
                        scheduled += 1;
                    }
                }
                POD_RUNNING => scheduled += 1,
                _ => {}
            }
        }

        let mut counters = self.counters.lock();
        let before = *counters;
        if scheduled == 0 && counters.capacity > 0 {
            counters.scheduled = scheduled;
            counters.unscheduled = unscheduled;
            return;
        }
        if unscheduled == 0 {
            let next = (scheduled as f64 * GROWTH_RATE).max(1.0).ceil() as usize;
            counters.capacity = counters.capacity.max(next);
        } else if unscheduled > counters.unscheduled {
            let lost = unscheduled - counters.unscheduled;
            counters.capacity = scheduled.saturating_sub(lost);
        }
        counters.scheduled = scheduled;
        counters.unscheduled = unscheduled;
        if *counters != before {
            log::info!("Capacity adjusted: {}", describe(&counters));
        }
    }

    pub fn current(&self) -> usize {
        self.counters.lock().capacity
    }

    /// Unschedulable pods were observed.
    pub fn exceeded(&self) -> bool {
        self.counters.lock().unscheduled > 0
    }
}

impl std::fmt::Display for CapacityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&describe(&self.counters.lock()))
    }
}

fn describe(counters: &Counters) -> String {
    let mut s = format!(
        "[pods] capacity:{},scheduled:{}",
        counters.capacity, counters.scheduled
    );
    if counters.unscheduled > 0 {
        s.push_str(&format!(",UNSCHEDULED:{}", counters.unscheduled));
    }
    s
}

/// Refreshes the cluster view and adjusts the estimate until cancelled.
pub async fn capacity_process(
    monitor: Arc<CapacityMonitor>,
    cluster: Arc<Cluster>,
    interval: Duration,
    token: CancellationToken,
) {
    monitor.reset();
    log::info!("CapacityMonitor started.");
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(error) = cluster.refresh().await {
                    log::error!("Capacity refresh failed: {error}");
                }
                monitor.adjust(&cluster.task_pods());
            }
        }
    }
    log::info!("CapacityMonitor stopped.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};

    fn pod(phase: &str, unschedulable: bool) -> Arc<Pod> {
        let conditions = unschedulable.then(|| {
            vec![PodCondition {
                type_: "PodScheduled".to_string(),
                status: "False".to_string(),
                reason: Some("Unschedulable".to_string()),
                ..Default::default()
            }]
        });
        Arc::new(Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                conditions,
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn pods(running: usize, pending: usize, unschedulable: usize) -> Vec<Arc<Pod>> {
        let mut pods = Vec::new();
        pods.extend((0..running).map(|_| pod(POD_RUNNING, false)));
        pods.extend((0..pending).map(|_| pod(POD_PENDING, false)));
        pods.extend((0..unschedulable).map(|_| pod(POD_PENDING, true)));
        pods
    }

    #[test]
    fn test_capacity_grows() {
        let monitor = CapacityMonitor::default();
        assert_eq!(monitor.current(), 1);
        monitor.adjust(&pods(1, 0, 0));
        assert_eq!(monitor.current(), 2);
        monitor.adjust(&pods(20, 0, 0));
        assert_eq!(monitor.current(), 21);
        // Never shrinks while everything is scheduled.
        monitor.adjust(&pods(3, 0, 0));
        assert_eq!(monitor.current(), 21);
        assert!(!monitor.exceeded());
    }

    #[test]
    fn test_capacity_shrinks_on_unschedulable() {
        let monitor = CapacityMonitor::default();
        monitor.adjust(&pods(10, 0, 0));
        assert_eq!(monitor.current(), 11);
        monitor.adjust(&pods(8, 2, 3));
        assert!(monitor.exceeded());
        assert_eq!(monitor.current(), 7);
        // Unchanged while unscheduled does not grow.
        monitor.adjust(&pods(8, 2, 3));
        assert_eq!(monitor.current(), 7);
        assert_eq!(
            monitor.to_string(),
            "[pods] capacity:7,scheduled:10,UNSCHEDULED:3"
        );
    }

    #[test]
    fn test_capacity_never_negative() {
        let monitor = CapacityMonitor::default();
        monitor.adjust(&pods(1, 0, 0));
        monitor.adjust(&pods(1, 0, 5));
        assert_eq!(monitor.current(), 0);
        monitor.adjust(&pods(1, 0, 9));
        assert_eq!(monitor.current(), 0);
    }

    #[test]
    fn test_capacity_idle_keeps_estimate() {
        let monitor = CapacityMonitor::default();
        monitor.adjust(&pods(4, 0, 0));
        assert_eq!(monitor.current(), 5);
        monitor.adjust(&pods(0, 0, 2));
        assert_eq!(monitor.current(), 5);
        assert!(monitor.exceeded());
        monitor.adjust(&[]);
        assert!(!monitor.exceeded());
    }
}
