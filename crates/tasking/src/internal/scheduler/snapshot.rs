use std::fmt::Write;

use chrono::TimeDelta;
use k8s_openapi::api::core::v1::{Event, Pod};

use crate::internal::cluster::{ClusterClient, pod_name};
use crate::internal::common::error::TaskingError;
use crate::internal::model::task::{EventKind, Task};
use crate::internal::store::Store;

pub const SNAPSHOT_FILE: &str = "pod.yaml";

fn row(out: &mut String, columns: [&str; 5]) {
    let [kind, reason, age, reporter, message] = columns;
    let _ = writeln!(out, "  {kind:<8}{reason:<11}{age:<6}{reporter:<19}{message}");
}

fn age(event: &Event) -> String {
    let first = event.first_timestamp.as_ref().map(|t| t.0);
    let last = event.last_timestamp.as_ref().map(|t| t.0);
    let elapsed = match (first, last) {
        (Some(first), Some(last)) => last - first,
        _ => TimeDelta::zero(),
    };
    humantime::format_duration(elapsed.to_std().unwrap_or_default()).to_string()
}

fn reporter(event: &Event) -> &str {
    event
        .reporting_component
        .as_deref()
        .filter(|c| !c.is_empty())
        .or_else(|| event.source.as_ref().and_then(|s| s.component.as_deref()))
        .unwrap_or_default()
}

/// Pod description: the pod manifest followed by its event table.
pub fn describe(pod: &Pod, events: &[Event]) -> crate::Result<String> {
    let mut pod = pod.clone();
    pod.metadata.managed_fields = None;
    let mut out = String::from("---\n");
    out.push_str(&serde_yaml::to_string(&pod)?);
    out.push_str("\n---\n");
    out.push_str("Events: |\n");
    row(&mut out, ["Type", "Reason", "Age", "Reporter", "Message"]);
    row(
        &mut out,
        [
            "-------",
            "----------",
            "-----",
            "------------------",
            "------------------",
        ],
    );
    for event in events {
        row(
            &mut out,
            [
                event.type_.as_deref().unwrap_or_default(),
                event.reason.as_deref().unwrap_or_default(),
                &age(event),
                reporter(event),
                event.message.as_deref().unwrap_or_default(),
            ],
        );
    }
    Ok(out)
}

/// Writes the pod description into a new file attached to the task.
pub async fn snapshot(
    task: &mut Task,
    pod: &Pod,
    client: &dyn ClusterClient,
    store: &dyn Store,
) -> crate::Result<()> {
    let events = client.list_events(pod_name(pod)).await?;
    let content = describe(pod, &events)?;
    let file = store.create_file(SNAPSHOT_FILE)?;
    if let Err(error) = tokio::fs::write(&file.path, content).await {
        if let Err(e) = store.delete_file(file.id) {
            log::warn!("File {} not deleted: {e}", file.id);
        }
        return Err(error.into());
    }
    task.attach(file.id, SNAPSHOT_FILE);
    log::debug!("Task {} snapshot of pod {} attached.", task.id, pod_name(pod));
    Ok(())
}

/// Kills every started container that has not terminated.
///
/// A failed kill is only logged. Fails when the pod carries no status.
pub async fn ensure_terminated(
    task: &mut Task,
    pod: &Pod,
    client: &dyn ClusterClient,
) -> crate::Result<()> {
    let statuses = pod
        .status
        .as_ref()
        .ok_or_else(|| TaskingError::GenericError(format!("Pod {} has no status.", pod_name(pod))))?
        .container_statuses
        .as_deref()
        .unwrap_or_default();
    for status in statuses {
        let terminated = status
            .state
            .as_ref()
            .is_some_and(|s| s.terminated.is_some());
        if terminated || status.started != Some(true) {
            continue;
        }
        let command = ["sh", "-c", "kill 1"].map(String::from).to_vec();
        match client.exec(pod_name(pod), &status.name, command).await {
            Ok(()) => {
                task.event(
                    EventKind::ContainerKilled,
                    format!("container: '{}' had not terminated.", status.name),
                );
                log::info!("Container {}/{} killed.", pod_name(pod), status.name);
            }
            Err(error) => {
                log::info!(
                    "Container {}/{} kill failed: {error}",
                    pod_name(pod),
                    status.name
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::cluster::simulator::Simulator;
    use crate::internal::store::MemoryStore;
    use k8s_openapi::api::core::v1::{
        Container, ContainerState, ContainerStateRunning, ContainerStatus, PodSpec, PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ManagedFieldsEntry, ObjectMeta, Time};

    fn pod(containers: &[&str]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                generate_name: Some("task-1-".into()),
                managed_fields: Some(vec![ManagedFieldsEntry {
                    manager: Some("kubelet".into()),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: containers
                    .iter()
                    .map(|name| Container {
                        name: name.to_string(),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_describe_layout() {
        let now = chrono::Utc::now();
        let event = Event {
            type_: Some("Normal".into()),
            reason: Some("Pulled".into()),
            message: Some("Image pulled".into()),
            reporting_component: Some("kubelet".into()),
            first_timestamp: Some(Time(now - TimeDelta::seconds(90))),
            last_timestamp: Some(Time(now)),
            ..Default::default()
        };
        let text = describe(&pod(&["addon", "java"]), &[event]).unwrap();
        assert!(text.starts_with("---\n"));
        assert!(!text.contains("managedFields"));
        assert!(text.contains("\n---\nEvents: |\n"));
        assert!(text.contains("  Type    Reason     Age   Reporter           Message\n"));
        assert!(text.contains("  Normal  Pulled     1m 30skubelet            Image pulled\n"));
        // Every container appears once in the manifest.
        for name in ["addon", "java"] {
            assert_eq!(text.matches(&format!("name: {name}\n")).count(), 1);
        }
    }

    #[tokio::test]
    async fn test_snapshot_attaches_file() {
        let dir = tempfile::TempDir::with_prefix("tasking").unwrap();
        let store = MemoryStore::new(dir.path()).unwrap();
        let sim = Simulator::new("ns");
        let created = sim.create_pod(&pod(&["addon"])).await.unwrap();
        let mut task = Task::default();
        snapshot(&mut task, &created, &sim, &store).await.unwrap();
        assert_eq!(task.attached[0].name, SNAPSHOT_FILE);
        let file = store.get_file(task.attached[0].id).unwrap().unwrap();
        let text = std::fs::read_to_string(file.path).unwrap();
        assert!(text.contains("Scheduled  0s    simulator"));
    }

    #[tokio::test]
    async fn test_ensure_terminated_kills_started() {
        let sim = Simulator::new("ns");
        let mut created = sim.create_pod(&pod(&["addon", "java"])).await.unwrap();
        let running = |name: &str, started: bool| ContainerStatus {
            name: name.into(),
            started: Some(started),
            state: Some(ContainerState {
                running: Some(ContainerStateRunning::default()),
                ..Default::default()
            }),
            ..Default::default()
        };
        created.status = Some(PodStatus {
            container_statuses: Some(vec![running("addon", true), running("java", false)]),
            ..Default::default()
        });
        let mut task = Task::default();
        ensure_terminated(&mut task, &created, &sim).await.unwrap();
        assert_eq!(sim.execs().len(), 1);
        assert_eq!(sim.execs()[0].1, "addon");
        assert_eq!(
            task.last_event(EventKind::ContainerKilled).unwrap().reason,
            "container: 'addon' had not terminated."
        );

        sim.set_failing_exec(true);
        let mut task = Task::default();
        ensure_terminated(&mut task, &created, &sim).await.unwrap();
        assert!(task.events.is_empty());

        created.status = None;
        assert!(ensure_terminated(&mut task, &created, &sim).await.is_err());
    }
}
