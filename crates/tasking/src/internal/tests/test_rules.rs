use crate::internal::model::task::{EventKind, TaskState};
use crate::internal::tests::utils::env::{TestEnv, test_config};
use crate::internal::tests::utils::task::TaskConfigBuilder;

#[tokio::test]
async fn test_isolated_runs_alone() {
    let env = TestEnv::new(test_config(), 10).await;
    let p = env.submit(
        TaskConfigBuilder::default()
            .kind("language-discovery")
            .application(1)
            .isolated(true),
    );
    let q = env.submit(
        TaskConfigBuilder::default()
            .kind("tech-discovery")
            .application(1),
    );

    env.tick().await;
    assert_eq!(env.state(p.id), TaskState::Pending);
    let postponed = env.task(q.id);
    assert_eq!(postponed.state, TaskState::Postponed);
    let reason = &postponed.last_event(EventKind::Postponed).unwrap().reason;
    assert!(reason.contains(&p.id.to_string()));
    assert!(env.pods_of(q.id).is_empty());

    // Still alone while running.
    env.tick_running().await;
    assert_eq!(env.state(p.id), TaskState::Running);
    assert_eq!(env.state(q.id), TaskState::Postponed);

    env.tick_terminated().await;
    assert_eq!(env.state(p.id), TaskState::Succeeded);
    assert_eq!(env.state(q.id), TaskState::Pending);
}

#[tokio::test]
async fn test_unique_per_subject() {
    let env = TestEnv::new(test_config(), 10).await;
    let first = env.submit(
        TaskConfigBuilder::default()
            .kind("language-discovery")
            .application(1),
    );
    let second = env.submit(
        TaskConfigBuilder::default()
            .kind("language-discovery")
            .application(1),
    );
    let other = env.submit(
        TaskConfigBuilder::default()
            .kind("language-discovery")
            .application(2),
    );

    env.tick().await;
    assert_eq!(env.state(first.id), TaskState::Pending);
    assert_eq!(env.state(second.id), TaskState::Postponed);
    assert_eq!(env.state(other.id), TaskState::Pending);
    assert_eq!(
        env.task(second.id)
            .last_event(EventKind::Postponed)
            .unwrap()
            .reason,
        format!("Rule:Unique matched:{}, other:{}", second.id, first.id)
    );

    env.tick_running().await;
    env.tick_terminated().await;
    assert_eq!(env.state(first.id), TaskState::Succeeded);
    assert_eq!(env.state(second.id), TaskState::Pending);
}

#[tokio::test]
async fn test_escalation_restarts_pending_dependency() {
    let env = TestEnv::new(test_config(), 1).await;
    let a = env.submit(
        TaskConfigBuilder::default()
            .kind("language-discovery")
            .priority(1)
            .application(1),
    );
    env.tick().await;
    assert_eq!(env.state(a.id), TaskState::Pending);
    let first_pod = env.pods_of(a.id);
    assert_eq!(first_pod.len(), 1);

    let b = env.submit(
        TaskConfigBuilder::default()
            .kind("analyzer")
            .priority(10)
            .application(1),
    );
    let c = env.submit(
        TaskConfigBuilder::default()
            .kind("language-discovery")
            .priority(5)
            .application(2),
    );

    env.tick().await;
    let escalated = env.task(a.id);
    assert_eq!(escalated.priority, 10);
    assert_eq!(escalated.state, TaskState::Ready);
    assert_eq!(
        escalated.last_event(EventKind::Escalated).unwrap().reason,
        format!("Escalated:{}, by:{}", a.id, b.id)
    );
    assert!(escalated.last_event(EventKind::PodDeleted).is_some());
    assert!(env.pods_of(a.id).is_empty());
    assert_eq!(env.state(b.id), TaskState::Postponed);

    // The escalated dependency goes first.
    env.tick().await;
    assert_eq!(env.state(a.id), TaskState::Pending);
    assert_ne!(env.pods_of(a.id), first_pod);
    assert_eq!(env.state(c.id), TaskState::Ready);
    assert_eq!(env.state(b.id), TaskState::Postponed);
}

#[tokio::test]
async fn test_running_task_does_not_escalate() {
    let env = TestEnv::new(test_config(), 10).await;
    let analyzer = env.submit(
        TaskConfigBuilder::default()
            .kind("analyzer")
            .priority(10)
            .application(1),
    );
    env.tick().await;
    env.tick_running().await;
    assert_eq!(env.state(analyzer.id), TaskState::Running);

    let discovery = env.submit(
        TaskConfigBuilder::default()
            .kind("language-discovery")
            .priority(1)
            .application(1),
    );
    env.tick().await;
    let started = env.task(discovery.id);
    assert_eq!(started.state, TaskState::Pending);
    assert_eq!(started.priority, 1);
    assert!(started.last_event(EventKind::Escalated).is_none());
    assert_eq!(env.state(analyzer.id), TaskState::Running);
}
