//! Behaviour of the quorum lock over scripted nodes
//!
//! Every node here answers from a script and counts the calls it receives,
//! so the tests can check exactly which nodes were released.

mod common;

use aikv_redlock::quorum::RetryPolicy;
use aikv_redlock::{AttemptBudget, LockError, QuorumLock, QuorumPolicy, QuorumSettings};
use common::{as_node_locks, scripted, ScriptedNode};
use std::sync::Arc;
use std::time::Duration;

use common::Behavior::{Acquire, Fail, Refuse};

fn settings(drift: f64) -> QuorumSettings {
    QuorumSettings {
        policy: QuorumPolicy::Majority,
        clock_drift_factor: drift,
        retry: RetryPolicy {
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(200),
            max_wait: None,
            attempt_budget_per_node: Duration::from_millis(200),
        },
    }
}

fn quorum_lock(nodes: &[Arc<ScriptedNode>]) -> QuorumLock {
    QuorumLock::new(as_node_locks(nodes), settings(0.0)).unwrap()
}

#[test]
fn test_majority_thresholds() {
    for (n, expected) in [(3, 2), (4, 3), (5, 3), (6, 4), (9, 5)] {
        let nodes = scripted(&vec![Acquire; n]);
        assert_eq!(quorum_lock(&nodes).quorum(), expected, "n = {}", n);
    }
}

#[tokio::test]
async fn test_two_nodes_rejected_before_contact() {
    let nodes = scripted(&[Acquire, Acquire]);
    let result = QuorumLock::new(as_node_locks(&nodes), settings(0.0));

    assert!(matches!(
        result,
        Err(LockError::InsufficientNodes {
            required: 3,
            actual: 2
        })
    ));
    assert!(nodes.iter().all(|node| node.attempts() == 0));
}

#[tokio::test]
async fn test_three_of_five_is_granted() {
    let nodes = scripted(&[Acquire, Fail, Acquire, Refuse, Acquire]);
    let lock = quorum_lock(&nodes);

    assert!(lock.try_lock(AttemptBudget::from_millis(5000)).await);

    // Nothing to roll back: acquired nodes stay locked, the others untouched
    for node in &nodes {
        assert_eq!(node.attempts(), 1);
        assert_eq!(node.unlocks(), 0);
    }
    assert!(nodes[0].is_held());
    assert!(nodes[2].is_held());
    assert!(nodes[4].is_held());
}

#[tokio::test]
async fn test_two_of_five_rolls_back_acquired_nodes() {
    let nodes = scripted(&[Refuse, Acquire, Fail, Acquire, Refuse]);
    let lock = quorum_lock(&nodes);

    assert!(!lock.try_lock(AttemptBudget::from_millis(5000)).await);

    let released: Vec<usize> = nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| node.unlocks() > 0)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(released, vec![1, 3]);
    assert_eq!(nodes[1].unlocks(), 1);
    assert_eq!(nodes[3].unlocks(), 1);
    assert!(nodes.iter().all(|node| !node.is_held()));
}

#[tokio::test(start_paused = true)]
async fn test_slow_quorum_is_rolled_back() {
    let slow = Duration::from_millis(900);
    let nodes = vec![
        ScriptedNode::new("node-0", Acquire).with_delay(slow),
        ScriptedNode::new("node-1", Refuse),
        ScriptedNode::new("node-2", Acquire).with_delay(slow),
        ScriptedNode::new("node-3", Fail),
        ScriptedNode::new("node-4", Acquire).with_delay(slow),
    ];
    let lock = QuorumLock::new(as_node_locks(&nodes), settings(0.1)).unwrap();

    let outcome = lock.try_acquire(AttemptBudget::from_millis(1000)).await;

    assert!(!outcome.granted);
    assert_eq!(outcome.acquired_count(), 3);
    assert!(outcome.elapsed >= slow);
    for i in [0, 2, 4] {
        assert_eq!(nodes[i].unlocks(), 1, "node-{} not rolled back", i);
        assert!(!nodes[i].is_held());
    }
    assert_eq!(nodes[1].unlocks(), 0);
    assert_eq!(nodes[3].unlocks(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_default_settings_grant_until_the_deadline() {
    let delayed = |delay| {
        vec![
            ScriptedNode::new("node-0", Acquire).with_delay(delay),
            ScriptedNode::new("node-1", Acquire).with_delay(delay),
            ScriptedNode::new("node-2", Acquire).with_delay(delay),
        ]
    };

    // 5ms left is still a valid lock
    let nodes = delayed(Duration::from_millis(995));
    let lock = QuorumLock::new(as_node_locks(&nodes), QuorumSettings::default()).unwrap();
    let outcome = lock.try_acquire(AttemptBudget::from_millis(1000)).await;
    assert!(outcome.granted);
    assert_eq!(outcome.acquired_count(), 3);
    assert_eq!(outcome.validity, Some(Duration::from_millis(5)));
    assert!(nodes.iter().all(|node| node.unlocks() == 0));

    // Nothing left is not
    let nodes = delayed(Duration::from_millis(1000));
    let lock = QuorumLock::new(as_node_locks(&nodes), QuorumSettings::default()).unwrap();
    let outcome = lock.try_acquire(AttemptBudget::from_millis(1000)).await;
    assert!(!outcome.granted);
    assert_eq!(outcome.validity, None);
}

#[tokio::test(start_paused = true)]
async fn test_decision_ignores_node_order() {
    let patterns = [
        [Acquire, Acquire, Acquire, Refuse, Fail],
        [Fail, Refuse, Acquire, Acquire, Acquire],
        [Acquire, Fail, Acquire, Refuse, Acquire],
    ];
    for pattern in patterns {
        let nodes = scripted(&pattern);
        assert!(quorum_lock(&nodes)
            .try_lock(AttemptBudget::from_millis(1000))
            .await);
    }
}

#[tokio::test]
async fn test_unlock_reaches_every_node_despite_outage() {
    let nodes = scripted(&[Acquire; 5]);
    let lock = quorum_lock(&nodes);
    assert!(lock.try_lock(AttemptBudget::from_millis(5000)).await);

    nodes[2].set_reachable(false);
    let report = lock.unlock().await;

    assert_eq!(report.attempted, 5);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, "node-2");
    assert!(nodes.iter().all(|node| node.unlocks() == 1));
    assert!(nodes
        .iter()
        .enumerate()
        .all(|(i, node)| i == 2 || !node.is_held()));
}

#[tokio::test]
async fn test_unlock_twice_is_harmless() {
    let nodes = scripted(&[Acquire; 3]);
    let lock = quorum_lock(&nodes);
    assert!(lock.try_lock(AttemptBudget::from_millis(3000)).await);

    assert!(lock.unlock().await.is_clean());

    // Second release finds nothing held; failures are reported, not raised
    let report = lock.unlock().await;
    assert_eq!(report.attempted, 3);
    assert!(nodes.iter().all(|node| node.unlocks() == 2));
}

#[tokio::test]
async fn test_unlock_releases_nodes_that_reported_failure() {
    // node-1 committed nothing as far as the client knows, but is still released
    let nodes = scripted(&[Acquire, Fail, Acquire]);
    let lock = quorum_lock(&nodes);
    assert!(lock.try_lock(AttemptBudget::from_millis(3000)).await);

    lock.unlock().await;
    assert_eq!(nodes[1].unlocks(), 1);
}

#[tokio::test]
async fn test_force_unlock_uses_force_primitive_everywhere() {
    let nodes = scripted(&[Acquire, Acquire, Refuse]);
    let lock = quorum_lock(&nodes);
    assert!(lock.try_lock(AttemptBudget::from_millis(3000)).await);

    nodes[1].set_reachable(false);
    let report = lock.force_unlock().await;

    assert_eq!(report.released(), 2);
    assert!(nodes.iter().all(|node| node.force_unlocks() == 1));
    assert!(nodes.iter().all(|node| node.unlocks() == 0));
}

#[tokio::test(start_paused = true)]
async fn test_blocking_lock_retries_until_granted() {
    let nodes = scripted(&[Refuse, Refuse, Refuse]);
    let lock = quorum_lock(&nodes);

    let switcher = {
        let nodes = nodes.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            nodes[0].set_behavior(Acquire);
            nodes[2].set_behavior(Acquire);
        })
    };

    let outcome = lock.lock().await.unwrap();
    switcher.await.unwrap();

    assert!(outcome.granted);
    assert_eq!(outcome.acquired_count(), 2);
    assert!(nodes[0].attempts() > 1);
}

#[tokio::test(start_paused = true)]
async fn test_blocking_lock_gives_up_after_max_wait() {
    let nodes = scripted(&[Refuse, Fail, Refuse]);
    let mut settings = settings(0.0);
    settings.retry.max_wait = Some(Duration::from_secs(2));
    let lock = QuorumLock::new(as_node_locks(&nodes), settings).unwrap();

    let start = tokio::time::Instant::now();
    let result = lock.lock().await;

    assert!(matches!(result, Err(LockError::AcquireTimeout(_))));
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert!(nodes[0].attempts() > 1);
}

#[tokio::test(start_paused = true)]
async fn test_max_wait_cuts_a_long_attempt_short() {
    let nodes = vec![
        ScriptedNode::new("node-0", Refuse),
        ScriptedNode::new("node-1", Refuse).with_delay(Duration::from_secs(60)),
        ScriptedNode::new("node-2", Refuse),
    ];
    // A full attempt would get 3 x 10s
    let mut settings = settings(0.0);
    settings.retry.attempt_budget_per_node = Duration::from_secs(10);
    settings.retry.max_wait = Some(Duration::from_secs(2));
    let lock = QuorumLock::new(as_node_locks(&nodes), settings).unwrap();

    let start = tokio::time::Instant::now();
    let result = lock.lock().await;

    assert!(matches!(result, Err(LockError::AcquireTimeout(_))));
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert!(start.elapsed() < Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_attempt_waits_for_every_node() {
    let nodes = vec![
        ScriptedNode::new("node-0", Acquire).with_delay(Duration::from_secs(30)),
        ScriptedNode::new("node-1", Acquire),
        ScriptedNode::new("node-2", Acquire),
    ];
    let lock = quorum_lock(&nodes);

    let outcome = lock.try_acquire(AttemptBudget::from_millis(-1)).await;

    assert!(outcome.granted);
    assert_eq!(outcome.acquired_count(), 3);
    assert_eq!(outcome.validity, None);
}
