use cart_sync::CartEvent;
use cart_test_utils::{
    drain, key, settle, setup_coalescer, setup_coalescer_with, BackendCall, ScriptedBackend,
};
use cart_types::{CoalescerConfig, RateLimitPolicy};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[tokio::test(start_paused = true)]
async fn test_burst_collapses_into_one_write() {
    let backend = Arc::new(ScriptedBackend::new());
    let cart = setup_coalescer(backend.clone());
    let line = key("v1");

    cart.update_quantity(line.clone(), 1);
    sleep(Duration::from_millis(150)).await;
    cart.update_quantity(line.clone(), 2);
    sleep(Duration::from_millis(150)).await;
    cart.update_quantity(line.clone(), 3);

    // Quiet period restarts on every accepted interaction
    sleep(Duration::from_millis(400)).await;
    assert!(backend.writes().is_empty());

    sleep(Duration::from_millis(200)).await;
    assert_eq!(backend.writes(), vec![BackendCall::Add(line.clone(), 3)]);
    assert_eq!(cart.view(&line).unwrap().quantity, 3);
    assert_eq!(cart.pending_writes(&line), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rapid_taps_send_final_value() {
    let backend = Arc::new(ScriptedBackend::new());
    let cart = setup_coalescer(backend.clone());
    let line = key("a");

    cart.update_quantity(line.clone(), 2);
    sleep(Duration::from_millis(50)).await;
    cart.update_quantity(line.clone(), 3);
    assert_eq!(cart.view(&line).unwrap().quantity, 3);

    sleep(Duration::from_millis(600)).await;
    assert_eq!(backend.writes(), vec![BackendCall::Add(line.clone(), 3)]);
    assert_eq!(cart.view(&line).unwrap().quantity, 3);
}

#[tokio::test(start_paused = true)]
async fn test_drop_policy_ignores_limited_taps() {
    let backend = Arc::new(ScriptedBackend::new());
    let config = CoalescerConfig::default().with_rate_limit_policy(RateLimitPolicy::Drop);
    let cart = setup_coalescer_with(backend.clone(), config);
    let line = key("a");

    cart.update_quantity(line.clone(), 2);
    sleep(Duration::from_millis(50)).await;
    cart.update_quantity(line.clone(), 3);
    assert_eq!(cart.view(&line).unwrap().quantity, 2);

    sleep(Duration::from_millis(600)).await;
    assert_eq!(backend.writes(), vec![BackendCall::Add(line, 2)]);
}

#[tokio::test(start_paused = true)]
async fn test_lines_debounce_independently() {
    let backend = Arc::new(ScriptedBackend::new());
    let cart = setup_coalescer(backend.clone());

    cart.update_quantity(key("a"), 1);
    sleep(Duration::from_millis(300)).await;
    cart.update_quantity(key("b"), 4);

    sleep(Duration::from_millis(250)).await;
    assert_eq!(backend.writes(), vec![BackendCall::Add(key("a"), 1)]);

    sleep(Duration::from_millis(300)).await;
    assert_eq!(
        backend.writes(),
        vec![BackendCall::Add(key("a"), 1), BackendCall::Add(key("b"), 4)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_edit_during_flight_is_replayed_after_completion() {
    let backend = Arc::new(ScriptedBackend::held());
    let cart = setup_coalescer(backend.clone());
    let line = key("v1");

    cart.update_quantity(line.clone(), 2);
    sleep(Duration::from_millis(600)).await;
    assert_eq!(backend.writes(), vec![BackendCall::Add(line.clone(), 2)]);
    assert_eq!(cart.pending_writes(&line), 1);

    cart.update_quantity(line.clone(), 4);
    assert_eq!(cart.pending_writes(&line), 2);
    assert_eq!(cart.view(&line).unwrap().quantity, 4);

    // Debounce expires while the first write is still out
    sleep(Duration::from_millis(600)).await;
    assert_eq!(backend.writes().len(), 1);
    assert_eq!(cart.pending_writes(&line), 2);

    backend.release(1);
    settle().await;
    assert_eq!(cart.view(&line).unwrap().quantity, 4);
    assert_eq!(cart.pending_writes(&line), 1);

    backend.release(1);
    sleep(Duration::from_millis(600)).await;
    assert_eq!(
        backend.writes(),
        vec![
            BackendCall::Add(line.clone(), 2),
            BackendCall::Set(line.clone(), 4)
        ]
    );
    assert_eq!(cart.pending_writes(&line), 0);
    assert_eq!(cart.view(&line).unwrap().quantity, 4);
    assert_eq!(backend.max_line_concurrency(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_settled_edit_is_not_resent() {
    let backend = Arc::new(ScriptedBackend::held());
    let cart = setup_coalescer(backend.clone());
    let line = key("v1");

    cart.update_quantity(line.clone(), 2);
    sleep(Duration::from_millis(600)).await;
    cart.update_quantity(line.clone(), 5);
    sleep(Duration::from_millis(150)).await;
    cart.update_quantity(line.clone(), 2);
    sleep(Duration::from_millis(600)).await;

    backend.release(2);
    sleep(Duration::from_millis(1000)).await;

    assert_eq!(backend.writes(), vec![BackendCall::Add(line.clone(), 2)]);
    assert_eq!(cart.pending_writes(&line), 0);
    assert_eq!(cart.view(&line).unwrap().quantity, 2);
}

#[tokio::test(start_paused = true)]
async fn test_pending_count_is_published() {
    let backend = Arc::new(ScriptedBackend::new());
    let cart = setup_coalescer(backend.clone());
    let mut events = cart.subscribe();
    let line = key("v1");

    cart.update_quantity(line.clone(), 2);
    sleep(Duration::from_millis(600)).await;

    let counts: Vec<usize> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            CartEvent::PendingChanged { pending, .. } => Some(pending),
            _ => None,
        })
        .collect();
    assert_eq!(counts, vec![1, 0]);
    assert!(!cart.is_saving(&line));
}
