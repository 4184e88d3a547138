//! Tests for tokio spawner utilities

use std::sync::Arc;

use prometheus_browser_pool::runtime::{LoopFault, TokioSpawner};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_spawner_spawn() {
    let spawner = TokioSpawner::new(tokio::runtime::Handle::current());

    let (tx, rx) = tokio::sync::oneshot::channel();
    spawner.spawn(async move {
        tx.send(123).unwrap();
    });

    let result = rx.await.expect("oneshot result");
    assert_eq!(result, 123);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_supervised_loop_panic_is_recorded() {
    let spawner = TokioSpawner::current();
    let fault = Arc::new(LoopFault::default());

    spawner.spawn_supervised(
        "doomed",
        async {
            panic!("boom");
        },
        Arc::clone(&fault),
    );

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while fault.get().is_none() {
        assert!(std::time::Instant::now() < deadline, "fault never recorded");
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert!(fault.get().unwrap().contains("doomed"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_supervised_loop_clean_exit_is_not_a_fault() {
    let spawner = TokioSpawner::current();
    let fault = Arc::new(LoopFault::default());
    let (tx, rx) = tokio::sync::oneshot::channel();

    spawner.spawn_supervised(
        "finite",
        async move {
            tx.send(()).unwrap();
        },
        Arc::clone(&fault),
    );

    rx.await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(fault.get().is_none());
}

#[test]
fn test_try_current_outside_runtime() {
    assert!(TokioSpawner::try_current().is_none());
}
