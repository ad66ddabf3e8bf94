//! Integration tests for the approval queue.

use std::sync::Arc;

use batua::*;
use futures::future::join_all;
use serde_json::json;

fn queue() -> (Arc<Store>, RequestQueue) {
    let store = Store::new(State::new(1));
    let queue = RequestQueue::new(Arc::clone(&store));
    (store, queue)
}

// =============================================================================
// Delivery
// =============================================================================

#[tokio::test]
async fn test_concurrent_requests_resolve_to_their_own_caller() {
    let (store, queue) = queue();

    let pending: Vec<PendingRequest> = (0..20)
        .map(|i| queue.enqueue("wallet_sendCalls", json!([i])))
        .collect();
    let ids: Vec<u64> = pending.iter().map(PendingRequest::id).collect();

    // resolve in reverse, answering each with its own id
    for id in ids.iter().rev() {
        assert!(queue.complete(*id, Ok(json!(id))));
    }

    let results = join_all(pending).await;
    for (id, result) in ids.iter().zip(results) {
        assert_eq!(result.unwrap(), json!(id));
    }
    assert!(store.get().request_queue.is_empty());
}

#[tokio::test]
async fn test_interleaved_resolution() {
    let (_store, queue) = queue();
    let a = queue.enqueue("eth_requestAccounts", json!([]));
    let b = queue.enqueue("wallet_sendCalls", json!([]));
    let c = queue.enqueue("wallet_sendCalls", json!([]));

    queue.complete(b.id(), Err(ProviderError::Unauthorized));
    assert_eq!(queue.pending().len(), 2);
    queue.complete(c.id(), Ok(json!("c")));
    queue.complete(a.id(), Ok(json!("a")));

    assert_eq!(a.await.unwrap(), json!("a"));
    assert_eq!(
        b.await.unwrap_err().as_provider(),
        Some(&ProviderError::Unauthorized)
    );
    assert_eq!(c.await.unwrap(), json!("c"));
}

#[tokio::test]
async fn test_emptying_queue_rejects_every_pending_caller_once() {
    let (store, queue) = queue();
    let done = queue.enqueue("wallet_sendCalls", json!([]));
    queue.complete(done.id(), Ok(json!("ok")));

    let pending: Vec<PendingRequest> = (0..5)
        .map(|_| queue.enqueue("eth_requestAccounts", json!([])))
        .collect();
    store.update(|state| state.request_queue.clear());

    assert_eq!(done.await.unwrap(), json!("ok"));
    for result in join_all(pending).await {
        assert!(result.unwrap_err().is_user_rejected());
    }

    // a later completion for a rejected id changes nothing
    assert!(!queue.complete(2, Ok(json!("late"))));
}

#[tokio::test]
async fn test_cancellation_is_a_rejection() {
    let (_store, queue) = queue();
    let pending = queue.enqueue("eth_requestAccounts", json!([]));
    queue.complete(pending.id(), Err(ProviderError::UserRejected));
    let err = pending.await.unwrap_err();
    assert!(err.is_user_rejected());
    assert_eq!(err.code(), 4001);
}

#[tokio::test]
async fn test_subscribers_see_queue_transitions() {
    let (store, queue) = queue();
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let _subscription = store.subscribe_selector(
        |s| s.request_queue.iter().map(|e| e.status.clone()).collect::<Vec<_>>(),
        {
            let seen = Arc::clone(&seen);
            move |next: &Vec<QueueStatus>, _prev: &Vec<QueueStatus>| {
                seen.lock().unwrap().push(next.clone())
            }
        },
    );

    let pending = queue.enqueue("eth_requestAccounts", json!([]));
    queue.complete(pending.id(), Ok(json!(1)));
    pending.await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![
            vec![QueueStatus::Pending],
            vec![QueueStatus::Success(json!(1))],
            vec![],
        ]
    );
}
