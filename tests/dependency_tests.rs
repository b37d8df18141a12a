//! Dependency chains: ordering, atomic creation and cycle rejection.

mod common;

use serde_json::json;
use task_queue::error::TaskQueueError;
use task_queue::models::{NewTask, PageRequest, TaskFilter};
use task_queue::state_machine::TaskStatus;
use uuid::Uuid;

fn chain_specs(len: usize) -> Vec<NewTask> {
    (0..len)
        .map(|step| NewTask::new("EMIT_DOC", json!({ "step": step })))
        .collect()
}

#[tokio::test]
async fn chained_task_waits_for_its_predecessor() {
    let queue = common::queue_with_type("EMIT_DOC", 3, 0).await;
    let chain = queue.create_chain(chain_specs(2)).await.unwrap();
    let (first, second) = (chain[0].id, chain[1].id);

    assert!(queue.dependencies().is_satisfied(first).await.unwrap());
    assert!(!queue.dependencies().is_satisfied(second).await.unwrap());

    let store = queue.store();
    let batch = store.claim_batch("worker-a", 10).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, first);

    // Still blocked while the predecessor is only processing
    store.mark_processing(first).await.unwrap();
    assert!(store.claim_batch("worker-a", 10).await.unwrap().is_empty());

    store.mark_completed(first).await.unwrap();
    assert!(queue.dependencies().is_satisfied(second).await.unwrap());
    let batch = store.claim_batch("worker-a", 10).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, second);
}

#[tokio::test]
async fn failed_predecessor_keeps_successor_blocked() {
    let queue = common::queue_with_type("EMIT_DOC", 1, 0).await;
    let chain = queue.create_chain(chain_specs(2)).await.unwrap();
    let store = queue.store();

    store.claim_batch("worker-a", 10).await.unwrap();
    store.mark_processing(chain[0].id).await.unwrap();
    let failed = store.mark_failed(chain[0].id, "boom").await.unwrap();
    assert!(failed.retries_exhausted());

    assert!(store.claim_batch("worker-a", 10).await.unwrap().is_empty());
    let successor = queue.find(chain[1].id).await.unwrap().unwrap();
    assert_eq!(successor.status, TaskStatus::Pending);
}

#[tokio::test]
async fn chain_with_invalid_spec_persists_nothing() {
    let queue = common::queue_with_type("EMIT_DOC", 3, 0).await;
    let mut specs = chain_specs(3);
    specs.insert(1, NewTask::new("UNKNOWN_TYPE", json!({})));

    let err = queue.create_chain(specs).await.unwrap_err();
    assert_eq!(err, TaskQueueError::InvalidTaskType("UNKNOWN_TYPE".to_string()));

    let page = queue
        .admin()
        .list_tasks(&TaskFilter::default(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(page.meta.total, 0);
    assert!(queue.store().claim_batch("worker-a", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_chain_creates_nothing() {
    let queue = common::queue_with_type("EMIT_DOC", 3, 0).await;
    assert!(queue.create_chain(Vec::new()).await.unwrap().is_empty());
}

#[tokio::test]
async fn cycles_and_self_edges_are_rejected() {
    let queue = common::queue_with_type("EMIT_DOC", 3, 0).await;
    let chain = queue.create_chain(chain_specs(3)).await.unwrap();
    let graph = queue.dependencies();

    let err = graph.add_dependency(chain[0].id, chain[2].id).await.unwrap_err();
    assert_eq!(
        err,
        TaskQueueError::CycleDetected {
            task_id: chain[0].id,
            depends_on: chain[2].id,
        }
    );
    assert!(matches!(
        graph.add_dependency(chain[1].id, chain[1].id).await,
        Err(TaskQueueError::CycleDetected { .. })
    ));

    // A forward edge keeps the graph acyclic
    let edge = graph.add_dependency(chain[2].id, chain[0].id).await.unwrap();
    assert_eq!(edge.depends_on_task_id, chain[0].id);
    assert_eq!(graph.dependencies_of(chain[2].id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn claimed_task_cannot_gain_prerequisites() {
    let queue = common::queue_with_type("EMIT_DOC", 3, 0).await;
    let first = queue.enqueue(NewTask::new("EMIT_DOC", json!({}))).await.unwrap();
    queue.store().claim_batch("worker-a", 1).await.unwrap();
    let second = queue.enqueue(NewTask::new("EMIT_DOC", json!({}))).await.unwrap();

    let err = queue
        .dependencies()
        .add_dependency(first.id, second.id)
        .await
        .unwrap_err();
    assert!(matches!(err, TaskQueueError::InvalidDependency(_)));

    let missing = Uuid::new_v4();
    assert_eq!(
        queue.dependencies().add_dependency(second.id, missing).await.unwrap_err(),
        TaskQueueError::TaskNotFound(missing)
    );
}
