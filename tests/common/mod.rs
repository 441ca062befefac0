#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use firetodo::store::memory::MemoryStore;
use firetodo::store::{Todo, TodoStore};
use firetodo::view::{TodoView, WriteFailure};
use tokio::sync::mpsc;

/// An active view over `store` that has applied its initial snapshot.
pub async fn active_view<S: TodoStore + 'static>(
    store: &Arc<S>,
) -> (TodoView<S>, mpsc::UnboundedReceiver<WriteFailure>) {
    let (mut view, failures) = TodoView::new(Arc::clone(store));
    view.activate().unwrap();
    assert!(next(&mut view).await);
    (view, failures)
}

/// Wait for the next pushed snapshot, failing the test instead of hanging.
pub async fn next<S: TodoStore + 'static>(view: &mut TodoView<S>) -> bool {
    tokio::time::timeout(Duration::from_secs(5), view.next_snapshot())
        .await
        .expect("timed out waiting for snapshot")
}

pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

pub fn find<'a>(tasks: &'a [Todo], text: &str) -> Option<&'a Todo> {
    tasks.iter().find(|t| t.text == text)
}
