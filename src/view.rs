use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::store::{FeedEvent, NewTodo, Snapshot, Subscription, Todo, TodoStore};

/// Local display state. `tasks` mirrors the last snapshot the store pushed;
/// the pending fields hold what the user is typing for the next todo.
/// `sync_error` is set while the live feed cannot read the collection and
/// cleared by the next snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewState {
    pub tasks: Vec<Todo>,
    pub pending_text: String,
    pub pending_date: String,
    pub sync_error: Option<String>,
}

/// A write sent to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Create { text: String, date: String },
    SetCompleted { id: String, completed: bool },
    Delete { id: String },
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOp::Create { text, .. } => write!(f, "add {text:?}"),
            WriteOp::SetCompleted { id, completed: true } => write!(f, "complete {id}"),
            WriteOp::SetCompleted { id, completed: false } => write!(f, "reopen {id}"),
            WriteOp::Delete { id } => write!(f, "delete {id}"),
        }
    }
}

/// A write the store rejected.
#[derive(Debug)]
pub struct WriteFailure {
    pub op: WriteOp,
    pub error: String,
}

impl fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.op, self.error)
    }
}

enum WriteHandle {
    Running(JoinHandle<Result<()>>),
    Done(Result<()>),
}

/// An in-flight write. Dropping it leaves the write running; any failure is
/// still logged and reported on the view's failure channel.
pub struct PendingWrite {
    op: WriteOp,
    handle: WriteHandle,
}

impl PendingWrite {
    pub fn op(&self) -> &WriteOp {
        &self.op
    }

    /// Wait for the store to acknowledge the write.
    pub async fn wait(self) -> Result<()> {
        match self.handle {
            WriteHandle::Running(handle) => handle
                .await
                .map_err(|e| Error::Store(format!("write task for {} died: {e}", self.op)))?,
            WriteHandle::Done(result) => result,
        }
    }
}

/// The todo list controller: turns user intent into store writes and keeps
/// `tasks` mirrored to the collection through a live subscription.
///
/// Writes never touch `tasks` directly. The list changes only when the next
/// snapshot arrives. Writes run on tokio's blocking pool when called inside a
/// runtime and inline otherwise; the async methods need a tokio runtime.
pub struct TodoView<S> {
    store: Arc<S>,
    state: ViewState,
    subscription: Option<Subscription>,
    failures: mpsc::UnboundedSender<WriteFailure>,
}

impl<S: TodoStore + 'static> TodoView<S> {
    /// Create an inactive view plus the receiving end of its failure channel.
    pub fn new(store: Arc<S>) -> (Self, mpsc::UnboundedReceiver<WriteFailure>) {
        let (failures, failures_rx) = mpsc::unbounded_channel();
        let view = Self {
            store,
            state: ViewState::default(),
            subscription: None,
            failures,
        };
        (view, failures_rx)
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn tasks(&self) -> &[Todo] {
        &self.state.tasks
    }

    pub fn is_active(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn set_pending_text(&mut self, text: impl Into<String>) {
        self.state.pending_text = text.into();
    }

    pub fn set_pending_date(&mut self, date: impl Into<String>) {
        self.state.pending_date = date.into();
    }

    pub fn pending_text_mut(&mut self) -> &mut String {
        &mut self.state.pending_text
    }

    pub fn pending_date_mut(&mut self) -> &mut String {
        &mut self.state.pending_date
    }

    /// Open the live subscription. Calling this on an active view does nothing.
    pub fn activate(&mut self) -> Result<()> {
        if self.subscription.is_none() {
            self.subscription = Some(self.store.subscribe()?);
            info!("subscribed to todo collection");
        }
        Ok(())
    }

    /// Cancel the live subscription; no further snapshots are applied.
    pub fn deactivate(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
            info!("unsubscribed from todo collection");
        }
    }

    /// Replace `tasks` wholesale with a snapshot.
    pub fn apply_snapshot(&mut self, snapshot: Snapshot) {
        debug!(count = snapshot.len(), "applying snapshot");
        self.state.tasks = snapshot;
        self.state.sync_error = None;
    }

    /// Apply one feed event. A failure keeps the last good `tasks`.
    pub fn apply_event(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Snapshot(snapshot) => self.apply_snapshot(snapshot),
            FeedEvent::Failed(error) => {
                warn!(error = %error, "live feed cannot read todo collection");
                self.state.sync_error = Some(error);
            }
        }
    }

    /// Wait for the next feed event and apply it. Returns `false` when the
    /// view is inactive or the feed has closed.
    pub async fn next_snapshot(&mut self) -> bool {
        let Some(subscription) = self.subscription.as_mut() else {
            return false;
        };
        match subscription.next().await {
            Some(event) => {
                self.apply_event(event);
                true
            }
            None => false,
        }
    }

    /// Apply a feed event if one is waiting. Returns whether one was.
    pub fn poll_snapshot(&mut self) -> bool {
        match self.subscription.as_mut().and_then(Subscription::try_next) {
            Some(event) => {
                self.apply_event(event);
                true
            }
            None => false,
        }
    }

    /// Read the collection once and apply it, without a subscription.
    pub async fn refresh(&mut self) -> Result<()> {
        let store = Arc::clone(&self.store);
        let snapshot = tokio::task::spawn_blocking(move || store.snapshot())
            .await
            .map_err(|e| Error::Store(format!("snapshot task died: {e}")))??;
        self.apply_snapshot(snapshot);
        Ok(())
    }

    /// Create a todo from the pending fields. Whitespace-only text issues no
    /// write. The pending fields are cleared as soon as the write is sent.
    pub fn add(&mut self) -> Option<PendingWrite> {
        if self.state.pending_text.trim().is_empty() {
            debug!("ignoring add with empty text");
            return None;
        }
        let text = std::mem::take(&mut self.state.pending_text);
        let date = std::mem::take(&mut self.state.pending_date);
        let new = NewTodo::new(text.clone(), date.clone());
        Some(self.spawn_write(WriteOp::Create { text, date }, move |store| {
            store.create(&new).map(|_| ())
        }))
    }

    /// Write the negation of the todo's current `completed` flag. Ids absent
    /// from the local snapshot issue no write.
    pub fn toggle(&self, id: &str) -> Option<PendingWrite> {
        let Some(todo) = self.state.tasks.iter().find(|t| t.id == id) else {
            debug!(id, "ignoring toggle of unknown todo");
            return None;
        };
        let id = todo.id.clone();
        let completed = !todo.completed;
        let op = WriteOp::SetCompleted {
            id: id.clone(),
            completed,
        };
        Some(self.spawn_write(op, move |store| store.set_completed(&id, completed)))
    }

    pub fn delete(&self, id: &str) -> PendingWrite {
        let id = id.to_string();
        let op = WriteOp::Delete { id: id.clone() };
        self.spawn_write(op, move |store| store.delete(&id))
    }

    /// Delete every todo marked completed in the local snapshot, one
    /// independent write each. A failed delete does not stop the others.
    pub fn delete_completed(&self) -> Vec<PendingWrite> {
        self.state
            .tasks
            .iter()
            .filter(|t| t.completed)
            .map(|t| self.delete(&t.id))
            .collect()
    }

    /// Whether the "delete completed" action should be offered.
    pub fn shows_delete_completed(&self) -> bool {
        self.state.tasks.iter().any(|t| t.completed)
    }

    fn spawn_write<F>(&self, op: WriteOp, write: F) -> PendingWrite
    where
        F: FnOnce(&S) -> Result<()> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let failures = self.failures.clone();
        let task_op = op.clone();
        let run = move || {
            let result = write(store.as_ref());
            match &result {
                Ok(()) => debug!(op = %task_op, "write acknowledged"),
                Err(e) => {
                    warn!(op = %task_op, error = %e, "write failed");
                    let _ = failures.send(WriteFailure {
                        op: task_op,
                        error: e.to_string(),
                    });
                }
            }
            result
        };
        let handle = match Handle::try_current() {
            Ok(runtime) => WriteHandle::Running(runtime.spawn_blocking(run)),
            Err(_) => WriteHandle::Done(run()),
        };
        PendingWrite { op, handle }
    }
}
