pub mod firestore;
pub mod memory;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{Config, StoreKind, resolve_api_key};
use crate::error::Result;

/// One document of the todo collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub text: String,
    pub completed: bool,
    pub date: String,
}

/// Fields of a todo before the store has assigned it an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewTodo {
    pub text: String,
    pub completed: bool,
    pub date: String,
}

impl NewTodo {
    pub fn new(text: impl Into<String>, date: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            completed: false,
            date: date.into(),
        }
    }

    pub fn with_id(self, id: impl Into<String>) -> Todo {
        Todo {
            id: id.into(),
            text: self.text,
            completed: self.completed,
            date: self.date,
        }
    }
}

/// Full contents of the collection, in the order the store delivered them.
pub type Snapshot = Vec<Todo>;

/// One item of a live feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Snapshot(Snapshot),
    /// The store could not read the collection. The feed stays open and the
    /// next successful read arrives as a `Snapshot`.
    Failed(String),
}

/// A live feed of collection snapshots and read failures.
///
/// Only the newest event is retained; a slow reader skips intermediate
/// ones. Dropping the subscription stops any background poller feeding it.
pub struct Subscription {
    rx: watch::Receiver<FeedEvent>,
    poller: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(rx: watch::Receiver<FeedEvent>, poller: Option<JoinHandle<()>>) -> Self {
        Self { rx, poller }
    }

    /// Wait for the next event. Returns `None` once the feed has closed.
    pub async fn next(&mut self) -> Option<FeedEvent> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Take a pending event without waiting.
    pub fn try_next(&mut self) -> Option<FeedEvent> {
        if self.rx.has_changed().unwrap_or(false) {
            Some(self.rx.borrow_and_update().clone())
        } else {
            None
        }
    }

    /// Stop the feed. No snapshot is delivered afterwards.
    pub fn cancel(mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }
}

/// Access to the single remote collection holding the todos.
pub trait TodoStore: Send + Sync {
    /// Create a document and return the id the store assigned to it.
    fn create(&self, todo: &NewTodo) -> Result<String>;

    /// Overwrite only the `completed` field of an existing document.
    fn set_completed(&self, id: &str, completed: bool) -> Result<()>;

    /// Delete a document. Deleting an absent id is not an error.
    fn delete(&self, id: &str) -> Result<()>;

    /// Read the whole collection once.
    fn snapshot(&self) -> Result<Snapshot>;

    /// Open a live feed of whole-collection snapshots. The first event
    /// delivered is the collection's current state, or the reason it could
    /// not be read.
    fn subscribe(&self) -> Result<Subscription>;
}

pub enum AnyStore {
    Firestore(firestore::FirestoreStore),
    Memory(memory::MemoryStore),
}

impl TodoStore for AnyStore {
    fn create(&self, todo: &NewTodo) -> Result<String> {
        match self {
            AnyStore::Firestore(s) => s.create(todo),
            AnyStore::Memory(s) => s.create(todo),
        }
    }

    fn set_completed(&self, id: &str, completed: bool) -> Result<()> {
        match self {
            AnyStore::Firestore(s) => s.set_completed(id, completed),
            AnyStore::Memory(s) => s.set_completed(id, completed),
        }
    }

    fn delete(&self, id: &str) -> Result<()> {
        match self {
            AnyStore::Firestore(s) => s.delete(id),
            AnyStore::Memory(s) => s.delete(id),
        }
    }

    fn snapshot(&self) -> Result<Snapshot> {
        match self {
            AnyStore::Firestore(s) => s.snapshot(),
            AnyStore::Memory(s) => s.snapshot(),
        }
    }

    fn subscribe(&self) -> Result<Subscription> {
        match self {
            AnyStore::Firestore(s) => s.subscribe(),
            AnyStore::Memory(s) => s.subscribe(),
        }
    }
}

/// Build the configured store.
pub fn open_store(config: &Config) -> Result<AnyStore> {
    match config.store {
        StoreKind::Memory => Ok(AnyStore::Memory(memory::MemoryStore::new())),
        StoreKind::Firestore => {
            let firebase = config.firebase()?;
            let client = firestore::RestClient::new(
                &firebase.endpoint,
                &firebase.project_id,
                &firebase.database,
                resolve_api_key(firebase),
                Duration::from_secs(config.request_timeout),
            );
            Ok(AnyStore::Firestore(firestore::FirestoreStore::new(
                Box::new(client),
                &config.collection,
                Duration::from_secs(config.poll_seconds),
            )))
        }
    }
}
