use std::sync::Mutex;

use tokio::sync::watch;
use tracing::debug;

use crate::error::{Error, Result};

use super::{FeedEvent, NewTodo, Snapshot, Subscription, Todo, TodoStore};

#[derive(Default)]
struct Collection {
    docs: Vec<Todo>,
    next_id: u64,
}

/// An in-process collection. Every write pushes the full snapshot to all
/// subscribers, the way a hosted store's listener would.
pub struct MemoryStore {
    collection: Mutex<Collection>,
    tx: watch::Sender<FeedEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(FeedEvent::Snapshot(Vec::new()));
        Self {
            collection: Mutex::new(Collection::default()),
            tx,
        }
    }

    fn write<T>(&self, f: impl FnOnce(&mut Collection) -> Result<T>) -> Result<T> {
        let mut collection = self
            .collection
            .lock()
            .map_err(|_| Error::Store("memory store lock poisoned".to_string()))?;
        let out = f(&mut collection)?;
        self.tx
            .send_replace(FeedEvent::Snapshot(collection.docs.clone()));
        Ok(out)
    }
}

impl TodoStore for MemoryStore {
    fn create(&self, todo: &NewTodo) -> Result<String> {
        self.write(|c| {
            c.next_id += 1;
            let id = format!("mem-{:06}", c.next_id);
            debug!(id = %id, text = %todo.text, "memory create");
            c.docs.push(todo.clone().with_id(id.clone()));
            Ok(id)
        })
    }

    fn set_completed(&self, id: &str, completed: bool) -> Result<()> {
        self.write(|c| {
            let doc = c
                .docs
                .iter_mut()
                .find(|d| d.id == id)
                .ok_or_else(|| Error::TodoNotFound(id.to_string()))?;
            doc.completed = completed;
            Ok(())
        })
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.write(|c| {
            c.docs.retain(|d| d.id != id);
            Ok(())
        })
    }

    fn snapshot(&self) -> Result<Snapshot> {
        let collection = self
            .collection
            .lock()
            .map_err(|_| Error::Store("memory store lock poisoned".to_string()))?;
        Ok(collection.docs.clone())
    }

    fn subscribe(&self) -> Result<Subscription> {
        let mut rx = self.tx.subscribe();
        rx.mark_changed();
        Ok(Subscription::new(rx, None))
    }
}
