use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::task::{NewTask, Task, TaskPatch};

/// A change to one owner's task list, as reported by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ChangeEvent {
    Insert(Task),
    Update(Task),
    Delete { id: Uuid, owner_id: String },
}

impl ChangeEvent {
    pub fn owner_id(&self) -> &str {
        match self {
            Self::Insert(task) | Self::Update(task) => &task.owner_id,
            Self::Delete { owner_id, .. } => owner_id,
        }
    }

    pub fn task_id(&self) -> Uuid {
        match self {
            Self::Insert(task) | Self::Update(task) => task.id,
            Self::Delete { id, .. } => *id,
        }
    }
}

pub type ChangeCallback = Box<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Storage and notification primitives the view model consumes. Every
/// operation is scoped to a single owner.
pub trait TaskBackend {
    fn list_tasks(&self, owner_id: &str) -> anyhow::Result<Vec<Task>>;

    /// Assigns the id and creation time; the task starts pending.
    fn create_task(&self, owner_id: &str, fields: NewTask) -> anyhow::Result<Task>;

    fn update_task(&self, id: Uuid, patch: &TaskPatch) -> anyhow::Result<Task>;

    fn delete_task(&self, id: Uuid) -> anyhow::Result<()>;

    fn subscribe(&self, owner_id: &str, callback: ChangeCallback) -> anyhow::Result<Subscription>;
}

/// Live change subscription. Dropping the handle unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

struct Listener {
    id: u64,
    owner_id: String,
    callback: ChangeCallback,
}

#[derive(Default)]
struct FeedState {
    next_id: u64,
    listeners: Vec<Listener>,
}

/// In-process fan-out of change events to per-owner listeners.
/// Callbacks run while the feed is locked and must not subscribe or
/// publish themselves.
#[derive(Clone, Default)]
pub struct ChangeFeed {
    state: Arc<Mutex<FeedState>>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, owner_id: &str, callback: ChangeCallback) -> Subscription {
        let id = {
            let mut state = self.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.listeners.push(Listener {
                id,
                owner_id: owner_id.to_string(),
                callback,
            });
            id
        };
        debug!(listener = id, owner = %owner_id, "subscribed to changes");

        let weak: Weak<Mutex<FeedState>> = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                state.lock().listeners.retain(|listener| listener.id != id);
                debug!(listener = id, "unsubscribed from changes");
            }
        })
    }

    pub fn publish(&self, event: &ChangeEvent) {
        let state = self.state.lock();
        let mut delivered = 0_usize;
        for listener in state
            .listeners
            .iter()
            .filter(|listener| listener.owner_id == event.owner_id())
        {
            (listener.callback)(event);
            delivered += 1;
        }
        trace!(task = %event.task_id(), delivered, "published change event");
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }
}

impl fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use uuid::Uuid;

    use super::{ChangeEvent, ChangeFeed};

    fn delete_event(owner: &str) -> ChangeEvent {
        ChangeEvent::Delete {
            id: Uuid::new_v4(),
            owner_id: owner.to_string(),
        }
    }

    #[test]
    fn delivers_only_to_matching_owner() {
        let feed = ChangeFeed::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let _sub = feed.subscribe(
            "alice",
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        feed.publish(&delete_event("alice"));
        feed.publish(&delete_event("bob"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_subscription_releases_listener() {
        let feed = ChangeFeed::new();
        let hits = Arc::new(AtomicUsize::new(0));

        {
            let counter = Arc::clone(&hits);
            let _sub = feed.subscribe(
                "alice",
                Box::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            );
            assert_eq!(feed.listener_count(), 1);
        }

        assert_eq!(feed.listener_count(), 0);
        feed.publish(&delete_event("alice"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn explicit_unsubscribe_and_dropped_feed_are_safe() {
        let feed = ChangeFeed::new();
        let sub = feed.subscribe("alice", Box::new(|_| {}));
        sub.unsubscribe();
        assert_eq!(feed.listener_count(), 0);

        let orphan = {
            let short_lived = ChangeFeed::new();
            short_lived.subscribe("alice", Box::new(|_| {}))
        };
        drop(orphan);
    }
}
