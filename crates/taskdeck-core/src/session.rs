use std::sync::mpsc::{self, Receiver, TryRecvError};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::activity::{ActivityGroup, ActivityItem, ActivitySummary, build_timeline, group_by_day, summarize};
use crate::backend::{ChangeEvent, Subscription, TaskBackend};
use crate::clock::ViewContext;
use crate::filter::{FilterSelector, filter_tasks};
use crate::stats::{TaskStats, compute_stats};
use crate::task::{NewTask, Task, TaskPatch};

struct LiveChanges {
    events: Receiver<ChangeEvent>,
    _subscription: Subscription,
}

/// In-memory view of one owner's tasks.
///
/// Local edits are applied before the backend confirms them and rolled back
/// when it refuses. Change notifications queue up until [`TaskSession::sync`]
/// drains them, so every mutation happens on the caller's thread. Dropping
/// the session releases its subscription.
pub struct TaskSession<'a, B: TaskBackend + ?Sized> {
    backend: &'a B,
    owner_id: String,
    tasks: Vec<Task>,
    selector: FilterSelector,
    live: Option<LiveChanges>,
}

impl<'a, B: TaskBackend + ?Sized> TaskSession<'a, B> {
    #[instrument(skip(backend))]
    pub fn open(backend: &'a B, owner_id: &str) -> anyhow::Result<Self> {
        let mut session = Self {
            backend,
            owner_id: owner_id.to_string(),
            tasks: Vec::new(),
            selector: FilterSelector::default(),
            live: None,
        };
        session.reload()?;
        Ok(session)
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    pub fn selector(&self) -> FilterSelector {
        self.selector
    }

    pub fn set_selector(&mut self, selector: FilterSelector) {
        self.selector = selector;
    }

    pub fn is_watching(&self) -> bool {
        self.live.is_some()
    }

    /// Replaces the local list with the backend's.
    #[instrument(skip(self), fields(owner = %self.owner_id))]
    pub fn reload(&mut self) -> anyhow::Result<()> {
        let mut tasks = self.backend.list_tasks(&self.owner_id)?;
        let before = tasks.len();
        tasks.retain(|task| task.owner_id == self.owner_id);
        if tasks.len() != before {
            warn!(dropped = before - tasks.len(), "backend returned tasks of another owner");
        }
        self.tasks = tasks;
        debug!(count = self.tasks.len(), "loaded tasks");
        Ok(())
    }

    /// Starts receiving change notifications. Idempotent.
    #[instrument(skip(self), fields(owner = %self.owner_id))]
    pub fn watch(&mut self) -> anyhow::Result<()> {
        if self.live.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel();
        let subscription = self.backend.subscribe(
            &self.owner_id,
            Box::new(move |event: &ChangeEvent| {
                // The receiver is gone once the session is dropped.
                let _ = tx.send(event.clone());
            }),
        )?;
        self.live = Some(LiveChanges {
            events: rx,
            _subscription: subscription,
        });
        info!("watching task changes");
        Ok(())
    }

    /// Releases the change subscription.
    pub fn unwatch(&mut self) {
        if self.live.take().is_some() {
            info!(owner = %self.owner_id, "stopped watching task changes");
        }
    }

    /// Applies every queued change notification; returns how many were applied.
    pub fn sync(&mut self) -> usize {
        let mut pending = Vec::new();
        if let Some(live) = &self.live {
            loop {
                match live.events.try_recv() {
                    Ok(event) => pending.push(event),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        warn!("change feed disconnected");
                        break;
                    }
                }
            }
        }

        let applied = pending.len();
        for event in pending {
            self.apply_change(event);
        }
        applied
    }

    /// Whole-record upsert or removal; the latest write wins.
    pub fn apply_change(&mut self, event: ChangeEvent) {
        if event.owner_id() != self.owner_id {
            debug!(owner = %event.owner_id(), "ignoring change for another owner");
            return;
        }

        match event {
            ChangeEvent::Insert(task) | ChangeEvent::Update(task) => self.upsert(task),
            ChangeEvent::Delete { id, .. } => {
                self.tasks.retain(|task| task.id != id);
            }
        }
    }

    #[instrument(skip(self, fields), fields(owner = %self.owner_id))]
    pub fn create(&mut self, fields: NewTask) -> anyhow::Result<Task> {
        let task = self.backend.create_task(&self.owner_id, fields)?;
        if task.owner_id != self.owner_id {
            return Err(anyhow!("backend created task {} for another owner", task.id));
        }
        self.upsert(task.clone());
        Ok(task)
    }

    pub fn toggle(&mut self, id: Uuid, now: DateTime<Utc>) -> anyhow::Result<Task> {
        let completed = self
            .task(id)
            .map(|task| task.completed)
            .ok_or_else(|| anyhow!("task not found: {id}"))?;
        self.edit(id, TaskPatch::completion(!completed), now)
    }

    #[instrument(skip(self, id, patch, now), fields(id = %id))]
    pub fn edit(&mut self, id: Uuid, patch: TaskPatch, now: DateTime<Utc>) -> anyhow::Result<Task> {
        let idx = self.position(id)?;
        let previous = self.tasks[idx].clone();
        self.tasks[idx].apply_patch(&patch, now)?;

        match self.backend.update_task(id, &patch) {
            Ok(confirmed) => {
                self.upsert(confirmed.clone());
                Ok(confirmed)
            }
            Err(err) => {
                warn!(error = %err, "backend rejected edit; restoring local task");
                self.restore(idx, previous);
                Err(err)
            }
        }
    }

    #[instrument(skip(self, id), fields(id = %id))]
    pub fn delete(&mut self, id: Uuid) -> anyhow::Result<()> {
        let idx = self.position(id)?;
        let removed = self.tasks.remove(idx);

        if let Err(err) = self.backend.delete_task(id) {
            warn!(error = %err, "backend rejected delete; restoring local task");
            let idx = idx.min(self.tasks.len());
            self.tasks.insert(idx, removed);
            return Err(err);
        }
        Ok(())
    }

    /// Tasks for the active tab.
    pub fn visible(&self) -> Vec<&Task> {
        filter_tasks(&self.tasks, self.selector)
    }

    pub fn stats(&self, ctx: &ViewContext) -> TaskStats {
        compute_stats(&self.tasks, ctx)
    }

    pub fn timeline(&self) -> Vec<ActivityItem> {
        build_timeline(&self.tasks)
    }

    pub fn activity_groups(&self, ctx: &ViewContext) -> Vec<ActivityGroup> {
        group_by_day(self.timeline(), ctx)
    }

    pub fn activity_summary(&self, ctx: &ViewContext) -> ActivitySummary {
        summarize(&self.timeline(), ctx)
    }

    fn position(&self, id: Uuid) -> anyhow::Result<usize> {
        self.tasks
            .iter()
            .position(|task| task.id == id)
            .ok_or_else(|| anyhow!("task not found: {id}"))
    }

    fn upsert(&mut self, task: Task) {
        match self.tasks.iter_mut().find(|existing| existing.id == task.id) {
            Some(existing) => *existing = task,
            None => self.tasks.push(task),
        }
    }

    fn restore(&mut self, idx: usize, previous: Task) {
        match self.tasks.get_mut(idx) {
            Some(slot) if slot.id == previous.id => *slot = previous,
            _ => self.upsert(previous),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use anyhow::anyhow;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use super::TaskSession;
    use crate::backend::{ChangeCallback, ChangeEvent, Subscription, TaskBackend};
    use crate::task::{NewTask, Priority, Task, TaskPatch};

    /// Holds a fixed list and refuses writes while `fail` is set.
    struct ScriptedBackend {
        tasks: RefCell<Vec<Task>>,
        fail: Cell<bool>,
    }

    impl ScriptedBackend {
        fn with(tasks: Vec<Task>) -> Self {
            Self {
                tasks: RefCell::new(tasks),
                fail: Cell::new(false),
            }
        }

        fn check(&self) -> anyhow::Result<()> {
            if self.fail.get() {
                Err(anyhow!("backend unavailable"))
            } else {
                Ok(())
            }
        }
    }

    impl TaskBackend for ScriptedBackend {
        fn list_tasks(&self, owner_id: &str) -> anyhow::Result<Vec<Task>> {
            Ok(self.tasks.borrow().iter().filter(|t| t.owner_id == owner_id).cloned().collect())
        }

        fn create_task(&self, owner_id: &str, fields: NewTask) -> anyhow::Result<Task> {
            self.check()?;
            let task = Task::new(owner_id, fields, Utc::now())?;
            self.tasks.borrow_mut().push(task.clone());
            Ok(task)
        }

        fn update_task(&self, id: Uuid, patch: &TaskPatch) -> anyhow::Result<Task> {
            self.check()?;
            let mut tasks = self.tasks.borrow_mut();
            let task = tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| anyhow!("task not found: {id}"))?;
            task.apply_patch(patch, Utc::now())?;
            Ok(task.clone())
        }

        fn delete_task(&self, id: Uuid) -> anyhow::Result<()> {
            self.check()?;
            self.tasks.borrow_mut().retain(|t| t.id != id);
            Ok(())
        }

        fn subscribe(&self, _owner_id: &str, _callback: ChangeCallback) -> anyhow::Result<Subscription> {
            Ok(Subscription::new(|| {}))
        }
    }

    fn seeded(titles: &[&str]) -> Vec<Task> {
        let at = Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).single().expect("valid");
        titles
            .iter()
            .map(|title| Task::new("alice", NewTask::titled(*title), at).expect("create"))
            .collect()
    }

    #[test]
    fn failed_edit_restores_previous_record() {
        let backend = ScriptedBackend::with(seeded(&["a", "b"]));
        let mut session = TaskSession::open(&backend, "alice").expect("open");
        let id = session.tasks()[0].id;

        backend.fail.set(true);
        let patch = TaskPatch {
            priority: Some(Priority::High),
            ..TaskPatch::default()
        };
        assert!(session.edit(id, patch, Utc::now()).is_err());
        assert_eq!(session.tasks()[0].priority, Priority::Normal);
        assert!(session.toggle(id, Utc::now()).is_err());
        assert!(!session.tasks()[0].completed);
    }

    #[test]
    fn failed_delete_reinserts_in_place() {
        let backend = ScriptedBackend::with(seeded(&["a", "b", "c"]));
        let mut session = TaskSession::open(&backend, "alice").expect("open");
        let middle = session.tasks()[1].id;

        backend.fail.set(true);
        assert!(session.delete(middle).is_err());
        let titles: Vec<_> = session.tasks().iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "b", "c"]);

        backend.fail.set(false);
        session.delete(middle).expect("delete");
        assert_eq!(session.tasks().len(), 2);
        assert!(session.delete(middle).is_err());
    }

    #[test]
    fn toggle_uses_confirmed_record() {
        let backend = ScriptedBackend::with(seeded(&["a"]));
        let mut session = TaskSession::open(&backend, "alice").expect("open");
        let id = session.tasks()[0].id;

        let confirmed = session.toggle(id, Utc::now()).expect("toggle");
        assert!(confirmed.completed);
        assert_eq!(session.task(id), Some(&confirmed));

        let reopened = session.toggle(id, Utc::now()).expect("toggle back");
        assert!(!reopened.completed);
        assert_eq!(reopened.completed_at, None);
    }

    #[test]
    fn change_events_upsert_and_ignore_other_owners() {
        let backend = ScriptedBackend::with(seeded(&["a"]));
        let mut session = TaskSession::open(&backend, "alice").expect("open");

        let mut remote = session.tasks()[0].clone();
        remote.title = "a (edited elsewhere)".to_string();
        session.apply_change(ChangeEvent::Update(remote.clone()));
        assert_eq!(session.tasks()[0].title, "a (edited elsewhere)");

        let foreign = Task::new("bob", NewTask::titled("not mine"), Utc::now()).expect("create");
        session.apply_change(ChangeEvent::Insert(foreign.clone()));
        session.apply_change(ChangeEvent::Delete {
            id: remote.id,
            owner_id: "bob".to_string(),
        });
        assert_eq!(session.tasks().len(), 1);

        let fresh = Task::new("alice", NewTask::titled("new"), Utc::now()).expect("create");
        session.apply_change(ChangeEvent::Insert(fresh.clone()));
        session.apply_change(ChangeEvent::Insert(fresh.clone()));
        assert_eq!(session.tasks().len(), 2);
        assert_eq!(session.tasks()[1].id, fresh.id);

        session.apply_change(ChangeEvent::Delete {
            id: remote.id,
            owner_id: "alice".to_string(),
        });
        assert_eq!(session.tasks().len(), 1);
    }

    #[test]
    fn create_rejects_blank_title_without_touching_list() {
        let backend = ScriptedBackend::with(Vec::new());
        let mut session = TaskSession::open(&backend, "alice").expect("open");
        assert!(session.create(NewTask::titled("  ")).is_err());
        assert!(session.tasks().is_empty());

        let task = session.create(NewTask::titled("Walk dog")).expect("create");
        assert!(!task.completed);
        assert_eq!(session.tasks().len(), 1);
    }
}
