use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{ChangeCallback, ChangeEvent, ChangeFeed, Subscription, TaskBackend};
use crate::task::{NewTask, Task, TaskPatch, decode_records};

/// JSONL-backed task store. All owners share one file; every read and
/// write is filtered by owner.
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub tasks_path: PathBuf,
    feed: ChangeFeed,
    write_lock: Mutex<()>,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let tasks_path = data_dir.join("tasks.data");
        if !tasks_path.exists() {
            fs::write(&tasks_path, "")
                .with_context(|| format!("failed to create {}", tasks_path.display()))?;
        }

        info!(
            data_dir = %data_dir.display(),
            tasks = %tasks_path.display(),
            "opened datastore"
        );

        Ok(Self {
            data_dir,
            tasks_path,
            feed: ChangeFeed::new(),
            write_lock: Mutex::new(()),
        })
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    #[tracing::instrument(skip(self))]
    pub fn load_all(&self) -> anyhow::Result<Vec<Task>> {
        load_jsonl(&self.tasks_path).context("failed to load tasks.data")
    }

    #[tracing::instrument(skip(self, tasks))]
    fn save_all(&self, tasks: &[Task]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.tasks_path, tasks).context("failed to save tasks.data")
    }

    /// Resolves a task of `owner_id` by full id or unique id prefix.
    pub fn resolve(&self, owner_id: &str, reference: &str) -> anyhow::Result<Task> {
        let needle = reference.trim().to_ascii_lowercase().replace('-', "");
        if needle.is_empty() {
            return Err(anyhow!("task reference cannot be empty"));
        }

        let mut matches: Vec<Task> = self
            .list_tasks(owner_id)?
            .into_iter()
            .filter(|task| task.id.simple().to_string().starts_with(&needle))
            .collect();

        match matches.len() {
            0 => Err(anyhow!("task not found: {reference}")),
            1 => Ok(matches.remove(0)),
            _ => {
                let candidates: Vec<String> = matches
                    .iter()
                    .map(|task| format!("{} ({})", task.title, task.short_id()))
                    .collect();
                Err(anyhow!(
                    "ambiguous task reference '{reference}'; candidates: {}",
                    candidates.join(", ")
                ))
            }
        }
    }
}

impl TaskBackend for DataStore {
    #[tracing::instrument(skip(self))]
    fn list_tasks(&self, owner_id: &str) -> anyhow::Result<Vec<Task>> {
        let mut tasks = self.load_all()?;
        tasks.retain(|task| task.owner_id == owner_id);
        debug!(count = tasks.len(), "listed owner tasks");
        Ok(tasks)
    }

    #[tracing::instrument(skip(self, fields), fields(title = %fields.title))]
    fn create_task(&self, owner_id: &str, fields: NewTask) -> anyhow::Result<Task> {
        let task = Task::new(owner_id, fields, Utc::now())?;
        {
            let _guard = self.write_lock.lock();
            let mut tasks = self.load_all()?;
            tasks.push(task.clone());
            self.save_all(&tasks)?;
        }

        info!(id = %task.id, "task created");
        self.feed.publish(&ChangeEvent::Insert(task.clone()));
        Ok(task)
    }

    #[tracing::instrument(skip(self, id, patch), fields(id = %id))]
    fn update_task(&self, id: Uuid, patch: &TaskPatch) -> anyhow::Result<Task> {
        let updated = {
            let _guard = self.write_lock.lock();
            let mut tasks = self.load_all()?;
            let task = tasks
                .iter_mut()
                .find(|task| task.id == id)
                .ok_or_else(|| anyhow!("task not found: {id}"))?;
            task.apply_patch(patch, Utc::now())?;
            let updated = task.clone();
            self.save_all(&tasks)?;
            updated
        };

        debug!(completed = updated.completed, "task updated");
        self.feed.publish(&ChangeEvent::Update(updated.clone()));
        Ok(updated)
    }

    #[tracing::instrument(skip(self, id), fields(id = %id))]
    fn delete_task(&self, id: Uuid) -> anyhow::Result<()> {
        let removed = {
            let _guard = self.write_lock.lock();
            let mut tasks = self.load_all()?;
            let idx = tasks
                .iter()
                .position(|task| task.id == id)
                .ok_or_else(|| anyhow!("task not found: {id}"))?;
            let removed = tasks.remove(idx);
            self.save_all(&tasks)?;
            removed
        };

        info!(title = %removed.title, "task deleted");
        self.feed.publish(&ChangeEvent::Delete {
            id,
            owner_id: removed.owner_id,
        });
        Ok(())
    }

    fn subscribe(&self, owner_id: &str, callback: ChangeCallback) -> anyhow::Result<Subscription> {
        Ok(self.feed.subscribe(owner_id, callback))
    }
}

#[tracing::instrument(skip(path))]
fn load_jsonl(path: &Path) -> anyhow::Result<Vec<Task>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => records.push(value),
            Err(err) => {
                warn!(file = %path.display(), line = idx + 1, error = %err, "skipping unparseable line");
            }
        }
    }

    let tasks = decode_records(records);
    debug!(count = tasks.len(), "loaded tasks from jsonl");
    Ok(tasks)
}

#[tracing::instrument(skip(path, tasks))]
fn save_jsonl_atomic(path: &Path, tasks: &[Task]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = tasks.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for task in tasks {
        let serialized = serde_json::to_string(task)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
