use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" | "h" => Ok(Self::High),
            "normal" | "n" | "medium" | "m" => Ok(Self::Normal),
            "low" | "l" => Ok(Self::Low),
            other => Err(anyhow!("unknown priority: {other} (expected high, normal or low)")),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    Personal,
    Work,
    Study,
    Home,
}

impl Category {
    pub const ALL: [Category; 4] = [Self::Personal, Self::Work, Self::Study, Self::Home];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Work => "work",
            Self::Study => "study",
            Self::Home => "home",
        }
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == lower)
            .ok_or_else(|| anyhow!("unknown category: {lower} (expected personal, work, study or home)"))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: Uuid,

    pub owner_id: String,

    pub title: String,

    #[serde(default)]
    pub description: Option<String>,

    pub completed: bool,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,

    #[serde(default)]
    pub due: Option<DateTime<Utc>>,

    pub priority: Priority,

    pub category: Category,
}

/// Fields supplied by the user when creating a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due: Option<DateTime<Utc>>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub category: Category,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Partial update. `None` leaves a field untouched; for nullable fields
/// `Some(None)` clears the value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub completed: Option<bool>,
    pub due: Option<Option<DateTime<Utc>>>,
    pub priority: Option<Priority>,
    pub category: Option<Category>,
}

impl TaskPatch {
    pub fn completion(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl Task {
    pub fn new(owner_id: &str, fields: NewTask, now: DateTime<Utc>) -> anyhow::Result<Self> {
        let title = normalize_title(&fields.title)?;
        Ok(Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            title,
            description: normalize_description(fields.description),
            completed: false,
            created_at: now,
            completed_at: None,
            modified: None,
            due: fields.due,
            priority: fields.priority,
            category: fields.category,
        })
    }

    /// Applies `patch` in place. Nothing is changed when validation fails.
    pub fn apply_patch(&mut self, patch: &TaskPatch, now: DateTime<Utc>) -> anyhow::Result<()> {
        let title = patch.title.as_deref().map(normalize_title).transpose()?;

        if let Some(title) = title {
            self.title = title;
        }
        if let Some(description) = &patch.description {
            self.description = normalize_description(description.clone());
        }
        if let Some(due) = patch.due {
            self.due = due;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(completed) = patch.completed
            && completed != self.completed
        {
            self.completed = completed;
            self.completed_at = completed.then_some(now);
        }

        self.modified = Some(now);
        Ok(())
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.completed && self.due.map(|due| due < now).unwrap_or(false)
    }

    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }
}

fn normalize_title(raw: &str) -> anyhow::Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("task title cannot be empty"));
    }
    Ok(trimmed.to_string())
}

fn normalize_description(raw: Option<String>) -> Option<String> {
    raw.map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Decodes one raw record from an external source.
pub fn decode_record(value: Value) -> anyhow::Result<Task> {
    let task: Task = serde_json::from_value(value)?;
    if task.title.trim().is_empty() {
        return Err(anyhow!("record {} has an empty title", task.id));
    }
    Ok(task)
}

/// Decodes raw records, skipping the malformed ones.
pub fn decode_records<I>(values: I) -> Vec<Task>
where
    I: IntoIterator<Item = Value>,
{
    let mut out = Vec::new();
    for (idx, value) in values.into_iter().enumerate() {
        match decode_record(value) {
            Ok(task) => out.push(task),
            Err(err) => {
                warn!(index = idx, error = %err, "skipping malformed task record");
            }
        }
    }
    out
}
