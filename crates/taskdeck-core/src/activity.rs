use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::clock::ViewContext;
use crate::datetime::weekday_name;
use crate::task::{Category, Priority, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Created,
    Completed,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Completed => "completed",
        }
    }
}

/// A timeline entry derived from a task. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityItem {
    pub id: String,
    pub task_id: Uuid,
    pub kind: ActivityKind,
    pub task_title: String,
    pub timestamp: DateTime<Utc>,
    pub category: Category,
    pub priority: Priority,
}

impl ActivityItem {
    fn derive(task: &Task, kind: ActivityKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: format!("{}-{}", task.id, kind.as_str()),
            task_id: task.id,
            kind,
            task_title: task.title.clone(),
            timestamp,
            category: task.category,
            priority: task.priority,
        }
    }
}

/// Every activity item for `tasks`, newest first. Equal timestamps keep
/// source order, and a task's creation precedes its completion.
pub fn build_timeline(tasks: &[Task]) -> Vec<ActivityItem> {
    let mut items = Vec::with_capacity(tasks.len() * 2);

    for task in tasks {
        items.push(ActivityItem::derive(task, ActivityKind::Created, task.created_at));

        if task.completed {
            // Records from before completion tracking have no timestamp.
            let completed_at = task
                .completed_at
                .filter(|at| *at >= task.created_at)
                .unwrap_or(task.created_at);
            items.push(ActivityItem::derive(task, ActivityKind::Completed, completed_at));
        }
    }

    // sort_by is stable.
    items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    items
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "date", rename_all = "lowercase")]
pub enum DayBucket {
    Today,
    Yesterday,
    Weekday(NaiveDate),
    Date(NaiveDate),
}

impl DayBucket {
    pub fn classify(timestamp: DateTime<Utc>, ctx: &ViewContext) -> Self {
        let today = ctx.today();
        let day = ctx.local_date(timestamp);

        if day == today {
            return Self::Today;
        }
        if day == today - Duration::days(1) {
            return Self::Yesterday;
        }
        if timestamp <= ctx.now && within_a_week(timestamp, ctx) {
            return Self::Weekday(day);
        }
        Self::Date(day)
    }

    pub fn label(&self, ctx: &ViewContext) -> String {
        match self {
            Self::Today => "Today".to_string(),
            Self::Yesterday => "Yesterday".to_string(),
            Self::Weekday(day) => weekday_name(day.weekday()).to_string(),
            Self::Date(day) if day.year() == ctx.today().year() => day.format("%B %-d").to_string(),
            Self::Date(day) => day.format("%B %-d, %Y").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityGroup {
    pub bucket: DayBucket,
    pub label: String,
    pub items: Vec<ActivityItem>,
}

/// Buckets items by day. Groups appear in the order they are first
/// populated while scanning `items`.
pub fn group_by_day<I>(items: I, ctx: &ViewContext) -> Vec<ActivityGroup>
where
    I: IntoIterator<Item = ActivityItem>,
{
    let mut groups: Vec<ActivityGroup> = Vec::new();

    for item in items {
        let bucket = DayBucket::classify(item.timestamp, ctx);
        match groups.iter_mut().find(|group| group.bucket == bucket) {
            Some(group) => group.items.push(item),
            None => groups.push(ActivityGroup {
                bucket,
                label: bucket.label(ctx),
                items: vec![item],
            }),
        }
    }

    groups
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActivitySummary {
    pub created: usize,
    pub completed: usize,
    pub today: usize,
    pub this_week: usize,
}

pub fn summarize(items: &[ActivityItem], ctx: &ViewContext) -> ActivitySummary {
    let mut summary = ActivitySummary::default();
    for item in items {
        match item.kind {
            ActivityKind::Created => summary.created += 1,
            ActivityKind::Completed => summary.completed += 1,
        }
        if DayBucket::classify(item.timestamp, ctx) == DayBucket::Today {
            summary.today += 1;
        }
        if within_a_week(item.timestamp, ctx) {
            summary.this_week += 1;
        }
    }
    summary
}

/// At most seven whole days before now. Timestamps ahead of now count too, since
/// another writer's clock may run fast.
fn within_a_week(timestamp: DateTime<Utc>, ctx: &ViewContext) -> bool {
    (ctx.now - timestamp).num_days() <= 7
}
