use std::collections::{
  BTreeMap,
  BTreeSet
};
use std::fmt;

use chrono::Duration;
use serde::Serialize;

use crate::clock::ViewContext;
use crate::task::{
  Category,
  Priority,
  Task
};

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ProductivityTier {
  Excellent,
  Good,
  Fair,
  NeedsImprovement
}

impl ProductivityTier {
  /// Lower bounds are inclusive.
  pub fn from_rate(rate: u8) -> Self {
    match rate {
      | 80..=u8::MAX => Self::Excellent,
      | 60..=79 => Self::Good,
      | 40..=59 => Self::Fair,
      | _ => Self::NeedsImprovement
    }
  }

  pub fn label(&self) -> &'static str {
    match self {
      | Self::Excellent => "excellent",
      | Self::Good => "good",
      | Self::Fair => "fair",
      | Self::NeedsImprovement => {
        "needs improvement"
      }
    }
  }
}

impl fmt::Display for ProductivityTier {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.label())
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
)]
pub struct PriorityCounts {
  pub high:   usize,
  pub normal: usize,
  pub low:    usize
}

impl PriorityCounts {
  pub fn get(
    &self,
    priority: Priority
  ) -> usize {
    match priority {
      | Priority::High => self.high,
      | Priority::Normal => self.normal,
      | Priority::Low => self.low
    }
  }

  fn bump(&mut self, priority: Priority) {
    match priority {
      | Priority::High => self.high += 1,
      | Priority::Normal => {
        self.normal += 1
      }
      | Priority::Low => self.low += 1
    }
  }
}

/// Aggregates shown on the profile
/// screen.
#[derive(
  Debug, Clone, PartialEq, Serialize,
)]
pub struct TaskStats {
  pub total:           usize,
  pub completed:       usize,
  pub pending:         usize,
  pub completion_rate: u8,
  pub by_priority:     PriorityCounts,
  pub by_category:
    BTreeMap<Category, usize>,
  pub this_week:       usize,
  pub overdue:         usize,
  pub streak_days:     usize,
  pub tier:            ProductivityTier
}

#[tracing::instrument(skip_all, fields(count = tasks.len()))]
pub fn compute_stats(
  tasks: &[Task],
  ctx: &ViewContext
) -> TaskStats {
  let week_boundary =
    ctx.week_boundary();

  let mut completed = 0;
  let mut by_priority =
    PriorityCounts::default();
  let mut by_category = BTreeMap::new();
  let mut this_week = 0;
  let mut overdue = 0;

  for task in tasks {
    if task.completed {
      completed += 1;
    }
    by_priority.bump(task.priority);
    *by_category
      .entry(task.category)
      .or_insert(0) += 1;
    if task.created_at >= week_boundary
    {
      this_week += 1;
    }
    if task.is_overdue(ctx.now) {
      overdue += 1;
    }
  }

  let total = tasks.len();
  let completion_rate =
    completion_rate(completed, total);

  TaskStats {
    total,
    completed,
    pending: total - completed,
    completion_rate,
    by_priority,
    by_category,
    this_week,
    overdue,
    streak_days: completion_streak(
      tasks, ctx
    ),
    tier: ProductivityTier::from_rate(
      completion_rate
    )
  }
}

/// `completed / total` as a whole
/// percentage, halves rounded up.
pub fn completion_rate(
  completed: usize,
  total: usize
) -> u8 {
  if total == 0 {
    return 0;
  }
  let completed = completed.min(total);
  let rate =
    (completed * 200 + total)
      / (total * 2);
  rate as u8
}

/// Consecutive local days, ending today
/// or yesterday, with at least one
/// recorded completion.
pub fn completion_streak(
  tasks: &[Task],
  ctx: &ViewContext
) -> usize {
  let days: BTreeSet<_> = tasks
    .iter()
    .filter(|task| task.completed)
    .filter_map(|task| {
      task.completed_at
    })
    .map(|at| ctx.local_date(at))
    .collect();

  let today = ctx.today();
  let mut cursor = if days
    .contains(&today)
  {
    today
  } else {
    today - Duration::days(1)
  };

  let mut streak = 0;
  while days.contains(&cursor) {
    streak += 1;
    cursor -= Duration::days(1);
  }
  streak
}
