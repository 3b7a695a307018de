use std::fmt;

use tracing::debug;

use crate::task::{
  Priority,
  Task
};

/// Named predicate choosing which tasks
/// a list tab shows.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
)]
pub enum FilterSelector {
  #[default]
  All,
  Pending,
  Completed,
  HighPriority
}

impl FilterSelector {
  pub const ALL: [FilterSelector; 4] = [
    Self::All,
    Self::Pending,
    Self::Completed,
    Self::HighPriority
  ];

  pub fn parse(
    token: &str
  ) -> Option<Self> {
    match token
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "all" | "todos" | "" => {
        Some(Self::All)
      }
      | "pending" | "open" => {
        Some(Self::Pending)
      }
      | "completed" | "done" => {
        Some(Self::Completed)
      }
      | "high-priority" | "high" => {
        Some(Self::HighPriority)
      }
      | _ => None
    }
  }

  /// Like [`FilterSelector::parse`] but
  /// unknown selectors fall back to
  /// `All`.
  pub fn parse_lenient(
    token: &str
  ) -> Self {
    Self::parse(token).unwrap_or_else(
      || {
        debug!(
          selector = %token,
          "unknown filter selector; showing all tasks"
        );
        Self::All
      }
    )
  }

  pub fn as_str(
    &self
  ) -> &'static str {
    match self {
      | Self::All => "all",
      | Self::Pending => "pending",
      | Self::Completed => "completed",
      | Self::HighPriority => {
        "high-priority"
      }
    }
  }

  pub fn matches(
    &self,
    task: &Task
  ) -> bool {
    match self {
      | Self::All => true,
      | Self::Pending => !task.completed,
      | Self::Completed => task.completed,
      | Self::HighPriority => {
        task.priority == Priority::High
      }
    }
  }
}

impl fmt::Display for FilterSelector {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Tasks matching `selector`, in source
/// order.
pub fn filter_tasks(
  tasks: &[Task],
  selector: FilterSelector
) -> Vec<&Task> {
  tasks
    .iter()
    .filter(|task| {
      selector.matches(task)
    })
    .collect()
}
