use std::io::{self, IsTerminal, Write};

use unicode_width::UnicodeWidthStr;

use crate::activity::{ActivityGroup, ActivityKind, ActivitySummary};
use crate::clock::ViewContext;
use crate::config::Config;
use crate::datetime::format_local_date;
use crate::stats::{ProductivityTier, TaskStats};
use crate::task::{Category, Priority, Task};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color = cfg.get_bool("color")?.unwrap_or(true);
        Ok(Self { color })
    }

    #[tracing::instrument(skip(self, tasks, ctx))]
    pub fn print_task_table(&mut self, tasks: &[&Task], ctx: &ViewContext) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_task_table(&mut out, tasks, ctx)
    }

    #[tracing::instrument(skip(self, task, ctx))]
    pub fn print_task_info(&mut self, task: &Task, ctx: &ViewContext) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "id          {}", task.id)?;
        writeln!(out, "title       {}", task.title)?;
        writeln!(out, "status      {}", status_label(task))?;
        writeln!(out, "priority    {}", task.priority)?;
        writeln!(out, "category    {}", task.category)?;
        if let Some(description) = &task.description {
            writeln!(out, "description {description}")?;
        }
        writeln!(out, "created     {}", format_local_date(task.created_at, ctx.timezone))?;
        if let Some(completed_at) = task.completed_at {
            writeln!(out, "completed   {}", format_local_date(completed_at, ctx.timezone))?;
        }
        if let Some(due) = task.due {
            writeln!(out, "due         {}", format_local_date(due, ctx.timezone))?;
        }

        Ok(())
    }

    #[tracing::instrument(skip(self, stats))]
    pub fn print_stats(&mut self, stats: &TaskStats) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_stats(&mut out, stats)
    }

    #[tracing::instrument(skip(self, groups, summary, ctx))]
    pub fn print_activity(
        &mut self,
        groups: &[ActivityGroup],
        summary: &ActivitySummary,
        ctx: &ViewContext,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_activity(&mut out, groups, summary, ctx)
    }

    fn write_task_table<W: Write>(&self, writer: W, tasks: &[&Task], ctx: &ViewContext) -> anyhow::Result<()> {
        let headers = vec![
            "ID".to_string(),
            "Status".to_string(),
            "Pri".to_string(),
            "Category".to_string(),
            "Due".to_string(),
            "Title".to_string(),
        ];

        let mut rows = Vec::with_capacity(tasks.len());

        for task in tasks {
            let due = task
                .due
                .map(|due| format_local_date(due, ctx.timezone))
                .unwrap_or_default();
            let due = if task.is_overdue(ctx.now) {
                self.paint(&due, "31")
            } else {
                due
            };

            let status = if task.completed {
                self.paint(status_label(task), "32")
            } else {
                status_label(task).to_string()
            };

            rows.push(vec![
                self.paint(&task.short_id(), "33"),
                status,
                self.paint(task.priority.as_str(), priority_color(task.priority)),
                task.category.to_string(),
                due,
                task.title.clone(),
            ]);
        }

        write_table(writer, headers, rows)
    }

    fn write_stats<W: Write>(&self, mut out: W, stats: &TaskStats) -> anyhow::Result<()> {
        writeln!(out, "Total       {}", stats.total)?;
        writeln!(out, "Completed   {}", stats.completed)?;
        writeln!(out, "Pending     {}", stats.pending)?;
        writeln!(
            out,
            "Rate        {}% ({})",
            stats.completion_rate,
            self.paint(stats.tier.label(), tier_color(stats.tier))
        )?;
        writeln!(out, "This week   {}", stats.this_week)?;
        writeln!(out, "Overdue     {}", stats.overdue)?;
        writeln!(out, "Streak      {} day(s)", stats.streak_days)?;
        writeln!(out)?;

        let headers = vec!["Priority".to_string(), "Tasks".to_string()];
        let rows = [Priority::High, Priority::Normal, Priority::Low]
            .into_iter()
            .map(|priority| vec![priority.to_string(), stats.by_priority.get(priority).to_string()])
            .collect();
        write_table(&mut out, headers, rows)?;
        writeln!(out)?;

        let headers = vec!["Category".to_string(), "Tasks".to_string()];
        let rows = Category::ALL
            .iter()
            .filter_map(|category| {
                stats
                    .by_category
                    .get(category)
                    .map(|count| vec![category.to_string(), count.to_string()])
            })
            .collect();
        write_table(&mut out, headers, rows)
    }

    fn write_activity<W: Write>(
        &self,
        mut out: W,
        groups: &[ActivityGroup],
        summary: &ActivitySummary,
        ctx: &ViewContext,
    ) -> anyhow::Result<()> {
        writeln!(
            out,
            "{} created, {} completed, {} today, {} this week",
            summary.created, summary.completed, summary.today, summary.this_week
        )?;

        for group in groups {
            writeln!(out)?;
            writeln!(out, "{}", self.paint(&group.label, "1"))?;
            for item in &group.items {
                let verb = match item.kind {
                    ActivityKind::Created => "created  ",
                    ActivityKind::Completed => "completed",
                };
                writeln!(
                    out,
                    "  {} {}  {} [{}/{}]",
                    item.timestamp.with_timezone(&ctx.timezone).format("%H:%M"),
                    self.paint(verb, activity_color(item.kind)),
                    item.task_title,
                    item.category,
                    item.priority
                )?;
            }
        }

        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn status_label(task: &Task) -> &'static str {
    if task.completed { "done" } else { "pending" }
}

fn priority_color(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "31",
        Priority::Normal => "0",
        Priority::Low => "2",
    }
}

fn tier_color(tier: ProductivityTier) -> &'static str {
    match tier {
        ProductivityTier::Excellent => "32",
        ProductivityTier::Good => "36",
        ProductivityTier::Fair => "33",
        ProductivityTier::NeedsImprovement => "31",
    }
}

fn activity_color(kind: ActivityKind) -> &'static str {
    match kind {
        ActivityKind::Created => "34",
        ActivityKind::Completed => "32",
    }
}

fn write_table<W: Write>(mut writer: W, headers: Vec<String>, rows: Vec<Vec<String>>) -> anyhow::Result<()> {
    let mut widths: Vec<usize> = headers.iter().map(|header| header.width()).collect();

    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(strip_ansi(cell).width());
        }
    }

    let header_line: Vec<String> = headers
        .iter()
        .zip(&widths)
        .map(|(header, width)| pad(header, *width))
        .collect();
    writeln!(writer, "{}", header_line.join(" ").trim_end())?;

    let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    writeln!(writer, "{}", rule.join(" "))?;

    for row in rows {
        let cells: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, width)| pad(cell, *width))
            .collect();
        writeln!(writer, "{}", cells.join(" ").trim_end())?;
    }

    Ok(())
}

/// Right-pads by display width, ignoring colour escapes.
fn pad(cell: &str, width: usize) -> String {
    let visible = strip_ansi(cell).width();
    format!("{cell}{}", " ".repeat(width.saturating_sub(visible)))
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        match (escaped, ch) {
            (true, 'm') => escaped = false,
            (true, _) => {}
            (false, '\x1b') => escaped = true,
            (false, _) => out.push(ch),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{Renderer, strip_ansi, write_table};
    use crate::activity::{build_timeline, group_by_day, summarize};
    use crate::clock::ViewContext;
    use crate::stats::compute_stats;
    use crate::task::{Category, NewTask, Priority, Task};

    fn plain() -> Renderer {
        Renderer { color: false }
    }

    #[test]
    fn strips_escape_sequences() {
        assert_eq!(strip_ansi("\x1b[31mlate\x1b[0m"), "late");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn aligns_columns_by_display_width() {
        let mut out = Vec::new();
        write_table(
            &mut out,
            vec!["A".to_string(), "B".to_string()],
            vec![
                vec!["日本".to_string(), "x".to_string()],
                vec!["\x1b[31mab\x1b[0m".to_string(), "y".to_string()],
            ],
        )
        .expect("write table");

        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "A    B");
        assert_eq!(lines[1], "---- -");
        assert_eq!(lines[2], "日本 x");
        assert_eq!(strip_ansi(lines[3]), "ab   y");
    }

    #[test]
    fn task_table_lists_short_ids_and_titles() {
        let now = Utc.with_ymd_and_hms(2026, 10, 21, 15, 0, 0).single().expect("valid");
        let ctx = ViewContext::utc(now);
        let mut late = Task::new(
            "alice",
            NewTask {
                priority: Priority::High,
                category: Category::Work,
                ..NewTask::titled("File taxes")
            },
            now - Duration::days(3),
        )
        .expect("create");
        late.due = Some(now - Duration::days(1));

        let mut out = Vec::new();
        plain().write_task_table(&mut out, &[&late], &ctx).expect("write");
        let text = String::from_utf8(out).expect("utf8");

        assert!(text.contains(&late.short_id()));
        assert!(text.contains("File taxes"));
        assert!(text.contains("2026-10-20"));
        assert!(text.contains("high"));
    }

    #[test]
    fn stats_and_activity_render_without_color() {
        let now = Utc.with_ymd_and_hms(2026, 10, 21, 15, 0, 0).single().expect("valid");
        let ctx = ViewContext::utc(now);
        let tasks = vec![Task::new("alice", NewTask::titled("Read"), now - Duration::hours(1)).expect("create")];

        let mut out = Vec::new();
        plain().write_stats(&mut out, &compute_stats(&tasks, &ctx)).expect("write");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("Rate        0% (needs improvement)"));
        assert!(text.contains("personal"));

        let timeline = build_timeline(&tasks);
        let summary = summarize(&timeline, &ctx);
        let groups = group_by_day(timeline, &ctx);
        let mut out = Vec::new();
        plain().write_activity(&mut out, &groups, &summary, &ctx).expect("write");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.starts_with("1 created, 0 completed, 1 today, 1 this week"));
        assert!(text.contains("Today"));
        assert!(text.contains("14:00 created"));
    }
}
