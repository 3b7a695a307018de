mod modifiers;

use anyhow::anyhow;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::cli::Invocation;
use crate::clock::ViewContext;
use crate::config::Config;
use crate::datastore::DataStore;
use crate::filter::FilterSelector;
use crate::render::Renderer;

use self::modifiers::{parse_new_task, parse_patch};

type Session<'a> = crate::session::TaskSession<'a, DataStore>;

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "list", "add", "info", "modify", "done", "undo", "delete", "stats", "activity", "export", "help", "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &str, known: &[&'a str]) -> Option<&'a str> {
    if let Some(exact) = known.iter().copied().find(|name| *name == token) {
        return Some(exact);
    }
    if token.is_empty() {
        return None;
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() { None } else { Some(first) }
}

#[instrument(skip(store, cfg, renderer, ctx, inv), fields(command = %inv.command))]
pub fn dispatch(
    store: &DataStore,
    cfg: &Config,
    renderer: &mut Renderer,
    owner_id: &str,
    ctx: &ViewContext,
    inv: Invocation,
) -> anyhow::Result<()> {
    debug!(args = ?inv.args, "dispatching command");

    match inv.command.as_str() {
        "help" => return cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    let mut session = Session::open(store, owner_id)?;
    session.watch()?;

    let result = match inv.command.as_str() {
        "list" => cmd_list(&mut session, cfg, renderer, ctx, &inv.args),
        "add" => cmd_add(&mut session, ctx, &inv.args),
        "info" => cmd_info(&session, store, renderer, ctx, &inv.args),
        "modify" => cmd_modify(&mut session, store, ctx, &inv.args),
        "done" => cmd_set_completed(&mut session, store, ctx, &inv.args, true),
        "undo" => cmd_set_completed(&mut session, store, ctx, &inv.args, false),
        "delete" => cmd_delete(&mut session, store, &inv.args),
        "stats" => renderer.print_stats(&session.stats(ctx)),
        "activity" => renderer.print_activity(&session.activity_groups(ctx), &session.activity_summary(ctx), ctx),
        "export" => cmd_export(&mut session, cfg, &inv.args),
        other => Err(anyhow!("unknown command: {other}")),
    };

    let applied = session.sync();
    debug!(applied, remaining = session.tasks().len(), "synced change feed");
    result
}

fn selector_from(cfg: &Config, args: &[String]) -> anyhow::Result<FilterSelector> {
    match args {
        [] => Ok(FilterSelector::parse_lenient(
            &cfg.get("default.filter").unwrap_or_default(),
        )),
        [one] => Ok(FilterSelector::parse_lenient(one)),
        _ => Err(anyhow!("expected at most one filter, got: {}", args.join(" "))),
    }
}

#[instrument(skip_all)]
fn cmd_list(
    session: &mut Session<'_>,
    cfg: &Config,
    renderer: &mut Renderer,
    ctx: &ViewContext,
    args: &[String],
) -> anyhow::Result<()> {
    session.set_selector(selector_from(cfg, args)?);
    let visible = session.visible();
    info!(selector = %session.selector(), shown = visible.len(), "command list");

    if visible.is_empty() {
        println!("No tasks.");
        return Ok(());
    }
    renderer.print_task_table(&visible, ctx)
}

#[instrument(skip_all)]
fn cmd_add(session: &mut Session<'_>, ctx: &ViewContext, args: &[String]) -> anyhow::Result<()> {
    let fields = parse_new_task(args, ctx)?;
    let task = session.create(fields)?;
    info!(id = %task.id, "command add");
    println!("Created task {} ({}).", task.short_id(), task.title);
    Ok(())
}

#[instrument(skip_all)]
fn cmd_info(
    session: &Session<'_>,
    store: &DataStore,
    renderer: &mut Renderer,
    ctx: &ViewContext,
    args: &[String],
) -> anyhow::Result<()> {
    for id in resolve_all(session, store, args)? {
        let task = session
            .task(id)
            .ok_or_else(|| anyhow!("task not found: {id}"))?;
        renderer.print_task_info(task, ctx)?;
    }
    Ok(())
}

#[instrument(skip_all)]
fn cmd_modify(
    session: &mut Session<'_>,
    store: &DataStore,
    ctx: &ViewContext,
    args: &[String],
) -> anyhow::Result<()> {
    let (reference, rest) = args
        .split_first()
        .ok_or_else(|| anyhow!("modify: a task id is required"))?;
    let id = store.resolve(session.owner_id(), reference)?.id;
    let patch = parse_patch(rest, ctx)?;

    let task = session.edit(id, patch, ctx.now)?;
    info!(id = %task.id, "command modify");
    println!("Modified task {} ({}).", task.short_id(), task.title);
    Ok(())
}

#[instrument(skip(session, store, ctx, args))]
fn cmd_set_completed(
    session: &mut Session<'_>,
    store: &DataStore,
    ctx: &ViewContext,
    args: &[String],
    completed: bool,
) -> anyhow::Result<()> {
    for id in resolve_all(session, store, args)? {
        let already = session.task(id).is_some_and(|task| task.completed == completed);
        if already {
            println!("Task {} is already {}.", short(id), state_word(completed));
            continue;
        }

        let task = session.toggle(id, ctx.now)?;
        println!("Marked task {} ({}) {}.", task.short_id(), task.title, state_word(task.completed));
    }
    Ok(())
}

#[instrument(skip_all)]
fn cmd_delete(session: &mut Session<'_>, store: &DataStore, args: &[String]) -> anyhow::Result<()> {
    for id in resolve_all(session, store, args)? {
        let title = session.task(id).map(|task| task.title.clone()).unwrap_or_default();
        session.delete(id)?;
        println!("Deleted task {} ({title}).", short(id));
    }
    Ok(())
}

#[instrument(skip_all)]
fn cmd_export(session: &mut Session<'_>, cfg: &Config, args: &[String]) -> anyhow::Result<()> {
    let selector = match args {
        [] => FilterSelector::All,
        _ => selector_from(cfg, args)?,
    };
    session.set_selector(selector);
    let out = serde_json::to_string_pretty(&session.visible())?;
    println!("{out}");
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "usage: taskdeck [-v|-q] [--rc key=value] [--rc-file PATH] [--data DIR] [--owner ID] <command> [args]

commands:
  list [all|pending|completed|high-priority]
  add <title> [priority:P] [category:C] [due:EXPR] [desc:TEXT]
  info <id>...
  modify <id> [title words] [title:T] [priority:P] [category:C] [due:EXPR|due:] [desc:TEXT|desc:]
  done <id>...          mark completed
  undo <id>...          mark pending again
  delete <id>...
  stats                 totals, completion rate, streak
  activity              created/completed timeline grouped by day
  export [filter]       JSON
  help | version

ids are unique prefixes of the task uuid; commands may be abbreviated."
    );
    Ok(())
}

fn resolve_all(session: &Session<'_>, store: &DataStore, args: &[String]) -> anyhow::Result<Vec<Uuid>> {
    if args.is_empty() {
        return Err(anyhow!("a task id is required"));
    }
    args.iter()
        .map(|reference| Ok(store.resolve(session.owner_id(), reference)?.id))
        .collect()
}

fn short(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

fn state_word(completed: bool) -> &'static str {
    if completed { "completed" } else { "pending" }
}
