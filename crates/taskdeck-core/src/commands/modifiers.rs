use anyhow::anyhow;
use chrono::{
  DateTime,
  Utc
};
use tracing::{
  instrument,
  trace
};

use crate::clock::ViewContext;
use crate::datetime::parse_date_expr;
use crate::task::{
  Category,
  NewTask,
  Priority,
  TaskPatch
};

#[derive(Debug, Clone, PartialEq)]
enum Mod {
  Title(String),
  Priority(Priority),
  Category(Category),
  Due(Option<DateTime<Utc>>),
  Description(Option<String>)
}

/// `add` arguments: title words plus
/// `key:value` modifiers. Everything
/// after `--` is title text.
#[instrument(skip(args, ctx))]
pub(super) fn parse_new_task(
  args: &[String],
  ctx: &ViewContext
) -> anyhow::Result<NewTask> {
  let (words, mods) =
    split_words_and_mods(args, ctx)?;

  let mut fields = NewTask::titled(
    words.join(" ")
  );
  for one_mod in mods {
    match one_mod {
      | Mod::Title(title) => {
        fields.title = title
      }
      | Mod::Priority(priority) => {
        fields.priority = priority
      }
      | Mod::Category(category) => {
        fields.category = category
      }
      | Mod::Due(due) => fields.due = due,
      | Mod::Description(text) => {
        fields.description = text
      }
    }
  }

  if fields.title.trim().is_empty() {
    return Err(anyhow!(
      "add: a title is required"
    ));
  }
  Ok(fields)
}

/// `modify` arguments. Bare words
/// replace the title.
#[instrument(skip(args, ctx))]
pub(super) fn parse_patch(
  args: &[String],
  ctx: &ViewContext
) -> anyhow::Result<TaskPatch> {
  let (words, mods) =
    split_words_and_mods(args, ctx)?;

  let mut patch = TaskPatch::default();
  if !words.is_empty() {
    patch.title = Some(words.join(" "));
  }
  for one_mod in mods {
    match one_mod {
      | Mod::Title(title) => {
        patch.title = Some(title)
      }
      | Mod::Priority(priority) => {
        patch.priority = Some(priority)
      }
      | Mod::Category(category) => {
        patch.category = Some(category)
      }
      | Mod::Due(due) => {
        patch.due = Some(due)
      }
      | Mod::Description(text) => {
        patch.description = Some(text)
      }
    }
  }

  if patch.is_empty() {
    return Err(anyhow!(
      "modify: nothing to change"
    ));
  }
  Ok(patch)
}

fn split_words_and_mods(
  args: &[String],
  ctx: &ViewContext
) -> anyhow::Result<(Vec<String>, Vec<Mod>)>
{
  let mut words = Vec::new();
  let mut mods = Vec::new();

  let mut literal = false;
  for arg in args {
    if arg == "--" && !literal {
      literal = true;
      continue;
    }

    if !literal
      && let Some(one_mod) =
        parse_one_mod(arg, ctx)?
    {
      trace!(?one_mod, "parsed modifier");
      mods.push(one_mod);
      continue;
    }

    words.push(arg.clone());
  }

  Ok((words, mods))
}

fn parse_one_mod(
  tok: &str,
  ctx: &ViewContext
) -> anyhow::Result<Option<Mod>> {
  let Some((key, value)) =
    tok.split_once(':')
  else {
    return Ok(None);
  };
  let value = value.trim();

  let one_mod =
    match key.to_ascii_lowercase().as_str()
    {
      | "title" => {
        Mod::Title(value.to_string())
      }
      | "pri" | "priority" => {
        Mod::Priority(value.parse()?)
      }
      | "cat" | "category" => {
        Mod::Category(value.parse()?)
      }
      | "due" if value.is_empty() => {
        Mod::Due(None)
      }
      | "due" => {
        Mod::Due(Some(parse_date_expr(
          value,
          ctx.now,
          ctx.timezone
        )?))
      }
      | "desc" | "description" => {
        Mod::Description(
          (!value.is_empty())
            .then(|| value.to_string())
        )
      }
      | _ => return Ok(None)
    };

  Ok(Some(one_mod))
}
