use std::collections::BTreeMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

const RC_ENV_VAR: &str = "TASKDECKRC";
const RC_FILE_NAME: &str =
  ".taskdeckrc";
const MAX_INCLUDE_DEPTH: usize = 8;

const DEFAULTS: [(&str, &str); 5] = [
  ("data.location", "~/.taskdeck"),
  ("default.command", "list"),
  ("default.filter", "all"),
  ("color", "on"),
  ("week.start", "sunday")
];

/// Flat `key = value` settings read
/// from an rc file plus overrides.
#[derive(Debug, Clone)]
pub struct Config {
  map:              BTreeMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

#[derive(Debug, PartialEq, Eq)]
enum RcLine<'a> {
  Blank,
  Include(&'a str),
  Setting(&'a str, &'a str)
}

impl Default for Config {
  fn default() -> Self {
    Self {
      map:          DEFAULTS
        .iter()
        .map(|(k, v)| {
          (k.to_string(), v.to_string())
        })
        .collect(),
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Self::default();

    match resolve_rc_path(rc_override)?
    {
      | Some(path) => {
        info!(rc = %path.display(), "loading rc file");
        cfg.load_file(&path, 0)?;
      }
      | None => {
        warn!(
          "no rc file found; using \
           defaults"
        );
      }
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> anyhow::Result<Option<bool>> {
    self
      .map
      .get(key)
      .map(|raw| parse_bool(key, raw))
      .transpose()
  }

  /// Settings in key order.
  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  fn load_file(
    &mut self,
    path: &Path,
    depth: usize
  ) -> anyhow::Result<()> {
    if depth > MAX_INCLUDE_DEPTH {
      return Err(anyhow!(
        "rc includes nested deeper \
         than {MAX_INCLUDE_DEPTH} \
         levels at {}",
        path.display()
      ));
    }

    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;
    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(Path::to_path_buf)
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (idx, raw_line) in
      text.lines().enumerate()
    {
      let line =
        classify_line(raw_line)
          .ok_or_else(|| {
            anyhow!(
              "invalid config line \
               {}:{}: {}",
              path.display(),
              idx + 1,
              raw_line
            )
          })?;

      match line {
        | RcLine::Blank => {}
        | RcLine::Include(target) => {
          let include =
            resolve_include_path(
              &base_dir, target
            )?;
          if include.exists() {
            debug!(
              file = %path.display(),
              include = %include.display(),
              "processing include"
            );
            self.load_file(
              &include,
              depth + 1
            )?;
          } else {
            warn!(include = %include.display(), "include file does not exist; skipping");
          }
        }
        | RcLine::Setting(key, value) => {
          trace!(key, value, "loaded config key");
          self.map.insert(
            key.to_string(),
            value.to_string()
          );
        }
      }
    }

    Ok(())
  }
}

fn classify_line(
  raw: &str
) -> Option<RcLine<'_>> {
  let line = raw
    .split_once('#')
    .map(|(before, _)| before)
    .unwrap_or(raw)
    .trim();

  if line.is_empty() {
    return Some(RcLine::Blank);
  }
  if let Some(rest) =
    line.strip_prefix("include ")
  {
    return Some(RcLine::Include(
      rest.trim()
    ));
  }

  let (k, v) = line.split_once('=')?;
  let key = k.trim();
  if key.is_empty() {
    return None;
  }
  Some(RcLine::Setting(key, v.trim()))
}

/// Data directory: `--data`, then the
/// `data.location` setting, then
/// `~/.taskdeck`. Created on demand.
#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = match (
    override_dir,
    cfg.get("data.location")
  ) {
    | (Some(path), _) => {
      path.to_path_buf()
    }
    | (None, Some(location)) => {
      expand_tilde(Path::new(&location))
    }
    | (None, None) => {
      home_dir()?.join(".taskdeck")
    }
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

/// Owner identifier: `--owner`, then
/// the `owner` setting, then `$USER`,
/// then `local`.
pub fn resolve_owner(
  cfg: &Config,
  override_owner: Option<&str>
) -> String {
  override_owner
    .map(ToString::to_string)
    .or_else(|| cfg.get("owner"))
    .or_else(|| {
      std::env::var("USER").ok()
    })
    .map(|owner| {
      owner.trim().to_string()
    })
    .filter(|owner| !owner.is_empty())
    .unwrap_or_else(|| {
      "local".to_string()
    })
}

fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(from_env) =
    std::env::var(RC_ENV_VAR)
  {
    if from_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      from_env
    )));
  }

  let candidate =
    home_dir()?.join(RC_FILE_NAME);
  Ok(candidate
    .exists()
    .then_some(candidate))
}

fn home_dir() -> anyhow::Result<PathBuf>
{
  dirs::home_dir().ok_or_else(|| {
    anyhow!(
      "cannot determine home \
       directory"
    )
  })
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let expanded =
    expand_tilde(Path::new(include));
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(
  key: &str,
  raw: &str
) -> anyhow::Result<bool> {
  match raw
    .trim()
    .to_ascii_lowercase()
    .as_str()
  {
    | "1" | "y" | "yes" | "on"
    | "true" => Ok(true),
    | "0" | "n" | "no" | "off"
    | "false" => Ok(false),
    | other => {
      Err(anyhow!(
        "invalid boolean for \
         {key}: {other}"
      ))
    }
  }
}

#[cfg(test)]
mod tests {
  use std::fs;

  use tempfile::tempdir;

  use super::{
    Config,
    RcLine,
    classify_line
  };

  #[test]
  fn classifies_rc_lines() {
    assert_eq!(
      classify_line(
        "  # just a comment"
      ),
      Some(RcLine::Blank)
    );
    assert_eq!(
      classify_line(
        "color = off # trailing"
      ),
      Some(RcLine::Setting(
        "color", "off"
      ))
    );
    assert_eq!(
      classify_line(
        "include extra.rc"
      ),
      Some(RcLine::Include("extra.rc"))
    );
    assert_eq!(
      classify_line("no separator"),
      None
    );
  }

  #[test]
  fn loads_rc_with_includes_and_overrides()
  {
    let dir = tempdir().expect("tempdir");
    let main = dir.path().join("main.rc");
    fs::write(
      dir.path().join("extra.rc"),
      "week.start = monday\n"
    )
    .expect("write include");
    fs::write(
      &main,
      "owner = alice\ninclude \
       extra.rc\ninclude missing.rc\n"
    )
    .expect("write rc");

    let mut cfg = Config::load(Some(
      main.as_path()
    ))
    .expect("load config");
    assert_eq!(
      cfg.get("owner").as_deref(),
      Some("alice")
    );
    assert_eq!(
      cfg.get("week.start").as_deref(),
      Some("monday")
    );
    assert_eq!(
      cfg.get("default.filter").as_deref(),
      Some("all")
    );
    assert_eq!(cfg.loaded_files.len(), 2);

    cfg.apply_overrides(vec![(
      "rc.color".to_string(),
      "off".to_string()
    )]);
    assert_eq!(
      cfg.get_bool("color").expect("bool"),
      Some(false)
    );
  }

  #[test]
  fn rejects_malformed_rc_line() {
    let dir = tempdir().expect("tempdir");
    let rc = dir.path().join("bad.rc");
    fs::write(&rc, "color on\n")
      .expect("write rc");
    let err =
      Config::load(Some(rc.as_path()))
        .expect_err("malformed line");
    assert!(
      err
        .to_string()
        .contains("invalid config line")
    );
  }
}
