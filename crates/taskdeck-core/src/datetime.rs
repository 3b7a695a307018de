use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  Offset,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;
use tracing::{
  debug,
  info,
  warn
};

const TZ_ENV: &str = "TASKDECK_TIMEZONE";
const TZ_FILE_ENV: &str =
  "TASKDECK_TIME_CONFIG";
const TZ_FILE_NAME: &str =
  "taskdeck-time.toml";

const WEEKDAY_NAMES: [&str; 7] = [
  "Monday",
  "Tuesday",
  "Wednesday",
  "Thursday",
  "Friday",
  "Saturday",
  "Sunday"
];

const LOCAL_TIME_FORMATS: [&str; 2] =
  ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"];

/// `taskdeck-time.toml`: either a
/// top-level `timezone` or one under
/// `[time]`.
#[derive(Debug, Default, Deserialize)]
struct TimeFile {
  #[serde(default)]
  timezone: Option<String>,
  #[serde(default)]
  time:     Option<TimeSection>
}

#[derive(Debug, Default, Deserialize)]
struct TimeSection {
  #[serde(default)]
  timezone: Option<String>
}

impl TimeFile {
  fn into_timezone(self) -> Option<String> {
    self.timezone.or(
      self
        .time
        .and_then(|section| section.timezone)
    )
  }
}

/// Display timezone from the
/// environment, then the time file,
/// then UTC.
pub fn resolve_timezone() -> Tz {
  let from_env = std::env::var(TZ_ENV)
    .ok()
    .and_then(|raw| {
      parse_timezone(&raw, TZ_ENV)
    });
  if let Some(tz) = from_env {
    return tz;
  }

  let path = time_file_path();
  match read_time_file(&path) {
    | Ok(Some(raw)) => {
      let source =
        format!("{}", path.display());
      if let Some(tz) =
        parse_timezone(&raw, &source)
      {
        return tz;
      }
    }
    | Ok(None) => {}
    | Err(err) => {
      warn!(error = %format!("{err:#}"), "ignoring timezone file");
    }
  }

  debug!("no timezone configured; using UTC");
  chrono_tz::UTC
}

fn time_file_path() -> PathBuf {
  std::env::var(TZ_FILE_ENV)
    .ok()
    .map(|raw| raw.trim().to_string())
    .filter(|raw| !raw.is_empty())
    .map(PathBuf::from)
    .unwrap_or_else(|| {
      PathBuf::from(TZ_FILE_NAME)
    })
}

fn read_time_file(
  path: &Path
) -> anyhow::Result<Option<String>> {
  if !path.is_file() {
    return Ok(None);
  }

  let text = fs::read_to_string(path)
    .with_context(|| {
      format!(
        "failed to read {}",
        path.display()
      )
    })?;
  let parsed: TimeFile =
    toml::from_str(&text)
      .with_context(|| {
        format!(
          "failed to parse {}",
          path.display()
        )
      })?;

  let timezone = parsed.into_timezone();
  if timezone.is_none() {
    warn!(file = %path.display(), "time file has no timezone key");
  }
  Ok(timezone)
}

/// Parses an IANA zone id; `source`
/// names where it came from for the
/// log.
pub fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let id = raw.trim();
  match id.parse::<Tz>() {
    | Ok(tz) => {
      info!(source, timezone = %tz, "using timezone");
      Some(tz)
    }
    | Err(err) => {
      warn!(source, timezone = %id, error = %err, "unknown timezone id");
      None
    }
  }
}

#[must_use]
pub fn local_date(
  dt: DateTime<Utc>,
  tz: Tz
) -> NaiveDate {
  dt.with_timezone(&tz).date_naive()
}

#[must_use]
pub fn format_local_date(
  dt: DateTime<Utc>,
  tz: Tz
) -> String {
  local_date(dt, tz)
    .format("%Y-%m-%d")
    .to_string()
}

/// First day of the week containing
/// `date`.
#[must_use]
pub fn start_of_week(
  date: NaiveDate,
  week_start: Weekday
) -> NaiveDate {
  date.week(week_start).first_day()
}

/// First instant of `date` in `tz`, as
/// UTC. Local midnight, or the end of
/// the DST gap when midnight is skipped.
#[must_use]
pub fn local_midnight(
  date: NaiveDate,
  tz: Tz
) -> DateTime<Utc> {
  let midnight =
    date.and_time(NaiveTime::MIN);
  match tz.from_local_datetime(&midnight) {
    | LocalResult::Single(at)
    | LocalResult::Ambiguous(at, _) => {
      at.with_timezone(&Utc)
    }
    | LocalResult::None => {
      gap_end(midnight, tz)
    }
  }
}

/// The transition instant that skips
/// over `wall`. Bisects between the
/// readings of `wall` under the offsets
/// on either side of the gap.
fn gap_end(
  wall: NaiveDateTime,
  tz: Tz
) -> DateTime<Utc> {
  let offset_at = |at: NaiveDateTime| {
    tz.offset_from_utc_datetime(&at).fix()
  };
  let before =
    offset_at(wall - Duration::days(1));
  let after =
    offset_at(wall + Duration::days(1));

  let mut low = wall
    - Duration::seconds(i64::from(
      after.local_minus_utc()
    ));
  let mut high = wall
    - Duration::seconds(i64::from(
      before.local_minus_utc()
    ));
  while high - low > Duration::seconds(1)
  {
    let mid = low + (high - low) / 2;
    if offset_at(mid) == before {
      low = mid;
    } else {
      high = mid;
    }
  }
  debug!(%wall, %tz, "wall-clock time falls in a DST gap");
  high.and_utc()
}

/// Earliest instant for a wall-clock
/// time; fails inside a DST gap.
fn local_to_utc(
  naive: NaiveDateTime,
  tz: Tz
) -> anyhow::Result<DateTime<Utc>> {
  tz.from_local_datetime(&naive)
    .earliest()
    .map(|local| {
      local.with_timezone(&Utc)
    })
    .ok_or_else(|| {
      anyhow!(
        "{naive} does not exist in {tz}"
      )
    })
}

#[must_use]
pub fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  token.trim().parse::<Weekday>().ok()
}

#[must_use]
pub fn weekday_name(
  day: Weekday
) -> &'static str {
  WEEKDAY_NAMES
    [day.num_days_from_monday() as usize]
}

#[derive(Debug, Clone, PartialEq)]
enum DateExpr {
  Now,
  DaysFromToday(i64),
  Next(Weekday),
  Offset(Duration),
  Instant(DateTime<Utc>),
  Date(NaiveDate),
  WallClock(NaiveDateTime)
}

/// Parses a due-date expression
/// relative to `now` in `tz`. Date-only
/// forms resolve to local midnight.
#[tracing::instrument(skip(now, tz))]
pub fn parse_date_expr(
  input: &str,
  now: DateTime<Utc>,
  tz: Tz
) -> anyhow::Result<DateTime<Utc>> {
  let expr = classify_expr(input.trim())?
    .ok_or_else(|| {
      anyhow!(
        "unrecognized date expression: \
         {input}"
      )
    })
    .context(
      "expected today, tomorrow, a \
       weekday, +3d/-2w/+4h/+30m, \
       YYYY-MM-DD, YYYY-MM-DD HH:MM or \
       RFC3339"
    )?;
  debug!(?expr, "classified date expression");

  let today = local_date(now, tz);
  match expr {
    | DateExpr::Now => Ok(now),
    | DateExpr::DaysFromToday(days) => {
      Ok(local_midnight(
        today + Duration::days(days),
        tz
      ))
    }
    | DateExpr::Next(day) => {
      Ok(local_midnight(
        next_weekday(today, day),
        tz
      ))
    }
    | DateExpr::Offset(offset) => {
      Ok(now + offset)
    }
    | DateExpr::Instant(at) => Ok(at),
    | DateExpr::Date(date) => {
      Ok(local_midnight(date, tz))
    }
    | DateExpr::WallClock(naive) => {
      local_to_utc(naive, tz)
    }
  }
}

fn classify_expr(
  token: &str
) -> anyhow::Result<Option<DateExpr>> {
  let keyword =
    match token.to_ascii_lowercase().as_str()
    {
      | "now" => Some(DateExpr::Now),
      | "today" => {
        Some(DateExpr::DaysFromToday(0))
      }
      | "tomorrow" => {
        Some(DateExpr::DaysFromToday(1))
      }
      | "yesterday" => {
        Some(DateExpr::DaysFromToday(-1))
      }
      | _ => None
    };
  if keyword.is_some() {
    return Ok(keyword);
  }

  if let Some(day) =
    parse_weekday_name(token)
  {
    return Ok(Some(DateExpr::Next(day)));
  }

  if let Some(offset) =
    parse_offset(token)?
  {
    return Ok(Some(DateExpr::Offset(
      offset
    )));
  }

  if let Ok(at) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(Some(DateExpr::Instant(
      at.with_timezone(&Utc)
    )));
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return Ok(Some(DateExpr::Date(date)));
  }

  Ok(LOCAL_TIME_FORMATS.iter().find_map(
    |format| {
      NaiveDateTime::parse_from_str(
        token, format
      )
      .ok()
      .map(DateExpr::WallClock)
    }
  ))
}

/// `+3d`, `-2w`, `+4h`, `+30m`.
fn parse_offset(
  token: &str
) -> anyhow::Result<Option<Duration>> {
  let pattern =
    Regex::new(r"^([+-])(\d{1,6})([wdhm])$")
      .context("offset pattern")?;
  let Some(caps) = pattern.captures(token)
  else {
    return Ok(None);
  };

  let amount: i64 = caps[2]
    .parse()
    .with_context(|| {
      format!("invalid offset: {token}")
    })?;
  let amount = if &caps[1] == "-" {
    -amount
  } else {
    amount
  };

  let offset = match &caps[3] {
    | "w" => Duration::weeks(amount),
    | "d" => Duration::days(amount),
    | "h" => Duration::hours(amount),
    | _ => Duration::minutes(amount)
  };
  Ok(Some(offset))
}

/// The next `day` strictly after
/// `from`.
fn next_weekday(
  from: NaiveDate,
  day: Weekday
) -> NaiveDate {
  let ahead = (day.num_days_from_monday()
    + 7
    - from.weekday().num_days_from_monday())
    % 7;
  let ahead = if ahead == 0 { 7 } else { ahead };
  from + Duration::days(i64::from(ahead))
}

#[cfg(test)]
mod tests {
  use chrono::{
    DateTime,
    Duration,
    NaiveDate,
    TimeZone,
    Utc,
    Weekday
  };

  use super::{
    format_local_date,
    local_midnight,
    parse_date_expr,
    parse_weekday_name,
    start_of_week,
    weekday_name
  };

  fn tuesday_noon() -> DateTime<Utc> {
    Utc
      .with_ymd_and_hms(
        2026, 2, 17, 12, 0, 0
      )
      .single()
      .expect("valid now")
  }

  fn date(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
  }

  #[test]
  fn weekday_names_round_trip() {
    assert_eq!(
      parse_weekday_name("Wed"),
      Some(Weekday::Wed)
    );
    assert_eq!(
      parse_weekday_name(" saturday "),
      Some(Weekday::Sat)
    );
    assert_eq!(
      parse_weekday_name("someday"),
      None
    );
    assert_eq!(
      weekday_name(Weekday::Thu),
      "Thursday"
    );
  }

  #[test]
  fn weekday_expression_means_next_occurrence()
  {
    let now = tuesday_noon();
    let wednesday = parse_date_expr(
      "wednesday",
      now,
      chrono_tz::UTC
    )
    .expect("parse weekday");
    assert_eq!(
      format_local_date(
        wednesday,
        chrono_tz::UTC
      ),
      "2026-02-18"
    );

    let tuesday = parse_date_expr(
      "tue",
      now,
      chrono_tz::UTC
    )
    .expect("parse weekday");
    assert_eq!(
      format_local_date(
        tuesday,
        chrono_tz::UTC
      ),
      "2026-02-24"
    );
  }

  #[test]
  fn plain_date_is_local_midnight() {
    let parsed = parse_date_expr(
      "2026-03-01",
      tuesday_noon(),
      chrono_tz::America::Mexico_City
    )
    .expect("parse date");
    assert_eq!(
      parsed,
      Utc
        .with_ymd_and_hms(
          2026, 3, 1, 6, 0, 0
        )
        .single()
        .expect("valid instant")
    );
  }

  #[test]
  fn keywords_offsets_and_wall_clock() {
    let now = tuesday_noon();
    let utc = chrono_tz::UTC;

    assert_eq!(
      parse_date_expr("now", now, utc)
        .expect("now"),
      now
    );
    assert_eq!(
      parse_date_expr(
        "Tomorrow", now, utc
      )
      .expect("tomorrow"),
      Utc
        .with_ymd_and_hms(
          2026, 2, 18, 0, 0, 0
        )
        .single()
        .expect("valid instant")
    );
    assert_eq!(
      parse_date_expr("+2d", now, utc)
        .expect("offset"),
      now + Duration::days(2)
    );
    assert_eq!(
      parse_date_expr("-1w", now, utc)
        .expect("offset"),
      now - Duration::weeks(1)
    );
    assert_eq!(
      parse_date_expr(
        "2026-02-20 09:30",
        now,
        chrono_tz::Asia::Tokyo
      )
      .expect("wall clock"),
      Utc
        .with_ymd_and_hms(
          2026, 2, 20, 0, 30, 0
        )
        .single()
        .expect("valid instant")
    );
    assert!(
      parse_date_expr("someday", now, utc)
        .is_err()
    );
    assert!(
      parse_date_expr("+2y", now, utc)
        .is_err()
    );
  }

  #[test]
  fn week_starts_on_configured_day() {
    let tuesday = date(2026, 2, 17);
    assert_eq!(
      start_of_week(tuesday, Weekday::Sun),
      date(2026, 2, 15)
    );
    assert_eq!(
      start_of_week(tuesday, Weekday::Mon),
      date(2026, 2, 16)
    );
    assert_eq!(
      start_of_week(tuesday, Weekday::Tue),
      tuesday
    );
    assert_eq!(
      start_of_week(tuesday, Weekday::Wed),
      date(2026, 2, 11)
    );
  }

  #[test]
  fn midnight_honours_timezone() {
    let midnight = local_midnight(
      date(2026, 2, 15),
      chrono_tz::Asia::Tokyo
    );
    assert_eq!(
      midnight,
      Utc
        .with_ymd_and_hms(
          2026, 2, 14, 15, 0, 0
        )
        .single()
        .expect("valid instant")
    );
  }

  #[test]
  fn skipped_midnight_resolves_to_first_instant_of_day()
  {
    let santiago =
      chrono_tz::America::Santiago;
    let gap_day = Utc
      .with_ymd_and_hms(
        2026, 9, 6, 4, 0, 0
      )
      .single()
      .expect("valid instant");

    assert_eq!(
      local_midnight(
        date(2026, 9, 6),
        santiago
      ),
      gap_day
    );

    let now = Utc
      .with_ymd_and_hms(
        2026, 9, 1, 15, 0, 0
      )
      .single()
      .expect("valid now");
    assert_eq!(
      parse_date_expr(
        "2026-09-06",
        now,
        santiago
      )
      .expect("date on gap day"),
      gap_day
    );
    assert_eq!(
      parse_date_expr(
        "sunday", now, santiago
      )
      .expect("weekday on gap day"),
      gap_day
    );
    assert!(
      parse_date_expr(
        "2026-09-06 00:30",
        now,
        santiago
      )
      .is_err()
    );
  }

  #[test]
  fn skipped_calendar_day_resolves_to_next_day()
  {
    assert_eq!(
      local_midnight(
        date(2011, 12, 30),
        chrono_tz::Pacific::Apia
      ),
      Utc
        .with_ymd_and_hms(
          2011, 12, 30, 10, 0, 0
        )
        .single()
        .expect("valid instant")
    );
  }
}
