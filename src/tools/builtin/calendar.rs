//! Calendar tools over a host-supplied backend.
//!
//! The device calendar lives outside the core. The host implements [`CalendarBackend`]
//! and the agent only sees the two gated tools below.

use crate::error::ToolError;
use crate::tools::Tool;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Days, Duration, Local, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

pub const CALENDAR_READ_PERMISSION: &str = "calendar.read";
pub const CALENDAR_WRITE_PERMISSION: &str = "calendar.write";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCalendarEvent {
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Access to the device calendar
#[async_trait]
pub trait CalendarBackend: Send + Sync {
    /// Events overlapping `[start, end)`, ordered by start time
    async fn events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>>;

    /// Create an event and return its id
    async fn create_event(&self, event: NewCalendarEvent) -> Result<String>;
}

/// Process-local calendar, used by the CLI and tests
#[derive(Debug, Default)]
pub struct InMemoryCalendar {
    events: Mutex<Vec<CalendarEvent>>,
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CalendarBackend for InMemoryCalendar {
    async fn events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>> {
        let events = self.events.lock().unwrap_or_else(|p| p.into_inner());
        let mut found: Vec<CalendarEvent> = events
            .iter()
            .filter(|event| event.start < end && event.end > start)
            .cloned()
            .collect();
        found.sort_by_key(|event| event.start);
        Ok(found)
    }

    async fn create_event(&self, event: NewCalendarEvent) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(CalendarEvent {
                id: id.clone(),
                title: event.title,
                start: event.start,
                end: event.end,
                location: event.location,
            });
        Ok(id)
    }
}

/// Start of the local day containing `date`, in UTC
fn local_day_start(date: NaiveDate) -> Option<DateTime<Utc>> {
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug, Deserialize)]
struct RangeArgs {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

/// Interpret `today`, `tomorrow`, `week`, a `YYYY-MM-DD` date, or `{"start", "end"}`.
fn parse_range(input: &str, now: DateTime<Local>) -> Result<(DateTime<Utc>, DateTime<Utc>), ToolError> {
    let trimmed = input.trim().trim_matches('"');
    if let Ok(range) = serde_json::from_str::<RangeArgs>(trimmed) {
        if range.end <= range.start {
            return Err(ToolError::new("end must be after start"));
        }
        return Ok((range.start, range.end));
    }

    let today = now.date_naive();
    let (first_day, days) = match trimmed.to_lowercase().as_str() {
        "" | "today" => (today, 1),
        "tomorrow" => (
            today
                .checked_add_days(Days::new(1))
                .ok_or_else(|| ToolError::new("date out of range"))?,
            1,
        ),
        "week" | "this week" | "next 7 days" => (today, 7),
        other => {
            let date = NaiveDate::parse_from_str(other, "%Y-%m-%d").map_err(|_| {
                ToolError::new(format!(
                    "Unrecognized date range '{}'. Use today, tomorrow, week, YYYY-MM-DD or {{\"start\", \"end\"}}.",
                    trimmed
                ))
            })?;
            (date, 1)
        }
    };

    let start = local_day_start(first_day)
        .ok_or_else(|| ToolError::new("could not resolve local midnight"))?;
    let last_day = first_day
        .checked_add_days(Days::new(days))
        .ok_or_else(|| ToolError::new("date out of range"))?;
    let end = local_day_start(last_day)
        .ok_or_else(|| ToolError::new("could not resolve local midnight"))?;
    Ok((start, end))
}

fn render_event(event: &CalendarEvent) -> String {
    let start = event.start.with_timezone(&Local);
    let end = event.end.with_timezone(&Local);
    let mut line = format!(
        "- {} {}-{} {}",
        start.format("%a %d %b"),
        start.format("%H:%M"),
        end.format("%H:%M"),
        event.title
    );
    if let Some(location) = &event.location {
        line.push_str(&format!(" @ {}", location));
    }
    line
}

/// Lists calendar events in a date range
pub struct CalendarReadTool {
    backend: std::sync::Arc<dyn CalendarBackend>,
}

impl CalendarReadTool {
    pub fn new(backend: std::sync::Arc<dyn CalendarBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for CalendarReadTool {
    fn name(&self) -> &str {
        "calendar_read"
    }

    fn description(&self) -> &str {
        "List calendar events. Input: today, tomorrow, week, a date (YYYY-MM-DD), or {\"start\": RFC3339, \"end\": RFC3339}."
    }

    fn permission(&self) -> Option<&str> {
        Some(CALENDAR_READ_PERMISSION)
    }

    async fn invoke(&self, input: &str) -> Result<String, ToolError> {
        let (start, end) = parse_range(input, Local::now())?;
        let events = self
            .backend
            .events_between(start, end)
            .await
            .map_err(|e| ToolError::new(format!("calendar unavailable: {:#}", e)))?;

        if events.is_empty() {
            return Ok("No events in that period.".to_string());
        }
        Ok(events.iter().map(render_event).collect::<Vec<_>>().join("\n"))
    }
}

#[derive(Debug, Deserialize)]
struct CreateArgs {
    title: String,
    start: DateTime<Utc>,
    #[serde(default)]
    end: Option<DateTime<Utc>>,
    #[serde(default)]
    duration_minutes: Option<i64>,
    #[serde(default)]
    location: Option<String>,
}

/// Creates a calendar event
pub struct CalendarWriteTool {
    backend: std::sync::Arc<dyn CalendarBackend>,
}

impl CalendarWriteTool {
    pub fn new(backend: std::sync::Arc<dyn CalendarBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for CalendarWriteTool {
    fn name(&self) -> &str {
        "calendar_write"
    }

    fn description(&self) -> &str {
        "Create a calendar event. Input: {\"title\": \"...\", \"start\": RFC3339, \"end\": RFC3339 (optional, default one hour), \"location\": \"...\" (optional)}."
    }

    fn permission(&self) -> Option<&str> {
        Some(CALENDAR_WRITE_PERMISSION)
    }

    async fn invoke(&self, input: &str) -> Result<String, ToolError> {
        let args: CreateArgs = serde_json::from_str(input)
            .map_err(|e| ToolError::new(format!("invalid event arguments: {}", e)))?;
        if args.title.trim().is_empty() {
            return Err(ToolError::new("event title must not be empty"));
        }

        let end = match (args.end, args.duration_minutes) {
            (Some(end), _) => Some(end),
            (None, Some(minutes)) => Duration::try_minutes(minutes)
                .and_then(|length| args.start.checked_add_signed(length)),
            (None, None) => args.start.checked_add_signed(Duration::hours(1)),
        }
        .ok_or_else(|| ToolError::new("event duration out of range"))?;
        if end <= args.start {
            return Err(ToolError::new("event must end after it starts"));
        }

        let event = NewCalendarEvent {
            title: args.title.trim().to_string(),
            start: args.start,
            end,
            location: args.location,
        };
        let title = event.title.clone();
        let id = self
            .backend
            .create_event(event)
            .await
            .map_err(|e| ToolError::new(format!("could not create event: {:#}", e)))?;

        Ok(format!(
            "Created '{}' starting {} (id {})",
            title,
            args.start.with_timezone(&Local).format("%a %d %b %H:%M"),
            id
        ))
    }
}
