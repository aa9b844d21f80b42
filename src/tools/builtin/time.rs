use crate::error::ToolError;
use crate::tools::Tool;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local, Utc};

/// Reports the current date and time
#[derive(Debug, Default)]
pub struct CurrentTimeTool;

impl CurrentTimeTool {
    pub fn new() -> Self {
        Self
    }

    fn render(now: DateTime<FixedOffset>) -> String {
        format!(
            "{} ({})",
            now.format("%A, %-d %B %Y %H:%M:%S %:z"),
            now.to_rfc3339()
        )
    }
}

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time. Input: \"utc\" for UTC, anything else for local time."
    }

    async fn invoke(&self, input: &str) -> Result<String, ToolError> {
        let now = if input.trim().trim_matches('"').eq_ignore_ascii_case("utc") {
            Utc::now().fixed_offset()
        } else {
            Local::now().fixed_offset()
        };
        Ok(Self::render(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn renders_weekday_and_rfc3339() {
        let moment = Utc
            .with_ymd_and_hms(2024, 3, 8, 14, 5, 9)
            .unwrap()
            .fixed_offset();
        assert_eq!(
            CurrentTimeTool::render(moment),
            "Friday, 8 March 2024 14:05:09 +00:00 (2024-03-08T14:05:09+00:00)"
        );
    }

    #[tokio::test]
    async fn utc_input_reports_zero_offset() {
        let output = CurrentTimeTool::new().invoke("UTC").await.unwrap();
        assert!(output.contains("+00:00"));
    }
}
