use async_trait::async_trait;
use chorus_common::{Error, Result};
use chrono::Utc;
use serde_json::json;

use crate::tools::{Tool, ToolContext, ToolOutput};

/// Reports the current date and time, optionally in an IANA timezone.
#[derive(Debug, Default)]
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &'static str {
        "current_time"
    }

    fn description(&self) -> &'static str {
        "Get the current date and time. Optionally pass an IANA timezone \
         (e.g. 'Europe/Berlin'); defaults to UTC."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "timezone": {
                    "type": "string",
                    "description": "IANA timezone name (e.g. 'America/New_York'). Defaults to 'UTC'."
                }
            }
        })
    }

    async fn execute(&self, _context: &ToolContext, args: serde_json::Value) -> Result<ToolOutput> {
        let tz_name = args["timezone"].as_str().unwrap_or("UTC");
        let tz: chrono_tz::Tz = tz_name
            .parse()
            .map_err(|_| Error::Tool(format!("unknown timezone: '{tz_name}'")))?;

        let now = Utc::now().with_timezone(&tz);
        Ok(ToolOutput::success(format!(
            "{} ({tz_name})",
            now.format("%Y-%m-%d %H:%M:%S %Z")
        )))
    }
}
