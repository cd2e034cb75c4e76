use std::io::Write;

use crossterm::style::{Stylize, style};
use eyre::Result;
use tracing::debug;

use crate::gateway::{AiGateway, insights_text};

/// Sample figures from the dashboard overview; there is no live analytics source.
pub const DEFAULT_DASHBOARD_SUMMARY: &str = "Revenue: $124.5k, Active Users: 12.8k, Conversion Rate: 3.2%. Trends are positive for revenue but flat for user growth.";

const NO_INSIGHTS: &str = "No insights available.";

/// Asks the gateway for insights on `summary` and prints them.
pub async fn print_insights<W: Write + ?Sized>(
    output: &mut W,
    gateway: &dyn AiGateway,
    summary: &str,
) -> Result<()> {
    debug!("Requesting dashboard insights for: {}", summary);

    writeln!(output, "{}", style("Generating AI insights...").dim())?;
    output.flush()?;

    let result = gateway.get_dashboard_insights(summary).await;
    let text = insights_text(&result);

    writeln!(output, "{}", style("AI Smart Insights").magenta().bold())?;
    if text.trim().is_empty() {
        writeln!(output, "{}", NO_INSIGHTS)?;
    } else {
        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            writeln!(output, "{}", line)?;
        }
    }
    writeln!(output)?;

    Ok(())
}
