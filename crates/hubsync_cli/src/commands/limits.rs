use chrono::{DateTime, Utc};
use clap::ValueEnum;
use hubsync::{AccessToken, RateLimitBudget, UserId};

use crate::commands::shared::build_client;
use crate::config::Config;

/// Output format for rate limit display.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Display as a formatted table (default)
    #[default]
    Table,
    /// Display as JSON
    Json,
}

/// Handle the `limits` command.
///
/// Asks GitHub for the core budget of every configured credential and
/// prints what the budget registry learned.
pub(crate) async fn handle_limits(
    output: OutputFormat,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let credentials = config.credential_pairs();
    if credentials.is_empty() {
        return Err("No credentials configured. Add them under [credentials] in hubsync.toml".into());
    }

    let client = build_client(config)?;
    for (user, token) in &credentials {
        if let Err(e) = client.rate_limit(token).await {
            tracing::warn!(user = %user, token = %token, error = %e, "Could not fetch rate limit");
        }
    }

    let now = Utc::now();
    let budgets = client.budgets();
    let items: Vec<_> = credentials
        .iter()
        .filter_map(|(user, token)| {
            budgets
                .get(token)
                .map(|budget| RateLimitDisplay::from_budget(*user, token, &budget, now))
        })
        .collect();

    if items.is_empty() {
        return Err("No rate limit could be fetched for any configured credential".into());
    }
    RateLimitDisplay::print_many(items, output)?;
    Ok(())
}

/// Rate limit information for display.
#[derive(Debug, Clone, serde::Serialize, tabled::Tabled)]
pub(crate) struct RateLimitDisplay {
    #[tabled(rename = "User")]
    pub user: i64,
    #[tabled(rename = "Token")]
    pub token: String,
    #[tabled(rename = "Limit")]
    pub limit: u32,
    #[tabled(rename = "Used")]
    pub used: u32,
    #[tabled(rename = "Remaining")]
    pub remaining: u32,
    #[tabled(rename = "Usage %")]
    pub usage_percent: String,
    #[tabled(rename = "Resets At")]
    pub reset_at: String,
    #[tabled(rename = "Resets In")]
    pub reset_in: String,
}

impl RateLimitDisplay {
    pub(crate) fn from_budget(
        user: UserId,
        token: &AccessToken,
        budget: &RateLimitBudget,
        now: DateTime<Utc>,
    ) -> Self {
        let used = budget.limit.saturating_sub(budget.remaining);
        let usage_percent = if budget.limit > 0 {
            (f64::from(used) / f64::from(budget.limit)) * 100.0
        } else {
            0.0
        };
        let reset_duration = budget.reset.signed_duration_since(now);
        let reset_in = if reset_duration.num_seconds() > 0 {
            format_duration(reset_duration)
        } else {
            "now".to_string()
        };

        Self {
            user: user.0,
            token: token.to_string(),
            limit: budget.limit,
            used,
            remaining: budget.remaining,
            usage_percent: format!("{:.1}%", usage_percent),
            reset_at: budget.reset.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            reset_in,
        }
    }

    pub(crate) fn print_many(
        mut items: Vec<Self>,
        format: OutputFormat,
    ) -> Result<(), serde_json::Error> {
        items.sort_by_key(|item| item.user);

        match format {
            OutputFormat::Table => {
                let mut table = tabled::Table::new(items);
                table.with(tabled::settings::Style::rounded());
                println!("{}", table);
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&items)?);
            }
        }
        Ok(())
    }
}

/// Format a duration in a human-readable way.
fn format_duration(duration: chrono::Duration) -> String {
    let total_secs = duration.num_seconds();
    if total_secs < 60 {
        format!("{}s", total_secs)
    } else if total_secs < 3600 {
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    } else {
        let hours = total_secs / 3600;
        let mins = (total_secs % 3600) / 60;
        if mins > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    }
}
