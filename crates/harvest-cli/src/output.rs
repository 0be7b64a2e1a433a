//! Terminal rendering for source statuses and run stats

use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use harvest_common::types::{RunState, RunStats, SourceState, SourceStatus};

fn colored_status(status: SourceState) -> String {
    match status {
        SourceState::Enabled => status.as_str().green().to_string(),
        SourceState::Disabled => status.as_str().dimmed().to_string(),
        SourceState::Scheduled => status.as_str().cyan().to_string(),
        SourceState::Error => status.as_str().red().bold().to_string(),
    }
}

fn colored_run_state(state: RunState) -> String {
    match state {
        RunState::Idle => state.as_str().to_string(),
        RunState::Running => state.as_str().yellow().to_string(),
        RunState::Error => state.as_str().red().to_string(),
    }
}

/// One row per source
pub fn status_table(sources: &[SourceStatus]) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Source", "Status", "Run state", "Last update"]);

    for source in sources {
        let last_update = source
            .last_update
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".to_string());
        table.add_row(vec![
            source.name.clone(),
            colored_status(source.status),
            colored_run_state(source.run_state),
            last_update,
        ]);
    }

    format!("{table}\n")
}

/// Counter summary printed after a run
pub fn stats_table(stats: &RunStats) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Counter", "Value"]);

    let rows: [(&str, u64); 11] = [
        ("records seen", stats.items_seen),
        ("saved", stats.items_saved),
        ("duplicate", stats.items_duplicate),
        ("updated", stats.items_updated),
        ("failed", stats.items_failed),
        ("  of which invalid", stats.items_invalid),
        ("emitted by harvesters", stats.records_emitted),
        ("batches succeeded", stats.batches_succeeded),
        ("batches failed", stats.batches_failed),
        ("batches skipped", stats.batches_skipped),
        ("peak concurrency", stats.peak_concurrency),
    ];
    for (label, value) in rows {
        table.add_row(vec![label.to_string(), value.to_string()]);
    }

    format!("{table}\n")
}

/// One-line verdict for a finished run
pub fn run_summary(stats: &RunStats) -> String {
    if stats.all_batches_failed() {
        format!("{} every batch failed", "✗".red())
    } else if stats.batches_failed > 0 || stats.batches_skipped > 0 {
        format!(
            "{} finished with {} failed and {} skipped batches",
            "!".yellow(),
            stats.batches_failed,
            stats.batches_skipped
        )
    } else {
        format!("{} saved {} records", "✓".green(), stats.items_saved)
    }
}
