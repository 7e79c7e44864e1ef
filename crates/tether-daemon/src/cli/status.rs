use super::commands::OutputFormat;
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use tether_daemon::storage::{StateFile, StateStore};

pub fn show_status(state_file: &Path, format: OutputFormat) -> Result<()> {
    if !state_file.exists() {
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&StateFile::default())?),
            OutputFormat::Text => println!("No process state recorded at {:?}", state_file),
        }
        return Ok(());
    }

    let store = StateStore::at(state_file)
        .with_context(|| format!("Failed to open process state {:?}", state_file))?;
    let state = store.load()?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&state)?),
        OutputFormat::Text => print!("{}", render_text(&state)),
    }
    Ok(())
}

fn render_text(state: &StateFile) -> String {
    let now = Utc::now();
    let mut out = String::new();
    out.push_str(&format!(
        "{:<8} {:<24} {:<10} {:<11} {:<10} {}\n",
        "PID", "NAME", "STATUS", "RESPONSIVE", "AGE", "NOTE"
    ));
    out.push_str(&format!("{}\n", "-".repeat(76)));

    let mut rows: Vec<_> = state.records.iter().collect();
    rows.sort_by(|a, b| b.1.launch_timestamp.cmp(&a.1.launch_timestamp));

    for (pid, record) in rows {
        let age = record.age(now).num_seconds().max(0);
        let note = match (record.superseded_by, record.hung_since) {
            (Some(next), _) => format!("superseded by {}", next),
            (None, Some(since)) => format!("hung since {}", since.format("%H:%M:%S")),
            (None, None) => String::new(),
        };
        out.push_str(&format!(
            "{:<8} {:<24} {:<10} {:<11} {:<10} {}\n",
            pid,
            record.name,
            record.status.to_string(),
            if record.responsive { "yes" } else { "no" },
            format_age(age),
            note
        ));
    }

    if state.records.is_empty() {
        out.push_str("(no processes recorded)\n");
    }
    out
}

fn format_age(secs: i64) -> String {
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m {}s", s / 60, s % 60),
        s => format!("{}h {}m", s / 3600, (s % 3600) / 60),
    }
}
