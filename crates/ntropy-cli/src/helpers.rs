//! Small helpers shared by the subcommands.

use std::io::{BufRead, Write};

use anyhow::{Context, Result, bail};
use ntropy_vault::RedactedCredential;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Install the global subscriber. `RUST_LOG` overrides `default_level`.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

/// Ask a yes/no question. Anything but `y`/`yes` is a no.
pub fn confirm(input: &mut dyn BufRead, out: &mut dyn Write, question: &str) -> Result<bool> {
    write!(out, "{question} [y/N] ")?;
    out.flush()?;

    let mut line = String::new();
    input.read_line(&mut line).context("failed to read answer")?;
    let answer = line.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}

// ---------------------------------------------------------------------------
// Parsing and formatting
// ---------------------------------------------------------------------------

/// Parse a command-line JSON argument that must be an object.
pub fn parse_json_object(raw: &str, flag: &str) -> Result<Value> {
    let value: Value =
        serde_json::from_str(raw).with_context(|| format!("{flag} is not valid JSON"))?;
    if !value.is_object() {
        bail!("{flag} must be a JSON object");
    }
    Ok(value)
}

/// Render masked credentials as an aligned table.
pub fn credential_table(records: &[RedactedCredential]) -> String {
    const HEADERS: [&str; 6] = ["SERVICE", "NAME", "API KEY", "ACCESS KEY", "SECRET", "SETTINGS"];

    let rows: Vec<[String; 6]> = records
        .iter()
        .map(|r| {
            let or_dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".into());
            [
                r.service_name.clone(),
                or_dash(&r.name),
                or_dash(&r.api_key),
                or_dash(&r.access_key),
                or_dash(&r.secret_access_key),
                r.other_setting
                    .as_ref()
                    .map(Value::to_string)
                    .unwrap_or_else(|| "-".into()),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let mut push_row = |cells: &[&str]| {
        let line: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        out.push_str(line.join("  ").trim_end());
        out.push('\n');
    };

    push_row(&HEADERS);
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        push_row(&cells);
    }
    out
}

/// First few components of a vector, for terminal display.
pub fn vector_preview(values: &[f32], count: usize) -> String {
    let shown: Vec<String> = values.iter().take(count).map(|v| format!("{v:.5}")).collect();
    if values.len() > count {
        format!("[{}, ...]", shown.join(", "))
    } else {
        format!("[{}]", shown.join(", "))
    }
}
