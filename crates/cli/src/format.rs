//! Report and error formatting.
//!
//! Two modes:
//! - **Human** (default): one `name: count` line per store
//! - **JSON** (`--json`): `serde_json::to_string_pretty`

use serde::Serialize;

use docket::Error;

/// Output formatting mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

/// What `status` and `migrate` print on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreReport {
    pub data_dir: String,
    pub backend: String,
    pub agents: usize,
    pub guidelines: usize,
    pub customers: usize,
    pub tool_services: usize,
}

/// Format a successful report.
pub fn format_report(report: &StoreReport, mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => serde_json::to_string_pretty(report)
            .unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e)),
        OutputMode::Human => format!(
            "data dir: {}\nbackend: {}\nagents: {}\nguidelines: {}\ncustomers: {}\ntool services: {}",
            report.data_dir,
            report.backend,
            report.agents,
            report.guidelines,
            report.customers,
            report.tool_services
        ),
    }
}

/// What the operator should do about an error, if anything.
pub fn remedy(err: &anyhow::Error) -> Option<&'static str> {
    match err.downcast_ref::<Error>()? {
        Error::MigrationRequired { .. } => Some("re-run with --migrate"),
        Error::ServerOutdated { .. } => Some("upgrade the server"),
        _ => None,
    }
}

/// Format an error, with its remedy when one applies.
pub fn format_error(err: &anyhow::Error, mode: OutputMode) -> String {
    let hint = remedy(err);
    match mode {
        OutputMode::Json => serde_json::to_string_pretty(&serde_json::json!({
            "error": format!("{:#}", err),
            "remedy": hint,
        }))
        .unwrap_or_else(|_| format!("{{\"error\": \"{}\"}}", err)),
        OutputMode::Human => match hint {
            Some(hint) => format!("(error) {:#}\n{}", err, hint),
            None => format!("(error) {:#}", err),
        },
    }
}
