//! `itcmatch run` / `itcmatch validate`: config-driven GST reconciliation.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::Subcommand;
use itcmatch_recon::{ReconConfig, ReconError, ReconResult};

use crate::exit_codes::{EXIT_RECON_INVALID_CONFIG, EXIT_RECON_RUNTIME, EXIT_RECON_UNMATCHED};
use crate::CliError;

#[derive(Subcommand)]
pub enum ReconCommands {
    /// Reconcile the purchase register against GSTR-2B from a TOML config
    #[command(after_help = "\
Examples:
  itcmatch run fy2425.recon.toml
  itcmatch run fy2425.recon.toml --json | jq .summary
  itcmatch run fy2425.recon.toml --output result.json
  itcmatch run fy2425.recon.toml --fail-on-unmatched
  itcmatch run fy2425.recon.toml --run-at 2025-04-01T00:00:00Z --output result.json")]
    Run {
        /// Path to the .recon.toml config file
        config: PathBuf,

        /// Output JSON to stdout
        #[arg(long)]
        json: bool,

        /// Write JSON output to file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Exit 62 when any purchase-register record stays unmatched
        #[arg(long)]
        fail_on_unmatched: bool,

        /// Pin the run timestamp (RFC 3339) for reproducible output
        #[arg(long, value_name = "TIMESTAMP", value_parser = parse_run_at)]
        run_at: Option<DateTime<Utc>>,
    },

    /// Validate a recon config without running
    #[command(after_help = "\
Examples:
  itcmatch validate fy2425.recon.toml")]
    Validate {
        /// Path to the .recon.toml config file
        config: PathBuf,
    },
}

pub fn cmd_recon(cmd: ReconCommands) -> Result<(), CliError> {
    match cmd {
        ReconCommands::Run { config, json, output, fail_on_unmatched, run_at } => {
            cmd_recon_run(config, json, output, fail_on_unmatched, run_at)
        }
        ReconCommands::Validate { config } => cmd_recon_validate(config),
    }
}

fn recon_err(code: u8, msg: impl Into<String>) -> CliError {
    CliError { code, message: msg.into(), hint: None }
}

fn parse_run_at(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp such as 2025-04-01T00:00:00Z: {e}"))
}

/// Config problems exit 60; everything else that stops a run exits 61.
fn engine_err(err: ReconError) -> CliError {
    match &err {
        ReconError::ConfigParse(_) | ReconError::ConfigValidation(_) | ReconError::UnknownLayer(_) => {
            recon_err(EXIT_RECON_INVALID_CONFIG, err.to_string())
        }
        ReconError::MissingSource(name) => recon_err(EXIT_RECON_INVALID_CONFIG, err.to_string())
            .with_hint(format!("add a [{name}] table with `file` and `[{name}.columns]`")),
        ReconError::MissingColumn { source_name, .. } => {
            let hint = format!("check the [{source_name}.columns] mapping against the CSV header");
            recon_err(EXIT_RECON_RUNTIME, err.to_string()).with_hint(hint)
        }
        ReconError::DuplicateRecordId { source_name, .. } => {
            let hint = format!("map [{source_name}.columns] record_id to a unique column, or omit it");
            recon_err(EXIT_RECON_RUNTIME, err.to_string()).with_hint(hint)
        }
        _ => recon_err(EXIT_RECON_RUNTIME, err.to_string()),
    }
}

fn read_config(config_path: &Path) -> Result<ReconConfig, CliError> {
    let config_str = std::fs::read_to_string(config_path)
        .map_err(|e| recon_err(EXIT_RECON_RUNTIME, format!("cannot read config: {e}")))?;
    ReconConfig::from_toml(&config_str).map_err(engine_err)
}

fn cmd_recon_run(
    config_path: PathBuf,
    json_output: bool,
    output_file: Option<PathBuf>,
    fail_on_unmatched: bool,
    run_at: Option<DateTime<Utc>>,
) -> Result<(), CliError> {
    let config = read_config(&config_path)?;

    // Resolve file paths relative to config file's directory
    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));

    let mut input = itcmatch_recon::load::load_input(&config, base_dir).map_err(engine_err)?;
    if let Some(run_at) = run_at {
        input = input.with_run_at(run_at);
    }
    tracing::debug!(
        primary = input.primary.len(),
        secondary = input.secondary.len(),
        "sources loaded"
    );

    let result = itcmatch_recon::run(&config, &input).map_err(engine_err)?;

    // Output
    let json_str = serde_json::to_string_pretty(&result)
        .map_err(|e| recon_err(EXIT_RECON_RUNTIME, format!("JSON serialization error: {e}")))?;

    if let Some(ref path) = output_file {
        std::fs::write(path, &json_str)
            .map_err(|e| recon_err(EXIT_RECON_RUNTIME, format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    }

    if json_output {
        println!("{json_str}");
    }

    print_summary(&result);

    let unmatched = result.summary.unmatched;
    if fail_on_unmatched && unmatched > 0 {
        return Err(recon_err(
            EXIT_RECON_UNMATCHED,
            format!("{unmatched} purchase record(s) unmatched"),
        ));
    }

    Ok(())
}

/// Human summary to stderr.
fn print_summary(result: &ReconResult) {
    let s = &result.summary;
    let rate = if s.total_primary == 0 {
        0.0
    } else {
        s.matched as f64 * 100.0 / s.total_primary as f64
    };
    eprintln!(
        "{}: {} purchase records, {} matched ({:.1}%), {} unmatched, {} time-barred",
        result.meta.config_name, s.total_primary, s.matched, rate, s.unmatched, s.time_barred,
    );
    for layer in result.layers.iter().filter(|l| l.enabled) {
        eprintln!(
            "  layer {}  {:<30} {:>6} resolved  {:>6} cumulative",
            layer.layer, layer.name, layer.resolved, layer.cumulative_resolved,
        );
    }
    eprintln!(
        "GSTR-2B: {} rows, {} matched, {} unmatched",
        s.total_secondary, s.secondary_matched, s.secondary_unmatched,
    );

    let a = &s.analysis;
    if a.total_unmatched > 0 {
        eprintln!(
            "unmatched issues: {} invoice format, {} GSTIN, {} amount, {} date, {} time-barred",
            a.invoice_format_issues, a.gstin_issues, a.amount_issues, a.date_issues, a.time_barred,
        );
    }
}

fn cmd_recon_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = read_config(&config_path)?;

    let layers: Vec<String> = config.enabled_layers.iter().map(u8::to_string).collect();
    eprintln!(
        "valid: recon '{}' with layers [{}], fuzzy threshold {}, time-barred before {}",
        config.name,
        layers.join(", "),
        config.fuzzy_threshold,
        config.time_barred_cutoff,
    );
    for (name, source) in [("primary", &config.primary), ("secondary", &config.secondary)] {
        match source {
            Some(source) => eprintln!("  {name}: {}", source.file),
            None => eprintln!("  {name}: (not configured)"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_at_accepts_offsets() {
        let dt = parse_run_at("2025-04-01T05:30:00+05:30").unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-04-01T00:00:00+00:00");
        assert!(parse_run_at("01-04-2025").is_err());
    }

    #[test]
    fn error_codes_by_kind() {
        assert_eq!(engine_err(ReconError::ConfigParse("x".into())).code, EXIT_RECON_INVALID_CONFIG);
        assert_eq!(engine_err(ReconError::UnknownLayer(9)).code, EXIT_RECON_INVALID_CONFIG);

        let missing = engine_err(ReconError::MissingSource("primary".into()));
        assert_eq!(missing.code, EXIT_RECON_INVALID_CONFIG);
        assert!(missing.hint.unwrap().contains("[primary]"));

        let dup = engine_err(ReconError::DuplicateRecordId {
            source_name: "secondary".into(),
            record_id: "G-1".into(),
        });
        assert_eq!(dup.code, EXIT_RECON_RUNTIME);
        assert!(dup.hint.is_some());

        let cancelled = engine_err(ReconError::Cancelled { completed_layers: 3 });
        assert_eq!(cancelled.code, EXIT_RECON_RUNTIME);
        assert!(cancelled.hint.is_none());
    }
}
