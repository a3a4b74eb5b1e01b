mod config;
mod dataset;
mod loader;
mod transport;

use anyhow::Context;
use apicase_core::{
    render_value, CaseDefinition, ExecutionResult, Executor, ExecutorOptions, FanoutSink,
    FileStore, PersistedStore, RecordingSink, RunError, TracingSink, Variables,
};
use clap::{ArgAction, Parser, Subcommand};
use comfy_table::{presets::ASCII_FULL, Table};
use config::Config;
use dataset::{load_rows, DataRow};
use loader::{load_case_file, parse_key_val, parse_overrides};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use transport::HttpTransport;

#[derive(Debug, Parser)]
#[command(author, version, about = "YAML-driven HTTP API case runner")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run cases from a case file, sharing extracted variables between them
    Run {
        /// Path to the YAML case file
        input: PathBuf,
        /// Case to run. Repeat for several; all cases run when omitted.
        #[arg(long = "case", value_name = "NAME", action = ArgAction::Append)]
        cases: Vec<String>,
        /// Default variable (format: key=value). Never overrides extracted values.
        #[arg(long = "var", value_parser = parse_key_val, value_name = "KEY=VALUE", action = ArgAction::Append)]
        vars: Vec<(String, String)>,
        /// CSV data file; the selected cases run once per row with the row's
        /// columns as variables
        #[arg(long, value_name = "CSV")]
        data: Option<PathBuf>,
        /// Path to the config file
        #[arg(long, default_value = config::DEFAULT_CONFIG)]
        config: PathBuf,
        /// Environment from the config's `environments` table
        #[arg(long)]
        env: Option<String>,
        /// Persisted variable store; overrides the config's `extract_file`
        #[arg(long)]
        store: Option<PathBuf>,
        /// Keep the persisted store after the run instead of clearing it
        #[arg(long)]
        keep_store: bool,
        /// Validate non-2xx responses instead of failing the case outright
        #[arg(long)]
        allow_error_status: bool,
        /// Output JSON instead of tables
        #[arg(long)]
        json: bool,
        /// Include the timestamped event stream in JSON output
        #[arg(long, requires = "json")]
        events: bool,
    },
    /// List the cases in a case file
    List {
        /// Path to the YAML case file
        input: PathBuf,
    },
    /// Show or clear the persisted variable store
    Vars {
        /// Path to the config file
        #[arg(long, default_value = config::DEFAULT_CONFIG)]
        config: PathBuf,
        /// Persisted variable store; overrides the config's `extract_file`
        #[arg(long)]
        store: Option<PathBuf>,
        /// Truncate the store
        #[arg(long)]
        clear: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Run {
            input,
            cases,
            vars,
            data,
            config,
            env,
            store,
            keep_store,
            allow_error_status,
            json,
            events,
        } => {
            let config = Config::load(&config)?;
            let file = load_case_file(&input)?;
            let selected: Vec<&CaseDefinition> = if cases.is_empty() {
                file.test_cases.iter().collect()
            } else {
                cases
                    .iter()
                    .map(|name| file.find(name))
                    .collect::<Result<_, _>>()?
            };

            let base_url = config.base_url(env.as_deref())?;
            let store = Arc::new(FileStore::new(store.unwrap_or_else(|| config.extract_file())));
            let recorder = Arc::new(RecordingSink::new());
            let transport = HttpTransport::new(base_url, config.timeout()?);
            let mut executor = Executor::new(transport, store.clone())
                .with_sink(FanoutSink::new().with(TracingSink).with(recorder.clone()))
                .with_options(ExecutorOptions {
                    reject_error_status: !allow_error_status,
                });

            let external = parse_overrides(vars);
            let outcomes: Vec<CaseOutcome> = match data {
                None => selected
                    .iter()
                    .map(|case| CaseOutcome {
                        name: case.case_name.clone(),
                        result: executor.run_case(case, &external),
                    })
                    .collect(),
                Some(path) => run_rows(&mut executor, &selected, &external, load_rows(&path)?),
            };

            if !keep_store {
                if let Err(err) = store.truncate() {
                    tracing::warn!(error = %err, "failed to clear persisted store");
                }
            }

            if json {
                let recorded = events.then(|| recorder.records());
                output_json(&outcomes, recorded)?;
            } else {
                output_tables(&outcomes);
            }

            let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
            if failed > 0 {
                anyhow::bail!("{failed} of {} case(s) failed", outcomes.len());
            }
        }
        Command::List { input } => {
            let file = load_case_file(&input)?;
            for case in &file.test_cases {
                println!(
                    "  - {} ({} {})",
                    case.case_name,
                    case.request.method,
                    case.request
                        .path
                        .as_deref()
                        .or(case.request.url.as_deref())
                        .unwrap_or("-")
                );
            }
        }
        Command::Vars {
            config,
            store,
            clear,
        } => {
            let config = Config::load(&config)?;
            let store = FileStore::new(store.unwrap_or_else(|| config.extract_file()));
            if clear {
                store.truncate()?;
                println!("Cleared {}", store.path().display());
            } else {
                let values = store.read_all()?;
                print_variables(&values);
            }
        }
    }

    Ok(())
}

/// Runs every selected case once per data row. Row values override `--var`
/// defaults, and each row starts from an empty session.
fn run_rows(
    executor: &mut Executor,
    selected: &[&CaseDefinition],
    external: &Variables,
    rows: Vec<DataRow>,
) -> Vec<CaseOutcome> {
    let mut outcomes = Vec::with_capacity(rows.len() * selected.len());
    for row in rows {
        executor.clear_variables();
        let mut variables = external.clone();
        variables.extend(row.values);
        tracing::info!(row = %row.name, "running data row");
        for case in selected {
            outcomes.push(CaseOutcome {
                name: format!("{} [{}]", case.case_name, row.name),
                result: executor.run_case(case, &variables),
            });
        }
    }
    outcomes
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

struct CaseOutcome {
    name: String,
    result: Result<ExecutionResult, RunError>,
}

impl CaseOutcome {
    fn partial(&self) -> Option<&ExecutionResult> {
        match &self.result {
            Ok(result) => Some(result),
            Err(err) => err.result(),
        }
    }
}

fn output_json(
    outcomes: &[CaseOutcome],
    events: Option<Vec<apicase_core::EventRecord>>,
) -> anyhow::Result<()> {
    let cases: Vec<_> = outcomes
        .iter()
        .map(|outcome| {
            json!({
                "case": outcome.name,
                "success": outcome.result.is_ok(),
                "result": outcome.partial(),
                "error": outcome.result.as_ref().err().map(|err| err.to_string()),
            })
        })
        .collect();
    let mut payload = json!({ "cases": cases });
    if let Some(events) = events {
        payload["events"] = serde_json::to_value(events).context("failed to encode events")?;
    }
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn output_tables(outcomes: &[CaseOutcome]) {
    for outcome in outcomes {
        let status = if outcome.result.is_ok() { "passed" } else { "failed" };
        println!("[{status}] {}", outcome.name);

        if let Some(result) = outcome.partial() {
            println!(
                "  status {} in {:.3}s ({})",
                result.status_code, result.elapsed_secs, result.url
            );
            if !result.extracted.is_empty() {
                let names: Vec<&str> = result.extracted.keys().map(String::as_str).collect();
                println!("  extracted: {}", names.join(", "));
            }
            if !result.validations.is_empty() {
                let mut table = Table::new();
                table.load_preset(ASCII_FULL);
                table.set_header(vec!["field", "comparator", "expected", "actual", "pass", "message"]);
                for validation in &result.validations {
                    table.add_row(vec![
                        validation.field.clone(),
                        validation.comparator.clone(),
                        render_value(&validation.expected),
                        validation
                            .actual
                            .as_ref()
                            .map(render_value)
                            .unwrap_or_else(|| "<absent>".to_string()),
                        validation.pass.to_string(),
                        validation.message.clone(),
                    ]);
                }
                println!("{table}");
            }
        }
        if let Err(err) = &outcome.result {
            println!("  error: {err}");
        }
        println!();
    }
}

fn print_variables(values: &Variables) {
    if values.is_empty() {
        println!("No persisted variables.");
        return;
    }
    let mut table = Table::new();
    table.load_preset(ASCII_FULL);
    table.set_header(vec!["name", "value"]);
    for (name, value) in values {
        table.add_row(vec![name.clone(), render_value(value)]);
    }
    println!("{table}");
}
