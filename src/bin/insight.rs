//! Insight CLI - Command-line interface for Synheart Insight
//!
//! Commands:
//! - summary / correlate / causal / forecast / verdict: run one entry point on a JSON request
//! - validate: Validate a metric sample batch
//! - config: Print the default engine configuration
//! - doctor: Diagnose installation and configuration

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use synheart_insight::schema::{SampleAdapter, INPUT_SCHEMA_VERSION};
use synheart_insight::verdict::VERDICT_RULES;
use synheart_insight::{EngineConfig, InsightEngine, InsightError, INSIGHT_VERSION, PRODUCER_NAME};

/// Environment variable holding the log filter
const LOG_ENV: &str = "INSIGHT_LOG";

/// Insight - On-device statistical inference for personal health data
#[derive(Parser)]
#[command(name = "insight")]
#[command(author = "Synheart AI Inc")]
#[command(version = INSIGHT_VERSION)]
#[command(about = "Baselines, trends, N-of-1 effects, forecasts and lab verdicts", long_about = None)]
struct Cli {
    /// Log engine decisions to stderr at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RequestArgs {
    /// Request file path (use - for stdin)
    #[arg(short, long, default_value = "-")]
    input: PathBuf,

    /// Output file path (use - for stdout)
    #[arg(short, long, default_value = "-")]
    output: PathBuf,

    /// Engine configuration file (JSON, partial overrides allowed)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pretty-print the response
    #[arg(long)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Baselines, zones, momentum and trend class for one metric
    Summary(RequestArgs),

    /// Before/after correlation of an intervention with every metric
    Correlate(RequestArgs),

    /// N-of-1 effect estimate of an intervention on one metric
    Causal(RequestArgs),

    /// Gaussian-process forecast of one biomarker
    Forecast(RequestArgs),

    /// Effectiveness verdicts for interventions against a lab draw
    Verdict(RequestArgs),

    /// Validate a metric sample batch
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default engine configuration
    Config,

    /// Diagnose installation and configuration
    Doctor {
        /// Check a configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one sample per line)
    Ndjson,
    /// JSON array of samples
    Json,
}

type JsonEntryPoint = fn(&InsightEngine, &str) -> Result<String, InsightError>;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), InsightCliError> {
    match cli.command {
        Commands::Summary(args) => cmd_request(&args, InsightEngine::metric_summary_json),
        Commands::Correlate(args) => cmd_request(&args, InsightEngine::correlations_json),
        Commands::Causal(args) => cmd_request(&args, InsightEngine::causal_estimate_json),
        Commands::Forecast(args) => cmd_request(&args, InsightEngine::forecast_json),
        Commands::Verdict(args) => cmd_request(&args, InsightEngine::verdicts_json),
        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),
        Commands::Config => {
            println!("{}", EngineConfig::default().to_json()?);
            Ok(())
        }
        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
    }
}

fn read_input(input: &Path) -> Result<String, InsightCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn write_output(output: &Path, data: &str) -> Result<(), InsightCliError> {
    if output.to_string_lossy() == "-" {
        println!("{}", data);
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

fn load_engine(config: Option<&Path>) -> Result<InsightEngine, InsightCliError> {
    match config {
        Some(path) => {
            let json = fs::read_to_string(path)?;
            Ok(InsightEngine::with_config(EngineConfig::from_json(&json)?)?)
        }
        None => Ok(InsightEngine::default()),
    }
}

fn cmd_request(args: &RequestArgs, entry_point: JsonEntryPoint) -> Result<(), InsightCliError> {
    let engine = load_engine(args.config.as_deref())?;
    let request = read_input(&args.input)?;

    let response = entry_point(&engine, &request)?;
    let response = if args.pretty {
        let value: serde_json::Value = serde_json::from_str(&response)?;
        serde_json::to_string_pretty(&value)?
    } else {
        response
    };

    write_output(&args.output, &response)
}

fn cmd_validate(
    input: &Path,
    input_format: InputFormat,
    json: bool,
) -> Result<(), InsightCliError> {
    let input_data = read_input(input)?;

    let samples = match input_format {
        InputFormat::Ndjson => SampleAdapter::parse_ndjson(&input_data)?,
        InputFormat::Json => SampleAdapter::parse_array(&input_data)?,
    };

    let results = SampleAdapter::validate_samples(&samples);
    let report = ValidationReport {
        schema_version: INPUT_SCHEMA_VERSION.to_string(),
        total_samples: samples.len(),
        valid_samples: samples.len() - results.len(),
        invalid_samples: results.len(),
        errors: results
            .iter()
            .map(|r| ValidationErrorDetail {
                index: r.index,
                metric_type: r.metric_type.as_str().to_string(),
                error: r.error.to_string(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total samples:   {}", report.total_samples);
        println!("Valid samples:   {}", report.valid_samples);
        println!("Invalid samples: {}", report.invalid_samples);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - Sample {} ({}): {}", err.index, err.metric_type, err.error);
            }
        }
    }

    if report.invalid_samples > 0 {
        Err(InsightCliError::ValidationFailed(report.invalid_samples))
    } else {
        Ok(())
    }
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), InsightCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "insight_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Insight version {}", INSIGHT_VERSION),
    });

    checks.push(DoctorCheck {
        name: "schema_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Input schema: {}", INPUT_SCHEMA_VERSION),
    });

    let engine = match config {
        Some(path) if !path.exists() => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Warning,
                message: "Config file does not exist; using defaults".to_string(),
            });
            InsightEngine::default()
        }
        Some(path) => match load_engine(Some(path)) {
            Ok(engine) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: "Config file valid".to_string(),
                });
                engine
            }
            Err(e) => {
                let detail = CliError::from(e);
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Invalid config: {}", detail.message),
                });
                InsightEngine::default()
            }
        },
        None => InsightEngine::default(),
    };

    let tables_loaded = !engine.effects().is_empty() && !engine.kernels().is_empty();
    checks.push(DoctorCheck {
        name: "tables".to_string(),
        status: if tables_loaded {
            CheckStatus::Ok
        } else {
            CheckStatus::Error
        },
        message: format!(
            "{} expected-effect entries, {} biomarker kernels, {} verdict rules",
            engine.effects().len(),
            engine.kernels().len(),
            VERDICT_RULES.len()
        ),
    });

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass requests with --input)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (requests can be streamed in)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: INSIGHT_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Insight Doctor Report");
        println!("=====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(InsightCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Error types

#[derive(Debug)]
enum InsightCliError {
    Io(io::Error),
    Engine(InsightError),
    Json(serde_json::Error),
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for InsightCliError {
    fn from(e: io::Error) -> Self {
        InsightCliError::Io(e)
    }
}

impl From<InsightError> for InsightCliError {
    fn from(e: InsightError) -> Self {
        InsightCliError::Engine(e)
    }
}

impl From<serde_json::Error> for InsightCliError {
    fn from(e: serde_json::Error) -> Self {
        InsightCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<InsightCliError> for CliError {
    fn from(e: InsightCliError) -> Self {
        match e {
            InsightCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            InsightCliError::Engine(InsightError::InvalidInput { field, reason }) => CliError {
                code: "INVALID_INPUT".to_string(),
                message: format!("{}: {}", field, reason),
                hint: Some("Run 'insight validate' on the samples for details".to_string()),
            },
            InsightCliError::Engine(e @ InsightError::JsonError(_)) => CliError {
                code: "REQUEST_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check the request fields for this subcommand".to_string()),
            },
            InsightCliError::Engine(e) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check input format".to_string()),
            },
            InsightCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            InsightCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} samples failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            InsightCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    schema_version: String,
    total_samples: usize,
    valid_samples: usize,
    invalid_samples: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    metric_type: String,
    error: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
