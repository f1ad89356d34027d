use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use serde_json::{json, Value};
use sheetstep_core::prelude::*;
use sheetstep_core::test_harness::spawn_loopback;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "SHEETSTEP_LOG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Command::new("sheetstep")
        .version(sheetstep_core::VERSION)
        .about("Analysis step edit & replay engine")
        .subcommand_required(true)
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .default_value("text")
                .value_parser(["text", "json"])
                .help("Log output format"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML engine configuration"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Drive a live edit controller against the simulated kernel")
                .arg(
                    Arg::new("edits")
                        .long("edits")
                        .default_value("20")
                        .value_parser(value_parser!(u64))
                        .help("Number of local edits to make"),
                )
                .arg(
                    Arg::new("interval-ms")
                        .long("interval-ms")
                        .default_value("50")
                        .value_parser(value_parser!(u64))
                        .help("Pause between edits"),
                )
                .arg(
                    Arg::new("latency-ms")
                        .long("latency-ms")
                        .default_value("0")
                        .value_parser(value_parser!(u64))
                        .help("Simulated kernel latency"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("check-imports")
                .about("Test recorded import recipes against a set of available sources")
                .arg(
                    Arg::new("file")
                        .long("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON array of step import data"),
                )
                .arg(
                    Arg::new("available")
                        .long("available")
                        .value_delimiter(',')
                        .help("Files that exist"),
                )
                .arg(
                    Arg::new("dataframes")
                        .long("dataframes")
                        .value_delimiter(',')
                        .help("Dataframes that exist"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        );

    let matches = cli.get_matches();
    init_tracing(matches.get_one::<String>("log-format").map(String::as_str));
    let config = load_config(matches.get_one::<PathBuf>("config"))?;

    match matches.subcommand() {
        Some(("simulate", args)) => simulate(args, &config).await,
        Some(("check-imports", args)) => check_imports(args).await,
        _ => bail!("unknown subcommand"),
    }
}

fn init_tracing(format: Option<&str>) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if format == Some("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}

async fn simulate(args: &ArgMatches, config: &EngineConfig) -> anyhow::Result<()> {
    let edits = args.get_one::<u64>("edits").copied().unwrap_or(20);
    let interval_ms = args.get_one::<u64>("interval-ms").copied().unwrap_or(50);
    let interval = Duration::from_millis(interval_ms);
    let latency = Duration::from_millis(args.get_one::<u64>("latency-ms").copied().unwrap_or(0));

    let kernel = Arc::new(SimulatedKernel::new().with_latency(latency));
    let (channel, _transport) = spawn_loopback(kernel.clone(), config);
    let step_list = shared_step_list();
    let controller = LiveEditController::spawn(
        IdentityCodec::<Value>::new(),
        StepType::Pivot,
        json!({"sheet_index": 0, "edit": 0}),
        channel,
        step_list.clone(),
        config,
    );

    tracing::info!(edits, interval_ms, "simulating edits");
    for n in 1..=edits {
        controller.set_params(|params| params["edit"] = json!(n));
        tokio::time::sleep(interval).await;
    }
    controller.flush();

    let mut snapshots = controller.subscribe();
    let settle = config.settle_time(StepType::Pivot);
    tokio::time::timeout(settle, async {
        loop {
            {
                let snapshot = snapshots.borrow_and_update();
                if !snapshot.loading && !snapshot.pending {
                    break;
                }
            }
            if snapshots.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .context("controller did not settle")?;

    let snapshot = controller.snapshot();
    let steps = step_list.read().summaries();
    controller.shutdown().await?;

    if args.get_flag("json") {
        let report = json!({
            "edits": edits,
            "requests_sent": snapshot.requests_sent,
            "step_id": snapshot.step_id,
            "last_error": snapshot.last_error,
            "steps": steps,
            "kernel": {
                "edits_received": kernel.stats().edits_received,
            },
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Edits made:    {edits}");
        println!("Requests sent: {}", snapshot.requests_sent);
        if let Some(error) = &snapshot.last_error {
            println!("Last error:    {error}");
        }
        println!("Steps:");
        for step in &steps {
            println!("  {} {}", step.step_id, step.step_type);
        }
    }
    Ok(())
}

async fn check_imports(args: &ArgMatches) -> anyhow::Result<()> {
    let Some(path) = args.get_one::<PathBuf>("file") else {
        bail!("--file is required");
    };
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let imports: Vec<StepImportData> =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;

    let mut kernel = SimulatedKernel::new();
    for file in args.get_many::<String>("available").into_iter().flatten() {
        kernel = kernel.with_file(file.as_str());
    }
    for name in args.get_many::<String>("dataframes").into_iter().flatten() {
        kernel = kernel.with_dataframe(name.as_str());
    }

    let invalid = kernel.test_imports(&imports).await?;
    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&invalid)?);
    } else if invalid.is_empty() {
        println!("All imports are valid.");
    } else {
        for (index, message) in invalid.iter() {
            println!("  [{index}] {message}");
        }
    }

    if !invalid.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}
