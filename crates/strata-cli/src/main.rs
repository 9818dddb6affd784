use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use strata_engine::{build_sessions, Pipeline, PipelineConfig, SessionManifest, SessionOutcome};

#[tokio::main]
async fn main() {
    let cli = Command::new("strata")
        .version(strata_engine::VERSION)
        .about("Resolve forking processing pipelines into workflow graphs")
        .subcommand_required(true)
        .subcommand(
            Command::new("resolve")
                .about("Build the workflow graph of every session")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Pipeline configuration (YAML)"),
                )
                .arg(blocks_arg())
                .arg(
                    Arg::new("sessions")
                        .long("sessions")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Session manifest (YAML)"),
                )
                .arg(
                    Arg::new("set")
                        .long("set")
                        .action(ArgAction::Append)
                        .value_name("KEY.PATH=VALUE")
                        .help("Override a configuration value"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print build reports as JSON"),
                ),
        )
        .subcommand(
            Command::new("check-blocks")
                .about("Validate a block catalogue")
                .arg(blocks_arg()),
        );

    init_tracing();

    let outcome = match cli.get_matches().subcommand() {
        Some(("resolve", args)) => resolve(args).await,
        Some(("check-blocks", args)) => check_blocks(args),
        _ => Ok(false),
    };

    match outcome {
        Ok(passed) => std::process::exit(if passed { 0 } else { 1 }),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(2);
        }
    }
}

fn blocks_arg() -> Arg {
    Arg::new("blocks")
        .long("blocks")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Block catalogue (YAML)")
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn path_arg<'a>(args: &'a ArgMatches, name: &str) -> anyhow::Result<&'a PathBuf> {
    args.get_one::<PathBuf>(name)
        .with_context(|| format!("--{name} is required"))
}

fn load_pipeline(args: &ArgMatches) -> anyhow::Result<Pipeline> {
    let path = path_arg(args, "blocks")?;
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading block catalogue {}", path.display()))?;
    Pipeline::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
}

fn load_config(args: &ArgMatches) -> anyhow::Result<PipelineConfig> {
    let path = path_arg(args, "config")?;
    let mut config = PipelineConfig::from_path(path)
        .with_context(|| format!("loading pipeline config {}", path.display()))?;
    for item in args.get_many::<String>("set").into_iter().flatten() {
        let Some((key, value)) = item.split_once('=') else {
            bail!("override '{item}' is not of the form KEY.PATH=VALUE");
        };
        let value: serde_yaml::Value = serde_yaml::from_str(value)
            .with_context(|| format!("parsing override value of '{key}'"))?;
        let path: Vec<&str> = key.split('.').collect();
        config.set(&path, value);
    }
    Ok(config)
}

fn check_blocks(args: &ArgMatches) -> anyhow::Result<bool> {
    let pipeline = load_pipeline(args)?;
    for stage in &pipeline.stages {
        let blocks: usize = stage.groups.iter().map(|g| g.blocks().len()).sum();
        println!("{}: {} groups, {blocks} blocks", stage.name, stage.groups.len());
    }
    println!("{} blocks OK", pipeline.block_count());
    Ok(true)
}

async fn resolve(args: &ArgMatches) -> anyhow::Result<bool> {
    let pipeline = load_pipeline(args)?;
    let config = load_config(args)?;
    let sessions_path = path_arg(args, "sessions")?;
    let manifest = SessionManifest::from_path(sessions_path)
        .with_context(|| format!("loading session manifest {}", sessions_path.display()))?;

    tracing::info!(
        sessions = manifest.sessions.len(),
        blocks = pipeline.block_count(),
        "resolving"
    );
    let outcomes = build_sessions(
        Arc::new(pipeline),
        Arc::new(config),
        manifest.sessions,
        Arc::new(manifest.outputs),
    )
    .await;

    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    if args.get_flag("json") {
        print_json(&outcomes)?;
    } else {
        print_text(&outcomes);
    }
    Ok(failed == 0)
}

fn print_json(outcomes: &[SessionOutcome]) -> anyhow::Result<()> {
    let documents: Vec<serde_json::Value> = outcomes
        .iter()
        .map(|outcome| match &outcome.result {
            Ok(report) => serde_json::to_value(report),
            Err(e) => Ok(serde_json::json!({ "id": outcome.id, "error": e.to_string() })),
        })
        .collect::<Result<_, _>>()
        .context("serializing build reports")?;
    println!("{}", serde_json::to_string_pretty(&documents)?);
    Ok(())
}

fn print_text(outcomes: &[SessionOutcome]) {
    for outcome in outcomes {
        match &outcome.result {
            Ok(report) => {
                println!(
                    "{}: {} nodes, {} edges, {} outputs ({} committed, {} skipped)",
                    report.id,
                    report.graph.nodes.len(),
                    report.graph.edges.len(),
                    report.outputs.len(),
                    report.summary.committed,
                    report.summary.skipped,
                );
                for entry in &report.outputs {
                    println!("  {}/{}", entry.subdir, entry.filename);
                }
                for skip in &report.diagnostics.skips {
                    println!("  skipped {} ({:?}): {}", skip.block, skip.kind, skip.reason);
                }
            }
            Err(e) => println!("{}: FAILED: {e}", outcome.id),
        }
    }
}
