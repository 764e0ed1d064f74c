//! `cart-sim`: seeded load simulator and config checker

mod simulator;

use anyhow::Context;
use cart_types::CoalescerConfig;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use simulator::{run_simulator, SimulatorConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("cart-sim")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Cart write coalescing simulator")
        .subcommand_required(true)
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs and reports as JSON"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Drive random bursts through a coalescer and check invariants")
                .arg(
                    Arg::new("lines")
                        .long("lines")
                        .default_value("4")
                        .value_parser(value_parser!(usize))
                        .help("Number of cart lines"),
                )
                .arg(
                    Arg::new("events")
                        .long("events")
                        .default_value("1000")
                        .value_parser(value_parser!(u64))
                        .help("Number of user interactions to simulate"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("fail-rate")
                        .long("fail-rate")
                        .default_value("0.0")
                        .value_parser(value_parser!(f64))
                        .help("Probability that a backend call fails"),
                )
                .arg(
                    Arg::new("latency-ms")
                        .long("latency-ms")
                        .default_value("120")
                        .value_parser(value_parser!(u64))
                        .help("Simulated backend latency per call"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("Coalescer config (TOML)"),
                ),
        )
        .subcommand(
            Command::new("check-config")
                .about("Validate a coalescer config file")
                .arg(
                    Arg::new("path")
                        .long("path")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to TOML config"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<CoalescerConfig> {
    let Some(path) = path else {
        return Ok(CoalescerConfig::default());
    };
    CoalescerConfig::from_path(path)
        .with_context(|| format!("loading coalescer config from {}", path.display()))
}

fn simulate(args: &ArgMatches, json: bool) -> anyhow::Result<bool> {
    let seed = args.get_one::<u64>("seed").copied().unwrap_or(42);
    let latency_ms = args.get_one::<u64>("latency-ms").copied().unwrap_or(120);
    let fail_rate = args.get_one::<f64>("fail-rate").copied().unwrap_or(0.0);
    anyhow::ensure!(
        (0.0..=1.0).contains(&fail_rate),
        "--fail-rate must be within 0.0..=1.0, got {fail_rate}"
    );

    let config = SimulatorConfig {
        seed,
        lines: args.get_one::<usize>("lines").copied().unwrap_or(4),
        events: args.get_one::<u64>("events").copied().unwrap_or(1_000),
        fail_rate,
        latency: Duration::from_millis(latency_ms),
        coalescer: load_config(args.get_one::<PathBuf>("config").map(PathBuf::as_path))?,
        ..Default::default()
    };
    tracing::info!(
        seed,
        lines = config.lines,
        events = config.events,
        fail_rate,
        latency_ms,
        "running cart simulator"
    );

    let report = run_simulator(config)?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serializing report")?
        );
    } else {
        println!("{}", report.generate_text());
    }
    Ok(report.passed())
}

fn check_config(args: &ArgMatches) -> anyhow::Result<bool> {
    let config = load_config(args.get_one::<PathBuf>("path").map(PathBuf::as_path))?;
    println!(
        "Config OK: debounce {}ms, rate limit {}ms ({:?}), event capacity {}",
        config.debounce_ms, config.rate_limit_ms, config.rate_limit_policy, config.event_capacity
    );
    Ok(true)
}

fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    let json = matches.get_flag("json");
    init_tracing(json);

    let passed = match matches.subcommand() {
        Some(("simulate", args)) => simulate(args, json)?,
        Some(("check-config", args)) => check_config(args)?,
        _ => unreachable!("clap enforces a subcommand"),
    };

    if !passed {
        std::process::exit(1);
    }
    Ok(())
}
