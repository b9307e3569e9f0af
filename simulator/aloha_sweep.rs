//! Pure ALOHA Optimal iaMean Sweep
//!
//! For every host count, search the packet inter-arrival mean that maximizes
//! channel utilization. Host counts are searched in parallel.
//!
//! Usage:
//!   cargo run --release --bin aloha_sweep
//!   cargo run --release --bin aloha_sweep -- --hosts 5,10,15 --seed 42 --workers 4 --out results.csv

mod aloha;

use aloha::{AlohaSweepConfig, AlohaSweepRunner};
use log::info;
use simple_logger::SimpleLogger;
use std::env;
use std::path::PathBuf;

struct Args {
    config: AlohaSweepConfig,
    out: PathBuf,
    optima_out: Option<PathBuf>,
}

fn usage(program: &str) -> ! {
    eprintln!(
        "Usage: {} [--hosts N,N,...] [--seed SEED] [--workers N] [--time-limit SECONDS] \
         [--start SECONDS] [--out evaluations.csv] [--optima optima.csv]",
        program
    );
    std::process::exit(1);
}

fn parse_or_exit<T: std::str::FromStr>(flag: &str, value: &str) -> T {
    value.parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid value for {}: {}", flag, value);
        std::process::exit(1);
    })
}

fn parse_args() -> Args {
    let args: Vec<String> = env::args().collect();
    let mut parsed = Args {
        config: AlohaSweepConfig::default(),
        out: PathBuf::from("aloha_sweep.csv"),
        optima_out: None,
    };

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        if flag == "--help" || flag == "-h" {
            usage(&args[0]);
        }
        let Some(value) = args.get(i + 1) else {
            usage(&args[0]);
        };
        match flag {
            "--hosts" => {
                parsed.config.num_hosts = value
                    .split(',')
                    .map(|n| parse_or_exit(flag, n.trim()))
                    .collect()
            }
            "--seed" => parsed.config.seed = Some(parse_or_exit(flag, value)),
            "--workers" => parsed.config.workers = parse_or_exit(flag, value),
            "--time-limit" => parsed.config.sim_time_limit = parse_or_exit(flag, value),
            "--start" => parsed.config.ia_mean_start = parse_or_exit(flag, value),
            "--out" => parsed.out = PathBuf::from(value),
            "--optima" => parsed.optima_out = Some(PathBuf::from(value)),
            _ => usage(&args[0]),
        }
        i += 2;
    }
    parsed
}

fn main() {
    SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .unwrap();

    let args = parse_args();

    println!("╔════════════════════════════════════════════════════════╗");
    println!("║        Pure ALOHA Optimal iaMean Sweep                 ║");
    println!("╚════════════════════════════════════════════════════════╝\n");

    info!("Configuration:");
    info!("  Host counts: {:?}", args.config.num_hosts);
    info!("  Start iaMean: {}s (lower bound {}s)", args.config.ia_mean_start, args.config.ia_mean_lower_bound);
    info!("  Sim time limit: {}s", args.config.sim_time_limit);
    info!("");

    let runner = AlohaSweepRunner::new(args.config);
    let result = runner.run().unwrap_or_else(|e| {
        eprintln!("Sweep failed: {}", e);
        std::process::exit(1);
    });

    result.print_summary();

    if let Err(e) = result.write_evaluations_csv(&args.out) {
        eprintln!("Failed to write {}: {}", args.out.display(), e);
        std::process::exit(1);
    }
    println!("Evaluations written to {}", args.out.display());

    if let Some(path) = &args.optima_out {
        if let Err(e) = result.write_optima_csv(path) {
            eprintln!("Failed to write {}: {}", path.display(), e);
            std::process::exit(1);
        }
        println!("Optima written to {}", path.display());
    }

    if !result.failures.is_empty() {
        std::process::exit(1);
    }
}
