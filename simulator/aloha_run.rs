// Scenario Runner - Run ALOHA scenario YAML files and print recorded statistics
//
// Usage:
//   cargo run --bin aloha_run scenarios/pure_aloha.yaml
//   cargo run --bin aloha_run scenarios/  (runs all .yaml files in directory)
//   cargo run --bin aloha_run scenarios/pure_aloha.yaml --seed 42

mod aloha;

use aloha::AlohaEngine;
use sigsweep::{ProbeSpec, RunConfig, RunExecutor};
use simple_logger::SimpleLogger;
use std::env;
use std::fs;
use std::path::Path;

/// Scenario file format
#[derive(Debug, serde::Deserialize)]
struct ScenarioFile {
    /// Scenario metadata
    #[serde(default)]
    meta: ScenarioMeta,

    /// Run configuration
    config: ScenarioConfig,

    /// Statistics to record
    probes: Vec<ProbeEntry>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct ScenarioMeta {
    name: Option<String>,
    description: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct ScenarioConfig {
    /// Ini section to extract
    #[serde(default = "default_section")]
    section: String,

    /// Overrides `seed-set` from the ini text
    #[serde(default)]
    seed: Option<u64>,

    /// Parameter overlay in ini syntax
    ini: String,
}

fn default_section() -> String {
    "General".to_string()
}

/// `@statistic`-style probe declaration
#[derive(Debug, serde::Deserialize)]
struct ProbeEntry {
    name: String,
    component: String,
    source: String,
    #[serde(default = "default_record")]
    record: String,
}

fn default_record() -> String {
    "last".to_string()
}

fn main() {
    SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .unwrap();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <scenario.yaml | directory/> [--seed SEED]", args[0]);
        eprintln!("\nExamples:");
        eprintln!("  {} scenarios/pure_aloha.yaml", args[0]);
        eprintln!("  {} scenarios/", args[0]);
        eprintln!("  {} scenarios/pure_aloha.yaml --seed 42", args[0]);
        std::process::exit(1);
    }

    let path = Path::new(&args[1]);

    // Parse optional seed
    let seed: Option<u64> = if args.len() >= 4 && args[2] == "--seed" {
        Some(args[3].parse().unwrap_or_else(|_| {
            eprintln!("Error: invalid seed: {}", args[3]);
            std::process::exit(1);
        }))
    } else {
        None
    };

    if path.is_file() {
        run_scenario_file(path, seed);
    } else if path.is_dir() {
        run_scenario_directory(path, seed);
    } else {
        eprintln!("Error: Path does not exist: {}", path.display());
        std::process::exit(1);
    }
}

fn run_scenario_directory(dir: &Path, seed: Option<u64>) {
    let mut scenarios = Vec::new();

    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let ext = path.extension().and_then(|s| s.to_str());
            if ext == Some("yaml") || ext == Some("yml") {
                scenarios.push(path);
            }
        }
    }

    scenarios.sort();

    if scenarios.is_empty() {
        eprintln!("No .yaml files found in {}", dir.display());
        std::process::exit(1);
    }

    println!("Found {} scenario(s) to run\n", scenarios.len());
    for (i, scenario_path) in scenarios.iter().enumerate() {
        println!("\n{}/{} Running: {}\n", i + 1, scenarios.len(), scenario_path.display());
        run_scenario_file(scenario_path, seed);
    }
}

fn load_scenario(path: &Path) -> Result<ScenarioFile, String> {
    let yaml_content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    serde_yaml::from_str(&yaml_content)
        .map_err(|e| format!("Failed to parse {}: {}", path.display(), e))
}

/// Run configuration and executor with every probe of the scenario installed
fn prepare_run(
    scenario: &ScenarioFile,
    seed: Option<u64>,
) -> Result<(RunConfig, RunExecutor<AlohaEngine>), String> {
    let mut config = RunConfig::from_ini_text(&scenario.config.ini, &scenario.config.section)
        .map_err(|e| format!("Invalid configuration: {}", e))?;
    if let Some(seed) = seed.or(scenario.config.seed) {
        config = config.with_seed(seed);
    }

    let mut executor = RunExecutor::new(AlohaEngine);
    for probe in &scenario.probes {
        let spec = ProbeSpec::from_statistic(&probe.name, &probe.component, &probe.source, &probe.record)
            .map_err(|e| format!("Invalid statistic `{}`: {}", probe.name, e))?;
        executor = executor.with_probe(spec);
    }
    Ok((config, executor))
}

fn run_scenario_file(path: &Path, seed: Option<u64>) {
    println!("Loading scenario from: {}", path.display());

    let scenario = load_scenario(path).unwrap_or_else(|e| {
        eprintln!("{}", e);
        std::process::exit(1);
    });
    let (config, executor) = prepare_run(&scenario, seed).unwrap_or_else(|e| {
        eprintln!("{} in {}", e, path.display());
        std::process::exit(1);
    });

    let name = scenario.meta.name.as_deref().unwrap_or("(unnamed)");
    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║  SCENARIO: {:<44}║", name);
    println!("╚════════════════════════════════════════════════════════╝\n");
    if let Some(description) = &scenario.meta.description {
        println!("{}\n", description.trim());
    }

    let handle = executor.run(&config).unwrap_or_else(|e| {
        eprintln!("Run failed: {}", e);
        std::process::exit(1);
    });

    let summary = handle.summary();
    println!("Run:");
    println!("  Seed: {}", config.seed);
    println!("  End time: {}s{}", summary.end_time, if summary.hit_time_limit { " (time limit)" } else { "" });
    println!("  Events processed: {}\n", summary.events_processed);

    println!("Statistics:");
    for (name, scalar) in handle.scalars() {
        if scalar.value.is_nan() {
            println!("  {:<24} (no data)", name);
        } else {
            println!("  {:<24} {:.6}  ({} values)", name, scalar.value, scalar.count);
        }
    }
    println!();
}
