//! Results of the ALOHA sweep

use std::path::Path;
use std::time::Duration;

/// One simulation run of a search
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct EvaluationRow {
    #[serde(rename = "numHosts")]
    pub num_hosts: usize,
    #[serde(rename = "iaMean")]
    pub ia_mean: f64,
    pub utilization: f64,
}

/// Best inter-arrival mean found for one host count
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct OptimumRow {
    #[serde(rename = "numHosts")]
    pub num_hosts: usize,
    #[serde(rename = "iaMean")]
    pub ia_mean: f64,
    pub utilization: f64,
    pub converged: bool,
    pub evaluations: usize,
}

/// Sweep result
#[derive(Debug)]
pub struct SweepResult {
    /// Seed used for every run
    pub seed_used: u64,

    /// Simulated seconds per run
    pub sim_time_limit: f64,

    /// Every run, grouped by host count in sweep order
    pub evaluations: Vec<EvaluationRow>,

    /// One row per host count whose search completed
    pub optima: Vec<OptimumRow>,

    /// Host counts whose search failed, with the reason
    pub failures: Vec<String>,

    pub elapsed: Duration,
}

impl SweepResult {
    /// Print a summary of the sweep results
    pub fn print_summary(&self) {
        println!("\n╔════════════════════════════════════════════════════════╗");
        println!("║        Pure ALOHA Optimal iaMean Sweep Results         ║");
        println!("╚════════════════════════════════════════════════════════╝\n");

        println!("Configuration:");
        println!("  Seed: {}", self.seed_used);
        println!("  Sim time limit: {}s", self.sim_time_limit);
        println!("  Runs: {}", self.evaluations.len());
        println!("  Wall time: {:.1}s\n", self.elapsed.as_secs_f64());

        println!("Optima:");
        println!(
            "  {:>8}  {:>12}  {:>12}  {:>6}  {:>9}",
            "numHosts", "iaMean [s]", "utilization", "conv", "runs"
        );
        for row in &self.optima {
            println!(
                "  {:>8}  {:>12.4}  {:>12.5}  {:>6}  {:>9}",
                row.num_hosts,
                row.ia_mean,
                row.utilization,
                if row.converged { "yes" } else { "NO" },
                row.evaluations
            );
        }

        if let Some(best) = self
            .optima
            .iter()
            .max_by(|a, b| a.utilization.total_cmp(&b.utilization))
        {
            println!(
                "\n  Highest utilization: {:.5} (numHosts={}, iaMean={:.4}s), theory 1/(2e) = {:.5}",
                best.utilization,
                best.num_hosts,
                best.ia_mean,
                1.0 / (2.0 * std::f64::consts::E)
            );
        }

        let not_converged = self.optima.iter().filter(|r| !r.converged).count();
        if not_converged > 0 {
            println!("\n  ⚠ {} searches stopped without converging", not_converged);
        }

        if !self.failures.is_empty() {
            println!("\nFailures:");
            for failure in &self.failures {
                println!("  ✗ {}", failure);
            }
        }
        println!();
    }

    /// Write every run as `numHosts,iaMean,utilization`
    pub fn write_evaluations_csv(&self, path: &Path) -> Result<(), csv::Error> {
        let mut writer = csv::Writer::from_path(path)?;
        for row in &self.evaluations {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write one row per host count with its optimum
    pub fn write_optima_csv(&self, path: &Path) -> Result<(), csv::Error> {
        let mut writer = csv::Writer::from_path(path)?;
        for row in &self.optima {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluations_csv_layout() {
        let result = SweepResult {
            seed_used: 3,
            sim_time_limit: 1000.0,
            evaluations: vec![
                EvaluationRow {
                    num_hosts: 5,
                    ia_mean: 200.0,
                    utilization: 0.0024,
                },
                EvaluationRow {
                    num_hosts: 5,
                    ia_mean: 210.0,
                    utilization: 0.0023,
                },
            ],
            optima: Vec::new(),
            failures: Vec::new(),
            elapsed: Duration::from_secs(1),
        };

        let path = std::env::temp_dir().join(format!("aloha-evals-{}.csv", std::process::id()));
        result.write_evaluations_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["numHosts,iaMean,utilization", "5,200.0,0.0024", "5,210.0,0.0023"]);
    }
}
