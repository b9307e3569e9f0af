//! Chart Template Test Fixture Generator
//!
//! Creates one chart per (template, property case) with the script wrapped in
//! a test harness, and saves them all as one analysis file.
//!
//! Usage:
//!   cargo run --bin chart_fixture_gen [TEMPLATE_DIR] [OUTPUT.yaml]

use indexmap::IndexMap;
use log::info;
use sigsweep::chart_templates::{generate_testcases, untested_templates, FixtureCase};
use sigsweep::{Analysis, Chart, ChartTemplateRegistry, TemplateError};
use simple_logger::SimpleLogger;
use std::env;
use std::path::PathBuf;

const ALOHA_UTILIZATION_FILTER: &str =
    "runattr:experiment =~ PureAlohaExperiment AND name =~ channelUtilization:last";
const EMPTY_FILTER_ERROR: &str = "Error while querying results: Empty filter expression";

fn props(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn filter_cases(extra: &[(&str, Option<&str>)]) -> Vec<FixtureCase> {
    let mut cases: Vec<FixtureCase> = extra
        .iter()
        .map(|(filter, err)| FixtureCase::set("filter", filter, *err))
        .collect();
    cases.push(FixtureCase::set("filter", "aa bb", Some("Syntax error")));
    cases.push(FixtureCase::set("filter", "", Some(EMPTY_FILTER_ERROR)));
    cases
}

fn generate_all(registry: &ChartTemplateRegistry) -> Result<Vec<Chart>, TemplateError> {
    let mut charts = Vec::new();

    // Bar chart
    let mut cases = filter_cases(&[
        ("runattr:experiment =~ PureAlohaExperiment AND type =~ scalar", None),
        ("runattr:experiment =~ PureAlohaExperiment AND name =~ channel*", None),
    ]);
    cases.extend([
        FixtureCase::set("groups", "iaMean", None),
        FixtureCase::set("groups", "numHosts", Some("Overlap between Group and Series columns")),
        FixtureCase::set("groups", "experiment", None),
        FixtureCase::set("groups", "name", None),
        FixtureCase::set("groups", "aa bb", Some("No such iteration variable")),
        FixtureCase::set("groups", "", Some("set both the Groups and Series properties")),
        FixtureCase::set("series", "iaMean", Some("Overlap between Group and Series columns")),
        FixtureCase::set("series", "numHosts", None),
        FixtureCase::set("series", "experiment", None),
        FixtureCase::set("series", "name", None),
        FixtureCase::set("series", "", Some("set both the Groups and Series properties")),
    ]);
    charts.extend(generate_testcases(
        registry,
        &["barchart_native"],
        &props(&[
            ("filter", ALOHA_UTILIZATION_FILTER),
            ("groups", "iaMean"),
            ("series", "numHosts"),
        ]),
        &cases,
    )?);

    // Line chart
    let mut cases = filter_cases(&[
        ("runattr:experiment =~ Fifo* AND type =~ vector", None),
        ("runattr:experiment =~ Fifo* AND name =~ qlen:vector", None),
    ]);
    cases.extend([
        FixtureCase::set("vector_start_time", "10", None),
        FixtureCase::set("vector_end_time", "20", None),
        FixtureCase::set("vector_operations", "apply:mean", None),
        FixtureCase::set("vector_operations", "compute:sum", None),
        FixtureCase::set(
            "vector_operations",
            "apply:sum\ncompute:divtime\napply:timewinavg(window_size=200) # comment",
            None,
        ),
    ]);
    charts.extend(generate_testcases(
        registry,
        &["linechart_native"],
        &props(&[("filter", "runattr:experiment =~ Fifo*")]),
        &cases,
    )?);

    // Scatter chart over iteration variables
    let mut cases = filter_cases(&[
        ("runattr:experiment =~ PureAlohaExperiment AND type =~ scalar", None),
        ("runattr:experiment =~ PureAlohaExperiment AND name =~ channel*", None),
    ]);
    cases.extend([
        FixtureCase::set("xaxis_itervar", "iaMean", None),
        FixtureCase::set("xaxis_itervar", "numHosts", Some("X axis column also in grouper columns:")),
        FixtureCase::set("xaxis_itervar", "experiment", None),
        FixtureCase::set("xaxis_itervar", "name", None),
        FixtureCase::set(
            "xaxis_itervar",
            "aa bb",
            Some("iteration variable for the X axis could not be found"),
        ),
        FixtureCase::set("xaxis_itervar", "", Some("select the iteration variable for the X axis")),
        FixtureCase::set("group_by", "iaMean", Some("X axis column also in grouper columns:")),
        FixtureCase::set("group_by", "numHosts", None),
        FixtureCase::set("group_by", "numHosts, replication", None),
        FixtureCase::set("group_by", "experiment", None),
        FixtureCase::set("group_by", "name", None),
        FixtureCase::set(
            "group_by",
            "aa bb",
            Some("iteration variable for grouping could not be found"),
        ),
        FixtureCase::set("group_by", "", None),
    ]);
    charts.extend(generate_testcases(
        registry,
        &["scatterchart_itervars_native"],
        &props(&[
            ("filter", ALOHA_UTILIZATION_FILTER),
            ("xaxis_itervar", "iaMean"),
            ("group_by", "numHosts"),
        ]),
        &cases,
    )?);

    // Histogram chart
    charts.extend(generate_testcases(
        registry,
        &["histogramchart_native"],
        &props(&[("filter", "runattr:experiment =~ PureAlohaExperiment")]),
        &filter_cases(&[
            (
                "runattr:experiment =~ PureAlohaExperiment AND type =~ histogram AND itervar:numHosts =~ 15 AND (itervar:iaMean =~ 1 OR itervar:iaMean =~ 2)",
                None,
            ),
            (
                "runattr:experiment =~ PureAlohaExperiment AND nonexistent",
                Some("returned no data"),
            ),
        ]),
    )?);

    // Generic plot: no properties to vary
    charts.extend(generate_testcases(
        registry,
        &["generic_xyplot_native"],
        &IndexMap::new(),
        &[FixtureCase::unchanged()],
    )?);

    // Box and whiskers
    charts.extend(generate_testcases(
        registry,
        &["boxwhiskers"],
        &props(&[("filter", "runattr:experiment =~ PureAlohaExperiment AND *:histogram")]),
        &filter_cases(&[(
            "runattr:experiment =~ PureAlohaExperiment AND type =~ histogram",
            None,
        )]),
    )?);

    Ok(charts)
}

fn main() {
    SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .unwrap();

    let args: Vec<String> = env::args().collect();
    let template_dir = PathBuf::from(args.get(1).map(String::as_str).unwrap_or("charttemplates"));
    let output = PathBuf::from(args.get(2).map(String::as_str).unwrap_or("all_the_tests.yaml"));

    let registry = ChartTemplateRegistry::load_dir(&template_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load chart templates: {}", e);
        std::process::exit(1);
    });
    info!("Loaded {} chart templates from {}", registry.len(), template_dir.display());

    let charts = generate_all(&registry).unwrap_or_else(|e| {
        eprintln!("Failed to generate test charts: {}", e);
        std::process::exit(1);
    });

    let untested = untested_templates(&registry, &charts);
    let inputs = vec!["/resultfiles/aloha".to_string(), "/resultfiles/fifo".to_string()];
    let analysis = Analysis::new(inputs, charts);

    if let Err(e) = analysis.to_file(&output) {
        eprintln!("Failed to write analysis: {}", e);
        std::process::exit(1);
    }

    println!("Wrote {} test charts to {}", analysis.charts.len(), output.display());
    if untested.is_empty() {
        println!("Every chart template is covered");
    } else {
        println!("Untested chart templates (not covered by this test): {:?}", untested);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn bundled_registry() -> ChartTemplateRegistry {
        ChartTemplateRegistry::load_dir(&Path::new(env!("CARGO_MANIFEST_DIR")).join("charttemplates"))
            .unwrap()
    }

    #[test]
    fn test_every_bundled_template_covered() {
        let registry = bundled_registry();
        let charts = generate_all(&registry).unwrap();

        assert!(untested_templates(&registry, &charts).is_empty());
        // bar 15, line 9, scatter 17, histogram 4, generic 1, box and whiskers 3
        assert_eq!(charts.len(), 49);
    }

    #[test]
    fn test_chart_names_unique() {
        let charts = generate_all(&bundled_registry()).unwrap();
        let mut names: Vec<&str> = charts.iter().map(|c| c.name.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), charts.len());
    }
}
