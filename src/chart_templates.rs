//! Chart templates
//!
//! Templates are loaded once into an explicit [`ChartTemplateRegistry`] and
//! passed to whatever needs lookups. Charts created from a template carry its
//! script and the merged property map; an [`Analysis`] bundles charts with
//! the result-file inputs they read and is persisted as YAML.
//!
//! Property values (filter expressions included) are opaque strings here.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::debug;

/// Errors of template loading, chart creation and analysis I/O
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("chart template `{0}` defined twice")]
    DuplicateTemplate(String),

    #[error("no chart template `{0}`")]
    UnknownTemplate(String),

    #[error("chart template `{template}` has no property `{property}`")]
    UnknownProperty { template: String, property: String },
}

// ============================================================================
// Templates
// ============================================================================

/// One chart template as stored on disk
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChartTemplate {
    pub id: String,

    /// Human readable name
    pub name: String,

    #[serde(rename = "type")]
    pub chart_type: String,

    /// Chart script, opaque
    pub script: String,

    /// Property names with their default values, in declaration order
    #[serde(default)]
    pub properties: IndexMap<String, String>,
}

impl ChartTemplate {
    /// New chart named `name`; `props` override the template defaults.
    /// Properties the template does not declare are rejected.
    pub fn create_chart(
        &self,
        name: &str,
        props: &IndexMap<String, String>,
    ) -> Result<Chart, TemplateError> {
        let mut properties = self.properties.clone();
        for (key, value) in props {
            match properties.get_mut(key) {
                Some(slot) => *slot = value.clone(),
                None => {
                    return Err(TemplateError::UnknownProperty {
                        template: self.id.clone(),
                        property: key.clone(),
                    })
                }
            }
        }

        Ok(Chart {
            name: name.to_string(),
            template: self.id.clone(),
            chart_type: self.chart_type.clone(),
            script: self.script.clone(),
            properties,
        })
    }
}

/// Every known chart template, keyed by id.
///
/// Built once (from a directory or from a list) and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct ChartTemplateRegistry {
    templates: IndexMap<String, ChartTemplate>,
}

impl ChartTemplateRegistry {
    pub fn from_templates(
        templates: impl IntoIterator<Item = ChartTemplate>,
    ) -> Result<Self, TemplateError> {
        let mut registry = Self::default();
        for template in templates {
            if registry.templates.contains_key(&template.id) {
                return Err(TemplateError::DuplicateTemplate(template.id));
            }
            registry.templates.insert(template.id.clone(), template);
        }
        Ok(registry)
    }

    /// Load every `*.yaml` file of `dir`, in file name order
    pub fn load_dir(dir: &Path) -> Result<Self, TemplateError> {
        let io_err = |source| TemplateError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut files = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.extension().map_or(false, |ext| ext == "yaml") {
                files.push(path);
            }
        }
        files.sort();

        let mut templates = Vec::with_capacity(files.len());
        for path in files {
            let text = fs::read_to_string(&path).map_err(|source| TemplateError::Io {
                path: path.clone(),
                source,
            })?;
            let template: ChartTemplate = serde_yaml::from_str(&text)
                .map_err(|source| TemplateError::Yaml { path: path.clone(), source })?;
            debug!("loaded chart template {} from {}", template.id, path.display());
            templates.push(template);
        }

        Self::from_templates(templates)
    }

    pub fn get(&self, id: &str) -> Result<&ChartTemplate, TemplateError> {
        self.templates
            .get(id)
            .ok_or_else(|| TemplateError::UnknownTemplate(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Shorthand for `get(template_id)?.create_chart(name, props)`
    pub fn create_chart(
        &self,
        template_id: &str,
        name: &str,
        props: &IndexMap<String, String>,
    ) -> Result<Chart, TemplateError> {
        self.get(template_id)?.create_chart(name, props)
    }
}

// ============================================================================
// Charts and analysis
// ============================================================================

/// A chart instantiated from a template
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Chart {
    pub name: String,

    /// Id of the template it was created from
    pub template: String,

    #[serde(rename = "type")]
    pub chart_type: String,

    pub script: String,

    pub properties: IndexMap<String, String>,
}

/// Persisted analysis: result-file inputs plus charts
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Analysis {
    pub inputs: Vec<String>,
    pub charts: Vec<Chart>,
}

impl Analysis {
    pub fn new(inputs: Vec<String>, charts: Vec<Chart>) -> Self {
        Self { inputs, charts }
    }

    pub fn to_file(&self, path: &Path) -> Result<(), TemplateError> {
        let text = serde_yaml::to_string(self).map_err(|source| TemplateError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, text).map_err(|source| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, TemplateError> {
        let text = fs::read_to_string(path).map_err(|source| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| TemplateError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }
}

// ============================================================================
// Test fixture generation
// ============================================================================

/// One generated test chart: optionally override a property, and say which
/// error message the chart script is expected to raise
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureCase {
    pub property: Option<(String, String)>,
    pub expected_error: Option<String>,
}

impl FixtureCase {
    /// Base properties only, no error expected
    pub fn unchanged() -> Self {
        Self {
            property: None,
            expected_error: None,
        }
    }

    pub fn set(property: &str, value: &str, expected_error: Option<&str>) -> Self {
        Self {
            property: Some((property.to_string(), value.to_string())),
            expected_error: expected_error.map(str::to_string),
        }
    }
}

const FIXTURE_SKELETON: &str = r#"
# !!!! THIS CHART IS AUTOGENERATED !!!!

import test_exceptions
from omnetpp.scave import chart

print(test_exceptions.yellow("Running test: " + @NAME@))
test_exceptions.messages.clear()

expected_exception = @EXPECTED@

try:
@SCRIPT@
    if expected_exception:
        raise RuntimeError("Expected error did not occur")
except chart.ChartScriptError as e:
    test_exceptions.warn(str(e))
    test_exceptions.expect_message(expected_exception)
except (ValueError, SystemExit) as e:
    print("Unexpected exception:", e)
    test_exceptions.expect_message(expected_exception)

print(test_exceptions.green("PASS"))
"#;

/// Script string literal for `s`, or `None`
fn script_literal(s: Option<&str>) -> String {
    let Some(s) = s else {
        return "None".to_string();
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn indent(script: &str) -> String {
    script
        .lines()
        .map(|line| format!("    {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// For each template and each case, create a chart named
/// `<template_id><case index>` from `base_props` plus the case override,
/// with its script wrapped in the test harness.
pub fn generate_testcases(
    registry: &ChartTemplateRegistry,
    template_ids: &[&str],
    base_props: &IndexMap<String, String>,
    cases: &[FixtureCase],
) -> Result<Vec<Chart>, TemplateError> {
    let mut charts = Vec::with_capacity(template_ids.len() * cases.len());

    for template_id in template_ids {
        let template = registry.get(template_id)?;

        for (i, case) in cases.iter().enumerate() {
            let name = format!("{}{}", template_id, i);
            let mut props = base_props.clone();
            if let Some((key, value)) = &case.property {
                props.insert(key.clone(), value.clone());
            }

            let mut chart = template.create_chart(&name, &props)?;
            chart.script = FIXTURE_SKELETON
                .replace("@NAME@", &script_literal(Some(&name)))
                .replace("@EXPECTED@", &script_literal(case.expected_error.as_deref()))
                .replace("@SCRIPT@", &indent(&chart.script));
            charts.push(chart);
        }
    }

    Ok(charts)
}

/// Template ids no chart in `charts` was created from, sorted
pub fn untested_templates(registry: &ChartTemplateRegistry, charts: &[Chart]) -> Vec<String> {
    let tested: BTreeSet<&str> = charts.iter().map(|c| c.template.as_str()).collect();
    let mut untested: Vec<String> = registry
        .ids()
        .filter(|id| !tested.contains(id))
        .map(str::to_string)
        .collect();
    untested.sort();
    untested
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(id: &str, props: &[(&str, &str)]) -> ChartTemplate {
        ChartTemplate {
            id: id.to_string(),
            name: format!("{} chart", id),
            chart_type: "bar".to_string(),
            script: "from omnetpp.scave import chart\nprops = chart.get_properties()".to_string(),
            properties: props
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn props(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn registry() -> ChartTemplateRegistry {
        ChartTemplateRegistry::from_templates(vec![
            template("barchart", &[("filter", ""), ("groups", ""), ("series", "")]),
            template("xyplot", &[]),
            template("histogram", &[("filter", "")]),
        ])
        .unwrap()
    }

    #[test]
    fn test_create_chart_merges_defaults() {
        let registry = registry();
        let chart = registry
            .create_chart("barchart", "util", &props(&[("groups", "iaMean")]))
            .unwrap();

        assert_eq!(chart.template, "barchart");
        assert_eq!(chart.properties["groups"], "iaMean");
        assert_eq!(chart.properties["filter"], "");
        // declaration order survives the merge
        let keys: Vec<_> = chart.properties.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["filter", "groups", "series"]);
    }

    #[test]
    fn test_unknown_property_and_template() {
        let registry = registry();
        let err = registry
            .create_chart("barchart", "x", &props(&[("colormap", "viridis")]))
            .unwrap_err();
        assert!(matches!(err, TemplateError::UnknownProperty { .. }));

        let err = registry.get("nope").unwrap_err();
        assert!(matches!(err, TemplateError::UnknownTemplate(_)));
    }

    #[test]
    fn test_duplicate_template_id() {
        let err = ChartTemplateRegistry::from_templates(vec![
            template("barchart", &[]),
            template("barchart", &[]),
        ])
        .unwrap_err();
        assert!(matches!(err, TemplateError::DuplicateTemplate(id) if id == "barchart"));
    }

    #[test]
    fn test_generate_testcases_names_and_scripts() {
        let registry = registry();
        let base = props(&[("filter", "name =~ channelUtilization:last"), ("series", "numHosts")]);
        let cases = vec![
            FixtureCase::set("groups", "iaMean", None),
            FixtureCase::set("filter", "aa bb", Some("Syntax error")),
        ];

        let charts = generate_testcases(&registry, &["barchart"], &base, &cases).unwrap();
        assert_eq!(charts.len(), 2);
        assert_eq!(charts[0].name, "barchart0");
        assert_eq!(charts[1].name, "barchart1");

        assert_eq!(charts[0].properties["groups"], "iaMean");
        assert_eq!(charts[1].properties["filter"], "aa bb");
        assert_eq!(charts[1].properties["series"], "numHosts");

        assert!(charts[0].script.contains("expected_exception = None"));
        assert!(charts[1].script.contains("expected_exception = 'Syntax error'"));
        assert!(charts[1].script.contains("\n    props = chart.get_properties()"));
        assert!(charts[1].script.contains("'barchart1'"));
    }

    #[test]
    fn test_untested_templates() {
        let registry = registry();
        let charts =
            generate_testcases(&registry, &["xyplot"], &IndexMap::new(), &[FixtureCase::unchanged()])
                .unwrap();
        assert_eq!(untested_templates(&registry, &charts), vec!["barchart", "histogram"]);
    }

    #[test]
    fn test_script_literal_escapes() {
        assert_eq!(script_literal(None), "None");
        assert_eq!(script_literal(Some("it's")), "'it\\'s'");
        assert_eq!(script_literal(Some("a\nb")), "'a\\nb'");
    }

    #[test]
    fn test_analysis_file_roundtrip() {
        let registry = registry();
        let chart = registry
            .create_chart("histogram", "h", &props(&[("filter", "type =~ histogram")]))
            .unwrap();
        let analysis = Analysis::new(vec!["/resultfiles/aloha".to_string()], vec![chart]);

        let path = std::env::temp_dir().join(format!("sigsweep-analysis-{}.yaml", std::process::id()));
        analysis.to_file(&path).unwrap();
        let loaded = Analysis::from_file(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(loaded, analysis);
    }

    #[test]
    fn test_load_dir_reads_yaml_templates() {
        let dir = std::env::temp_dir().join(format!("sigsweep-templates-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("bar.yaml"),
            "id: bar\nname: Bar Chart\ntype: bar\nscript: |\n  print('bar')\nproperties:\n  filter: ''\n",
        )
        .unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let registry = ChartTemplateRegistry::load_dir(&dir).unwrap();
        let _ = fs::remove_dir_all(&dir);

        assert_eq!(registry.len(), 1);
        let bar = registry.get("bar").unwrap();
        assert_eq!(bar.name, "Bar Chart");
        assert_eq!(bar.script, "print('bar')\n");
        assert_eq!(bar.properties["filter"], "");
    }
}
