//! Configuration overlay in ini text form.
//!
//! ```text
//! [General]
//! network = Aloha
//! sim-time-limit = 1000s
//! Aloha.txRate = 9.6kbps
//! **.x = uniform(0m, 1000m)
//! Aloha.host[*].iaTime = exponential(200s)
//! ```
//!
//! Keys are patterns matched against full parameter paths: `**` matches
//! anything, `*` matches anything but a dot. The first matching line wins.
//! Values carry unit suffixes which are normalized to base units (seconds,
//! bits per second, bits, meters).

use std::fmt;

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution as _, Exp, Normal};

/// Errors raised while reading or querying a configuration overlay
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("unknown unit `{unit}` in `{value}`")]
    UnknownUnit { value: String, unit: String },

    #[error("parameter `{path}`: expected {expected}, got {found}")]
    UnitMismatch {
        path: String,
        expected: Dimension,
        found: Dimension,
    },

    #[error("no value for parameter `{0}`")]
    MissingParameter(String),

    #[error("parameter `{path}`: {message}")]
    InvalidValue { path: String, message: String },

    #[error("no section named `{0}`")]
    UnknownSection(String),
}

// ============================================================================
// Values
// ============================================================================

/// Physical dimension of a numeric value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Dimensionless,
    Time,
    DataRate,
    Data,
    Length,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dimension::Dimensionless => "a plain number",
            Dimension::Time => "a time (s)",
            Dimension::DataRate => "a data rate (bps)",
            Dimension::Data => "a data length (b)",
            Dimension::Length => "a distance (m)",
        };
        f.write_str(name)
    }
}

/// (suffix, dimension, factor to base unit)
const UNITS: &[(&str, Dimension, f64)] = &[
    ("ns", Dimension::Time, 1e-9),
    ("us", Dimension::Time, 1e-6),
    ("ms", Dimension::Time, 1e-3),
    ("s", Dimension::Time, 1.0),
    ("min", Dimension::Time, 60.0),
    ("h", Dimension::Time, 3600.0),
    ("bps", Dimension::DataRate, 1.0),
    ("kbps", Dimension::DataRate, 1e3),
    ("Mbps", Dimension::DataRate, 1e6),
    ("Gbps", Dimension::DataRate, 1e9),
    ("b", Dimension::Data, 1.0),
    ("kb", Dimension::Data, 1e3),
    ("B", Dimension::Data, 8.0),
    ("KiB", Dimension::Data, 8.0 * 1024.0),
    ("cm", Dimension::Length, 1e-2),
    ("m", Dimension::Length, 1.0),
    ("km", Dimension::Length, 1e3),
];

/// Number normalized to its base unit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantity {
    pub value: f64,
    pub dimension: Dimension,
}

impl Quantity {
    pub fn plain(value: f64) -> Self {
        Self {
            value,
            dimension: Dimension::Dimensionless,
        }
    }

    fn parse(text: &str) -> Result<Self, ConfigError> {
        let text = text.trim();
        let split = numeric_prefix_len(text);
        let (number, unit) = text.split_at(split);

        let value: f64 = number.parse().map_err(|_| ConfigError::InvalidValue {
            path: String::new(),
            message: format!("`{}` is not a number", text),
        })?;

        if unit.is_empty() {
            return Ok(Self::plain(value));
        }

        UNITS
            .iter()
            .find(|(suffix, _, _)| *suffix == unit)
            .map(|(_, dimension, factor)| Self {
                value: value * factor,
                dimension: *dimension,
            })
            .ok_or_else(|| ConfigError::UnknownUnit {
                value: text.to_string(),
                unit: unit.to_string(),
            })
    }
}

/// Length of the leading float literal in `text`
fn numeric_prefix_len(text: &str) -> usize {
    let bytes = text.as_bytes();
    let mut i = 0;

    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        i += 1;
    }
    while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
        i += 1;
    }
    // exponent only when digits follow, so `1e-6` parses but `5em` does not
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            i = j;
        }
    }
    i
}

/// Random variate generator named in a parameter value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Distribution {
    Exponential { mean: f64 },
    Uniform { low: f64, high: f64 },
    Normal { mean: f64, stddev: f64 },
    Constant(f64),
}

/// Parsed right-hand side of a configuration line
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Number(Quantity),
    Bool(bool),
    /// Quoted string, passed through without interpretation
    Text(String),
    /// Bare word such as a network name
    Ident(String),
    Random {
        distribution: Distribution,
        dimension: Dimension,
    },
}

impl ParamValue {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let text = text.trim();

        if text == "true" || text == "false" {
            return Ok(ParamValue::Bool(text == "true"));
        }

        if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
            return Ok(ParamValue::Text(text[1..text.len() - 1].to_string()));
        }

        if let Some(open) = text.find('(') {
            if text.ends_with(')') {
                return Self::parse_distribution(&text[..open], &text[open + 1..text.len() - 1]);
            }
        }

        if numeric_prefix_len(text) > 0 {
            return Quantity::parse(text).map(ParamValue::Number);
        }

        if !text.is_empty()
            && text
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
        {
            return Ok(ParamValue::Ident(text.to_string()));
        }

        Err(ConfigError::InvalidValue {
            path: String::new(),
            message: format!("cannot interpret `{}`", text),
        })
    }

    fn parse_distribution(name: &str, args: &str) -> Result<Self, ConfigError> {
        let args = args
            .split(',')
            .map(Quantity::parse)
            .collect::<Result<Vec<_>, _>>()?;

        let dimension = args
            .iter()
            .map(|q| q.dimension)
            .find(|d| *d != Dimension::Dimensionless)
            .unwrap_or(Dimension::Dimensionless);
        if args
            .iter()
            .any(|q| q.dimension != dimension && q.dimension != Dimension::Dimensionless)
        {
            return Err(ConfigError::InvalidValue {
                path: String::new(),
                message: format!("mixed units in `{}(...)`", name),
            });
        }

        let bad_arity = || ConfigError::InvalidValue {
            path: String::new(),
            message: format!("wrong number of arguments for `{}`", name),
        };

        let distribution = match (name.trim(), args.as_slice()) {
            ("exponential", [mean]) => Distribution::Exponential { mean: mean.value },
            ("uniform", [low, high]) => Distribution::Uniform {
                low: low.value,
                high: high.value,
            },
            ("normal", [mean, stddev]) => Distribution::Normal {
                mean: mean.value,
                stddev: stddev.value,
            },
            ("constant", [v]) => Distribution::Constant(v.value),
            ("exponential" | "uniform" | "normal" | "constant", _) => return Err(bad_arity()),
            (other, _) => {
                return Err(ConfigError::InvalidValue {
                    path: String::new(),
                    message: format!("unknown function `{}`", other),
                })
            }
        };

        Ok(ParamValue::Random {
            distribution,
            dimension,
        })
    }

    fn dimension(&self) -> Option<Dimension> {
        match self {
            ParamValue::Number(q) => Some(q.dimension),
            ParamValue::Random { dimension, .. } => Some(*dimension),
            _ => None,
        }
    }

    /// Draw a value in base units. Constants return themselves.
    pub fn sample(&self, path: &str, rng: &mut StdRng) -> Result<f64, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            path: path.to_string(),
            message,
        };

        match self {
            ParamValue::Number(q) => Ok(q.value),
            ParamValue::Random { distribution, .. } => match *distribution {
                Distribution::Constant(v) => Ok(v),
                Distribution::Exponential { mean } => {
                    let exp = Exp::new(1.0 / mean)
                        .map_err(|e| invalid(format!("exponential({}): {}", mean, e)))?;
                    Ok(exp.sample(rng))
                }
                Distribution::Uniform { low, high } => {
                    if high < low {
                        return Err(invalid(format!("uniform({}, {}): empty range", low, high)));
                    }
                    if high == low {
                        return Ok(low);
                    }
                    Ok(rng.gen_range(low..high))
                }
                Distribution::Normal { mean, stddev } => {
                    let normal = Normal::new(mean, stddev)
                        .map_err(|e| invalid(format!("normal({}, {}): {}", mean, stddev, e)))?;
                    Ok(normal.sample(rng))
                }
            },
            other => Err(invalid(format!("{:?} is not numeric", other))),
        }
    }
}

// ============================================================================
// Ini contents
// ============================================================================

#[derive(Debug, Clone)]
struct Entry {
    key: String,
    value: String,
    line: usize,
}

#[derive(Debug, Clone)]
struct Section {
    name: String,
    entries: Vec<Entry>,
}

/// Raw sections of an ini text, in file order
#[derive(Debug, Clone, Default)]
pub struct InifileContents {
    sections: Vec<Section>,
}

impl InifileContents {
    /// Parse ini text. Lines before the first section header belong to
    /// `General`.
    pub fn read_text(text: &str) -> Result<Self, ConfigError> {
        let mut sections = vec![Section {
            name: "General".to_string(),
            entries: Vec::new(),
        }];

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }

            if let Some(header) = line.strip_prefix('[') {
                let name = header.strip_suffix(']').ok_or_else(|| ConfigError::Syntax {
                    line: line_no,
                    message: "unterminated section header".to_string(),
                })?;
                let name = name.trim();
                let name = name.strip_prefix("Config ").unwrap_or(name).trim();

                if !sections.iter().any(|s| s.name == name) {
                    sections.push(Section {
                        name: name.to_string(),
                        entries: Vec::new(),
                    });
                }
                // move the named section to the back so following lines land in it
                let pos = sections.iter().position(|s| s.name == name).unwrap_or(0);
                let section = sections.remove(pos);
                sections.push(section);
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| ConfigError::Syntax {
                line: line_no,
                message: format!("expected `key = value`, got `{}`", line),
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(ConfigError::Syntax {
                    line: line_no,
                    message: "empty key".to_string(),
                });
            }

            if let Some(section) = sections.last_mut() {
                section.entries.push(Entry {
                    key: key.to_string(),
                    value: value.trim().to_string(),
                    line: line_no,
                });
            }
        }

        // restore a stable order with General first
        sections.sort_by_key(|s| s.name != "General");
        Ok(Self { sections })
    }

    /// Section names, General first
    pub fn section_names(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.name.as_str()).collect()
    }

    /// Flatten a section (falling back to `General`) into a lookup overlay
    pub fn extract_config(&self, name: &str) -> Result<ParamOverlay, ConfigError> {
        let section = self
            .sections
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ConfigError::UnknownSection(name.to_string()))?;

        let mut chain = vec![section];
        if name != "General" {
            if let Some(general) = self.sections.iter().find(|s| s.name == "General") {
                chain.push(general);
            }
        }

        let mut overlay = ParamOverlay::default();
        for section in chain {
            for entry in &section.entries {
                let value = ParamValue::parse(&entry.value).map_err(|e| match e {
                    ConfigError::InvalidValue { message, .. } => ConfigError::Syntax {
                        line: entry.line,
                        message: format!("{}: {}", entry.key, message),
                    },
                    other => other,
                })?;
                overlay.push(&entry.key, value);
            }
        }
        Ok(overlay)
    }
}

fn strip_comment(line: &str) -> &str {
    let mut in_quotes = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '#' if !in_quotes => return &line[..i],
            _ => {}
        }
    }
    line
}

// ============================================================================
// Overlay
// ============================================================================

/// Ordered (pattern, value) list; first match wins
#[derive(Debug, Clone, Default)]
pub struct ParamOverlay {
    entries: Vec<(String, ParamValue)>,
}

impl ParamOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line; earlier lines keep priority
    pub fn push(&mut self, pattern: &str, value: ParamValue) {
        self.entries.push((pattern.to_string(), value));
    }

    /// Put a line in front of everything else
    pub fn set(&mut self, pattern: &str, value: ParamValue) {
        self.entries.insert(0, (pattern.to_string(), value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, path: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(pattern, _)| pattern_matches(pattern, path))
            .map(|(_, value)| value)
    }

    pub fn require(&self, path: &str) -> Result<&ParamValue, ConfigError> {
        self.lookup(path)
            .ok_or_else(|| ConfigError::MissingParameter(path.to_string()))
    }

    /// Constant numeric parameter in base units of `dimension`.
    /// Plain numbers are accepted for any dimension.
    pub fn number(&self, path: &str, dimension: Dimension) -> Result<f64, ConfigError> {
        match self.require(path)? {
            ParamValue::Number(q) => {
                check_dimension(path, dimension, q.dimension)?;
                Ok(q.value)
            }
            other => Err(ConfigError::InvalidValue {
                path: path.to_string(),
                message: format!("expected a constant, got {:?}", other),
            }),
        }
    }

    /// Like [`ParamOverlay::number`], with a fallback when no line matches
    pub fn number_or(&self, path: &str, dimension: Dimension, default: f64) -> Result<f64, ConfigError> {
        match self.lookup(path) {
            None => Ok(default),
            Some(_) => self.number(path, dimension),
        }
    }

    /// Numeric or random parameter, returned unevaluated after a unit check
    pub fn random(&self, path: &str, dimension: Dimension) -> Result<ParamValue, ConfigError> {
        let value = self.require(path)?;
        match value.dimension() {
            Some(found) => {
                check_dimension(path, dimension, found)?;
                Ok(value.clone())
            }
            None => Err(ConfigError::InvalidValue {
                path: path.to_string(),
                message: format!("expected a number or distribution, got {:?}", value),
            }),
        }
    }

    pub fn boolean_or(&self, path: &str, default: bool) -> Result<bool, ConfigError> {
        match self.lookup(path) {
            None => Ok(default),
            Some(ParamValue::Bool(b)) => Ok(*b),
            Some(other) => Err(ConfigError::InvalidValue {
                path: path.to_string(),
                message: format!("expected true/false, got {:?}", other),
            }),
        }
    }

    /// String view of a text or bare-word value
    pub fn text(&self, path: &str) -> Option<&str> {
        match self.lookup(path)? {
            ParamValue::Text(s) | ParamValue::Ident(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

fn check_dimension(path: &str, expected: Dimension, found: Dimension) -> Result<(), ConfigError> {
    if found == expected || found == Dimension::Dimensionless {
        Ok(())
    } else {
        Err(ConfigError::UnitMismatch {
            path: path.to_string(),
            expected,
            found,
        })
    }
}

/// Match an ini key pattern against a full parameter path
pub fn pattern_matches(pattern: &str, path: &str) -> bool {
    glob(pattern.as_bytes(), path.as_bytes())
}

fn glob(p: &[u8], s: &[u8]) -> bool {
    match p {
        [] => s.is_empty(),
        [b'*', b'*', rest @ ..] => (0..=s.len()).any(|i| glob(rest, &s[i..])),
        [b'*', rest @ ..] => {
            let stop = s.iter().position(|&c| c == b'.').unwrap_or(s.len());
            (0..=stop).any(|i| glob(rest, &s[i..]))
        }
        [c, rest @ ..] => matches!(s.first(), Some(x) if x == c) && glob(rest, &s[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    const ALOHA: &str = r#"
network = Aloha
**.vector-recording = false
Aloha.slotTime = 0s    # no slots
Aloha.txRate = 9.6kbps
Aloha.host[*].pkLenBits = 952b #=119 bytes

**.x = uniform(0m, 1000m)
**.y = uniform(0m, 1000m)
**.transmissionEdgeAnimationSpeed = 1e-6

sim-time-limit = 1000s
Aloha.numHosts = 20
Aloha.host[*].iaTime = exponential(200s)
**.filter = "runattr:experiment =~ PureAloha # not a comment"
"#;

    fn overlay() -> ParamOverlay {
        InifileContents::read_text(ALOHA)
            .unwrap()
            .extract_config("General")
            .unwrap()
    }

    #[test]
    fn test_units_normalized() {
        let o = overlay();
        assert_eq!(o.number("Aloha.txRate", Dimension::DataRate).unwrap(), 9600.0);
        assert_eq!(
            o.number("Aloha.host[3].pkLenBits", Dimension::Data).unwrap(),
            952.0
        );
        assert_eq!(o.number("sim-time-limit", Dimension::Time).unwrap(), 1000.0);
        assert_eq!(o.number("Aloha.numHosts", Dimension::Dimensionless).unwrap(), 20.0);
        assert_eq!(
            o.number("Aloha.host[0].transmissionEdgeAnimationSpeed", Dimension::Dimensionless)
                .unwrap(),
            1e-6
        );
    }

    #[test]
    fn test_unit_mismatch() {
        let o = overlay();
        assert!(matches!(
            o.number("Aloha.txRate", Dimension::Time),
            Err(ConfigError::UnitMismatch { .. })
        ));
        assert!(matches!(
            o.number("Aloha.nothing", Dimension::Time),
            Err(ConfigError::MissingParameter(_))
        ));
    }

    #[test]
    fn test_wildcards() {
        assert!(pattern_matches("**.x", "Aloha.host[12].x"));
        assert!(pattern_matches("Aloha.host[*].iaTime", "Aloha.host[3].iaTime"));
        assert!(!pattern_matches("Aloha.*.iaTime", "Aloha.host[3].sub.iaTime"));
        assert!(pattern_matches("Aloha.**.iaTime", "Aloha.host[3].sub.iaTime"));
        assert!(!pattern_matches("**.x", "Aloha.host[1].xy"));
        assert!(pattern_matches("network", "network"));
    }

    #[test]
    fn test_first_match_wins() {
        let text = "Aloha.host[0].iaTime = 1s\n**.iaTime = 5s\n";
        let o = InifileContents::read_text(text)
            .unwrap()
            .extract_config("General")
            .unwrap();
        assert_eq!(o.number("Aloha.host[0].iaTime", Dimension::Time).unwrap(), 1.0);
        assert_eq!(o.number("Aloha.host[1].iaTime", Dimension::Time).unwrap(), 5.0);
    }

    #[test]
    fn test_distribution_and_text() {
        let o = overlay();
        match o.random("Aloha.host[2].iaTime", Dimension::Time).unwrap() {
            ParamValue::Random {
                distribution: Distribution::Exponential { mean },
                dimension: Dimension::Time,
            } => assert_eq!(mean, 200.0),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            o.text("Aloha.server.filter"),
            Some("runattr:experiment =~ PureAloha # not a comment")
        );
        assert_eq!(o.text("network"), Some("Aloha"));
        assert!(!o.boolean_or("Aloha.host[0].vector-recording", true).unwrap());
    }

    #[test]
    fn test_sampling_respects_bounds() {
        let o = overlay();
        let x = o.random("Aloha.host[0].x", Dimension::Length).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let v = x.sample("Aloha.host[0].x", &mut rng).unwrap();
            assert!((0.0..1000.0).contains(&v));
        }

        let ia = o.random("Aloha.host[0].iaTime", Dimension::Time).unwrap();
        let mean: f64 = (0..20_000)
            .map(|_| ia.sample("ia", &mut rng).unwrap())
            .sum::<f64>()
            / 20_000.0;
        assert!((mean - 200.0).abs() < 10.0, "mean {}", mean);
    }

    #[test]
    fn test_sections_fall_back_to_general() {
        let text = "[General]\nAloha.numHosts = 10\nAloha.txRate = 1kbps\n\n[Config Slotted]\nAloha.numHosts = 15\n";
        let ini = InifileContents::read_text(text).unwrap();
        assert_eq!(ini.section_names(), vec!["General", "Slotted"]);

        let slotted = ini.extract_config("Slotted").unwrap();
        assert_eq!(slotted.number("Aloha.numHosts", Dimension::Dimensionless).unwrap(), 15.0);
        assert_eq!(slotted.number("Aloha.txRate", Dimension::DataRate).unwrap(), 1000.0);
        assert!(matches!(
            ini.extract_config("Missing"),
            Err(ConfigError::UnknownSection(_))
        ));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(
            InifileContents::read_text("just words\n"),
            Err(ConfigError::Syntax { line: 1, .. })
        ));
        let ini = InifileContents::read_text("a = 3parsecs\n").unwrap();
        assert!(matches!(
            ini.extract_config("General"),
            Err(ConfigError::UnknownUnit { .. })
        ));
        let ini = InifileContents::read_text("a = gamma(1s)\n").unwrap();
        assert!(matches!(
            ini.extract_config("General"),
            Err(ConfigError::Syntax { line: 1, .. })
        ));
    }
}
