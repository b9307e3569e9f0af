//! Result Recorders
//!
//! Reduce the values arriving from a signal or filter to one scalar per run.

use std::fmt;
use std::str::FromStr;

use crate::interface::{ResultListener, SignalValue, SimTime};

/// How a recorder reduces its input stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingMode {
    Last,
    Mean,
    Max,
    Min,
    Sum,
    Count,
}

impl FromStr for RecordingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last" => Ok(RecordingMode::Last),
            "mean" => Ok(RecordingMode::Mean),
            "max" => Ok(RecordingMode::Max),
            "min" => Ok(RecordingMode::Min),
            "sum" => Ok(RecordingMode::Sum),
            "count" => Ok(RecordingMode::Count),
            other => Err(format!("unknown recording mode `{}`", other)),
        }
    }
}

impl fmt::Display for RecordingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordingMode::Last => "last",
            RecordingMode::Mean => "mean",
            RecordingMode::Max => "max",
            RecordingMode::Min => "min",
            RecordingMode::Sum => "sum",
            RecordingMode::Count => "count",
        };
        f.write_str(name)
    }
}

/// Scalar recorder.
///
/// `last`, `mean`, `max` and `min` report NaN until the first value arrives;
/// `sum` and `count` start at zero. Callers normalize the NaN sentinel with
/// [`ResultRecorder::value_or`] before aggregating.
#[derive(Debug, Clone)]
pub struct ResultRecorder {
    mode: RecordingMode,
    value: f64,
    count: u64,
    last_time: Option<SimTime>,
}

impl ResultRecorder {
    pub fn new(mode: RecordingMode) -> Self {
        let value = match mode {
            RecordingMode::Sum | RecordingMode::Count => 0.0,
            _ => f64::NAN,
        };
        Self {
            mode,
            value,
            count: 0,
            last_time: None,
        }
    }

    pub fn mode(&self) -> RecordingMode {
        self.mode
    }

    /// Current scalar, NaN if nothing was recorded in a mode without a
    /// natural zero
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Alias kept for readers used to last-value probes
    pub fn last_value(&self) -> f64 {
        self.value
    }

    /// Current scalar with the "no data" sentinel replaced by `default`
    pub fn value_or(&self, default: f64) -> f64 {
        if self.value.is_nan() {
            default
        } else {
            self.value
        }
    }

    /// Number of values received
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Time of the most recent value
    pub fn last_time(&self) -> Option<SimTime> {
        self.last_time
    }

    fn collect(&mut self, v: f64) {
        self.count += 1;
        self.value = match self.mode {
            RecordingMode::Last => v,
            RecordingMode::Mean => {
                if self.count == 1 {
                    v
                } else {
                    self.value + (v - self.value) / self.count as f64
                }
            }
            RecordingMode::Max => {
                if self.count == 1 || v > self.value {
                    v
                } else {
                    self.value
                }
            }
            RecordingMode::Min => {
                if self.count == 1 || v < self.value {
                    v
                } else {
                    self.value
                }
            }
            RecordingMode::Sum => self.value + v,
            RecordingMode::Count => self.count as f64,
        };
    }
}

impl ResultListener for ResultRecorder {
    fn receive(&mut self, time: SimTime, value: SignalValue) {
        self.last_time = Some(time);
        self.collect(value.as_f64());
    }

    fn finish(&mut self, _end_time: SimTime) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(mode: RecordingMode, values: &[f64]) -> ResultRecorder {
        let mut recorder = ResultRecorder::new(mode);
        for (i, v) in values.iter().enumerate() {
            recorder.receive(i as SimTime, SignalValue::Double(*v));
        }
        recorder
    }

    #[test]
    fn test_last_keeps_most_recent() {
        let recorder = feed(RecordingMode::Last, &[0.3, 0.7, 0.7, 0.7]);
        assert_eq!(recorder.value(), 0.7);
        assert_eq!(recorder.count(), 4);

        let recorder = feed(RecordingMode::Last, &[0.7, 0.2, 0.2]);
        assert_eq!(recorder.last_value(), 0.2);
        assert_eq!(recorder.last_time(), Some(2.0));
    }

    #[test]
    fn test_reductions() {
        let values = [4.0, -2.0, 10.0, 0.0];
        assert_eq!(feed(RecordingMode::Mean, &values).value(), 3.0);
        assert_eq!(feed(RecordingMode::Max, &values).value(), 10.0);
        assert_eq!(feed(RecordingMode::Min, &values).value(), -2.0);
        assert_eq!(feed(RecordingMode::Sum, &values).value(), 12.0);
        assert_eq!(feed(RecordingMode::Count, &values).value(), 4.0);
    }

    #[test]
    fn test_no_data_sentinel() {
        for mode in [
            RecordingMode::Last,
            RecordingMode::Mean,
            RecordingMode::Max,
            RecordingMode::Min,
        ] {
            let recorder = ResultRecorder::new(mode);
            assert!(recorder.value().is_nan());
            assert_eq!(recorder.value_or(0.0), 0.0);
        }

        assert_eq!(ResultRecorder::new(RecordingMode::Sum).value(), 0.0);
        assert_eq!(ResultRecorder::new(RecordingMode::Count).value(), 0.0);
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("last".parse::<RecordingMode>(), Ok(RecordingMode::Last));
        assert_eq!("max".parse::<RecordingMode>(), Ok(RecordingMode::Max));
        assert!("vector".parse::<RecordingMode>().is_err());
        assert_eq!(RecordingMode::Mean.to_string(), "mean");
    }
}
