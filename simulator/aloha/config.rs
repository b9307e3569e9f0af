//! Configuration for the pure/slotted ALOHA simulator

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sigsweep::inifile::{Dimension, ParamOverlay, ParamValue, Quantity};
use sigsweep::{RunConfig, RunError};

/// Speed of light, used for the host to server radio delay
pub const PROPAGATION_SPEED: f64 = 299_792_458.0;

/// Overlay text of one pure-ALOHA run. `{numHosts}`, `{iaMean}` and
/// `{simTimeLimit}` are filled in by [`pure_aloha_ini`].
const PURE_ALOHA_TEMPLATE: &str = r#"
network = Aloha
**.vector-recording = false
Aloha.slotTime = 0s    # no slots
Aloha.txRate = 9.6kbps
Aloha.host[*].pkLenBits = 952b #=119 bytes, so that (with +1 byte guard) slotTime is a nice round number

**.x = uniform(0m, 1000m)
**.y = uniform(0m, 1000m)

sim-time-limit = {simTimeLimit}s
Aloha.numHosts = {numHosts}
Aloha.host[*].iaTime = exponential({iaMean}s)
"#;

/// Overlay text for `num_hosts` hosts with exponential inter-arrival times of
/// mean `ia_mean` seconds
pub fn pure_aloha_ini(num_hosts: usize, ia_mean: f64, sim_time_limit: f64) -> String {
    PURE_ALOHA_TEMPLATE
        .replace("{simTimeLimit}", &sim_time_limit.to_string())
        .replace("{numHosts}", &num_hosts.to_string())
        .replace("{iaMean}", &ia_mean.to_string())
}

/// Parameters of one host, unevaluated
#[derive(Debug, Clone)]
pub struct HostParams {
    /// Parameter path prefix, e.g. `Aloha.host[3]`
    pub path: String,

    /// Frame length in bits
    pub pk_len_bits: f64,

    /// Inter-arrival time, sampled anew for every frame
    pub ia_time: ParamValue,

    pub x: ParamValue,
    pub y: ParamValue,
}

/// Network parameters resolved from a run configuration
#[derive(Debug, Clone)]
pub struct AlohaConfig {
    /// Network name, prefix of every parameter path
    pub network: String,

    /// Transmission rate in bits per second
    pub tx_rate: f64,

    /// Slot length in seconds; 0 = pure ALOHA
    pub slot_time: f64,

    /// Server position, sampled when the network is built
    pub server_x: ParamValue,
    pub server_y: ParamValue,

    pub hosts: Vec<HostParams>,
}

impl AlohaConfig {
    /// Resolve every network parameter from the overlay.
    ///
    /// Defaults: 9.6 kbps, 952 bit frames, pure ALOHA, server at (500m, 500m).
    /// `numHosts` and the hosts' `iaTime` have no default.
    pub fn from_run_config(config: &RunConfig) -> Result<Self, RunError> {
        let network = config.network.clone().unwrap_or_else(|| "Aloha".to_string());
        let params = &config.params;

        let num_hosts = params.number(&format!("{}.numHosts", network), Dimension::Dimensionless)?;
        if num_hosts < 0.0 || num_hosts.fract() != 0.0 {
            return Err(RunError::Configuration(format!(
                "{}.numHosts must be a non-negative integer, got {}",
                network, num_hosts
            )));
        }

        let tx_rate = params.number_or(&format!("{}.txRate", network), Dimension::DataRate, 9600.0)?;
        let slot_time = params.number_or(&format!("{}.slotTime", network), Dimension::Time, 0.0)?;
        if tx_rate <= 0.0 {
            return Err(RunError::Configuration(format!(
                "{}.txRate must be positive, got {}",
                network, tx_rate
            )));
        }
        if slot_time < 0.0 {
            return Err(RunError::Configuration(format!(
                "{}.slotTime must not be negative, got {}",
                network, slot_time
            )));
        }

        let server_x = position_or(params, &format!("{}.server.x", network), 500.0)?;
        let server_y = position_or(params, &format!("{}.server.y", network), 500.0)?;

        let mut hosts = Vec::with_capacity(num_hosts as usize);
        for i in 0..num_hosts as usize {
            let path = format!("{}.host[{}]", network, i);
            let pk_len_bits =
                params.number_or(&format!("{}.pkLenBits", path), Dimension::Data, 952.0)?;
            if pk_len_bits <= 0.0 {
                return Err(RunError::Configuration(format!(
                    "{}.pkLenBits must be positive, got {}",
                    path, pk_len_bits
                )));
            }
            let ia_time = params.random(&format!("{}.iaTime", path), Dimension::Time)?;
            let x = position_or(params, &format!("{}.x", path), 0.0)?;
            let y = position_or(params, &format!("{}.y", path), 0.0)?;

            hosts.push(HostParams {
                path,
                pk_len_bits,
                ia_time,
                x,
                y,
            });
        }

        Ok(Self {
            network,
            tx_rate,
            slot_time,
            server_x,
            server_y,
            hosts,
        })
    }

    /// Transmission time of a frame of `bits` bits
    pub fn frame_duration(&self, bits: f64) -> f64 {
        bits / self.tx_rate
    }
}

/// Coordinate in meters, constant or drawn from a distribution
fn position_or(params: &ParamOverlay, path: &str, default: f64) -> Result<ParamValue, RunError> {
    match params.lookup(path) {
        Some(_) => Ok(params.random(path, Dimension::Length)?),
        None => Ok(ParamValue::Number(Quantity::plain(default))),
    }
}

/// Configuration of the optimal inter-arrival sweep
#[derive(Debug, Clone)]
pub struct AlohaSweepConfig {
    /// Host counts, one search each
    pub num_hosts: Vec<usize>,

    /// Start of every search, seconds
    pub ia_mean_start: f64,

    /// Smallest inter-arrival mean tried, seconds
    pub ia_mean_lower_bound: f64,

    /// Simulated seconds per run
    pub sim_time_limit: f64,

    /// Worker threads, 0 = one per core
    pub workers: usize,

    /// Random seed (None = generate random)
    pub seed: Option<u64>,
}

impl Default for AlohaSweepConfig {
    fn default() -> Self {
        Self {
            num_hosts: vec![
                5, 10, 15, 20, 30, 40, 60, 80, 100, 150, 200, 250, 300, 400, 600, 800,
            ],
            ia_mean_start: 200.0,
            ia_mean_lower_bound: 1.0,
            sim_time_limit: 1000.0,
            workers: 0,
            seed: None,
        }
    }
}

impl AlohaSweepConfig {
    /// Get or generate seed
    pub fn resolve_seed(&self) -> u64 {
        self.seed
            .unwrap_or_else(|| StdRng::from_entropy().gen::<u64>())
    }
}
