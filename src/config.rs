use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::instruments::fiberlabs_amp::LD_MODES;
use crate::stability::StabilityCriterion;
use crate::sweeps::{LaserSweepConfig, SweepRange};
use crate::transport::{ConnectionConfig, ResourceAddress};

/// Candidate files tried in order when no path is given.
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["octal.toml", "config/sweep_config.toml"];

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub instr_addrs: InstrumentAddresses,
    pub passive: PassiveConfig,
    pub dc: DcConfig,
    pub iv: IvConfig,
    pub amp: AmpConfig,
    pub stability: StabilityConfig,
    pub connection: ConnectionConfig,
}

impl AppConfig {
    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.general.validate()?;
        self.instr_addrs.validate()?;
        self.passive.validate().map_err(|e| invalid("passive", e))?;
        self.dc.validate().map_err(|e| invalid("dc", e))?;
        self.iv.validate().map_err(|e| invalid("iv", e))?;
        self.amp.validate().map_err(|e| invalid("amp", e))?;
        self.stability.validate()?;
        Ok(())
    }
}

fn invalid(section: &str, e: impl std::fmt::Display) -> ConfigError {
    ConfigError::Message(format!("Invalid [{section}] section: {e}"))
}

/// Waits given in seconds end up in `Duration::from_secs_f64`.
fn check_secs(name: &str, secs: f64) -> Result<(), String> {
    if secs.is_finite() && secs >= 0.0 {
        Ok(())
    } else {
        Err(format!("{name} must be a finite number of seconds >= 0, got {secs}"))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct GeneralConfig {
    /// Output folder for every result file of the run
    pub folder: String,
    /// Base name of the result files; a timestamp is used when empty
    pub fname: String,
    /// Sweep function to run; each test type has a default
    pub func: String,
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            folder: "./data".to_string(),
            fname: String::new(),
            func: String::new(),
            log_level: "info".to_string(),
        }
    }
}

impl GeneralConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.folder.trim().is_empty() {
            return Err(ConfigError::Message("general.folder must not be empty".to_string()));
        }
        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => Err(ConfigError::Message(format!(
                "general.log_level must be one of trace, debug, info, warn, error; got '{other}'"
            ))),
        }
    }
}

/// One or several resource strings for an instrument role.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum InstrAddr {
    One(String),
    Many(Vec<String>),
}

impl InstrAddr {
    pub fn as_vec(&self) -> Vec<&str> {
        match self {
            InstrAddr::One(addr) => vec![addr.as_str()],
            InstrAddr::Many(addrs) => addrs.iter().map(String::as_str).collect(),
        }
    }
}

/// Instrument role (`pm`, `mm`, `amp`, ...) to resource address(es).
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct InstrumentAddresses(BTreeMap<String, InstrAddr>);

impl InstrumentAddresses {
    pub fn insert(&mut self, name: &str, addr: InstrAddr) {
        self.0.insert(name.to_string(), addr);
    }

    /// Add `addr` to `name`, turning a single address into a list.
    pub fn push(&mut self, name: &str, addr: &str) {
        let entry = match self.0.remove(name) {
            None => InstrAddr::One(addr.to_string()),
            Some(InstrAddr::One(first)) => InstrAddr::Many(vec![first, addr.to_string()]),
            Some(InstrAddr::Many(mut all)) => {
                all.push(addr.to_string());
                InstrAddr::Many(all)
            }
        };
        self.0.insert(name.to_string(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&InstrAddr> {
        self.0.get(name)
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|a| a.as_vec().first().copied())
    }

    pub fn all(&self, name: &str) -> Vec<&str> {
        self.0.get(name).map(InstrAddr::as_vec).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &InstrAddr)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every configured address must parse as a resource string.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, addr) in self.iter() {
            for a in addr.as_vec() {
                a.parse::<ResourceAddress>()
                    .map_err(|e| ConfigError::Message(format!("instr_addrs.{name}: {e}")))?;
            }
        }
        Ok(())
    }
}

/// Passive (insertion loss) measurements.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PassiveConfig {
    pub laser: LaserSweepConfig,
    /// Structure lengths measured one after another by `run_lengths`
    pub lengths: Vec<f64>,
    /// Unit of `lengths`, used in column names
    pub length_unit: String,
}

impl Default for PassiveConfig {
    fn default() -> Self {
        Self {
            laser: LaserSweepConfig::default(),
            lengths: Vec::new(),
            length_unit: "um".to_string(),
        }
    }
}

impl PassiveConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.laser.validate().map_err(|e| e.to_string())?;
        if let Some(l) = self.lengths.iter().find(|l| !(**l > 0.0)) {
            return Err(format!("lengths must be positive, got {l}"));
        }
        for (i, l) in self.lengths.iter().enumerate() {
            if self.lengths[..i].contains(l) {
                return Err(format!("lengths must be distinct, {l} is listed twice"));
            }
        }
        Ok(())
    }
}

/// Voltage sweeps on one or two DC sources.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct DcConfig {
    /// Source voltage axis [V]
    pub voltage: SweepRange,
    /// Current limit programmed when the voltage limit is too low [A]
    pub current_limit: f64,
    /// Wait after each voltage step before reading back [s]
    pub settle_time: f64,
    /// Laser sweep run at every voltage by `run_one_source`
    pub laser: LaserSweepConfig,
    /// Fixed laser/detector wavelength for `run_simple` and the ring MZI [nm]
    pub wavelength: f64,
    /// Laser power for fixed-wavelength runs [dBm]
    pub power: f64,
    /// Detector averaging time for fixed-wavelength runs [s]
    pub period: f64,
    /// Heater voltage axis of the ring-assisted MZI [V]
    pub heater: SweepRange,
    pub heater_current_limit: f64,
    /// Detector readings averaged per heater step
    pub avg: u32,
}

impl Default for DcConfig {
    fn default() -> Self {
        Self {
            voltage: SweepRange {
                start: 0.0,
                stop: 2.0,
                step: 0.5,
            },
            current_limit: 0.1,
            settle_time: 0.1,
            laser: LaserSweepConfig::default(),
            wavelength: 1550.0,
            power: 10.0,
            period: 0.1,
            heater: SweepRange {
                start: 0.0,
                stop: 3.0,
                step: 0.5,
            },
            heater_current_limit: 0.5,
            avg: 3,
        }
    }
}

impl DcConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.voltage.validate().map_err(|e| format!("voltage: {e}"))?;
        self.heater.validate().map_err(|e| format!("heater: {e}"))?;
        self.laser.validate().map_err(|e| e.to_string())?;
        if !(self.current_limit > 0.0 && self.heater_current_limit > 0.0) {
            return Err("current limits must be positive".to_string());
        }
        check_secs("settle_time", self.settle_time)?;
        if !(self.period > 0.0 && self.period <= 10.0) {
            return Err(format!("period must be in (0, 10] s, got {}", self.period));
        }
        if self.avg == 0 {
            return Err("avg must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Current-voltage characteristics.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct IvConfig {
    pub voltage: SweepRange,
    /// Wait per voltage step [s]
    pub t_step: f64,
    pub current_limit: f64,
}

impl Default for IvConfig {
    fn default() -> Self {
        Self {
            voltage: SweepRange {
                start: 0.0,
                stop: 1.0,
                step: 0.1,
            },
            t_step: 0.5,
            current_limit: 0.1,
        }
    }
}

impl IvConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.voltage.validate().map_err(|e| format!("voltage: {e}"))?;
        check_secs("t_step", self.t_step)?;
        if !(self.current_limit > 0.0) {
            return Err("current_limit must be positive".to_string());
        }
        Ok(())
    }
}

/// Optical amplifier set-point sweeps.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct AmpConfig {
    /// `ACC` (pump current, mA) or `ALC` (output power, mW)
    pub mode: String,
    pub range: SweepRange,
    /// Fit and save a set-point model from the collected losses
    pub prediction: bool,
    pub laser: LaserSweepConfig,
}

impl Default for AmpConfig {
    fn default() -> Self {
        Self {
            mode: "ACC".to_string(),
            range: SweepRange {
                start: 0.0,
                stop: 100.0,
                step: 10.0,
            },
            prediction: false,
            laser: LaserSweepConfig::default(),
        }
    }
}

impl AmpConfig {
    /// Unit of the set points for the configured mode.
    pub fn unit(&self) -> &'static str {
        if self.mode.eq_ignore_ascii_case("ALC") {
            "mW"
        } else {
            "mA"
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !LD_MODES.iter().any(|m| m.eq_ignore_ascii_case(&self.mode)) {
            return Err(format!("mode must be one of {LD_MODES:?}, got '{}'", self.mode));
        }
        self.range.validate().map_err(|e| format!("range: {e}"))?;
        if self.range.start < 0.0 {
            return Err("set points must not be negative".to_string());
        }
        self.laser.validate().map_err(|e| e.to_string())
    }
}

/// Settling criteria for detector power and source current readings.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct StabilityConfig {
    pub power: StabilityCriterion,
    pub current: StabilityCriterion,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            power: StabilityCriterion::optical_power(),
            current: StabilityCriterion::supply_current(),
        }
    }
}

impl StabilityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.power
            .validate()
            .map_err(|e| ConfigError::Message(format!("stability.power: {e}")))?;
        self.current
            .validate()
            .map_err(|e| ConfigError::Message(format!("stability.current: {e}")))
    }
}

/// Load configuration from file with layered fallbacks
///
/// Defaults, then the given file (or the first of [`DEFAULT_CONFIG_PATHS`]
/// that exists), then `OCTAL__*` environment variables with `__` separating
/// nested keys, e.g. `OCTAL__GENERAL__FOLDER=./chip7`.
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(File::from(path));
        } else {
            return Err(ConfigError::Message(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
    } else if let Some(path) = DEFAULT_CONFIG_PATHS.iter().find(|p| Path::new(p).exists()) {
        builder = builder.add_source(File::with_name(path));
    }

    builder = builder.add_source(
        Environment::with_prefix("OCTAL")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let app_config = config.try_deserialize::<AppConfig>()?;

    app_config.validate()?;

    Ok(app_config)
}

/// Load configuration with error handling
///
/// An explicitly given path that fails to load is an error; without a path
/// the defaults are used when no candidate file loads.
pub fn load_config_or_default(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match load_config(config_path) {
        Ok(config) => {
            log::info!("Configuration loaded successfully");
            Ok(config)
        }
        Err(e) if config_path.is_some() => Err(e),
        Err(e) => {
            log::warn!("No usable configuration file ({e}), using defaults");
            Ok(AppConfig::default())
        }
    }
}
