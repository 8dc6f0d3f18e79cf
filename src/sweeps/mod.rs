//! Sweep orchestration.
//!
//! A sweep opens the instruments it needs from the configured addresses,
//! steps one or more axes, waits for readings to settle and writes every row
//! to disk before the next step is commanded. Sources are brought back to
//! 0 V and outputs switched off whether the run succeeds or not.

pub mod amp;
pub mod dc;
pub mod iv;
pub mod passive;

use log::{error, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::{AppConfig, InstrumentAddresses, StabilityConfig};
use crate::error::OctalError;
use crate::transport::ResourceManager;

pub use amp::AmpSweeps;
pub use dc::DcSweeps;
pub use iv::IvSweeps;
pub use passive::{ILossSweep, LaserSweepConfig};

/// Most set points a single range may describe.
pub const MAX_POINTS: usize = 1_000_000;

/// Inclusive, evenly spaced set points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepRange {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
}

impl SweepRange {
    pub fn new(start: f64, stop: f64, step: f64) -> Result<Self, OctalError> {
        let range = Self { start, stop, step };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<(), OctalError> {
        if !(self.start.is_finite() && self.stop.is_finite()) {
            return Err(OctalError::Parse(format!(
                "Sweep bounds must be finite, got {} to {}",
                self.start, self.stop
            )));
        }
        if !(self.step > 0.0 && self.step.is_finite()) {
            return Err(OctalError::OutOfRange {
                name: "sweep step".to_string(),
                value: self.step,
                min: 0.0,
                max: f64::INFINITY,
            });
        }
        if self.start > self.stop {
            return Err(OctalError::OutOfRange {
                name: "sweep start".to_string(),
                value: self.start,
                min: f64::NEG_INFINITY,
                max: self.stop,
            });
        }
        let intervals = self.intervals();
        if !(intervals.is_finite() && intervals < MAX_POINTS as f64) {
            return Err(OctalError::OutOfRange {
                name: "sweep point count".to_string(),
                value: intervals + 1.0,
                min: 1.0,
                max: MAX_POINTS as f64,
            });
        }
        Ok(())
    }

    fn intervals(&self) -> f64 {
        ((self.stop - self.start) / self.step + 1e-9).floor()
    }

    /// Number of set points; zero for a range that does not validate.
    pub fn len(&self) -> usize {
        if self.validate().is_err() {
            return 0;
        }
        (self.intervals() as usize).saturating_add(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `start, start + step, ...` up to and including `stop`.
    ///
    /// Values are computed as `start + i * step` so accumulated rounding
    /// never adds or drops the end point.
    pub fn values(&self) -> Vec<f64> {
        (0..self.len())
            .map(|i| self.start + i as f64 * self.step)
            .collect()
    }
}

impl fmt::Display for SweepRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {} in steps of {}", self.start, self.stop, self.step)
    }
}

/// Label used in file and column names for a set point, e.g. `1.5V`.
pub(crate) fn label(value: f64, unit: &str) -> String {
    format!("{}{unit}", crate::utils::round_to(value, 6))
}

/// What every sweep needs besides its own parameters.
#[derive(Debug, Clone)]
pub struct SweepContext {
    folder: PathBuf,
    fname: String,
    instr_addrs: InstrumentAddresses,
    rm: ResourceManager,
    stability: StabilityConfig,
    shutdown: Arc<AtomicBool>,
    interactive: bool,
}

impl SweepContext {
    pub fn new(
        folder: impl Into<PathBuf>,
        fname: impl Into<String>,
        instr_addrs: InstrumentAddresses,
        rm: ResourceManager,
    ) -> Self {
        Self {
            folder: folder.into(),
            fname: fname.into(),
            instr_addrs,
            rm,
            stability: StabilityConfig::default(),
            shutdown: Arc::new(AtomicBool::new(false)),
            interactive: false,
        }
    }

    /// Context for `config` with its folder, file name, addresses and
    /// stability settings.
    pub fn from_config(config: &AppConfig, rm: ResourceManager) -> Self {
        Self::new(
            &config.general.folder,
            &config.general.fname,
            config.instr_addrs.clone(),
            rm,
        )
        .with_stability(config.stability.clone())
    }

    pub fn with_stability(mut self, stability: StabilityConfig) -> Self {
        self.stability = stability;
        self
    }

    /// Flag polled between steps; set it (e.g. from a Ctrl+C handler) to stop.
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    /// Ask the operator to confirm on stdin before steps that need manual
    /// intervention, such as moving the fibres to the next structure.
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn fname(&self) -> &str {
        &self.fname
    }

    pub fn rm(&self) -> &ResourceManager {
        &self.rm
    }

    pub fn stability(&self) -> &StabilityConfig {
        &self.stability
    }

    pub fn addrs(&self) -> &InstrumentAddresses {
        &self.instr_addrs
    }

    /// Create the output folder if needed.
    pub fn create_folder(&self) -> Result<(), OctalError> {
        std::fs::create_dir_all(&self.folder)
            .map_err(|e| OctalError::io(e, format!("Creating {}", self.folder.display())))
    }

    /// `<folder>/<name>`.
    pub fn path(&self, name: &str) -> PathBuf {
        self.folder.join(name)
    }

    /// `<folder>/<fname><suffix>`.
    pub fn result_path(&self, suffix: &str) -> PathBuf {
        self.folder.join(format!("{}{suffix}", self.fname))
    }

    /// Fail with [`OctalError::MissingInstrument`] unless every name in
    /// `required` has an address.
    pub fn instrument_check(&self, required: &[&str]) -> Result<(), OctalError> {
        match required.iter().find(|name| self.instr_addrs.first(name).is_none()) {
            Some(name) => Err(OctalError::MissingInstrument(name.to_string())),
            None => Ok(()),
        }
    }

    /// First address configured for `name`.
    pub fn addr(&self, name: &str) -> Result<&str, OctalError> {
        self.instr_addrs
            .first(name)
            .ok_or_else(|| OctalError::MissingInstrument(name.to_string()))
    }

    /// Exactly `n` addresses configured for `name`.
    pub fn addr_list(&self, name: &str, n: usize) -> Result<Vec<&str>, OctalError> {
        let all = self.instr_addrs.all(name);
        if all.len() < n {
            return Err(OctalError::MissingInstrument(format!(
                "{name} (need {n} addresses, {} configured)",
                all.len()
            )));
        }
        Ok(all.into_iter().take(n).collect())
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// [`OctalError::Aborted`] once a shutdown has been requested.
    pub fn check_shutdown(&self) -> Result<(), OctalError> {
        if self.shutdown_requested() {
            info!("Shutdown requested, stopping sweep");
            return Err(OctalError::Aborted);
        }
        Ok(())
    }

    /// Block until the operator presses Enter; a no-op when not interactive.
    pub fn wait_for_operator(&self, prompt: &str) -> Result<(), OctalError> {
        if !self.interactive {
            return Ok(());
        }
        println!("{prompt} Press Enter to continue (Ctrl+C to abort)...");
        let mut input = String::new();
        std::io::stdin()
            .read_line(&mut input)
            .map_err(|e| OctalError::io(e, "Reading operator confirmation"))?;
        self.check_shutdown()
    }
}

/// Return `result`, but only after `cleanup` has run. A cleanup failure is
/// reported when the sweep itself succeeded and logged otherwise.
pub(crate) fn finish<T>(result: Result<T, OctalError>, cleanup: Result<(), OctalError>) -> Result<T, OctalError> {
    match (result, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(cleanup_err)) => {
            error!("Cleanup after failed sweep also failed: {cleanup_err}");
            Err(e)
        }
    }
}

/// The test families a run can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    Passive,
    Dc,
    Iv,
    Amp,
}

impl TestType {
    pub const ALL: [TestType; 4] = [TestType::Passive, TestType::Dc, TestType::Iv, TestType::Amp];

    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::Passive => "passive",
            TestType::Dc => "dc",
            TestType::Iv => "iv",
            TestType::Amp => "amp",
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TestType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown test '{s}', expected one of: {}",
                    TestType::ALL.map(|t| t.as_str()).join(", ")
                )
            })
    }
}

/// A family of sweeps selectable by function name.
pub trait Sweep {
    fn name(&self) -> &'static str;

    /// Function names accepted by [`Sweep::run`]; the first is the default.
    fn functions(&self) -> &'static [&'static str];

    fn run(&mut self, func: &str) -> Result<(), OctalError>;

    fn default_function(&self) -> &'static str {
        self.functions()[0]
    }

    /// Error for a function name this sweep does not provide.
    fn unknown(&self, func: &str) -> OctalError {
        OctalError::UnknownFunction {
            sweep: self.name().to_string(),
            func: func.to_string(),
        }
    }
}

/// Build the sweep for `test` from the matching configuration section.
pub fn build_sweep(test: TestType, config: &AppConfig, ctx: SweepContext) -> Box<dyn Sweep> {
    match test {
        TestType::Passive => Box::new(ILossSweep::new(config.passive.clone(), ctx)),
        TestType::Dc => Box::new(DcSweeps::new(config.dc.clone(), ctx)),
        TestType::Iv => Box::new(IvSweeps::new(config.iv.clone(), ctx)),
        TestType::Amp => Box::new(AmpSweeps::new(config.amp.clone(), ctx)),
    }
}

/// Run `func` (or the sweep's default function when empty).
pub fn run_sweep(sweep: &mut dyn Sweep, func: &str) -> Result<(), OctalError> {
    let func = if func.trim().is_empty() {
        sweep.default_function()
    } else {
        func.trim()
    };
    info!("Running {}::{}", sweep.name(), func);
    sweep.run(func)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::stability::StabilityCriterion;
    use crate::transport::SimBench;
    use std::time::Duration;

    /// Context over a simulated bench with instant stabilization. A name
    /// given more than once gets a list of addresses.
    pub fn context(folder: &Path, addrs: &[(&str, &str)], bench: SimBench) -> SweepContext {
        let mut instr_addrs = InstrumentAddresses::default();
        for (name, addr) in addrs {
            instr_addrs.push(name, addr);
        }
        let stability = StabilityConfig {
            power: StabilityCriterion::optical_power().with_interval(Duration::ZERO),
            current: StabilityCriterion::supply_current().with_interval(Duration::ZERO),
        };
        SweepContext::new(folder, "chip", instr_addrs, ResourceManager::new().with_bench(bench))
            .with_stability(stability)
    }
}
