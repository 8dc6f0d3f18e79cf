//! Insertion loss against wavelength, from the lightwave multimeter's own
//! continuous sweep and logging function.

use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::{finish, label, Sweep, SweepContext, SweepRange};
use crate::analysis::{iloss_coeffs, power_to_loss_db};
use crate::config::PassiveConfig;
use crate::error::OctalError;
use crate::export::export_to_csv;
use crate::instrument::check_range;
use crate::instruments::Agilent8163B;
use crate::recorder::SweepRecorder;
use crate::stability::wait_for_stable;
use crate::table::MeasurementTable;
use crate::utils::{poll_until, poll_with_timeout};

const STATE_POLL: Duration = Duration::from_millis(100);

/// Laser settings of a wavelength sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaserSweepConfig {
    /// Laser output power [dBm]
    pub power: f64,
    /// [nm]
    pub start: f64,
    /// [nm]
    pub stop: f64,
    /// [nm]
    pub step: f64,
    /// Continuous sweep speed [nm/s]; the laser's current setting when unset
    pub speed: Option<f64>,
    pub cycles: u32,
    /// Detector averaging time per logged point [us]
    pub tavg_us: f64,
    /// Longest wait for the sweep and the logging function to finish
    #[serde(with = "crate::transport::tcp::duration_secs")]
    pub timeout: Duration,
}

impl Default for LaserSweepConfig {
    fn default() -> Self {
        Self {
            power: 10.0,
            start: 1535.0,
            stop: 1575.0,
            step: 0.005,
            speed: None,
            cycles: 1,
            tavg_us: 100.0,
            timeout: Duration::from_secs(300),
        }
    }
}

impl LaserSweepConfig {
    pub fn range(&self) -> SweepRange {
        SweepRange {
            start: self.start,
            stop: self.stop,
            step: self.step,
        }
    }

    pub fn validate(&self) -> Result<(), OctalError> {
        self.range().validate()?;
        if let Some(speed) = self.speed {
            check_range("sweep speed", speed, 0.5, 200.0)?;
        }
        if self.cycles == 0 {
            return Err(OctalError::OutOfRange {
                name: "sweep cycles".to_string(),
                value: 0.0,
                min: 1.0,
                max: f64::INFINITY,
            });
        }
        check_range("averaging time", self.tavg_us, 0.0, 1e7)
    }
}

/// Run one continuous laser sweep with power logging on the detector.
///
/// Returns the logged wavelengths [nm] and the detected powers [W]. The laser
/// is left on; callers switch it off when they are done.
pub fn laser_sweep_auto(
    mm: &mut Agilent8163B,
    cfg: &LaserSweepConfig,
) -> Result<(Vec<f64>, Vec<f64>), OctalError> {
    mm.set_unit("dBm", "Watt")?;

    mm.set_laser_pow(cfg.power)?;
    mm.set_laser_wav(cfg.start)?;
    mm.set_laser_state(true)?;

    mm.set_detect_wav(1550.0)?;
    mm.set_detect_avgtime(1e-4)?;
    mm.set_detect_calibration_val(0.0)?;
    mm.set_detect_autorange(false)?;
    mm.set_detect_prange(10.0)?;

    // the laser triggers one detector measurement per step
    mm.set_trig_config(3)?;
    mm.set_laser_trig_response("ignored", "stfinished")?;
    mm.set_detect_trig_response("smeasure", "disabled")?;

    mm.set_sweep_mode("continuous")?;
    mm.set_sweep_repeat_mode("oneway")?;
    mm.set_sweep_cycles(cfg.cycles)?;
    mm.set_sweep_tdwell(0.0)?;
    mm.set_sweep_start_stop(cfg.start, cfg.stop)?;
    mm.set_sweep_step(cfg.step)?;
    if let Some(speed) = cfg.speed {
        mm.set_sweep_speed(speed)?;
    }
    mm.set_sweep_llog(true)?;

    mm.set_detect_func_mode(("logging", "stop"))?;
    let trigno = mm.get_detect_trigno()?;
    mm.set_detect_func_params("logging", (trigno, cfg.tavg_us / 1e6))?;
    mm.set_detect_func_mode(("logging", "start"))?;

    info!(
        "Laser sweep {} nm to {} nm, {} logged points",
        cfg.start, cfg.stop, trigno
    );
    mm.set_sweep_state("start")?;

    poll_until(|| mm.get_sweep_state().map(|running| !running), cfg.timeout, STATE_POLL)?;
    let mut wavelengths = mm.get_laser_data()?;

    // the logged powers can only be read once the logging function completes
    let mut powers = poll_with_timeout(
        || {
            let status = mm.get_detect_func_status()?;
            if status.to_ascii_uppercase().ends_with("PROGRESS") {
                Ok(None)
            } else {
                mm.get_detect_func_result().map(Some)
            }
        },
        cfg.timeout,
        STATE_POLL,
    )?
    .ok_or(OctalError::Timeout)?;
    mm.set_detect_func_mode(("logging", "stop"))?;

    if wavelengths.len() != powers.len() {
        warn!(
            "Logged {} wavelengths but {} powers, keeping the common points",
            wavelengths.len(),
            powers.len()
        );
        let n = wavelengths.len().min(powers.len());
        wavelengths.truncate(n);
        powers.truncate(n);
    }

    Ok((wavelengths, powers))
}

/// Insertion loss sweeps on the lightwave multimeter (`mm`).
pub struct ILossSweep {
    config: PassiveConfig,
    ctx: SweepContext,
}

impl ILossSweep {
    pub fn new(config: PassiveConfig, ctx: SweepContext) -> Self {
        Self { config, ctx }
    }

    fn open_mm(&self) -> Result<Agilent8163B, OctalError> {
        self.ctx.instrument_check(&["mm"])?;
        self.ctx.create_folder()?;
        Agilent8163B::open(self.ctx.rm(), self.ctx.addr("mm")?)
    }

    /// Step the laser point by point, waiting for the detected power to settle
    /// at each wavelength. Writes `<fname>_manual.csv` row by row.
    pub fn run_sweep_manual(&mut self) -> Result<MeasurementTable, OctalError> {
        let mut mm = self.open_mm()?;
        let result = self.sweep_manual(&mut mm);
        finish(result, mm.set_laser_state(false))
    }

    fn sweep_manual(&self, mm: &mut Agilent8163B) -> Result<MeasurementTable, OctalError> {
        let cfg = &self.config.laser;
        let range = cfg.range();

        let (min, max) = (mm.get_laser_wav_min()?, mm.get_laser_wav_max()?);
        for value in [range.start, range.stop] {
            check_range("wavelength", value, min, max)?;
        }

        mm.set_unit("dBm", "Watt")?;
        mm.set_detect_autorange(true)?;
        mm.set_detect_avgtime(0.2)?;
        mm.set_laser_pow(cfg.power)?;
        mm.set_laser_state(true)?;

        let header = ["Wavelength [nm]", "Power [W]"];
        let mut table = MeasurementTable::with_columns(&header);
        let mut recorder = SweepRecorder::new(self.ctx.result_path("_manual.csv"), &header);

        for wavelength in range.values() {
            self.ctx.check_shutdown()?;
            mm.set_laser_wav(wavelength)?;
            mm.set_detect_wav(wavelength)?;
            let settled = wait_for_stable(|| mm.get_detect_pow(), &self.ctx.stability().power)?;
            recorder.record(&[wavelength, settled.value])?;
            table.push_row(&[wavelength, settled.value])?;
        }

        info!("Manual sweep done, {} points in {}", table.len(), recorder.path().display());
        Ok(table)
    }

    /// One automatic sweep, written to `<fname>_sweep.csv`.
    pub fn run_laser_sweep_auto(&mut self) -> Result<(Vec<f64>, Vec<f64>), OctalError> {
        let mut mm = self.open_mm()?;
        let result = laser_sweep_auto(&mut mm, &self.config.laser).and_then(|(wl, powers)| {
            let loss = powers
                .iter()
                .map(|p| power_to_loss_db(self.config.laser.power, *p))
                .collect();
            let mut table = MeasurementTable::new();
            table.add_column("Wavelength [nm]", wl.clone());
            table.add_column("Power [W]", powers.clone());
            table.add_column("Loss [dB]", loss);
            export_to_csv(&table, &self.ctx.result_path("_sweep.csv"))?;
            Ok((wl, powers))
        });
        finish(result, mm.set_laser_state(false))
    }

    /// Cut-back measurement: one automatic sweep per structure length, then
    /// the propagation and insertion loss fit.
    ///
    /// `<fname>_lengths.csv` is rewritten after every structure and
    /// `<fname>_coeffs.csv` holds the fit.
    pub fn run_lengths(&mut self) -> Result<(), OctalError> {
        if self.config.lengths.is_empty() {
            return Err(OctalError::Analysis("No structure lengths configured".to_string()));
        }
        self.config.validate().map_err(OctalError::Analysis)?;
        let mut mm = self.open_mm()?;
        let result = self.sweep_lengths(&mut mm);
        finish(result, mm.set_laser_state(false))
    }

    fn sweep_lengths(&self, mm: &mut Agilent8163B) -> Result<(), OctalError> {
        let lengths = &self.config.lengths;
        let unit = &self.config.length_unit;
        let data_path = self.ctx.result_path("_lengths.csv");

        let mut runs = MeasurementTable::new();
        let mut data = MeasurementTable::new();
        let mut losses = Vec::with_capacity(lengths.len());

        for (i, length) in lengths.iter().enumerate() {
            self.ctx.check_shutdown()?;
            let name = label(*length, unit);
            self.ctx.wait_for_operator(&format!(
                "Align structure {}/{} ({name}).",
                i + 1,
                lengths.len()
            ))?;

            let (wl, powers) = laser_sweep_auto(mm, &self.config.laser)?;
            let loss: Vec<f64> = powers
                .iter()
                .map(|p| power_to_loss_db(self.config.laser.power, *p))
                .collect();

            if i == 0 {
                data.add_column("Wavelength [nm]", wl.clone());
            }
            runs.add_column(format!("Wavelength {name}"), wl);
            data.add_column(format!("{name} - loss [dB]"), loss.clone());
            losses.push(loss);

            export_to_csv(&data, &data_path)?;
            info!("Structure {}/{} ({name}) done", i + 1, lengths.len());
        }

        let mut wavelengths = data.column("Wavelength [nm]").unwrap_or_default().to_vec();
        if !runs.columns_equal("Wavelength") {
            let n = losses
                .iter()
                .map(Vec::len)
                .fold(wavelengths.len(), usize::min);
            warn!(
                "Discrepancy in wavelengths between runs, fitting the first {n} points on the first run's axis"
            );
            wavelengths.truncate(n);
            for loss in &mut losses {
                loss.truncate(n);
            }
        }

        let coeffs = iloss_coeffs(lengths, &wavelengths, &losses, 1, unit)?;
        export_to_csv(&coeffs, &self.ctx.result_path("_coeffs.csv"))
    }
}

impl Sweep for ILossSweep {
    fn name(&self) -> &'static str {
        "ILossSweep"
    }

    fn functions(&self) -> &'static [&'static str] {
        &["run_lengths", "run_laser_sweep_auto", "run_sweep_manual"]
    }

    fn run(&mut self, func: &str) -> Result<(), OctalError> {
        match func {
            "run_lengths" => self.run_lengths(),
            "run_laser_sweep_auto" => self.run_laser_sweep_auto().map(|_| ()),
            "run_sweep_manual" => self.run_sweep_manual().map(|_| ()),
            other => Err(self.unknown(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::read_csv;
    use crate::instrument::encode_block;
    use crate::sweeps::testing::context;
    use crate::transport::{SimBench, SimReply};
    use byteorder::{LittleEndian, WriteBytesExt};

    const MM: &str = "GPIB0::20::INSTR";

    fn sweep(folder: &std::path::Path, config: PassiveConfig, bench: SimBench) -> ILossSweep {
        ILossSweep::new(config, context(folder, &[("mm", MM)], bench))
    }

    #[test]
    fn test_auto_sweep_sequence() {
        let mut sweep_polls = 0;
        let mut status_polls = 0;
        let bench = SimBench::new().with_responder(MM, move |cmd| {
            if cmd.ends_with("wavelength:sweep:state?") {
                sweep_polls += 1;
                Some(if sweep_polls < 3 { "1" } else { "0" }.into())
            } else if cmd.ends_with("function:state?") {
                status_polls += 1;
                Some(if status_polls < 2 {
                    "LOGGING_STABILITY,PROGRESS"
                } else {
                    "LOGGING_STABILITY,COMPLETE"
                }
                .into())
            } else if cmd.ends_with("sweep:exp?") {
                Some("+3".into())
            } else {
                None
            }
        });
        let log = bench.log();
        let dir = tempfile::tempdir().unwrap();
        let mut sweep = sweep(dir.path(), PassiveConfig::default(), bench);

        let (wl, powers) = sweep.run_laser_sweep_auto().unwrap();
        assert_eq!(wl.len(), 3);
        assert!((wl[0] - 1550.0).abs() < 1e-6);
        assert_eq!(powers, vec![f64::from(1e-3f32); 3]);

        let cmds = log.commands();
        let pos = |c: &str| log.position(c).unwrap_or_else(|| panic!("missing {c}"));
        assert_eq!(cmds[0], "source1:channel1:power:unit dBm");
        assert!(pos("trigger:configuration 3") < pos("source1:channel1:wavelength:sweep:mode continuous"));
        assert!(log.contains("sense1:channel1:function:parameter:logging 3,0.0001s"));
        assert!(
            pos("sense1:channel1:function:state logging,start")
                < pos("source1:channel1:wavelength:sweep:state start")
        );
        assert_eq!(log.count("source1:channel1:wavelength:sweep:state?"), 3);
        assert_eq!(log.count("sense1:channel1:function:state?"), 2);
        assert_eq!(log.count("sense1:channel1:function:state logging,stop"), 2);
        assert_eq!(cmds.last().unwrap(), "source1:channel1:power:state 0");

        let table = read_csv(&dir.path().join("chip_sweep.csv")).unwrap();
        // 1 mW detected from a 10 dBm source
        assert!(table.column("Loss [dB]").unwrap().iter().all(|l| (l - 10.0).abs() < 1e-3));
    }

    #[test]
    fn test_manual_sweep_checks_laser_range() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PassiveConfig::default();
        config.laser.start = 1400.0;
        config.laser.stop = 1402.0;
        config.laser.step = 1.0;
        let bench = SimBench::new();
        let log = bench.log();
        let mut sweep = sweep(dir.path(), config, bench);

        assert!(matches!(
            sweep.run_sweep_manual(),
            Err(OctalError::OutOfRange { name, .. }) if name == "wavelength"
        ));
        assert!(!log.commands().iter().any(|c| c.starts_with("source1:channel1:wavelength ")));
        // laser still switched off
        assert_eq!(log.commands().last().unwrap(), "source1:channel1:power:state 0");
    }

    #[test]
    fn test_manual_sweep_records_every_point() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PassiveConfig::default();
        config.laser.start = 1550.0;
        config.laser.stop = 1552.0;
        config.laser.step = 1.0;
        let mut sweep = sweep(dir.path(), config, SimBench::new());

        let table = sweep.run_sweep_manual().unwrap();
        assert_eq!(table.column("Wavelength [nm]"), Some(&[1550.0, 1551.0, 1552.0][..]));
        assert_eq!(read_csv(&dir.path().join("chip_manual.csv")).unwrap(), table);
    }

    #[test]
    fn test_lengths_fit() {
        let dir = tempfile::tempdir().unwrap();
        let config = PassiveConfig {
            lengths: vec![1000.0, 2000.0, 3000.0],
            ..PassiveConfig::default()
        };
        let mut sweep = sweep(dir.path(), config, SimBench::new());
        crate::sweeps::run_sweep(&mut sweep, "").unwrap();

        let data = read_csv(&dir.path().join("chip_lengths.csv")).unwrap();
        assert_eq!(data.width(), 4);
        assert!(data.column("2000um - loss [dB]").is_some());

        let coeffs = read_csv(&dir.path().join("chip_coeffs.csv")).unwrap();
        // equal loss at every length: no propagation loss, 10 dB insertion loss
        assert!(coeffs.column("CH0 - loss [dB/um]").unwrap().iter().all(|s| s.abs() < 1e-9));
        assert!(coeffs
            .column("CH0 - insertion loss [dB]")
            .unwrap()
            .iter()
            .all(|i| (i - 10.0).abs() < 1e-3));
    }

    fn block_f64(values: &[f64]) -> SimReply {
        let mut payload = Vec::new();
        for v in values {
            payload.write_f64::<LittleEndian>(*v).unwrap();
        }
        encode_block(&payload).into()
    }

    fn block_f32(values: &[f32]) -> SimReply {
        let mut payload = Vec::new();
        for v in values {
            payload.write_f32::<LittleEndian>(*v).unwrap();
        }
        encode_block(&payload).into()
    }

    #[test]
    fn test_lengths_fit_with_shorter_second_run() {
        let mut data_reads = 0;
        let mut result_reads = 0;
        let bench = SimBench::new().with_responder(MM, move |cmd| {
            if cmd.contains("readout:data?") {
                data_reads += 1;
                Some(if data_reads == 2 {
                    block_f64(&[1550e-9, 1551e-9])
                } else {
                    block_f64(&[1550e-9, 1551e-9, 1552e-9])
                })
            } else if cmd.contains("function:result?") {
                result_reads += 1;
                Some(if result_reads == 2 {
                    block_f32(&[1e-3, 1e-3])
                } else {
                    block_f32(&[1e-3, 1e-3, 1e-3])
                })
            } else {
                None
            }
        });
        let dir = tempfile::tempdir().unwrap();
        let config = PassiveConfig {
            lengths: vec![1000.0, 2000.0, 3000.0],
            ..PassiveConfig::default()
        };
        let mut sweep = sweep(dir.path(), config, bench);
        sweep.run_lengths().unwrap();

        // the short run leaves a blank cell in its column
        let data = read_csv(&dir.path().join("chip_lengths.csv")).unwrap();
        assert!(data.column("2000um - loss [dB]").unwrap()[2].is_nan());
        assert!(!data.column("3000um - loss [dB]").unwrap()[2].is_nan());

        let coeffs = read_csv(&dir.path().join("chip_coeffs.csv")).unwrap();
        let wavelengths = coeffs.column("Wavelength").unwrap();
        assert_eq!(wavelengths.len(), 2);
        assert!((wavelengths[1] - 1551.0).abs() < 1e-6);
        assert!(coeffs
            .column("CH0 - insertion loss [dB]")
            .unwrap()
            .iter()
            .all(|i| (i - 10.0).abs() < 1e-3));
    }

    #[test]
    fn test_duplicate_lengths_rejected_before_measuring() {
        let dir = tempfile::tempdir().unwrap();
        let config = PassiveConfig {
            lengths: vec![1000.0, 1000.0],
            ..PassiveConfig::default()
        };
        let bench = SimBench::new();
        let log = bench.log();
        let mut sweep = sweep(dir.path(), config, bench);

        assert!(matches!(sweep.run_lengths(), Err(OctalError::Analysis(_))));
        assert!(log.is_empty());
    }

    #[test]
    fn test_unknown_function_and_missing_lengths() {
        let dir = tempfile::tempdir().unwrap();
        let mut sweep = sweep(dir.path(), PassiveConfig::default(), SimBench::new());
        assert!(matches!(sweep.run("run_ilme"), Err(OctalError::UnknownFunction { .. })));
        assert!(matches!(sweep.run_lengths(), Err(OctalError::Analysis(_))));
    }
}
