use std::time::Duration;

use log::info;

use super::{finish, Sweep, SweepContext};
use crate::config::IvConfig;
use crate::error::OctalError;
use crate::instruments::AgilentE3640A;
use crate::recorder::SweepRecorder;

/// Current-voltage characteristic of a device on one supply (`pm`).
pub struct IvSweeps {
    config: IvConfig,
    ctx: SweepContext,
}

impl IvSweeps {
    pub fn new(config: IvConfig, ctx: SweepContext) -> Self {
        Self { config, ctx }
    }

    /// Step the supply voltage, wait `t_step` and record the read-back
    /// voltage and current to `<fname>_iv.csv`.
    pub fn run_iv(&mut self) -> Result<(), OctalError> {
        self.ctx.instrument_check(&["pm"])?;
        self.ctx.create_folder()?;
        let mut pm = AgilentE3640A::open(self.ctx.rm(), self.ctx.addr("pm")?)?;

        let result = self.iv(&mut pm);
        finish(result, pm.shutdown())
    }

    fn iv(&self, pm: &mut AgilentE3640A) -> Result<(), OctalError> {
        let cfg = &self.config;
        pm.set_params(cfg.voltage.start, cfg.current_limit)?;
        pm.set_output_state(true)?;

        let mut recorder = SweepRecorder::new(
            self.ctx.result_path("_iv.csv"),
            &["Voltage [V]", "Detected Voltage [V]", "Current [A]"],
        );
        let wait = Duration::from_secs_f64(cfg.t_step);

        for volt in cfg.voltage.values() {
            self.ctx.check_shutdown()?;
            pm.set_volt(volt)?;
            std::thread::sleep(wait);
            let detected = pm.get_volt()?;
            let current = pm.get_curr()?;
            recorder.record(&[volt, detected, current])?;
        }

        info!(
            "IV sweep done, {} points in {}",
            recorder.rows_written(),
            recorder.path().display()
        );
        Ok(())
    }
}

impl Sweep for IvSweeps {
    fn name(&self) -> &'static str {
        "IvSweeps"
    }

    fn functions(&self) -> &'static [&'static str] {
        &["run_iv"]
    }

    fn run(&mut self, func: &str) -> Result<(), OctalError> {
        match func {
            "run_iv" => self.run_iv(),
            other => Err(self.unknown(other)),
        }
    }
}
