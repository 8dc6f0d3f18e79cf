//! Optical amplifier characterization: loss spectrum per pump set point.

use log::{info, warn};

use super::passive::laser_sweep_auto;
use super::{finish, label, Sweep, SweepContext};
use crate::analysis::{power_to_loss_db, LinearModel};
use crate::config::AmpConfig;
use crate::error::OctalError;
use crate::export::{export_to_csv, export_to_excel, Sheet};
use crate::instruments::{Agilent8163B, FiberlabsAmp};
use crate::recorder::SweepRecorder;
use crate::table::MeasurementTable;

pub struct AmpSweeps {
    config: AmpConfig,
    ctx: SweepContext,
}

impl AmpSweeps {
    pub fn new(config: AmpConfig, ctx: SweepContext) -> Self {
        Self { config, ctx }
    }

    /// Laser settings written to the `config` sheet of every result file.
    fn config_info(&self) -> Vec<(String, String)> {
        let laser = &self.config.laser;
        vec![
            ("Wavelength start [nm]".to_string(), laser.start.to_string()),
            ("Wavelength stop [nm]".to_string(), laser.stop.to_string()),
            ("Wavelength step [pm]".to_string(), (laser.step * 1e3).to_string()),
            (
                "Sweep rate [nm/s]".to_string(),
                laser.speed.map(|s| s.to_string()).unwrap_or_else(|| "default".to_string()),
            ),
            ("Output power [dBm]".to_string(), laser.power.to_string()),
        ]
    }

    fn set_point_column(&self) -> String {
        let quantity = if self.config.unit() == "mW" { "Power" } else { "Current" };
        format!("{quantity} [{}]", self.config.unit())
    }

    /// Sweep the channel 1 set point (current in ACC, power in ALC) and take a
    /// loss spectrum at each.
    ///
    /// Every set point gets `<value><unit>.xlsx` with `config` and `data`
    /// sheets; monitored pump currents go to `extra_data.csv`. With
    /// `prediction` on, the (set point, wavelength, loss) points are saved to
    /// `model_data.csv` and a fitted [`LinearModel`] to `model.json`.
    pub fn run_acc(&mut self) -> Result<(), OctalError> {
        self.ctx.instrument_check(&["amp", "mm"])?;
        self.ctx.create_folder()?;
        let mut amp = FiberlabsAmp::open(self.ctx.rm(), self.ctx.addr("amp")?)?;
        let mut mm = Agilent8163B::open(self.ctx.rm(), self.ctx.addr("mm")?)?;

        let result = self.acc(&mut amp, &mut mm);
        let cleanup = amp.set_output_state(false).and(mm.set_laser_state(false));
        finish(result, cleanup)
    }

    fn acc(&self, amp: &mut FiberlabsAmp, mm: &mut Agilent8163B) -> Result<(), OctalError> {
        let cfg = &self.config;
        let info = self.config_info();
        info!("Laser sweep configuration");
        for (param, value) in &info {
            info!("  {param:<22} : {value}");
        }

        amp.set_ld_mode(1, &cfg.mode)?;
        amp.set_all_curr(0.0)?;
        amp.set_output_state(true)?;

        let sp_column = self.set_point_column();
        let mut extra = SweepRecorder::new(
            self.ctx.path("extra_data.csv"),
            &[sp_column.as_str(), "Monitored Current [mA]"],
        );
        let mut model_data = MeasurementTable::with_columns(&[
            sp_column.as_str(),
            "Wavelength [nm]",
            "Loss [dB]",
        ]);

        for set_point in cfg.range.values() {
            self.ctx.check_shutdown()?;
            amp.set_curr_smart(&cfg.mode, set_point)?;

            // channel outputs add up
            let monitored: f64 = amp.get_mon_pump_curr()?.iter().sum();
            extra.record(&[set_point, monitored])?;

            let (wl, powers) = laser_sweep_auto(mm, &cfg.laser)?;
            let loss: Vec<f64> = powers
                .iter()
                .map(|p| power_to_loss_db(cfg.laser.power, *p))
                .collect();

            if cfg.prediction {
                for (w, l) in wl.iter().zip(&loss).filter(|(_, l)| l.is_finite()) {
                    model_data.push_row(&[set_point, *w, *l])?;
                }
            }

            let mut data = MeasurementTable::new();
            data.add_column("Wavelength [nm]", wl);
            data.add_column("Loss [dB]", loss);
            let name = label(set_point, cfg.unit());
            export_to_excel(
                &[Sheet::Pairs("config", &info), Sheet::Table("data", &data)],
                &self.ctx.path(&format!("{name}.xlsx")),
            )?;
            info!("{name} done");
        }

        if cfg.prediction {
            export_to_csv(&model_data, &self.ctx.path("model_data.csv"))?;
            let set_points = model_data.column(&sp_column).unwrap_or_default();
            let wavelengths = model_data.column("Wavelength [nm]").unwrap_or_default();
            let losses = model_data.column("Loss [dB]").unwrap_or_default();
            match LinearModel::fit(set_points, wavelengths, losses) {
                Ok(model) => {
                    model.save_json(&self.ctx.path("model.json"))?;
                    info!(
                        "Set-point model: {:.4} + {:.4} * wavelength + {:.4} * loss",
                        model.intercept, model.coefficients[0], model.coefficients[1]
                    );
                }
                Err(e) => warn!("No set-point model fitted: {e}"),
            }
        }
        Ok(())
    }
}

impl Sweep for AmpSweeps {
    fn name(&self) -> &'static str {
        "AmpSweeps"
    }

    fn functions(&self) -> &'static [&'static str] {
        &["run_acc"]
    }

    fn run(&mut self, func: &str) -> Result<(), OctalError> {
        match func {
            "run_acc" => self.run_acc(),
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
    use crate::sweeps::SweepRange;
    use crate::transport::SimBench;
    use byteorder::{LittleEndian, WriteBytesExt};

    const AMP: &str = "GPIB0::7::INSTR";
    const MM: &str = "GPIB0::20::INSTR";

    fn config(prediction: bool) -> AmpConfig {
        AmpConfig {
            range: SweepRange {
                start: 0.0,
                stop: 20.0,
                step: 10.0,
            },
            prediction,
            ..AmpConfig::default()
        }
    }

    /// Detected power rises 1 dB per sweep: 10, 9, 8 dB of loss.
    fn bench() -> SimBench {
        let mut sweeps = 0;
        SimBench::new()
            .with_responder(AMP, |cmd| (cmd == "monpumpcurr?").then(|| "50.5,49.5".into()))
            .with_responder(MM, move |cmd| {
                cmd.ends_with("function:result?").then(|| {
                    let p = 1e-3 * 10f64.powf(sweeps as f64 / 10.0);
                    sweeps += 1;
                    let mut payload = Vec::new();
                    for _ in 0..3 {
                        payload.write_f32::<LittleEndian>(p as f32).unwrap();
                    }
                    encode_block(&payload).into()
                })
            })
    }

    #[test]
    fn test_acc_files_per_set_point() {
        let dir = tempfile::tempdir().unwrap();
        let bench = bench();
        let log = bench.log();
        let ctx = context(dir.path(), &[("amp", AMP), ("mm", MM)], bench);
        let mut sweep = AmpSweeps::new(config(false), ctx);

        sweep.run("run_acc").unwrap();

        for name in ["0mA.xlsx", "10mA.xlsx", "20mA.xlsx"] {
            assert!(dir.path().join(name).exists(), "{name} missing");
        }
        let extra = read_csv(&dir.path().join("extra_data.csv")).unwrap();
        assert_eq!(extra.column("Current [mA]"), Some(&[0.0, 10.0, 20.0][..]));
        assert_eq!(extra.column("Monitored Current [mA]"), Some(&[100.0; 3][..]));
        assert!(!dir.path().join("model.json").exists());

        let cmds = log.commands();
        assert_eq!(&cmds[..3], &["ldmode 1,ACC", "setallcurr 0", "active 1"]);
        assert!(log.position("setcurr 1,10").unwrap() < log.position("setcurr 1,20").unwrap());
        assert_eq!(
            &cmds[cmds.len() - 2..],
            &["active 0", "source1:channel1:power:state 0"]
        );
    }

    #[test]
    fn test_acc_prediction_model() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), &[("amp", AMP), ("mm", MM)], bench());
        let mut sweep = AmpSweeps::new(config(true), ctx);

        sweep.run_acc().unwrap();

        let points = read_csv(&dir.path().join("model_data.csv")).unwrap();
        assert_eq!(points.len(), 9);

        let model = LinearModel::load_json(&dir.path().join("model.json")).unwrap();
        // set point = 100 - 10 * loss, independent of wavelength
        assert!((model.coefficients[1] + 10.0).abs() < 1e-2);
        assert!((model.predict(1551.0, 9.0) - 10.0).abs() < 1e-2);
    }

    #[test]
    fn test_acc_alc_mode_uses_power_set_points() {
        let dir = tempfile::tempdir().unwrap();
        let bench = bench();
        let log = bench.log();
        let ctx = context(dir.path(), &[("amp", AMP), ("mm", MM)], bench);
        let cfg = AmpConfig {
            mode: "ALC".to_string(),
            ..config(false)
        };
        let mut sweep = AmpSweeps::new(cfg, ctx);

        sweep.run_acc().unwrap();
        assert!(log.contains("setpower 1,20"));
        assert!(dir.path().join("20mW.xlsx").exists());
        let extra = read_csv(&dir.path().join("extra_data.csv")).unwrap();
        assert!(extra.column("Power [mW]").is_some());
    }
}
