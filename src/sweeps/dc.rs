//! Voltage sweeps on DC supplies with optical readout.

use std::time::Duration;

use log::info;

use super::passive::laser_sweep_auto;
use super::{finish, label, Sweep, SweepContext};
use crate::config::DcConfig;
use crate::error::OctalError;
use crate::export::{export_to_csv, export_to_excel, Sheet};
use crate::instruments::{Agilent8163B, AgilentE3640A};
use crate::recorder::SweepRecorder;
use crate::stability::wait_for_stable;
use crate::table::MeasurementTable;

pub struct DcSweeps {
    config: DcConfig,
    ctx: SweepContext,
}

impl DcSweeps {
    pub fn new(config: DcConfig, ctx: SweepContext) -> Self {
        Self { config, ctx }
    }

    fn open(&self) -> Result<(AgilentE3640A, Agilent8163B), OctalError> {
        self.ctx.instrument_check(&["pm", "mm"])?;
        self.ctx.create_folder()?;
        let pm = AgilentE3640A::open(self.ctx.rm(), self.ctx.addr("pm")?)?;
        let mm = Agilent8163B::open(self.ctx.rm(), self.ctx.addr("mm")?)?;
        Ok((pm, mm))
    }

    /// A full laser sweep at every source voltage.
    ///
    /// `<fname>.csv` gets one detected power column per voltage and is
    /// rewritten after each one; the source currents go to
    /// `<fname>_currents.csv`.
    pub fn run_one_source(&mut self) -> Result<(), OctalError> {
        let (mut pm, mut mm) = self.open()?;
        let result = self.one_source(&mut pm, &mut mm);
        let cleanup = pm.shutdown().and(mm.set_laser_state(false));
        finish(result, cleanup)
    }

    fn one_source(&self, pm: &mut AgilentE3640A, mm: &mut Agilent8163B) -> Result<(), OctalError> {
        let data_path = self.ctx.result_path(".csv");
        let mut data = MeasurementTable::new();
        let mut currents = SweepRecorder::new(
            self.ctx.result_path("_currents.csv"),
            &["Voltage [V]", "Current [A]"],
        );

        pm.set_output_state(true)?;
        for volt in self.config.voltage.values() {
            self.ctx.check_shutdown()?;
            pm.set_volt(volt)?;
            std::thread::sleep(Duration::from_secs_f64(self.config.settle_time));
            currents.record(&[volt, pm.get_curr()?])?;

            let (wl, powers) = laser_sweep_auto(mm, &self.config.laser)?;
            if data.is_empty() {
                data.add_column("Wavelength [nm]", wl);
            }
            data.add_column(label(volt, "V"), powers);
            export_to_csv(&data, &data_path)?;
            info!("{} done", label(volt, "V"));
        }
        Ok(())
    }

    /// Fixed-wavelength transmission against source voltage.
    ///
    /// Rows are written to `<fname>_simple.csv` as they are taken and the
    /// whole run to the `data` sheet of `<fname>.xlsx`.
    pub fn run_simple(&mut self) -> Result<(), OctalError> {
        let (mut pm, mut mm) = self.open()?;
        let result = self.simple(&mut pm, &mut mm);
        let cleanup = pm.shutdown().and(mm.set_laser_state(false));
        finish(result, cleanup)
    }

    fn simple(&self, pm: &mut AgilentE3640A, mm: &mut Agilent8163B) -> Result<(), OctalError> {
        let cfg = &self.config;
        mm.setup(false, cfg.wavelength, cfg.power, cfg.period)?;

        if pm.get_params()?.0 < cfg.voltage.stop {
            info!("Raising source limits to {} V, {} A", cfg.voltage.stop, cfg.current_limit);
            pm.set_params(cfg.voltage.stop, cfg.current_limit)?;
        }
        if !pm.get_output_state()? {
            pm.set_output_state(true)?;
        }

        let header = [
            "Voltage [V]",
            "Detected Voltage [V]",
            "Current [A]",
            "Power [W]",
            "Optical power [W]",
        ];
        let mut table = MeasurementTable::with_columns(&header);
        let mut recorder = SweepRecorder::new(self.ctx.result_path("_simple.csv"), &header);

        for volt in cfg.voltage.values() {
            self.ctx.check_shutdown()?;
            pm.set_volt(volt)?;
            let current = wait_for_stable(|| pm.get_curr(), &self.ctx.stability().current)?.value;
            let detected = pm.get_volt()?;
            let optical = mm.get_detect_pow()?;

            let row = [volt, detected, current, detected * current, optical];
            recorder.record(&row)?;
            table.push_row(&row)?;
        }

        export_to_excel(&[Sheet::Table("data", &table)], &self.ctx.result_path(".xlsx"))
    }

    /// Ring voltage on the outer axis, heater voltage on the inner one.
    ///
    /// `pm` lists the ring supply first and the heater supply second. Each
    /// ring voltage gets a `ring<v>.csv`; the heater voltages of maximum and
    /// minimum transmission are collected in `max_min_voltages.csv`.
    pub fn run_ring_assisted_mzi(&mut self) -> Result<(), OctalError> {
        self.ctx.instrument_check(&["pm", "mm"])?;
        self.ctx.create_folder()?;
        let addrs = self.ctx.addr_list("pm", 2)?;
        let mut ring = AgilentE3640A::open(self.ctx.rm(), addrs[0])?;
        let mut heater = AgilentE3640A::open(self.ctx.rm(), addrs[1])?;
        let mut mm = Agilent8163B::open(self.ctx.rm(), self.ctx.addr("mm")?)?;

        let result = self.ring_assisted_mzi(&mut ring, &mut heater, &mut mm);
        let cleanup = heater
            .shutdown()
            .and(ring.shutdown())
            .and(mm.set_laser_state(false));
        finish(result, cleanup)
    }

    fn ring_assisted_mzi(
        &self,
        ring: &mut AgilentE3640A,
        heater: &mut AgilentE3640A,
        mm: &mut Agilent8163B,
    ) -> Result<(), OctalError> {
        let cfg = &self.config;
        heater.set_output_state(true)?;
        heater.set_params(cfg.heater.stop, cfg.heater_current_limit)?;
        ring.set_output_state(true)?;
        ring.set_params(cfg.voltage.stop, cfg.current_limit)?;
        mm.setup(false, cfg.wavelength, cfg.power, cfg.period)?;

        let heater_voltages = cfg.heater.values();
        let mut extremes = SweepRecorder::new(
            self.ctx.path("max_min_voltages.csv"),
            &["Ring voltage [V]", "Max power voltage [V]", "Min power voltage [V]"],
        );

        for ring_v in cfg.voltage.values() {
            self.ctx.check_shutdown()?;
            ring.set_volt(ring_v)?;

            let mut table =
                MeasurementTable::with_columns(&["Voltage [V]", "Power [W]", "Current [A]"]);
            for &volt in &heater_voltages {
                self.ctx.check_shutdown()?;
                heater.set_volt(volt)?;
                let current =
                    wait_for_stable(|| heater.get_curr(), &self.ctx.stability().current)?.value;

                let mut power = 0.0;
                for _ in 0..cfg.avg {
                    power += mm.get_detect_pow()?;
                }
                table.push_row(&[volt, power / f64::from(cfg.avg), current])?;
            }
            export_to_csv(&table, &self.ctx.path(&format!("ring{}.csv", label(ring_v, ""))))?;

            let powers = table.column("Power [W]").unwrap_or_default();
            let (max_v, min_v) = extreme_voltages(&heater_voltages, powers);
            info!("Ring {}: maximum at {max_v} V, minimum at {min_v} V", label(ring_v, "V"));
            extremes.record(&[ring_v, max_v, min_v])?;
        }
        Ok(())
    }
}

/// Voltages at which `powers` is largest and smallest.
fn extreme_voltages(voltages: &[f64], powers: &[f64]) -> (f64, f64) {
    let pick = |ordering: std::cmp::Ordering| {
        powers
            .iter()
            .enumerate()
            .reduce(|best, cur| if cur.1.total_cmp(best.1) == ordering { cur } else { best })
            .map(|(i, _)| voltages[i])
            .unwrap_or(f64::NAN)
    };
    (
        pick(std::cmp::Ordering::Greater),
        pick(std::cmp::Ordering::Less),
    )
}

impl Sweep for DcSweeps {
    fn name(&self) -> &'static str {
        "DcSweeps"
    }

    fn functions(&self) -> &'static [&'static str] {
        &["run_one_source", "run_simple", "run_ring_assisted_mzi"]
    }

    fn run(&mut self, func: &str) -> Result<(), OctalError> {
        match func {
            "run_one_source" => self.run_one_source(),
            "run_simple" => self.run_simple(),
            "run_ring_assisted_mzi" => self.run_ring_assisted_mzi(),
            other => Err(self.unknown(other)),
        }
    }
}
