//! Run banner and the `<fname>_info.csv` parameter record.

use std::path::Path;

use chrono::Local;
use log::info;

use crate::config::{AmpConfig, AppConfig, DcConfig, IvConfig, PassiveConfig};
use crate::error::OctalError;
use crate::export::export_info_csv;
use crate::sweeps::TestType;

/// Ordered `(parameter, value)` entries describing a test configuration.
pub struct SweepTestInfo;

fn entry(param: &str, value: impl ToString) -> (String, String) {
    (param.to_string(), value.to_string())
}

fn join(values: &[f64]) -> String {
    values
        .iter()
        .map(f64::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl SweepTestInfo {
    pub fn passive(cfg: &PassiveConfig) -> Vec<(String, String)> {
        vec![
            entry("Power [dBm]", cfg.laser.power),
            entry("Start wavelength [nm]", cfg.laser.start),
            entry("Stop wavelength [nm]", cfg.laser.stop),
            entry("Wavelength step [pm]", cfg.laser.step * 1e3),
            entry(&format!("Lengths [{}]", cfg.length_unit), join(&cfg.lengths)),
        ]
    }

    pub fn dc(cfg: &DcConfig) -> Vec<(String, String)> {
        let speed = cfg
            .laser
            .speed
            .map(|s| s.to_string())
            .unwrap_or_else(|| "default".to_string());
        vec![
            entry("Power [dBm]", cfg.laser.power),
            entry("Start voltage [V]", cfg.voltage.start),
            entry("Stop voltage [V]", cfg.voltage.stop),
            entry("Step voltage [V]", cfg.voltage.step),
            entry("Cycle", cfg.laser.cycles),
            entry("Wavelength start [nm]", cfg.laser.start),
            entry("Wavelength stop [nm]", cfg.laser.stop),
            entry("Wavelength step [nm]", cfg.laser.step),
            entry("Scan speed [nm/s]", speed),
        ]
    }

    pub fn iv(cfg: &IvConfig) -> Vec<(String, String)> {
        vec![
            entry("Start voltage [V]", cfg.voltage.start),
            entry("Stop voltage [V]", cfg.voltage.stop),
            entry("Step voltage [V]", cfg.voltage.step),
            entry("Time step [s]", cfg.t_step),
        ]
    }

    pub fn amp(cfg: &AmpConfig) -> Vec<(String, String)> {
        vec![
            entry("Mode", &cfg.mode),
            entry("Start Value", cfg.range.start),
            entry("Stop Value", cfg.range.stop),
            entry("Step Value", cfg.range.step),
        ]
    }

    pub fn for_test(test: TestType, config: &AppConfig) -> Vec<(String, String)> {
        match test {
            TestType::Passive => Self::passive(&config.passive),
            TestType::Dc => Self::dc(&config.dc),
            TestType::Iv => Self::iv(&config.iv),
            TestType::Amp => Self::amp(&config.amp),
        }
    }
}

/// Log the run banner with the general and test-specific settings, and write
/// them to `<folder>/<fname>_info.csv` (amplifier runs keep their settings in
/// each result workbook instead).
pub fn log_setup_info(test: TestType, config: &AppConfig, func: &str) -> Result<(), OctalError> {
    let general = &config.general;

    info!("");
    info!("{}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    info!("##############################################");
    info!("## TEST INFORMATION:                        ##");
    info!("##############################################");
    info!("");
    info!("General Variables");
    info!("{:<10} : {}", "Folder", general.folder);
    info!("{:<10} : {}", "Filename", general.fname);
    info!("{:<10} : {}", "Test Type", test);
    info!("{:<10} : {}", "Function", func);
    info!("{:<10} :", "Address");
    for (name, addr) in config.instr_addrs.iter() {
        let all = addr.as_vec();
        info!("  {:<6} - {} - {}", name, all.len(), all.join(", "));
    }
    info!("");

    info!("Test-Specific Variables");
    let entries = SweepTestInfo::for_test(test, config);
    for (param, value) in &entries {
        info!("{param:<25} : {value}");
    }
    info!("");

    if test != TestType::Amp {
        let path = Path::new(&general.folder).join(format!("{}_info.csv", general.fname));
        export_info_csv(&entries, &path)?;
    }
    Ok(())
}
