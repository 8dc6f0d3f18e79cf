use crate::error::OctalError;
use crate::instrument::{check_choice, check_range, ScpiInstrument};
use crate::transport::ResourceManager;

/// Laser diode control modes: automatic current or automatic level (power).
pub const LD_MODES: &[&str] = &["ACC", "ALC"];

/// Fiberlabs multi-channel optical amplifier.
pub struct FiberlabsAmp {
    instr: ScpiInstrument,
}

impl FiberlabsAmp {
    pub fn new(instr: ScpiInstrument) -> Self {
        Self { instr }
    }

    pub fn open(rm: &ResourceManager, addr: &str) -> Result<Self, OctalError> {
        Ok(Self::new(ScpiInstrument::open(rm, addr)?))
    }

    /// Number of pump channels fitted.
    pub fn get_channel_count(&mut self) -> Result<u32, OctalError> {
        let n = self.instr.query_float("chnum?")?;
        Ok(n as u32)
    }

    pub fn set_ld_mode(&mut self, chan: u8, mode: &str) -> Result<(), OctalError> {
        check_choice("LD mode", mode, LD_MODES)?;
        self.instr
            .write(&format!("ldmode {chan},{}", mode.to_ascii_uppercase()))
    }

    /// Pump current of one channel [mA].
    pub fn set_curr(&mut self, chan: u8, curr: f64) -> Result<(), OctalError> {
        check_range("pump current", curr, 0.0, f64::MAX)?;
        self.instr.write(&format!("setcurr {chan},{curr}"))
    }

    /// Same pump current on every channel [mA].
    pub fn set_all_curr(&mut self, curr: f64) -> Result<(), OctalError> {
        check_range("pump current", curr, 0.0, f64::MAX)?;
        self.instr.write(&format!("setallcurr {curr}"))
    }

    /// Output power target of one channel [mW].
    pub fn set_power(&mut self, chan: u8, power: f64) -> Result<(), OctalError> {
        check_range("output power", power, 0.0, f64::MAX)?;
        self.instr.write(&format!("setpower {chan},{power}"))
    }

    /// Apply `value` on channel 1 as a current (ACC) or power (ALC) set point.
    pub fn set_curr_smart(&mut self, mode: &str, value: f64) -> Result<(), OctalError> {
        check_choice("LD mode", mode, LD_MODES)?;
        if mode.eq_ignore_ascii_case("ACC") {
            self.set_curr(1, value)
        } else {
            self.set_power(1, value)
        }
    }

    pub fn set_output_state(&mut self, on: bool) -> Result<(), OctalError> {
        self.instr.write(&format!("active {}", u8::from(on)))
    }

    /// Monitored pump current of every channel [mA].
    pub fn get_mon_pump_curr(&mut self) -> Result<Vec<f64>, OctalError> {
        self.instr.query_floats("monpumpcurr?")
    }
}
