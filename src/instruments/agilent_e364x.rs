use crate::error::OctalError;
use crate::instrument::ScpiInstrument;
use crate::transport::ResourceManager;

/// Agilent E3640A-series programmable DC power supply.
///
/// Used as the voltage source for heaters, ring tuners and modulators.
///
/// ```
/// use rusty_octal::instruments::AgilentE3640A;
/// use rusty_octal::ResourceManager;
///
/// let rm = ResourceManager::new().simulated(true);
/// let mut source = AgilentE3640A::open(&rm, "GPIB0::5::INSTR")?;
/// source.set_output_state(true)?;
/// source.set_volt(1.5)?;
/// # Ok::<(), rusty_octal::OctalError>(())
/// ```
pub struct AgilentE3640A {
    instr: ScpiInstrument,
}

impl AgilentE3640A {
    pub const DEFAULT_ADDR: &'static str = "GPIB0::4::INSTR";

    pub fn new(instr: ScpiInstrument) -> Self {
        Self { instr }
    }

    pub fn open(rm: &ResourceManager, addr: &str) -> Result<Self, OctalError> {
        Ok(Self::new(ScpiInstrument::open(rm, addr)?))
    }

    pub fn instrument(&mut self) -> &mut ScpiInstrument {
        &mut self.instr
    }

    /// Reset and switch the output on.
    pub fn setup(&mut self) -> Result<(), OctalError> {
        self.instr.reset()?;
        self.set_output_state(true)
    }

    pub fn set_output_state(&mut self, on: bool) -> Result<(), OctalError> {
        self.instr.write(&format!("output {}", u8::from(on)))
    }

    pub fn get_output_state(&mut self) -> Result<bool, OctalError> {
        self.instr.query_bool("output?")
    }

    /// Set the output voltage [V].
    pub fn set_volt(&mut self, volt: f64) -> Result<(), OctalError> {
        self.instr.write(&format!("voltage {volt}"))
    }

    /// Set the current limit [A].
    pub fn set_curr(&mut self, curr: f64) -> Result<(), OctalError> {
        self.instr.write(&format!("current {curr}"))
    }

    /// Set voltage [V] and current limit [A] in one command.
    pub fn set_params(&mut self, volt: f64, curr: f64) -> Result<(), OctalError> {
        self.instr.write(&format!("apply {volt}, {curr}"))
    }

    /// Programmed (voltage, current limit).
    pub fn get_params(&mut self) -> Result<(f64, f64), OctalError> {
        match self.instr.query_floats("apply?")?.as_slice() {
            [volt, curr] => Ok((*volt, *curr)),
            other => Err(OctalError::Parse(format!(
                "apply? returned {} values, expected 2",
                other.len()
            ))),
        }
    }

    /// Measured output current [A].
    pub fn get_curr(&mut self) -> Result<f64, OctalError> {
        self.instr.query_float("measure:current?")
    }

    /// Measured output voltage [V].
    pub fn get_volt(&mut self) -> Result<f64, OctalError> {
        self.instr.query_float("measure:voltage?")
    }

    /// Bring the output back to 0 V and switch it off.
    pub fn shutdown(&mut self) -> Result<(), OctalError> {
        self.set_volt(0.0)?;
        self.set_output_state(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SimTransport;

    #[test]
    fn test_commands() {
        let sim = SimTransport::new("e3640a").with_responder(|cmd| match cmd {
            "apply?" => Some("\"8.000000,0.100000\"".into()),
            "measure:current?" => Some("1.25E-02".into()),
            "output?" => Some("1".into()),
            _ => None,
        });
        let log = sim.log();
        let mut pm = AgilentE3640A::new(ScpiInstrument::new(Box::new(sim), "SIM::e3640a"));

        pm.setup().unwrap();
        pm.set_volt(2.5).unwrap();
        pm.set_params(8.0, 0.1).unwrap();
        assert_eq!(pm.get_params().unwrap(), (8.0, 0.1));
        assert_eq!(pm.get_curr().unwrap(), 0.0125);
        assert!(pm.get_output_state().unwrap());
        pm.shutdown().unwrap();

        assert_eq!(
            log.commands(),
            vec![
                "*RST",
                "output 1",
                "voltage 2.5",
                "apply 8, 0.1",
                "apply?",
                "measure:current?",
                "output?",
                "voltage 0",
                "output 0",
            ]
        );
    }
}
