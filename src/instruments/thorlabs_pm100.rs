use crate::error::OctalError;
use crate::instrument::ScpiInstrument;
use crate::transport::ResourceManager;

/// Thorlabs PM100 optical power monitor.
pub struct ThorlabsPM100 {
    instr: ScpiInstrument,
}

impl ThorlabsPM100 {
    /// Wrap an open session and switch data encoding to ASCII.
    pub fn new(mut instr: ScpiInstrument) -> Result<Self, OctalError> {
        instr.write("data:encd asci")?;
        Ok(Self { instr })
    }

    pub fn open(rm: &ResourceManager, addr: &str) -> Result<Self, OctalError> {
        Self::new(ScpiInstrument::open(rm, addr)?)
    }

    /// Power as shown on the display.
    pub fn read(&mut self) -> Result<f64, OctalError> {
        self.instr.query_float("read?")
    }

    /// Trigger a new power measurement and fetch it [W].
    pub fn meas_power(&mut self) -> Result<f64, OctalError> {
        self.instr.write("measure:power")?;
        self.instr.query_float("fetch?")
    }

    /// Correction wavelength [nm].
    pub fn set_wavelength(&mut self, wavelength: f64) -> Result<(), OctalError> {
        self.instr
            .write(&format!("sense:correction:wavelength {wavelength}"))
    }

    pub fn set_avg_count(&mut self, count: u32) -> Result<(), OctalError> {
        self.instr.write(&format!("sense:average:count {count}"))
    }

    pub fn set_curr_autorange_state(&mut self, on: bool) -> Result<(), OctalError> {
        self.instr
            .write(&format!("current:range:auto {}", u8::from(on)))
    }

    /// Current reference [A].
    pub fn set_curr_reference(&mut self, reference: f64) -> Result<(), OctalError> {
        self.instr.write(&format!("current:reference {reference}"))
    }

    pub fn set_pow_autorange_state(&mut self, on: bool) -> Result<(), OctalError> {
        self.instr.write(&format!("power:range:auto {}", u8::from(on)))
    }

    /// Power reference [W].
    pub fn set_pow_reference(&mut self, reference: f64) -> Result<(), OctalError> {
        self.instr.write(&format!("power:reference {reference}"))
    }

    pub fn set_volt_autorange_state(&mut self, on: bool) -> Result<(), OctalError> {
        self.instr
            .write(&format!("voltage:range:auto {}", u8::from(on)))
    }

    /// Voltage reference [V].
    pub fn set_volt_reference(&mut self, reference: f64) -> Result<(), OctalError> {
        self.instr.write(&format!("voltage:reference {reference}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SimTransport;

    #[test]
    fn test_measure_power() {
        let sim = SimTransport::new("pm100").with_responder(|cmd| {
            (cmd == "fetch?").then(|| "2.5E-04".into())
        });
        let log = sim.log();
        let mut pm = ThorlabsPM100::new(ScpiInstrument::new(Box::new(sim), "SIM::pm100")).unwrap();
        pm.set_wavelength(1550.0).unwrap();
        assert_eq!(pm.meas_power().unwrap(), 2.5e-4);
        assert_eq!(
            log.commands(),
            vec![
                "data:encd asci",
                "sense:correction:wavelength 1550",
                "measure:power",
                "fetch?"
            ]
        );
    }
}
