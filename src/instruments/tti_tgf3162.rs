use crate::error::OctalError;
use crate::instrument::{check_choice, check_range, ScpiInstrument};
use crate::transport::ResourceManager;

const OUTPUT_STATES: &[&str] = &["on", "off", "normal", "invert"];

/// Longest arbitrary waveform the generator accepts.
pub const MAX_ARB_POINTS: usize = 1024;

/// TTi TGF3162 two-channel arbitrary waveform generator.
pub struct TtiTGF3162 {
    instr: ScpiInstrument,
}

impl TtiTGF3162 {
    pub fn new(instr: ScpiInstrument) -> Self {
        Self { instr }
    }

    pub fn open(rm: &ResourceManager, addr: &str) -> Result<Self, OctalError> {
        Ok(Self::new(ScpiInstrument::open(rm, addr)?))
    }

    /// Frequency [Hz].
    pub fn set_freq(&mut self, freq: f64) -> Result<(), OctalError> {
        self.instr.write(&format!("frequency {freq}"))
    }

    pub fn set_ampl(&mut self, ampl: f64) -> Result<(), OctalError> {
        self.instr.write(&format!("ampl {ampl}"))
    }

    pub fn set_ampl_lolvl(&mut self, lolvl: f64) -> Result<(), OctalError> {
        self.instr.write(&format!("lolvl {lolvl}"))
    }

    pub fn set_ampl_hilvl(&mut self, hilvl: f64) -> Result<(), OctalError> {
        self.instr.write(&format!("hilvl {hilvl}"))
    }

    pub fn set_dc_offset(&mut self, offset: f64) -> Result<(), OctalError> {
        self.instr.write(&format!("dcoffs {offset}"))
    }

    /// Load impedance in ohms, or `open`.
    pub fn set_zload(&mut self, zload: &str) -> Result<(), OctalError> {
        self.instr.write(&format!("zload {zload}"))
    }

    pub fn set_output_state(&mut self, state: &str) -> Result<(), OctalError> {
        check_choice("output state", state, OUTPUT_STATES)?;
        self.instr.write(&format!("output {state}"))
    }

    /// Make `channel` (1 or 2) the destination of subsequent commands.
    pub fn select_channel(&mut self, channel: u8) -> Result<(), OctalError> {
        check_range("channel", channel.into(), 1.0, 2.0)?;
        self.instr.write(&format!("chn {channel}"))
    }

    /// Upload `values` in [-1, 1] to arbitrary waveform memory `memchan`.
    pub fn set_arb_waveform(&mut self, values: &[f64], memchan: u8) -> Result<(), OctalError> {
        if values.is_empty() || values.len() > MAX_ARB_POINTS {
            return Err(OctalError::OutOfRange {
                name: "waveform length".to_string(),
                value: values.len() as f64,
                min: 1.0,
                max: MAX_ARB_POINTS as f64,
            });
        }
        for v in values {
            check_range("waveform value", *v, -1.0, 1.0)?;
        }
        let scaled: Vec<i16> = values
            .iter()
            .map(|v| (v * 32768.0).clamp(i16::MIN as f64, i16::MAX as f64) as i16)
            .collect();
        self.instr
            .write_binary_i16_be(&format!("arb{memchan} "), &scaled)
    }

    pub fn load_arb(&mut self, memchan: u8) -> Result<(), OctalError> {
        self.instr.write(&format!("arbload arb{memchan}"))
    }

    pub fn set_arb_output(&mut self) -> Result<(), OctalError> {
        self.instr.write("wave arb")
    }

    /// Store a flat near-full-scale waveform, used as a DC level.
    pub fn set_arb_dc(&mut self, memchan: u8) -> Result<(), OctalError> {
        self.set_arb_waveform(&[0.999, 0.999], memchan)
    }

    /// Read back waveform memory `memchan`, scaled to [-1, 1].
    pub fn get_arb_waveform(&mut self, memchan: u8) -> Result<Vec<f64>, OctalError> {
        let raw = self
            .instr
            .query_binary_i16_be(&format!("arb{memchan}?"))?;
        Ok(raw.into_iter().map(|v| f64::from(v) / 32768.0).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::encode_block;
    use crate::transport::SimTransport;

    #[test]
    fn test_arb_upload_and_readback() {
        let sim = SimTransport::new("awg").with_responder(|cmd| {
            (cmd == "arb2?").then(|| encode_block(&[0x40, 0x00, 0xc0, 0x00]).into())
        });
        let log = sim.log();
        let mut awg = TtiTGF3162::new(ScpiInstrument::new(Box::new(sim), "SIM::awg"));

        awg.set_arb_waveform(&[0.5, -0.5, 1.0], 2).unwrap();
        let cmds = log.commands();
        // 3 points -> 6 payload bytes
        assert!(cmds[0].starts_with("arb2 #16"));

        assert_eq!(awg.get_arb_waveform(2).unwrap(), vec![0.5, -0.5]);
    }

    #[test]
    fn test_validation() {
        let sim = SimTransport::new("awg");
        let log = sim.log();
        let mut awg = TtiTGF3162::new(ScpiInstrument::new(Box::new(sim), "SIM::awg"));
        assert!(awg.set_output_state("sideways").is_err());
        assert!(awg.select_channel(3).is_err());
        assert!(awg.set_arb_waveform(&[1.5], 1).is_err());
        assert!(awg.set_arb_waveform(&[], 1).is_err());
        assert!(awg.set_arb_waveform(&vec![0.0; MAX_ARB_POINTS + 1], 1).is_err());
        assert!(log.is_empty());

        awg.select_channel(2).unwrap();
        awg.set_output_state("ON").unwrap();
        assert_eq!(log.commands(), vec!["chn 2", "output ON"]);
    }
}
