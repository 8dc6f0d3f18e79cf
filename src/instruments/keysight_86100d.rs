use crate::error::OctalError;
use crate::instrument::{check_choice, check_range, ScpiInstrument};
use crate::transport::ResourceManager;

const BEST_MODES: &[&str] = &["thr", "flat"];
const BANDWIDTHS: &[&str] = &["high", "mid", "low"];
const CONNECTORS: &[&str] = &["a", "b"];
const LBW_MODES: &[&str] = &["fixed", "fix", "rdependent", "rdep"];
const CLOCK_INPUTS: &[&str] = &[
    "electrical",
    "elec",
    "optical",
    "opt",
    "differential",
    "diff",
    "einverted",
    "einv",
    "auxiliary",
    "aux",
];

/// Keysight 86100D wide-bandwidth sampling oscilloscope (DCA-X).
///
/// Commands are routed to one input channel and one clock recovery module,
/// both chosen when the driver is created.
pub struct Keysight86100D {
    instr: ScpiInstrument,
    channel: String,
    clock: String,
}

impl Keysight86100D {
    pub fn new(instr: ScpiInstrument, chan: u8, clk_num: u8) -> Self {
        Self {
            instr,
            channel: format!("channel{chan}"),
            clock: format!("crecovery{clk_num}"),
        }
    }

    pub fn open(rm: &ResourceManager, addr: &str, chan: u8, clk_num: u8) -> Result<Self, OctalError> {
        Ok(Self::new(ScpiInstrument::open(rm, addr)?, chan, clk_num))
    }

    // Acquisition

    pub fn set_acq_avg_state(&mut self, on: bool) -> Result<(), OctalError> {
        self.instr.write(&format!("acquire:average {}", u8::from(on)))
    }

    pub fn set_acq_best(&mut self, opt: &str) -> Result<(), OctalError> {
        check_choice("acquire best", opt, BEST_MODES)?;
        self.instr.write(&format!("acquire:best {opt}"))
    }

    pub fn set_acq_count(&mut self, count: u32) -> Result<(), OctalError> {
        check_range("acquire count", count.into(), 1.0, 4096.0)?;
        self.instr.write(&format!("acquire:count {count}"))
    }

    // Channel

    pub fn set_chan_bandwidth(&mut self, setting: &str) -> Result<(), OctalError> {
        check_choice("bandwidth", setting, BANDWIDTHS)?;
        let cmd = format!("{}:bandwidth {setting}", self.channel);
        self.instr.write(&cmd)
    }

    pub fn set_chan_connector(&mut self, connector: &str) -> Result<(), OctalError> {
        check_choice("connector", connector, CONNECTORS)?;
        let cmd = format!("{}:connector {connector}", self.channel);
        self.instr.write(&cmd)
    }

    /// User-defined channel wavelength [nm]; the instrument takes meters.
    pub fn set_chan_wavelength(&mut self, wavelength: f64) -> Result<(), OctalError> {
        let cmd = format!("{}:wavelength {:e}", self.channel, wavelength * 1e-9);
        self.instr.write(&cmd)
    }

    // Clock recovery

    pub fn set_clk_arelock(&mut self, on: bool) -> Result<(), OctalError> {
        let cmd = format!("{}:arelock {}", self.clock, u8::from(on));
        self.instr.write(&cmd)
    }

    pub fn set_clk_arelock_cancel(&mut self) -> Result<(), OctalError> {
        let cmd = format!("{}:arelock:cancel", self.clock);
        self.instr.write(&cmd)
    }

    pub fn set_clk_lbwmode(&mut self, mode: &str) -> Result<(), OctalError> {
        check_choice("loop bandwidth mode", mode, LBW_MODES)?;
        let cmd = format!("{}:lbwmode {mode}", self.clock);
        self.instr.write(&cmd)
    }

    /// Loop bandwidth [Hz]. Requires the loop bandwidth mode to be fixed.
    pub fn set_clk_clbandwidth(&mut self, bandwidth: f64) -> Result<(), OctalError> {
        check_range("clock loop bandwidth", bandwidth, 30e3, 20e6)?;
        let cmd = format!("{}:clbandwidth {bandwidth}", self.clock);
        self.instr.write(&cmd)
    }

    pub fn set_clk_crate(&mut self, rate: f64) -> Result<(), OctalError> {
        let cmd = format!("{}:crate {rate}", self.clock);
        self.instr.write(&cmd)
    }

    pub fn set_clk_input_type(&mut self, kind: &str) -> Result<(), OctalError> {
        check_choice("clock input", kind, CLOCK_INPUTS)?;
        let cmd = format!("{}:input {kind}", self.clock);
        self.instr.write(&cmd)
    }

    pub fn set_clk_odratio(&mut self, ratio: &str) -> Result<(), OctalError> {
        let cmd = format!("{}:odratio {ratio}", self.clock);
        self.instr.write(&cmd)
    }

    pub fn set_clk_autoodratio_state(&mut self, on: bool) -> Result<(), OctalError> {
        let cmd = format!("{}:odratio:auto {}", self.clock, u8::from(on));
        self.instr.write(&cmd)
    }

    pub fn get_clk_arelock_state(&mut self) -> Result<String, OctalError> {
        let cmd = format!("{}:state?", self.clock);
        self.instr.query(&cmd)
    }

    pub fn get_clk_freq(&mut self) -> Result<f64, OctalError> {
        let cmd = format!("{}:cfrequency?", self.clock);
        self.instr.query_float(&cmd)
    }

    pub fn get_clk_clbandwidth(&mut self) -> Result<f64, OctalError> {
        let cmd = format!("{}:clbandwidth?", self.clock);
        self.instr.query_float(&cmd)
    }

    /// Whether a signal is present at the given receiver.
    pub fn get_clk_spresent(&mut self, receiver: u8) -> Result<bool, OctalError> {
        let cmd = format!("{}:spresent? receiver{receiver}", self.clock);
        self.instr.query_bool(&cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SimTransport;

    #[test]
    fn test_channel_and_clock_routing() {
        let sim = SimTransport::new("dca").with_responder(|cmd| {
            (cmd == "crecovery2:spresent? receiver1").then(|| "1".into())
        });
        let log = sim.log();
        let mut dca = Keysight86100D::new(ScpiInstrument::new(Box::new(sim), "SIM::dca"), 3, 2);

        dca.set_chan_bandwidth("HIGH").unwrap();
        dca.set_clk_lbwmode("fixed").unwrap();
        dca.set_clk_clbandwidth(4e6).unwrap();
        assert!(dca.get_clk_spresent(1).unwrap());

        assert_eq!(
            log.commands(),
            vec![
                "channel3:bandwidth HIGH",
                "crecovery2:lbwmode fixed",
                "crecovery2:clbandwidth 4000000",
                "crecovery2:spresent? receiver1",
            ]
        );
    }

    #[test]
    fn test_rejects_out_of_range() {
        let sim = SimTransport::new("dca");
        let log = sim.log();
        let mut dca = Keysight86100D::new(ScpiInstrument::new(Box::new(sim), "SIM::dca"), 1, 1);
        assert!(dca.set_acq_count(0).is_err());
        assert!(dca.set_acq_count(5000).is_err());
        assert!(dca.set_clk_clbandwidth(10.0).is_err());
        assert!(dca.set_clk_input_type("wireless").is_err());
        assert!(log.is_empty());
    }
}
