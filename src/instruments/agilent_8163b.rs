use crate::error::OctalError;
use crate::instrument::{check_choice, check_range, ScpiInstrument};
use crate::transport::ResourceManager;

const UNITS: &[&str] = &["dBm", "Watt", "W"];
const TRIG_INPUTS: &[&str] = &["ignored", "smeasure", "cmeasure", "nextstep", "swstart", "pmeasure"];
const TRIG_OUTPUTS: &[&str] = &[
    "disabled",
    "avgover",
    "measure",
    "modulation",
    "stfinished",
    "swfinished",
    "swstarted",
];
const SWEEP_MODES: &[&str] = &["step", "manual", "continuous"];
const REPEAT_MODES: &[&str] = &["oneway", "twoway"];
const SWEEP_STATES: &[&str] = &["stop", "start", "pause", "continue"];
const FUNC_MODES: &[&str] = &["logging", "stability", "mminmax"];
const FUNC_ACTIONS: &[&str] = &["start", "stop"];

/// Module slot and channel inside the mainframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub num: u8,
    pub chan: u8,
}

impl Slot {
    pub const fn new(num: u8, chan: u8) -> Self {
        Self { num, chan }
    }
}

/// Agilent/Keysight 8163B / 8164B lightwave multimeter with a tunable laser
/// source module and an optical power sensor module.
///
/// Wavelengths are given in nm throughout; the mainframe works in metres.
pub struct Agilent8163B {
    instr: ScpiInstrument,
    src: Slot,
    sens: Slot,
}

impl Agilent8163B {
    pub const DEFAULT_ADDR: &'static str = "GPIB0::20::INSTR";

    pub fn new(instr: ScpiInstrument) -> Self {
        Self {
            instr,
            src: Slot::new(1, 1),
            sens: Slot::new(1, 1),
        }
    }

    pub fn open(rm: &ResourceManager, addr: &str) -> Result<Self, OctalError> {
        Ok(Self::new(ScpiInstrument::open(rm, addr)?))
    }

    pub fn with_source(mut self, num: u8, chan: u8) -> Self {
        self.src = Slot::new(num, chan);
        self
    }

    pub fn with_sensor(mut self, num: u8, chan: u8) -> Self {
        self.sens = Slot::new(num, chan);
        self
    }

    pub fn instrument(&mut self) -> &mut ScpiInstrument {
        &mut self.instr
    }

    fn source(&self) -> String {
        format!("source{}:channel{}", self.src.num, self.src.chan)
    }

    fn sense(&self) -> String {
        format!("sense{}:channel{}", self.sens.num, self.sens.chan)
    }

    /// Prepare laser and detector for a fixed-wavelength measurement.
    pub fn setup(
        &mut self,
        reset: bool,
        wavelength: f64,
        power: f64,
        period: f64,
    ) -> Result<(), OctalError> {
        if reset {
            self.instr.reset()?;
        }
        self.set_unit("dBm", "Watt")?;
        self.set_laser_wav(wavelength)?;
        self.set_laser_pow(power)?;
        self.set_laser_state(true)?;
        self.set_detect_wav(wavelength)?;
        self.set_detect_avgtime(period)?;
        self.set_detect_autorange(true)
    }

    pub fn set_display_lockout(&mut self, locked: bool) -> Result<(), OctalError> {
        self.instr
            .write(&format!("display:lockout {}", u8::from(locked)))
    }

    /// Set source and sensor power units (`dBm` or `Watt`).
    pub fn set_unit(&mut self, source: &str, sensor: &str) -> Result<(), OctalError> {
        check_choice("source unit", source, UNITS)?;
        check_choice("sensor unit", sensor, UNITS)?;
        let cmd = format!("{}:power:unit {source}", self.source());
        self.instr.write(&cmd)?;
        let cmd = format!("{}:power:unit {sensor}", self.sense());
        self.instr.write(&cmd)
    }

    // Laser source

    /// Laser output power [dBm].
    pub fn set_laser_pow(&mut self, power: f64) -> Result<(), OctalError> {
        let cmd = format!("{}:power:level:immediate:amplitude {power}dBm", self.source());
        self.instr.write(&cmd)
    }

    /// Laser wavelength [nm].
    pub fn set_laser_wav(&mut self, wavelength: f64) -> Result<(), OctalError> {
        let cmd = format!("{}:wavelength {wavelength}nm", self.source());
        self.instr.write(&cmd)
    }

    pub fn set_laser_state(&mut self, on: bool) -> Result<(), OctalError> {
        let cmd = format!("{}:power:state {}", self.source(), u8::from(on));
        self.instr.write(&cmd)
    }

    /// Shortest wavelength the laser can reach [nm].
    pub fn get_laser_wav_min(&mut self) -> Result<f64, OctalError> {
        let cmd = format!("{}:wavelength? min", self.source());
        Ok(self.instr.query_float(&cmd)? * 1e9)
    }

    /// Longest wavelength the laser can reach [nm].
    pub fn get_laser_wav_max(&mut self) -> Result<f64, OctalError> {
        let cmd = format!("{}:wavelength? max", self.source());
        Ok(self.instr.query_float(&cmd)? * 1e9)
    }

    /// Wavelengths [nm] logged during the last lambda-logging sweep.
    pub fn get_laser_data(&mut self) -> Result<Vec<f64>, OctalError> {
        let cmd = format!("{}:readout:data? llogging", self.source());
        let meters = self.instr.query_binary_f64(&cmd)?;
        Ok(meters.into_iter().map(|m| m * 1e9).collect())
    }

    // Detector

    /// Detector calibration wavelength [nm].
    pub fn set_detect_wav(&mut self, wavelength: f64) -> Result<(), OctalError> {
        let cmd = format!("{}:power:wavelength {wavelength}nm", self.sense());
        self.instr.write(&cmd)
    }

    /// Detector averaging time [s].
    pub fn set_detect_avgtime(&mut self, period: f64) -> Result<(), OctalError> {
        check_range("averaging time", period, 0.0, 10.0)?;
        let cmd = format!("{}:power:atime {period}s", self.sense());
        self.instr.write(&cmd)
    }

    pub fn set_detect_autorange(&mut self, auto: bool) -> Result<(), OctalError> {
        let cmd = format!("{}:power:range:auto {}", self.sense(), u8::from(auto));
        self.instr.write(&cmd)
    }

    /// Manual power range [dBm], in 10 dB steps.
    pub fn set_detect_prange(&mut self, range: f64) -> Result<(), OctalError> {
        check_range("power range", range, -70.0, 10.0)?;
        let cmd = format!("{}:power:range {range}dBm", self.sense());
        self.instr.write(&cmd)
    }

    /// Calibration offset [dB].
    pub fn set_detect_calibration_val(&mut self, value: f64) -> Result<(), OctalError> {
        let cmd = format!("{}:correction {value}dB", self.sense());
        self.instr.write(&cmd)
    }

    /// Single detector reading in the sensor unit.
    pub fn get_detect_pow(&mut self) -> Result<f64, OctalError> {
        let cmd = format!("read{}:channel{}:power?", self.sens.num, self.sens.chan);
        self.instr.query_float(&cmd)
    }

    /// Number of triggers the laser will emit for the configured sweep.
    pub fn get_detect_trigno(&mut self) -> Result<u32, OctalError> {
        let cmd = format!("{}:wavelength:sweep:exp?", self.source());
        let count = self.instr.query_float(&cmd)?;
        if count < 0.0 || count.fract() != 0.0 {
            return Err(OctalError::Parse(format!("Invalid trigger count {count}")));
        }
        Ok(count as u32)
    }

    // Triggers

    /// Mainframe trigger configuration: 0 disabled, 1 default, 2 passthrough,
    /// 3 loopback, 4 multiple loopback.
    pub fn set_trig_config(&mut self, config: u8) -> Result<(), OctalError> {
        check_range("trigger configuration", config.into(), 0.0, 4.0)?;
        self.instr.write(&format!("trigger:configuration {config}"))
    }

    pub fn set_laser_trig_response(&mut self, input: &str, output: &str) -> Result<(), OctalError> {
        let (num, chan) = (self.src.num, self.src.chan);
        self.set_trig_response(num, chan, input, output)
    }

    pub fn set_detect_trig_response(&mut self, input: &str, output: &str) -> Result<(), OctalError> {
        let (num, chan) = (self.sens.num, self.sens.chan);
        self.set_trig_response(num, chan, input, output)
    }

    fn set_trig_response(
        &mut self,
        num: u8,
        chan: u8,
        input: &str,
        output: &str,
    ) -> Result<(), OctalError> {
        check_choice("trigger input", input, TRIG_INPUTS)?;
        check_choice("trigger output", output, TRIG_OUTPUTS)?;
        self.instr
            .write(&format!("trigger{num}:channel{chan}:input {input}"))?;
        self.instr
            .write(&format!("trigger{num}:channel{chan}:output {output}"))
    }

    // Wavelength sweep

    pub fn set_sweep_mode(&mut self, mode: &str) -> Result<(), OctalError> {
        check_choice("sweep mode", mode, SWEEP_MODES)?;
        let cmd = format!("{}:wavelength:sweep:mode {mode}", self.source());
        self.instr.write(&cmd)
    }

    pub fn set_sweep_repeat_mode(&mut self, mode: &str) -> Result<(), OctalError> {
        check_choice("repeat mode", mode, REPEAT_MODES)?;
        let cmd = format!("{}:wavelength:sweep:repeat {mode}", self.source());
        self.instr.write(&cmd)
    }

    pub fn set_sweep_cycles(&mut self, cycles: u32) -> Result<(), OctalError> {
        let cmd = format!("{}:wavelength:sweep:cycles {cycles}", self.source());
        self.instr.write(&cmd)
    }

    /// Dwell time per step [s].
    pub fn set_sweep_tdwell(&mut self, time: f64) -> Result<(), OctalError> {
        let cmd = format!("{}:wavelength:sweep:dwell {time}s", self.source());
        self.instr.write(&cmd)
    }

    /// Sweep start and stop wavelengths [nm].
    pub fn set_sweep_start_stop(&mut self, start: f64, stop: f64) -> Result<(), OctalError> {
        if start >= stop {
            return Err(OctalError::OutOfRange {
                name: "sweep start".to_string(),
                value: start,
                min: f64::NEG_INFINITY,
                max: stop,
            });
        }
        let src = self.source();
        self.instr
            .write(&format!("{src}:wavelength:sweep:start {start}nm"))?;
        self.instr
            .write(&format!("{src}:wavelength:sweep:stop {stop}nm"))
    }

    /// Sweep step [nm].
    pub fn set_sweep_step(&mut self, step: f64) -> Result<(), OctalError> {
        let cmd = format!("{}:wavelength:sweep:step {step}nm", self.source());
        self.instr.write(&cmd)
    }

    /// Continuous sweep speed [nm/s].
    pub fn set_sweep_speed(&mut self, speed: f64) -> Result<(), OctalError> {
        check_range("sweep speed", speed, 0.5, 200.0)?;
        let cmd = format!("{}:wavelength:sweep:speed {speed}nm/s", self.source());
        self.instr.write(&cmd)
    }

    /// Enable lambda logging so swept wavelengths can be read back.
    pub fn set_sweep_llog(&mut self, on: bool) -> Result<(), OctalError> {
        let cmd = format!("{}:wavelength:sweep:llogging {}", self.source(), u8::from(on));
        self.instr.write(&cmd)
    }

    pub fn set_sweep_state(&mut self, state: &str) -> Result<(), OctalError> {
        check_choice("sweep state", state, SWEEP_STATES)?;
        let cmd = format!("{}:wavelength:sweep:state {state}", self.source());
        self.instr.write(&cmd)
    }

    /// Whether a sweep is still running.
    pub fn get_sweep_state(&mut self) -> Result<bool, OctalError> {
        let cmd = format!("{}:wavelength:sweep:state?", self.source());
        Ok(self.instr.query_float(&cmd)? != 0.0)
    }

    // Detector functions (logging)

    /// `(mode, action)`, e.g. `("logging", "start")`.
    pub fn set_detect_func_mode(&mut self, mode: (&str, &str)) -> Result<(), OctalError> {
        check_choice("function mode", mode.0, FUNC_MODES)?;
        check_choice("function action", mode.1, FUNC_ACTIONS)?;
        let cmd = format!("{}:function:state {},{}", self.sense(), mode.0, mode.1);
        self.instr.write(&cmd)
    }

    /// `(data points, averaging time [s])` for the given function.
    pub fn set_detect_func_params(&mut self, mode: &str, params: (u32, f64)) -> Result<(), OctalError> {
        check_choice("function mode", mode, FUNC_MODES)?;
        let cmd = format!(
            "{}:function:parameter:{mode} {},{}s",
            self.sense(),
            params.0,
            params.1
        );
        self.instr.write(&cmd)
    }

    /// Raw function status, e.g. `LOGGING_STABILITY,PROGRESS`.
    pub fn get_detect_func_status(&mut self) -> Result<String, OctalError> {
        let cmd = format!("{}:function:state?", self.sense());
        self.instr.query(&cmd)
    }

    /// Powers recorded by the last logging function run.
    pub fn get_detect_func_result(&mut self) -> Result<Vec<f64>, OctalError> {
        let cmd = format!("{}:function:result?", self.sense());
        let values = self.instr.query_binary_f32(&cmd)?;
        Ok(values.into_iter().map(f64::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::encode_block;
    use crate::transport::SimTransport;
    use byteorder::{LittleEndian, WriteBytesExt};

    fn open(sim: SimTransport) -> Agilent8163B {
        Agilent8163B::new(ScpiInstrument::new(Box::new(sim), "SIM::mm"))
    }

    #[test]
    fn test_setup_sequence() {
        let sim = SimTransport::new("mm");
        let log = sim.log();
        let mut mm = open(sim).with_source(0, 1).with_sensor(2, 1);
        mm.setup(true, 1550.0, 10.0, 0.2).unwrap();

        let cmds = log.commands();
        assert_eq!(cmds[0], "*RST");
        assert!(cmds.contains(&"source0:channel1:power:unit dBm".to_string()));
        assert!(cmds.contains(&"sense2:channel1:power:unit Watt".to_string()));
        assert!(cmds.contains(&"source0:channel1:power:state 1".to_string()));
        assert!(cmds.contains(&"sense2:channel1:power:atime 0.2s".to_string()));
        assert_eq!(cmds.last().unwrap(), "sense2:channel1:power:range:auto 1");
    }

    #[test]
    fn test_invalid_keywords_send_nothing() {
        let sim = SimTransport::new("mm");
        let log = sim.log();
        let mut mm = open(sim);
        assert!(mm.set_sweep_mode("sideways").is_err());
        assert!(mm.set_laser_trig_response("ignored", "everything").is_err());
        assert!(mm.set_trig_config(5).is_err());
        assert!(mm.set_sweep_start_stop(1570.0, 1540.0).is_err());
        assert!(log.is_empty());
    }

    #[test]
    fn test_logging_data() {
        let sim = SimTransport::new("mm").with_responder(|cmd| {
            if cmd.ends_with("readout:data? llogging") {
                let mut payload = Vec::new();
                payload.write_f64::<LittleEndian>(1540e-9).unwrap();
                payload.write_f64::<LittleEndian>(1545e-9).unwrap();
                Some(encode_block(&payload).into())
            } else if cmd.ends_with("function:result?") {
                let mut payload = Vec::new();
                payload.write_f32::<LittleEndian>(0.25).unwrap();
                payload.write_f32::<LittleEndian>(0.5).unwrap();
                Some(encode_block(&payload).into())
            } else if cmd.ends_with("sweep:exp?") {
                Some("+2".into())
            } else {
                None
            }
        });
        let mut mm = open(sim);
        let wavelengths = mm.get_laser_data().unwrap();
        assert_eq!(wavelengths.len(), 2);
        assert!((wavelengths[0] - 1540.0).abs() < 1e-6);
        assert!((wavelengths[1] - 1545.0).abs() < 1e-6);
        assert_eq!(mm.get_detect_func_result().unwrap(), vec![0.25, 0.5]);
        assert_eq!(mm.get_detect_trigno().unwrap(), 2);
    }
}
