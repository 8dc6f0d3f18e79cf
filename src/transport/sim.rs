use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use byteorder::{LittleEndian, WriteBytesExt};
use log::debug;
use parking_lot::Mutex;

use super::Transport;
use crate::error::OctalError;
use crate::instrument::encode_block;

/// A reply produced by a simulated instrument.
#[derive(Debug, Clone, PartialEq)]
pub enum SimReply {
    Text(String),
    Bytes(Vec<u8>),
}

impl From<&str> for SimReply {
    fn from(s: &str) -> Self {
        SimReply::Text(s.to_string())
    }
}

impl From<String> for SimReply {
    fn from(s: String) -> Self {
        SimReply::Text(s)
    }
}

impl From<Vec<u8>> for SimReply {
    fn from(bytes: Vec<u8>) -> Self {
        SimReply::Bytes(bytes)
    }
}

type Responder = Box<dyn FnMut(&str) -> Option<SimReply> + Send>;

/// Shared, cloneable record of everything written to a [`SimTransport`].
#[derive(Debug, Clone, Default)]
pub struct CommandLog(Arc<Mutex<Vec<String>>>);

impl CommandLog {
    pub fn push(&self, line: impl Into<String>) {
        self.0.lock().push(line.into());
    }

    pub fn commands(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    pub fn contains(&self, line: &str) -> bool {
        self.0.lock().iter().any(|c| c == line)
    }

    /// Index of the first logged command equal to `line`.
    pub fn position(&self, line: &str) -> Option<usize> {
        self.0.lock().iter().position(|c| c == line)
    }

    /// Number of logged commands equal to `line`.
    pub fn count(&self, line: &str) -> usize {
        self.0.lock().iter().filter(|c| *c == line).count()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// In-process instrument simulator.
///
/// Every line written is recorded in a [`CommandLog`]. Queries (lines that
/// contain `?`) are answered by the responder closure; when it returns `None`
/// the built-in bench defaults are used, so that a whole sweep can be dry-run
/// without hardware.
///
/// ```
/// use rusty_octal::transport::{SimTransport, Transport};
///
/// let mut sim = SimTransport::new("pm").with_responder(|cmd| {
///     (cmd == "measure:current?").then(|| "0.0125".into())
/// });
/// let log = sim.log();
/// sim.write_line("measure:current?")?;
/// assert_eq!(sim.read_line()?, "0.0125");
/// assert!(log.contains("measure:current?"));
/// # Ok::<(), rusty_octal::OctalError>(())
/// ```
pub struct SimTransport {
    name: String,
    log: CommandLog,
    responder: Responder,
    pending: VecDeque<Vec<u8>>,
}

impl SimTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            log: CommandLog::default(),
            responder: Box::new(|_| None),
            pending: VecDeque::new(),
        }
    }

    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: FnMut(&str) -> Option<SimReply> + Send + 'static,
    {
        self.responder = Box::new(responder);
        self
    }

    /// Share an existing log, e.g. to interleave several simulated instruments.
    pub fn with_log(mut self, log: CommandLog) -> Self {
        self.log = log;
        self
    }

    pub fn log(&self) -> CommandLog {
        self.log.clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn answer(&mut self, line: &str) {
        let reply = (self.responder)(line).unwrap_or_else(|| default_reply(&self.name, line));
        let mut bytes = match reply {
            SimReply::Text(text) => text.into_bytes(),
            SimReply::Bytes(bytes) => bytes,
        };
        bytes.push(b'\n');
        self.pending.push_back(bytes);
    }
}

type SharedResponder = Arc<Mutex<dyn FnMut(&str) -> Option<SimReply> + Send>>;

/// A simulated bench: per-address responders and one command log shared by
/// every instrument opened from it.
///
/// Handed to a [`ResourceManager`](super::ResourceManager) so code that opens
/// instruments by address can be dry-run or tested end to end.
#[derive(Clone, Default)]
pub struct SimBench {
    log: CommandLog,
    responders: HashMap<String, SharedResponder>,
}

impl SimBench {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer queries sent to `addr` (canonical resource string).
    pub fn with_responder<F>(mut self, addr: &str, responder: F) -> Self
    where
        F: FnMut(&str) -> Option<SimReply> + Send + 'static,
    {
        self.responders
            .insert(addr.to_ascii_uppercase(), Arc::new(Mutex::new(responder)));
        self
    }

    pub fn log(&self) -> CommandLog {
        self.log.clone()
    }

    /// A transport for `addr` sharing this bench's log.
    pub fn transport(&self, addr: &str) -> SimTransport {
        let sim = SimTransport::new(addr).with_log(self.log.clone());
        match self.responders.get(&addr.to_ascii_uppercase()) {
            Some(responder) => {
                let responder = Arc::clone(responder);
                sim.with_responder(move |cmd| (&mut *responder.lock())(cmd))
            }
            None => sim,
        }
    }
}

impl std::fmt::Debug for SimBench {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimBench")
            .field("log", &self.log)
            .field("responders", &self.responders.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Bench defaults: identification, operation complete, laser tuning limits,
/// supply settings and short data blocks for the lightwave multimeter's
/// logging queries. Everything else reads `0`.
fn default_reply(name: &str, line: &str) -> SimReply {
    let lower = line.to_ascii_lowercase();
    if lower.starts_with("*idn?") {
        return SimReply::Text(format!("SIM,{name},0,0"));
    }
    if lower.starts_with("*opc?") {
        return SimReply::Text("1".to_string());
    }
    if lower.ends_with("wavelength? min") {
        return SimReply::Text("1.46E-06".to_string());
    }
    if lower.ends_with("wavelength? max") {
        return SimReply::Text("1.64E-06".to_string());
    }
    if lower == "apply?" {
        return SimReply::Text("\"0.000000,0.000000\"".to_string());
    }
    if lower.contains("readout:data?") {
        let mut payload = Vec::new();
        for i in 0..3 {
            let _ = payload.write_f64::<LittleEndian>(1550e-9 + i as f64 * 1e-9);
        }
        return SimReply::Bytes(encode_block(&payload));
    }
    if lower.contains("function:result?") {
        let mut payload = Vec::new();
        for _ in 0..3 {
            let _ = payload.write_f32::<LittleEndian>(1e-3);
        }
        return SimReply::Bytes(encode_block(&payload));
    }
    SimReply::Text("0".to_string())
}

impl Transport for SimTransport {
    fn write_line(&mut self, line: &str) -> Result<(), OctalError> {
        debug!("[{}] <- {}", self.name, line);
        self.log.push(line);
        if line.contains('?') {
            self.answer(line);
        }
        Ok(())
    }

    fn read_line(&mut self) -> Result<String, OctalError> {
        let raw = self.read_raw()?;
        let line = String::from_utf8_lossy(&raw);
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<(), OctalError> {
        let line = String::from_utf8_lossy(bytes);
        let line = line.trim_end_matches(['\r', '\n']);
        debug!("[{}] <- {} raw bytes", self.name, bytes.len());
        self.log.push(line);
        Ok(())
    }

    fn read_raw(&mut self) -> Result<Vec<u8>, OctalError> {
        self.pending.pop_front().ok_or(OctalError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unanswered_read_times_out() {
        let mut sim = SimTransport::new("x");
        sim.write_line("output 1").unwrap();
        assert!(matches!(sim.read_line(), Err(OctalError::Timeout)));
    }

    #[test]
    fn test_default_replies() {
        let mut sim = SimTransport::new("mm");
        sim.write_line("*IDN?").unwrap();
        assert_eq!(sim.read_line().unwrap(), "SIM,mm,0,0");
        sim.write_line("sense1:channel1:power:atime?").unwrap();
        assert_eq!(sim.read_line().unwrap(), "0");
    }

    #[test]
    fn test_shared_log_orders_commands() {
        let log = CommandLog::default();
        let mut a = SimTransport::new("a").with_log(log.clone());
        let mut b = SimTransport::new("b").with_log(log.clone());
        a.write_line("voltage 1").unwrap();
        b.write_line("read?").unwrap();
        a.write_line("voltage 2").unwrap();
        assert_eq!(log.commands(), vec!["voltage 1", "read?", "voltage 2"]);
        assert_eq!(log.position("voltage 2"), Some(2));
    }

    #[test]
    fn test_bench_routes_responders_by_address() {
        let bench = SimBench::new().with_responder("GPIB0::4::INSTR", |cmd| {
            (cmd == "measure:current?").then(|| "0.5".into())
        });
        let mut source = bench.transport("GPIB0::4::INSTR");
        let mut other = bench.transport("GPIB0::5::INSTR");

        source.write_line("measure:current?").unwrap();
        assert_eq!(source.read_line().unwrap(), "0.5");
        other.write_line("measure:current?").unwrap();
        assert_eq!(other.read_line().unwrap(), "0");
        assert_eq!(bench.log().count("measure:current?"), 2);
    }
}
