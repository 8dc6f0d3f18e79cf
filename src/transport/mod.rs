pub mod address;
pub mod sim;
pub mod tcp;
#[cfg(feature = "visa")]
pub mod visa;

use log::debug;

use crate::error::OctalError;

pub use address::{ResourceAddress, DEFAULT_SCPI_PORT};
pub use sim::{CommandLog, SimBench, SimReply, SimTransport};
pub use tcp::{ConnectionConfig, TcpTransport, TcpTransportBuilder};
#[cfg(feature = "visa")]
pub use visa::VisaTransport;

/// Byte-level link to a single instrument.
///
/// Drivers never talk to a socket or a VISA session directly; they go through
/// this trait so that every instrument can be replaced by a [`SimTransport`]
/// in tests and dry runs.
pub trait Transport: Send {
    /// Write one command, appending the line terminator.
    fn write_line(&mut self, line: &str) -> Result<(), OctalError>;

    /// Read one response line with the terminator stripped.
    fn read_line(&mut self) -> Result<String, OctalError>;

    /// Write raw bytes (binary blocks). No terminator is appended.
    fn write_raw(&mut self, bytes: &[u8]) -> Result<(), OctalError>;

    /// Read one complete raw response, terminator included.
    fn read_raw(&mut self) -> Result<Vec<u8>, OctalError>;
}

/// Opens transports for resource addresses.
///
/// Mirrors a VISA resource manager: raw sockets are opened natively, `SIM::`
/// resources get an in-process simulator and everything else is handed to the
/// system VISA library when the `visa` feature is enabled.
#[derive(Debug, Clone, Default)]
pub struct ResourceManager {
    config: ConnectionConfig,
    bench: Option<SimBench>,
}

impl ResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Open every resource as a simulator, regardless of its address.
    pub fn simulated(mut self, simulate: bool) -> Self {
        self.bench = simulate.then(SimBench::default);
        self
    }

    /// Open every resource from `bench`.
    pub fn with_bench(mut self, bench: SimBench) -> Self {
        self.bench = Some(bench);
        self
    }

    pub fn is_simulated(&self) -> bool {
        self.bench.is_some()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Parse `addr` and open a transport for it.
    pub fn open_str(&self, addr: &str) -> Result<Box<dyn Transport>, OctalError> {
        self.open(&addr.parse()?)
    }

    pub fn open(&self, addr: &ResourceAddress) -> Result<Box<dyn Transport>, OctalError> {
        debug!("Opening resource {addr}");

        if let Some(bench) = &self.bench {
            return Ok(Box::new(bench.transport(&addr.to_string())));
        }

        match addr {
            ResourceAddress::Sim { name } => Ok(Box::new(SimTransport::new(name.clone()))),
            ResourceAddress::TcpSocket { host, port, .. } => Ok(Box::new(
                TcpTransport::builder()
                    .address(host)
                    .port(*port)
                    .config(self.config.clone())
                    .build()?,
            )),
            _ => self.open_visa(addr),
        }
    }

    #[cfg(feature = "visa")]
    fn open_visa(&self, addr: &ResourceAddress) -> Result<Box<dyn Transport>, OctalError> {
        Ok(Box::new(VisaTransport::open(
            &addr.to_string(),
            self.config.read_timeout,
        )?))
    }

    #[cfg(not(feature = "visa"))]
    fn open_visa(&self, addr: &ResourceAddress) -> Result<Box<dyn Transport>, OctalError> {
        Err(OctalError::Transport(format!(
            "{addr} requires a VISA library; rebuild with `--features visa`"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_manager_opens_anything() {
        let rm = ResourceManager::new().simulated(true);
        let mut transport = rm.open_str("GPIB0::5::INSTR").unwrap();
        transport.write_line("*RST").unwrap();
    }

    #[test]
    fn test_sim_address_opens_simulator() {
        let rm = ResourceManager::new();
        assert!(rm.open_str("SIM::pm").is_ok());
    }

    #[cfg(not(feature = "visa"))]
    #[test]
    fn test_gpib_without_visa_is_an_error() {
        let rm = ResourceManager::new();
        assert!(matches!(
            rm.open_str("GPIB0::5::INSTR"),
            Err(OctalError::Transport(_))
        ));
    }
}
