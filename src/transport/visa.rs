use std::ffi::CString;
use std::io::{Read, Write};
use std::time::Duration;

use log::debug;
use visa_rs::prelude::*;

use super::Transport;
use crate::error::OctalError;
use crate::instrument::block_len;

fn visa_err(e: visa_rs::Error) -> OctalError {
    OctalError::Transport(e.to_string())
}

fn io_err(e: std::io::Error) -> OctalError {
    match e.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => OctalError::Timeout,
        _ => OctalError::io(e, "VISA I/O"),
    }
}

/// Session on the system VISA library (GPIB, VXI-11, HiSLIP, serial).
pub struct VisaTransport {
    // Sessions are closed when the manager is dropped, so keep it alive.
    _rm: DefaultRM,
    instr: Instrument,
    resource: String,
}

impl VisaTransport {
    pub fn open(resource: &str, timeout: Duration) -> Result<Self, OctalError> {
        let rm = DefaultRM::new().map_err(visa_err)?;
        let name = CString::new(resource)
            .map_err(|_| OctalError::InvalidAddress(resource.to_string()))?;
        let instr = rm
            .open(&name.into(), AccessMode::NO_LOCK, timeout)
            .map_err(visa_err)?;
        debug!("VISA session opened for {resource}");
        Ok(Self {
            _rm: rm,
            instr,
            resource: resource.to_string(),
        })
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }
}

impl Transport for VisaTransport {
    fn write_line(&mut self, line: &str) -> Result<(), OctalError> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        self.write_raw(&bytes)
    }

    fn read_line(&mut self) -> Result<String, OctalError> {
        let raw = self.read_raw()?;
        let line = String::from_utf8_lossy(&raw);
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<(), OctalError> {
        self.instr.write_all(bytes).map_err(io_err)
    }

    fn read_raw(&mut self) -> Result<Vec<u8>, OctalError> {
        let mut buf = Vec::new();
        let mut chunk = vec![0u8; 64 * 1024];
        loop {
            let n = (&self.instr).read(&mut chunk).map_err(io_err)?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let complete = match block_len(&buf) {
                Some(total) => buf.len() > total,
                None => buf.ends_with(b"\n"),
            };
            if complete {
                break;
            }
        }
        Ok(buf)
    }
}
