use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::{debug, warn};

use super::{Transport, DEFAULT_SCPI_PORT};
use crate::error::OctalError;

/// Connection configuration for raw SCPI sockets.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use rusty_octal::ConnectionConfig;
///
/// let config = ConnectionConfig {
///     connect_timeout: Duration::from_secs(30),
///     ..Default::default()
/// };
/// assert_eq!(config.read_timeout, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConnectionConfig {
    /// Timeout for establishing the TCP connection
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
    /// Timeout for a single response line
    #[serde(with = "duration_secs")]
    pub read_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub write_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
        }
    }
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !(secs.is_finite() && secs >= 0.0) {
            return Err(serde::de::Error::custom("duration must be a non-negative number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

/// Builder for [`TcpTransport`].
#[derive(Default)]
pub struct TcpTransportBuilder {
    address: Option<String>,
    port: Option<u16>,
    config: ConnectionConfig,
}

impl TcpTransportBuilder {
    pub fn address(mut self, addr: &str) -> Self {
        self.address = Some(addr.to_string());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<TcpTransport, OctalError> {
        let address = self
            .address
            .ok_or_else(|| OctalError::InvalidAddress("Address must be specified".to_string()))?;
        let port = self.port.unwrap_or(DEFAULT_SCPI_PORT);

        let socket_addr = (address.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| OctalError::io(e, format!("Resolving {address}")))?
            .next()
            .ok_or_else(|| OctalError::InvalidAddress(address.clone()))?;

        debug!("Connecting to {socket_addr}");

        let stream = TcpStream::connect_timeout(&socket_addr, self.config.connect_timeout)
            .map_err(|e| {
                warn!("Failed to connect to {socket_addr}: {e}");
                if e.kind() == std::io::ErrorKind::TimedOut {
                    OctalError::Timeout
                } else {
                    OctalError::io(e, format!("Failed to connect to {socket_addr}"))
                }
            })?;

        stream.set_read_timeout(Some(self.config.read_timeout))?;
        stream.set_write_timeout(Some(self.config.write_timeout))?;
        stream.set_nodelay(true)?;

        let reader = BufReader::new(
            stream
                .try_clone()
                .map_err(|e| OctalError::io(e, "Cloning socket for reading"))?,
        );

        Ok(TcpTransport {
            stream,
            reader,
            peer: format!("{address}:{port}"),
        })
    }
}

/// LF-terminated SCPI over a raw TCP socket (port 5025 on most LAN instruments).
pub struct TcpTransport {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    peer: String,
}

impl TcpTransport {
    pub fn builder() -> TcpTransportBuilder {
        TcpTransportBuilder::default()
    }

    pub fn connect(addr: &str, port: u16) -> Result<Self, OctalError> {
        Self::builder().address(addr).port(port).build()
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

impl Transport for TcpTransport {
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
        self.stream
            .write_all(bytes)
            .and_then(|_| self.stream.flush())
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                    OctalError::Timeout
                }
                _ => OctalError::io(e, format!("Writing to {}", self.peer)),
            })
    }

    fn read_raw(&mut self) -> Result<Vec<u8>, OctalError> {
        let peer = self.peer.clone();
        let map_err = |e: std::io::Error| match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => OctalError::Timeout,
            _ => OctalError::io(e, format!("Reading from {peer}")),
        };

        let mut buf = Vec::new();
        let first = self.reader.fill_buf().map_err(map_err)?.first().copied();
        match first {
            None => {
                return Err(OctalError::io(
                    std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
                    format!("{} closed the connection", self.peer),
                ));
            }
            // Definite-length blocks may carry LF bytes inside the payload
            Some(b'#') => {
                let mut head = [0u8; 2];
                self.reader.read_exact(&mut head).map_err(map_err)?;
                buf.extend_from_slice(&head);
                let digits = (head[1] as char)
                    .to_digit(10)
                    .ok_or_else(|| OctalError::Parse("Malformed block header".to_string()))?
                    as usize;
                if digits > 0 {
                    let mut len_field = vec![0u8; digits];
                    self.reader.read_exact(&mut len_field).map_err(map_err)?;
                    let len: usize = std::str::from_utf8(&len_field)
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| OctalError::Parse("Malformed block length".to_string()))?;
                    buf.extend_from_slice(&len_field);
                    let start = buf.len();
                    buf.resize(start + len, 0);
                    self.reader.read_exact(&mut buf[start..]).map_err(map_err)?;
                }
                self.reader.read_until(b'\n', &mut buf).map_err(map_err)?;
            }
            Some(_) => {
                self.reader.read_until(b'\n', &mut buf).map_err(map_err)?;
            }
        }
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{encode_block, ScpiInstrument};
    use byteorder::{LittleEndian, WriteBytesExt};
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_query_over_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            assert_eq!(line, "*IDN?\n");
            writer.write_all(b"Agilent Technologies,E3640A,0,1.0\r\n").unwrap();
        });

        let mut transport = TcpTransport::connect("127.0.0.1", port).unwrap();
        transport.write_line("*IDN?").unwrap();
        let reply = transport.read_line().unwrap();
        assert_eq!(reply, "Agilent Technologies,E3640A,0,1.0");
        server.join().unwrap();
    }

    #[test]
    fn test_binary_block_with_lf_bytes_in_payload() {
        // every payload byte is an LF
        let values = [f64::from_bits(0x0A0A_0A0A_0A0A_0A0A); 3];
        let mut payload = Vec::new();
        for v in values {
            payload.write_f64::<LittleEndian>(v).unwrap();
        }
        let mut reply = encode_block(&payload);
        reply.push(b'\n');

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            assert_eq!(line, "sense1:channel1:readout:data? llogging\n");
            // split the block so the payload arrives after the header
            writer.write_all(&reply[..5]).unwrap();
            writer.flush().unwrap();
            thread::sleep(Duration::from_millis(20));
            writer.write_all(&reply[5..]).unwrap();

            line.clear();
            reader.read_line(&mut line).unwrap();
            assert_eq!(line, "*OPC?\n");
            writer.write_all(b"1\n").unwrap();
        });

        let transport = TcpTransport::connect("127.0.0.1", port).unwrap();
        let mut instr = ScpiInstrument::new(Box::new(transport), "TCPIP0::127.0.0.1::SOCKET");
        let read = instr
            .query_binary_f64("sense1:channel1:readout:data? llogging")
            .unwrap();
        assert_eq!(read.len(), 3);
        assert!(read.iter().all(|v| v.to_bits() == values[0].to_bits()));
        // the block terminator was consumed with the block
        assert_eq!(instr.query("*OPC?").unwrap(), "1");
        server.join().unwrap();
    }

    #[test]
    fn test_read_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(300));
        });

        let mut transport = TcpTransport::builder()
            .address("127.0.0.1")
            .port(port)
            .read_timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        assert!(matches!(transport.read_line(), Err(OctalError::Timeout)));
        server.join().unwrap();
    }
}
