use std::fmt;
use std::str::FromStr;

use crate::error::OctalError;

/// Default port of raw SCPI sockets on LAN instruments.
pub const DEFAULT_SCPI_PORT: u16 = 5025;

/// A parsed VISA resource string.
///
/// Only the forms used on a characterization bench are supported:
///
/// ```
/// use rusty_octal::ResourceAddress;
///
/// let gpib: ResourceAddress = "GPIB0::20::INSTR".parse()?;
/// let socket: ResourceAddress = "TCPIP0::192.168.1.91::5025::SOCKET".parse()?;
/// let lan: ResourceAddress = "TCPIP0::192.168.3.242::hislip0::INSTR".parse()?;
/// let sim: ResourceAddress = "SIM::e3640a".parse()?;
/// assert_eq!(gpib.to_string(), "GPIB0::20::INSTR");
/// # let _ = (socket, lan, sim);
/// # Ok::<(), rusty_octal::OctalError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceAddress {
    Gpib {
        board: u16,
        primary: u8,
        secondary: Option<u8>,
    },
    TcpSocket {
        board: u16,
        host: String,
        port: u16,
    },
    TcpInstr {
        board: u16,
        host: String,
        device: String,
    },
    Serial {
        port: u16,
    },
    Sim {
        name: String,
    },
}

impl ResourceAddress {
    /// Whether the resource can only be reached through a VISA library.
    pub fn needs_visa(&self) -> bool {
        matches!(
            self,
            ResourceAddress::Gpib { .. }
                | ResourceAddress::TcpInstr { .. }
                | ResourceAddress::Serial { .. }
        )
    }
}

fn parse_board(raw: &str, prefix: &str, full: &str) -> Result<u16, OctalError> {
    let digits = &raw[prefix.len()..];
    if digits.is_empty() {
        return Ok(0);
    }
    digits
        .parse()
        .map_err(|_| OctalError::InvalidAddress(full.to_string()))
}

impl FromStr for ResourceAddress {
    type Err = OctalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let full = s.trim();
        let invalid = || OctalError::InvalidAddress(full.to_string());
        let parts: Vec<&str> = full.split("::").collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid());
        }

        let head = parts[0].to_ascii_uppercase();
        let tail = parts
            .last()
            .map(|p| p.to_ascii_uppercase())
            .unwrap_or_default();

        if head == "SIM" {
            return match parts.as_slice() {
                [_, name] => Ok(ResourceAddress::Sim {
                    name: name.to_string(),
                }),
                _ => Err(invalid()),
            };
        }

        if head.starts_with("GPIB") {
            let board = parse_board(&head, "GPIB", full)?;
            if tail != "INSTR" {
                return Err(invalid());
            }
            let primary = parts
                .get(1)
                .and_then(|p| p.parse::<u8>().ok())
                .filter(|p| *p <= 30)
                .ok_or_else(invalid)?;
            let secondary = match parts.len() {
                3 => None,
                4 => Some(parts[2].parse::<u8>().map_err(|_| invalid())?),
                _ => return Err(invalid()),
            };
            return Ok(ResourceAddress::Gpib {
                board,
                primary,
                secondary,
            });
        }

        if head.starts_with("TCPIP") {
            let board = parse_board(&head, "TCPIP", full)?;
            return match (parts.len(), tail.as_str()) {
                (4, "SOCKET") => Ok(ResourceAddress::TcpSocket {
                    board,
                    host: parts[1].to_string(),
                    port: parts[2].parse().map_err(|_| invalid())?,
                }),
                (3, "INSTR") => Ok(ResourceAddress::TcpInstr {
                    board,
                    host: parts[1].to_string(),
                    device: "inst0".to_string(),
                }),
                (4, "INSTR") => Ok(ResourceAddress::TcpInstr {
                    board,
                    host: parts[1].to_string(),
                    device: parts[2].to_string(),
                }),
                _ => Err(invalid()),
            };
        }

        if head.starts_with("ASRL") && parts.len() == 2 && tail == "INSTR" {
            let port = head[4..].parse().map_err(|_| invalid())?;
            return Ok(ResourceAddress::Serial { port });
        }

        Err(invalid())
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceAddress::Gpib {
                board,
                primary,
                secondary: None,
            } => write!(f, "GPIB{board}::{primary}::INSTR"),
            ResourceAddress::Gpib {
                board,
                primary,
                secondary: Some(secondary),
            } => write!(f, "GPIB{board}::{primary}::{secondary}::INSTR"),
            ResourceAddress::TcpSocket { board, host, port } => {
                write!(f, "TCPIP{board}::{host}::{port}::SOCKET")
            }
            ResourceAddress::TcpInstr {
                board,
                host,
                device,
            } => write!(f, "TCPIP{board}::{host}::{device}::INSTR"),
            ResourceAddress::Serial { port } => write!(f, "ASRL{port}::INSTR"),
            ResourceAddress::Sim { name } => write!(f, "SIM::{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gpib() {
        let addr: ResourceAddress = "GPIB0::5::INSTR".parse().unwrap();
        assert_eq!(
            addr,
            ResourceAddress::Gpib {
                board: 0,
                primary: 5,
                secondary: None
            }
        );
        assert!(addr.needs_visa());

        let addr: ResourceAddress = "gpib1::28::2::instr".parse().unwrap();
        assert_eq!(addr.to_string(), "GPIB1::28::2::INSTR");
    }

    #[test]
    fn test_parse_tcpip() {
        let addr: ResourceAddress = "TCPIP0::192.168.1.91::5025::SOCKET".parse().unwrap();
        assert_eq!(
            addr,
            ResourceAddress::TcpSocket {
                board: 0,
                host: "192.168.1.91".to_string(),
                port: 5025
            }
        );
        assert!(!addr.needs_visa());

        let addr: ResourceAddress = "TCPIP::10.0.0.2::INSTR".parse().unwrap();
        assert_eq!(addr.to_string(), "TCPIP0::10.0.0.2::inst0::INSTR");
    }

    #[test]
    fn test_parse_sim_and_serial() {
        let addr: ResourceAddress = "SIM::pm".parse().unwrap();
        assert_eq!(
            addr,
            ResourceAddress::Sim {
                name: "pm".to_string()
            }
        );
        let addr: ResourceAddress = "ASRL3::INSTR".parse().unwrap();
        assert_eq!(addr, ResourceAddress::Serial { port: 3 });
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "",
            "GPIB0::INSTR",
            "GPIB0::99::INSTR",
            "GPIB0::5::SOCKET",
            "GPIBx::5::INSTR",
            "TCPIP0::host::port::SOCKET",
            "TCPIP0::::5025::SOCKET",
            "USB0::1::2::INSTR",
            "SIM::",
        ] {
            assert!(
                matches!(
                    bad.parse::<ResourceAddress>(),
                    Err(OctalError::InvalidAddress(_))
                ),
                "{bad} should be rejected"
            );
        }
    }
}
