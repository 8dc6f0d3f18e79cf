use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};
use log::debug;

use crate::error::OctalError;
use crate::transport::{ResourceManager, Transport};

/// Frame `payload` as an IEEE-488.2 definite-length block: `#<n><len><payload>`.
pub fn encode_block(payload: &[u8]) -> Vec<u8> {
    let len = payload.len().to_string();
    let mut out = Vec::with_capacity(2 + len.len() + payload.len());
    out.push(b'#');
    out.extend_from_slice(len.len().to_string().as_bytes());
    out.extend_from_slice(len.as_bytes());
    out.extend_from_slice(payload);
    out
}

/// Total length (header + payload) of the definite-length block at the start
/// of `buf`, once enough of the header has arrived to know it.
#[cfg(any(feature = "visa", test))]
pub(crate) fn block_len(buf: &[u8]) -> Option<usize> {
    if buf.first() != Some(&b'#') {
        return None;
    }
    let digits = (*buf.get(1)? as char).to_digit(10)? as usize;
    if digits == 0 {
        return None;
    }
    let len: usize = std::str::from_utf8(buf.get(2..2 + digits)?).ok()?.parse().ok()?;
    Some(2 + digits + len)
}

/// Strip the block header (and trailing terminator) from a binary response.
///
/// Accepts both the definite form `#<n><len>` and the indefinite `#0` form,
/// whose payload runs until the terminating LF.
pub fn decode_block(raw: &[u8]) -> Result<&[u8], OctalError> {
    let malformed = |what: &str| OctalError::Parse(format!("Malformed binary block: {what}"));

    if raw.first() != Some(&b'#') {
        return Err(malformed("missing '#'"));
    }
    let digits = raw
        .get(1)
        .and_then(|d| (*d as char).to_digit(10))
        .ok_or_else(|| malformed("bad length digit"))? as usize;

    if digits == 0 {
        let mut payload = &raw[2..];
        if let Some(stripped) = payload.strip_suffix(b"\n") {
            payload = stripped;
        }
        return Ok(payload);
    }

    let len: usize = raw
        .get(2..2 + digits)
        .and_then(|l| std::str::from_utf8(l).ok())
        .and_then(|l| l.parse().ok())
        .ok_or_else(|| malformed("bad length field"))?;
    let start = 2 + digits;
    raw.get(start..start + len)
        .ok_or_else(|| malformed("truncated payload"))
}

/// Check `value` against an inclusive range before anything is sent.
pub fn check_range(name: &str, value: f64, min: f64, max: f64) -> Result<(), OctalError> {
    if value.is_nan() || value < min || value > max {
        return Err(OctalError::OutOfRange {
            name: name.to_string(),
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Case-insensitive membership check against an instrument keyword list.
pub fn check_choice(name: &str, value: &str, choices: &[&str]) -> Result<(), OctalError> {
    if choices.iter().any(|c| c.eq_ignore_ascii_case(value)) {
        Ok(())
    } else {
        Err(OctalError::InvalidChoice {
            name: name.to_string(),
            value: value.to_string(),
            choices: choices.iter().map(|c| c.to_string()).collect(),
        })
    }
}

fn parse_f64(reply: &str) -> Result<f64, OctalError> {
    reply
        .trim()
        .trim_matches('"')
        .parse::<f64>()
        .map_err(|_| OctalError::Parse(format!("Expected a number, got '{reply}'")))
}

/// Shared write/query layer every driver is built on.
///
/// Owns the transport for one instrument session; the session closes when
/// the instrument is dropped.
pub struct ScpiInstrument {
    transport: Box<dyn Transport>,
    addr: String,
}

impl ScpiInstrument {
    pub fn new(transport: Box<dyn Transport>, addr: impl Into<String>) -> Self {
        Self {
            transport,
            addr: addr.into(),
        }
    }

    /// Open `addr` through the resource manager.
    pub fn open(rm: &ResourceManager, addr: &str) -> Result<Self, OctalError> {
        Ok(Self::new(rm.open_str(addr)?, addr))
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    pub fn write(&mut self, cmd: &str) -> Result<(), OctalError> {
        debug!("{} <- {}", self.addr, cmd);
        self.transport.write_line(cmd)
    }

    pub fn query(&mut self, cmd: &str) -> Result<String, OctalError> {
        self.transport.write_line(cmd)?;
        let reply = self.transport.read_line()?;
        debug!("{} <- {} -> {}", self.addr, cmd, reply);
        Ok(reply.trim().to_string())
    }

    pub fn query_float(&mut self, cmd: &str) -> Result<f64, OctalError> {
        let reply = self.query(cmd)?;
        parse_f64(&reply)
    }

    /// Query a comma separated list of numbers.
    pub fn query_floats(&mut self, cmd: &str) -> Result<Vec<f64>, OctalError> {
        let reply = self.query(cmd)?;
        if reply.is_empty() {
            return Ok(Vec::new());
        }
        reply.split(',').map(parse_f64).collect()
    }

    /// Query a boolean state, accepting `1`/`0` and `ON`/`OFF`.
    pub fn query_bool(&mut self, cmd: &str) -> Result<bool, OctalError> {
        let reply = self.query(cmd)?;
        match reply.to_ascii_uppercase().as_str() {
            "1" | "ON" | "+1" => Ok(true),
            "0" | "OFF" | "+0" => Ok(false),
            _ => Err(OctalError::Parse(format!("Expected a boolean, got '{reply}'"))),
        }
    }

    fn query_block(&mut self, cmd: &str) -> Result<Vec<u8>, OctalError> {
        self.transport.write_line(cmd)?;
        let raw = self.transport.read_raw()?;
        let payload = decode_block(&raw)?.to_vec();
        debug!("{} <- {} -> {} byte block", self.addr, cmd, payload.len());
        Ok(payload)
    }

    /// Query a binary block of little-endian 32-bit floats.
    pub fn query_binary_f32(&mut self, cmd: &str) -> Result<Vec<f32>, OctalError> {
        let payload = self.query_block(cmd)?;
        if payload.len() % 4 != 0 {
            return Err(OctalError::Parse(format!(
                "Block of {} bytes is not a whole number of f32 values",
                payload.len()
            )));
        }
        let mut values = vec![0f32; payload.len() / 4];
        LittleEndian::read_f32_into(&payload, &mut values);
        Ok(values)
    }

    /// Query a binary block of little-endian 64-bit floats.
    pub fn query_binary_f64(&mut self, cmd: &str) -> Result<Vec<f64>, OctalError> {
        let payload = self.query_block(cmd)?;
        if payload.len() % 8 != 0 {
            return Err(OctalError::Parse(format!(
                "Block of {} bytes is not a whole number of f64 values",
                payload.len()
            )));
        }
        let mut values = vec![0f64; payload.len() / 8];
        LittleEndian::read_f64_into(&payload, &mut values);
        Ok(values)
    }

    /// Query a binary block of big-endian 16-bit integers.
    pub fn query_binary_i16_be(&mut self, cmd: &str) -> Result<Vec<i16>, OctalError> {
        let payload = self.query_block(cmd)?;
        if payload.len() % 2 != 0 {
            return Err(OctalError::Parse(format!(
                "Block of {} bytes is not a whole number of i16 values",
                payload.len()
            )));
        }
        let mut values = vec![0i16; payload.len() / 2];
        BigEndian::read_i16_into(&payload, &mut values);
        Ok(values)
    }

    /// Write `prefix` followed by a block of big-endian 16-bit integers.
    pub fn write_binary_i16_be(&mut self, prefix: &str, values: &[i16]) -> Result<(), OctalError> {
        let mut payload = Vec::with_capacity(values.len() * 2);
        for v in values {
            payload
                .write_i16::<BigEndian>(*v)
                .map_err(|e| OctalError::io(e, "Encoding block"))?;
        }
        let mut bytes = prefix.as_bytes().to_vec();
        bytes.extend_from_slice(&encode_block(&payload));
        bytes.push(b'\n');
        debug!("{} <- {}<{} byte block>", self.addr, prefix, payload.len());
        self.transport.write_raw(&bytes)
    }

    pub fn identify(&mut self) -> Result<String, OctalError> {
        self.query("*IDN?")
    }

    pub fn reset(&mut self) -> Result<(), OctalError> {
        self.write("*RST")
    }

    pub fn clear(&mut self) -> Result<(), OctalError> {
        self.write("*CLS")
    }

    /// Block until all pending operations have completed.
    pub fn wait_complete(&mut self) -> Result<(), OctalError> {
        self.query("*OPC?").map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SimTransport;

    fn sim(responder: impl FnMut(&str) -> Option<crate::transport::sim::SimReply> + Send + 'static) -> ScpiInstrument {
        ScpiInstrument::new(Box::new(SimTransport::new("t").with_responder(responder)), "SIM::t")
    }

    #[test]
    fn test_block_round_trip_framing() {
        let block = encode_block(b"abc\ndef");
        assert_eq!(block, b"#17abc\ndef".to_vec());
        assert_eq!(block_len(&block), Some(10));
        assert_eq!(decode_block(&block).unwrap(), b"abc\ndef");
    }

    #[test]
    fn test_decode_indefinite_and_malformed() {
        assert_eq!(decode_block(b"#0xyz\n").unwrap(), b"xyz");
        assert!(decode_block(b"12").is_err());
        assert!(decode_block(b"#x12").is_err());
        assert!(decode_block(b"#2101234").is_err());
    }

    #[test]
    fn test_checks() {
        assert!(check_range("count", 4096.0, 1.0, 4096.0).is_ok());
        assert!(matches!(
            check_range("count", 0.0, 1.0, 4096.0),
            Err(OctalError::OutOfRange { .. })
        ));
        assert!(check_range("x", f64::NAN, 0.0, 1.0).is_err());
        assert!(check_choice("mode", "FLAT", &["thr", "flat"]).is_ok());
        assert!(matches!(
            check_choice("mode", "best", &["thr", "flat"]),
            Err(OctalError::InvalidChoice { .. })
        ));
    }

    #[test]
    fn test_query_parsing() {
        let mut instr = sim(|cmd| match cmd {
            "a?" => Some("+1.25E-03".into()),
            "b?" => Some("1.0,2.5,-3".into()),
            "c?" => Some("ON".into()),
            "d?" => Some("nope".into()),
            _ => None,
        });
        assert_eq!(instr.query_float("a?").unwrap(), 1.25e-3);
        assert_eq!(instr.query_floats("b?").unwrap(), vec![1.0, 2.5, -3.0]);
        assert!(instr.query_bool("c?").unwrap());
        assert!(matches!(instr.query_float("d?"), Err(OctalError::Parse(_))));
    }

    #[test]
    fn test_binary_queries() {
        let mut instr = sim(|cmd| {
            if cmd == "f32?" {
                let mut payload = Vec::new();
                payload.write_f32::<LittleEndian>(0.5).unwrap();
                payload.write_f32::<LittleEndian>(-2.0).unwrap();
                Some(encode_block(&payload).into())
            } else if cmd == "i16?" {
                Some(encode_block(&[0x7f, 0xff, 0x80, 0x00]).into())
            } else {
                None
            }
        });
        assert_eq!(instr.query_binary_f32("f32?").unwrap(), vec![0.5, -2.0]);
        assert_eq!(instr.query_binary_i16_be("i16?").unwrap(), vec![i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_write_binary_block() {
        let transport = SimTransport::new("awg");
        let log = transport.log();
        let mut instr = ScpiInstrument::new(Box::new(transport), "SIM::awg");
        instr.write_binary_i16_be("arb1 ", &[1, -1]).unwrap();
        let logged = log.commands();
        assert_eq!(logged.len(), 1);
        assert!(logged[0].starts_with("arb1 #14"));
    }
}
