use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Codec: Truncated input at offset {offset}: needed {requested} bytes, {available} available")]
    TruncatedInput {
        offset: usize,
        requested: usize,
        available: usize,
    },
    #[error("Codec: Invalid varint at offset {0}")]
    InvalidVarint(usize),
    #[error("Codec: Malformed XML at offset {offset}: {reason}")]
    MalformedXml { offset: usize, reason: &'static str },
    #[error("Codec: cannot process .pbf format")]
    PbfInput,
    #[error("Codec: Unknown input file format")]
    UnknownFormat,
}

/// Longest accepted varint; 10 groups of 7 bits cover 64 bits.
const MAX_VARINT_BYTES: usize = 10;

/// Bounds-checked reader over a borrowed buffer.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.data.len());
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn truncated(&self, requested: usize) -> CodecError {
        CodecError::TruncatedInput {
            offset: self.pos,
            requested,
            available: self.remaining(),
        }
    }

    /// Everything read since `start`.
    pub fn since(&self, start: usize) -> &'a [u8] {
        &self.data[start.min(self.pos)..self.pos]
    }

    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        let b = self.peek().ok_or_else(|| self.truncated(1))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if len > self.remaining() {
            return Err(self.truncated(len));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_uvar(&mut self) -> Result<u64, CodecError> {
        let start = self.pos;
        let mut value = 0u64;
        for i in 0..MAX_VARINT_BYTES {
            let b = self.read_u8()?;
            value |= u64::from(b & 0x7f) << (7 * i);
            if b & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CodecError::InvalidVarint(start))
    }

    /// Signed varint; the lowest bit carries the sign.
    pub fn read_svar(&mut self) -> Result<i64, CodecError> {
        let raw = self.read_uvar()?;
        let magnitude = (raw >> 1) as i64;
        Ok(if raw & 1 != 0 {
            -magnitude - 1
        } else {
            magnitude
        })
    }

    /// Bytes up to the next zero byte, which is consumed but not returned.
    pub fn read_cstr(&mut self) -> Result<&'a [u8], CodecError> {
        let rest = &self.data[self.pos..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| self.truncated(rest.len() + 1))?;
        self.pos += len + 1;
        Ok(&rest[..len])
    }
}

pub fn write_uvar(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

pub fn write_svar(out: &mut Vec<u8>, value: i64) {
    let raw = if value < 0 {
        ((-(value + 1)) as u64) << 1 | 1
    } else {
        (value as u64) << 1
    };
    write_uvar(out, raw);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_o5m_varints() {
        let mut cursor = Cursor::new(&[0x05, 0xc3, 0x02, 0x03, 0x04, 0x80, 0x01]);
        assert_eq!(cursor.read_uvar().unwrap(), 5);
        assert_eq!(cursor.read_uvar().unwrap(), 323);
        assert_eq!(cursor.read_svar().unwrap(), -2);
        assert_eq!(cursor.read_svar().unwrap(), 2);
        assert_eq!(cursor.read_svar().unwrap(), 64);
        assert!(cursor.is_empty());
    }

    #[test]
    fn writes_what_it_reads() {
        let mut out = Vec::new();
        for v in [0i64, -1, 1, -65, 64, i64::MIN, i64::MAX] {
            write_svar(&mut out, v);
        }
        let mut cursor = Cursor::new(&out);
        for v in [0i64, -1, 1, -65, 64, i64::MIN, i64::MAX] {
            assert_eq!(cursor.read_svar().unwrap(), v);
        }
    }

    #[test]
    fn overlong_varint_is_rejected() {
        let data = [0xffu8; 11];
        assert_eq!(
            Cursor::new(&data).read_uvar(),
            Err(CodecError::InvalidVarint(0))
        );
    }

    #[test]
    fn reading_past_end_reports_truncation() {
        let mut cursor = Cursor::new(&[0x80]);
        assert!(matches!(
            cursor.read_uvar(),
            Err(CodecError::TruncatedInput { requested: 1, available: 0, .. })
        ));
        let mut cursor = Cursor::new(b"abc");
        assert!(cursor.read_bytes(4).is_err());
        assert!(cursor.read_cstr().is_err());
        assert_eq!(cursor.read_bytes(3).unwrap(), b"abc");
    }

    #[test]
    fn cstr_consumes_terminator() {
        let mut cursor = Cursor::new(b"highway\0primary\0");
        assert_eq!(cursor.read_cstr().unwrap(), b"highway");
        assert_eq!(cursor.read_cstr().unwrap(), b"primary");
        assert!(cursor.is_empty());
    }
}
