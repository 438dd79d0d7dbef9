//! Just enough of the protobuf wire format to issue the staking validator
//! query and read the fields the health tracker needs.

use crate::error::WatcherError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireValue<'a> {
    Varint(u64),
    Fixed64(u64),
    Bytes(&'a [u8]),
    Fixed32(u32),
}

impl<'a> WireValue<'a> {
    pub fn as_bytes(&self) -> Result<&'a [u8], WatcherError> {
        match self {
            WireValue::Bytes(bytes) => Ok(bytes),
            other => Err(WatcherError::Decode(format!(
                "expected length-delimited field, got {:?}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> Result<&'a str, WatcherError> {
        std::str::from_utf8(self.as_bytes()?)
            .map_err(|e| WatcherError::Decode(format!("invalid utf-8: {}", e)))
    }

    pub fn as_varint(&self) -> Result<u64, WatcherError> {
        match self {
            WireValue::Varint(v) => Ok(*v),
            other => Err(WatcherError::Decode(format!(
                "expected varint field, got {:?}",
                other
            ))),
        }
    }
}

/// Iterates `(field number, value)` pairs of one message.
pub struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read_varint(&mut self) -> Result<u64, WatcherError> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or_else(|| WatcherError::Decode("truncated varint".to_string()))?;
            self.pos += 1;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(WatcherError::Decode("varint overflow".to_string()))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], WatcherError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| WatcherError::Decode("truncated field".to_string()))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_field(&mut self) -> Result<(u32, WireValue<'a>), WatcherError> {
        let key = self.read_varint()?;
        let field = (key >> 3) as u32;
        let value = match key & 0x7 {
            0 => WireValue::Varint(self.read_varint()?),
            1 => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(self.take(8)?);
                WireValue::Fixed64(u64::from_le_bytes(bytes))
            }
            2 => {
                let len = self.read_varint()? as usize;
                WireValue::Bytes(self.take(len)?)
            }
            5 => {
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(self.take(4)?);
                WireValue::Fixed32(u32::from_le_bytes(bytes))
            }
            wire_type => {
                return Err(WatcherError::Decode(format!(
                    "unsupported wire type {}",
                    wire_type
                )))
            }
        };
        Ok((field, value))
    }
}

impl<'a> Iterator for FieldReader<'a> {
    type Item = Result<(u32, WireValue<'a>), WatcherError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }
        let field = self.read_field();
        if field.is_err() {
            self.pos = self.buf.len();
        }
        Some(field)
    }
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

pub fn encode_string_field(field: u32, value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 3);
    write_varint(&mut out, (u64::from(field) << 3) | 2);
    write_varint(&mut out, value.len() as u64);
    out.extend_from_slice(value.as_bytes());
    out
}
