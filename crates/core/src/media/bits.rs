use crate::error::{Result, RtspError};

/// MSB-first bit cursor over an RBSP byte buffer (ITU-T H.264 §7.2).
///
/// Reads past the end fail instead of panicking, so a truncated parameter
/// set surfaces as an error the caller can discard.
#[derive(Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Bits consumed so far.
    pub fn position(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.offset)
    }

    fn truncated(&self, wanted: usize) -> RtspError {
        RtspError::UnsupportedSample(format!(
            "bitstream truncated: wanted {} bits at offset {}, {} left",
            wanted,
            self.offset,
            self.remaining()
        ))
    }

    /// `u(n)`: read `count` bits (at most 32) as an unsigned integer.
    pub fn read_bits(&mut self, count: usize) -> Result<u32> {
        if count > 32 || count > self.remaining() {
            return Err(self.truncated(count));
        }

        let mut value: u32 = 0;
        for _ in 0..count {
            let byte = self.data[self.offset / 8];
            let bit = (byte >> (7 - self.offset % 8)) & 1;
            value = (value << 1) | bit as u32;
            self.offset += 1;
        }
        Ok(value)
    }

    pub fn read_flag(&mut self) -> Result<bool> {
        Ok(self.read_bits(1)? == 1)
    }

    pub fn skip(&mut self, count: usize) -> Result<()> {
        if count > self.remaining() {
            return Err(self.truncated(count));
        }
        self.offset += count;
        Ok(())
    }

    /// `ue(v)`: unsigned Exp-Golomb code (§9.1).
    pub fn read_ue(&mut self) -> Result<u32> {
        let mut leading_zeros = 0;
        while !self.read_flag()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(RtspError::UnsupportedSample(
                    "Exp-Golomb code longer than 32 bits".into(),
                ));
            }
        }
        if leading_zeros == 0 {
            return Ok(0);
        }
        let suffix = self.read_bits(leading_zeros)?;
        Ok(((1u64 << leading_zeros) - 1 + suffix as u64) as u32)
    }

    /// `se(v)`: signed Exp-Golomb code (§9.1.1). Maps 1, 2, 3, 4 to 1, -1, 2, -2.
    pub fn read_se(&mut self) -> Result<i32> {
        let code = self.read_ue()? as i64;
        let value = if code & 1 == 1 {
            (code + 1) / 2
        } else {
            -(code / 2)
        };
        Ok(value as i32)
    }
}

/// Drop emulation prevention bytes (`00 00 03` → `00 00`), turning a NAL
/// payload into its raw byte sequence (§7.4.1).
pub fn strip_emulation_prevention(nal: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nal.len());
    let mut zeros = 0;
    for &byte in nal {
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }
        out.push(byte);
        zeros = if byte == 0 { zeros + 1 } else { 0 };
    }
    out
}
