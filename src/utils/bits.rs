use crate::error::{MuxError, Result};

/// MSB-first bit reader over an RBSP, with the exp-Golomb reads H.264
/// parameter sets need.
///
/// ```
/// use fragmux::utils::BitReader;
///
/// let data = [0b1011_0011];
/// let mut reader = BitReader::new(&data);
/// assert!(reader.read_bit().unwrap());
/// assert_eq!(reader.read_bits(3).unwrap(), 0b011);
/// ```
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_offset: usize,
    bit_offset: u8,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            byte_offset: 0,
            bit_offset: 0,
        }
    }

    pub fn read_bit(&mut self) -> Result<bool> {
        let byte = *self
            .data
            .get(self.byte_offset)
            .ok_or_else(|| MuxError::Format("bitstream ended early".into()))?;
        let bit = (byte >> (7 - self.bit_offset)) & 1;
        self.bit_offset += 1;
        if self.bit_offset == 8 {
            self.bit_offset = 0;
            self.byte_offset += 1;
        }
        Ok(bit == 1)
    }

    /// Reads `n` bits (at most 32) as a big-endian number.
    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        if n > 32 {
            return Err(MuxError::Format(format!("cannot read {} bits at once", n)));
        }
        let mut value = 0u32;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()? as u32;
        }
        Ok(value)
    }

    /// ue(v): `M` leading zeros, a one, then `M` info bits; value is `2^M + info - 1`.
    pub fn read_golomb(&mut self) -> Result<u32> {
        let mut leading_zeros = 0;
        while !self.read_bit()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(MuxError::Format("invalid exp-Golomb code".into()));
            }
        }
        if leading_zeros == 0 {
            return Ok(0);
        }
        let info = self.read_bits(leading_zeros)?;
        Ok((1u32 << leading_zeros) - 1 + info)
    }

    /// se(v): odd codes map to positive values, even codes to negative ones.
    pub fn read_signed_golomb(&mut self) -> Result<i32> {
        let k = self.read_golomb()?;
        let magnitude = ((k as u64 + 1) >> 1) as i32;
        Ok(if k & 1 == 1 { magnitude } else { -magnitude })
    }

    pub fn skip_bits(&mut self, n: u32) -> Result<()> {
        for _ in 0..n {
            self.read_bit()?;
        }
        Ok(())
    }

    pub fn available_bits(&self) -> usize {
        (self.data.len().saturating_sub(self.byte_offset)) * 8 - self.bit_offset as usize
    }
}

/// MSB-first bit writer used for AudioSpecificConfig and ADTS headers.
#[derive(Debug, Default)]
pub struct BitWriter {
    data: Vec<u8>,
    bit_count: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the low `n` bits of `value`, most significant first.
    pub fn write_bits(&mut self, value: u32, n: u32) {
        for i in (0..n).rev() {
            let bit = (value >> i) & 1;
            if self.bit_count % 8 == 0 {
                self.data.push(0);
            }
            if bit == 1 {
                let last = self.data.len() - 1;
                self.data[last] |= 1 << (7 - (self.bit_count % 8));
            }
            self.bit_count += 1;
        }
    }

    /// Pads with zero bits to the next byte boundary and returns the bytes.
    pub fn finish(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::BitWriter;

    pub fn encode_golomb(writer: &mut BitWriter, value: u32) {
        let code = value as u64 + 1;
        let bits = 64 - code.leading_zeros();
        writer.write_bits(0, bits - 1);
        for i in (0..bits).rev() {
            writer.write_bits(((code >> i) & 1) as u32, 1);
        }
    }

    pub fn encode_signed_golomb(writer: &mut BitWriter, value: i32) {
        let code = if value > 0 {
            (value as u32) * 2 - 1
        } else {
            value.unsigned_abs() * 2
        };
        encode_golomb(writer, code);
    }
}
