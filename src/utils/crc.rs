/// MPEG-2 CRC32 (ISO/IEC 13818-1 Annex A) over PSI sections.
///
/// Polynomial 0x04C11DB7, initial value 0xFFFFFFFF, no reflection, no final xor.
pub struct Crc32Mpeg2 {
    table: [u32; 256],
}

const POLYNOMIAL: u32 = 0x04C1_1DB7;

impl Crc32Mpeg2 {
    pub const fn new() -> Self {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = (i as u32) << 24;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 0x8000_0000 != 0 {
                    (crc << 1) ^ POLYNOMIAL
                } else {
                    crc << 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        Self { table }
    }

    pub fn calculate(&self, data: &[u8]) -> u32 {
        data.iter().fold(0xFFFF_FFFF, |crc, &byte| {
            let index = ((crc >> 24) ^ byte as u32) & 0xFF;
            (crc << 8) ^ self.table[index as usize]
        })
    }
}

impl Default for Crc32Mpeg2 {
    fn default() -> Self {
        Self::new()
    }
}

/// Table shared by every section writer.
pub(crate) static MPEG2_CRC: Crc32Mpeg2 = Crc32Mpeg2::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        assert_eq!(MPEG2_CRC.calculate(&[0x01, 0x01]), 0xD66F_B816);
    }

    #[test]
    fn test_section_with_crc_checks_to_zero() {
        // A section followed by its own CRC yields a zero remainder.
        let mut pat = vec![0x00, 0xB0, 0x0D, 0x00, 0x01, 0xC1, 0x00, 0x00, 0x00, 0x01, 0xF0, 0x00];
        let crc = MPEG2_CRC.calculate(&pat);
        pat.extend_from_slice(&crc.to_be_bytes());
        assert_eq!(MPEG2_CRC.calculate(&pat), 0);
    }
}
