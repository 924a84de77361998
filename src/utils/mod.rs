//! Bitstream and checksum helpers shared by the codec and container modules.

pub mod bits;
pub mod crc;

pub use bits::{BitReader, BitWriter};
pub use crc::Crc32Mpeg2;
