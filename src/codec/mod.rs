pub mod aac;
pub mod h264;

pub use h264::ParameterSetRecord;
