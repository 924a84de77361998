use crate::error::{MuxError, Result};
use std::env;
use std::path::Path;

/// Staging buffer size used by every `IoPort` unless overridden.
pub const DEFAULT_IO_BUFFER_SIZE: usize = 8192;

/// Ticks per frame for frame-index seeking in the writer's 1/19200 video clock.
pub const DEFAULT_FRAME_SEEK_TICKS: i64 = 19200;

/// Options for the fragmented MP4 writer.
#[derive(Debug, Clone)]
pub struct FragmentConfig {
    /// Append an `mfra` box on finalize. Off by default so the output carries
    /// no trailing global index.
    pub write_random_access_index: bool,
    pub major_brand: [u8; 4],
    /// Seconds since 1970 stamped into mvhd/tkhd/mdhd. `None` uses the wall clock.
    pub creation_time: Option<i64>,
}

impl Default for FragmentConfig {
    fn default() -> Self {
        Self {
            write_random_access_index: false,
            major_brand: *b"isom",
            creation_time: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TsConfig {
    pub pcr_interval_ms: u64,
    /// Distance the PCR runs behind the decode timestamps.
    pub mux_delay_ms: u64,
}

impl Default for TsConfig {
    fn default() -> Self {
        Self {
            pcr_interval_ms: 40,
            mux_delay_ms: 700,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemuxConfig {
    /// Seal the open fragment before every video keyframe.
    pub fragment_on_keyframe: bool,
}

impl Default for RemuxConfig {
    fn default() -> Self {
        Self {
            fragment_on_keyframe: true,
        }
    }
}

/// Session configuration. Passed explicitly to every writer, reader and
/// remuxer; nothing here is process-wide.
#[derive(Debug, Clone)]
pub struct Config {
    pub io_buffer_size: usize,
    pub frame_seek_ticks: i64,
    pub fragment: FragmentConfig,
    pub ts: TsConfig,
    pub remux: RemuxConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            io_buffer_size: DEFAULT_IO_BUFFER_SIZE,
            frame_seek_ticks: DEFAULT_FRAME_SEEK_TICKS,
            fragment: FragmentConfig::default(),
            ts: TsConfig::default(),
            remux: RemuxConfig::default(),
        }
    }
}

impl Config {
    /// Defaults with `FRAGMUX_*` environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        for (key, name) in ENV_KEYS {
            if let Ok(value) = env::var(name) {
                config.set(key, &value)?;
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Parses the flat `key = value` format written by
    /// [`create_default_config_template`]. Unknown keys are ignored.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config = Config::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().trim_matches('"').trim_matches('\'');
                config.set(key.trim(), value)?;
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Rejects a zero buffer size and a non-positive seek window.
    pub fn validate(&self) -> Result<()> {
        if self.io_buffer_size == 0 {
            return Err(MuxError::Configuration(
                "io_buffer_size must be non-zero".into(),
            ));
        }
        if self.frame_seek_ticks <= 0 {
            return Err(MuxError::Configuration(
                "frame_seek_ticks must be positive".into(),
            ));
        }
        Ok(())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "io_buffer_size" => self.io_buffer_size = parse_value(key, value)?,
            "frame_seek_ticks" => self.frame_seek_ticks = parse_value(key, value)?,
            "write_random_access_index" => {
                self.fragment.write_random_access_index = parse_value(key, value)?
            }
            "major_brand" => {
                let bytes = value.as_bytes();
                if bytes.len() != 4 {
                    return Err(MuxError::Configuration(format!(
                        "major_brand must be four characters, got {:?}",
                        value
                    )));
                }
                self.fragment.major_brand.copy_from_slice(bytes);
            }
            "pcr_interval_ms" => self.ts.pcr_interval_ms = parse_value(key, value)?,
            "mux_delay_ms" => self.ts.mux_delay_ms = parse_value(key, value)?,
            "fragment_on_keyframe" => self.remux.fragment_on_keyframe = parse_value(key, value)?,
            _ => log::debug!("ignoring unknown config key {}", key),
        }
        Ok(())
    }
}

const ENV_KEYS: [(&str, &str); 7] = [
    ("io_buffer_size", "FRAGMUX_IO_BUFFER_SIZE"),
    ("frame_seek_ticks", "FRAGMUX_FRAME_SEEK_TICKS"),
    ("write_random_access_index", "FRAGMUX_WRITE_RANDOM_ACCESS_INDEX"),
    ("major_brand", "FRAGMUX_MAJOR_BRAND"),
    ("pcr_interval_ms", "FRAGMUX_PCR_INTERVAL_MS"),
    ("mux_delay_ms", "FRAGMUX_MUX_DELAY_MS"),
    ("fragment_on_keyframe", "FRAGMUX_FRAGMENT_ON_KEYFRAME"),
];

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| MuxError::Configuration(format!("invalid value {:?} for {}", value, key)))
}

/// Creates a default config template file if it doesn't exist
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        let template = r#"# fragmux configuration
# Every key is optional; omitted keys keep their defaults.

io_buffer_size = 8192
frame_seek_ticks = 19200
write_random_access_index = false
major_brand = "isom"
pcr_interval_ms = 40
mux_delay_ms = 700
fragment_on_keyframe = true
"#;
        std::fs::write(path, template)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.io_buffer_size, 8192);
        assert_eq!(config.frame_seek_ticks, 19200);
        assert!(!config.fragment.write_random_access_index);
        assert!(config.remux.fragment_on_keyframe);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_str() {
        let config = Config::from_toml_str(
            "# comment\nio_buffer_size = 4096\nmajor_brand = \"iso6\"\nunknown = 1\nwrite_random_access_index = true\n",
        )
        .unwrap();
        assert_eq!(config.io_buffer_size, 4096);
        assert_eq!(&config.fragment.major_brand, b"iso6");
        assert!(config.fragment.write_random_access_index);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            Config::from_toml_str("io_buffer_size = 0"),
            Err(MuxError::Configuration(_))
        ));
        assert!(matches!(
            Config::from_toml_str("io_buffer_size = lots"),
            Err(MuxError::Configuration(_))
        ));
        assert!(matches!(
            Config::from_toml_str("major_brand = \"mp4\""),
            Err(MuxError::Configuration(_))
        ));
    }

    #[test]
    fn test_template_parses() {
        let dir = std::env::temp_dir().join(format!("fragmux-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("fragmux.toml");
        create_default_config_template(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let config = Config::from_toml_str(&content).unwrap();
        assert_eq!(config.ts.mux_delay_ms, 700);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
