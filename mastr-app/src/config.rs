//! Simple configuration persistence for mastr
//!
//! Stores metering, automation and export preferences.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use mastr_analysis::{DEFAULT_HOLD_MS, DEFAULT_WINDOW_TICKS};
use mastr_audio::{
    CaptureConfig, GraphConfig, MeterConfig, DEFAULT_GENRE, DEFAULT_METER_INTERVAL_MS,
    DEFAULT_RAMP_MS,
};

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Genre used when none is given on the command line
    pub default_genre: String,
    pub meter_interval_ms: u64,
    pub meter_window_ticks: usize,
    pub hold_ms: u64,
    pub ramp_ms: u64,
    pub export_timeslice_ms: u64,
    pub export_safety_margin_s: u64,
    /// Monitor volume during export; 0 mutes
    pub monitor_gain: f32,
    pub export_bits: u16,
}

impl Default for Config {
    fn default() -> Self {
        let capture = CaptureConfig::default();
        Self {
            default_genre: DEFAULT_GENRE.to_string(),
            meter_interval_ms: DEFAULT_METER_INTERVAL_MS,
            meter_window_ticks: DEFAULT_WINDOW_TICKS,
            hold_ms: DEFAULT_HOLD_MS,
            ramp_ms: DEFAULT_RAMP_MS,
            export_timeslice_ms: capture.timeslice.as_millis() as u64,
            export_safety_margin_s: capture.safety_margin.as_secs(),
            monitor_gain: capture.monitor_gain,
            export_bits: capture.bits,
        }
    }
}

impl Config {
    /// Load config from a specific path
    pub fn load_from(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.serialize())
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mastr")
            .join("config.txt")
    }

    /// Parse config from simple key=value format
    ///
    /// Unknown keys are ignored; values that do not parse keep their default.
    fn parse(content: &str) -> Self {
        let mut config = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim();
                match key.trim() {
                    "default_genre" => {
                        if !value.is_empty() {
                            config.default_genre = value.to_string();
                        }
                    }
                    "meter_interval_ms" => set(&mut config.meter_interval_ms, value),
                    "meter_window_ticks" => set(&mut config.meter_window_ticks, value),
                    "hold_ms" => set(&mut config.hold_ms, value),
                    "ramp_ms" => set(&mut config.ramp_ms, value),
                    "export_timeslice_ms" => set(&mut config.export_timeslice_ms, value),
                    "export_safety_margin_s" => set(&mut config.export_safety_margin_s, value),
                    "monitor_gain" => set(&mut config.monitor_gain, value),
                    "export_bits" => set(&mut config.export_bits, value),
                    _ => {} // Ignore unknown keys
                }
            }
        }

        config
    }

    /// Serialize config to simple key=value format
    fn serialize(&self) -> String {
        [
            "# mastr configuration".to_string(),
            format!("default_genre={}", self.default_genre),
            format!("meter_interval_ms={}", self.meter_interval_ms),
            format!("meter_window_ticks={}", self.meter_window_ticks),
            format!("hold_ms={}", self.hold_ms),
            format!("ramp_ms={}", self.ramp_ms),
            format!("export_timeslice_ms={}", self.export_timeslice_ms),
            format!("export_safety_margin_s={}", self.export_safety_margin_s),
            format!("monitor_gain={}", self.monitor_gain),
            format!("export_bits={}", self.export_bits),
        ]
        .join("\n")
    }

    pub fn meter_config(&self) -> MeterConfig {
        MeterConfig {
            interval: Duration::from_millis(self.meter_interval_ms.max(1)),
            window_ticks: self.meter_window_ticks,
            hold_ms: self.hold_ms,
        }
    }

    pub fn graph_config(&self) -> GraphConfig {
        GraphConfig {
            ramp: Duration::from_millis(self.ramp_ms),
        }
    }

    pub fn capture_config(&self, sample_rate: u32) -> CaptureConfig {
        CaptureConfig {
            sample_rate,
            timeslice: Duration::from_millis(self.export_timeslice_ms.max(1)),
            safety_margin: Duration::from_secs(self.export_safety_margin_s),
            monitor_gain: self.monitor_gain,
            bits: self.export_bits,
            ..CaptureConfig::default()
        }
    }
}

fn set<T: FromStr>(field: &mut T, value: &str) {
    if let Ok(parsed) = value.parse() {
        *field = parsed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty() {
        assert_eq!(Config::parse(""), Config::default());
    }

    #[test]
    fn test_parse_values() {
        let config = Config::parse("default_genre=rock\nhold_ms=1500\nmonitor_gain=0.5");
        assert_eq!(config.default_genre, "rock");
        assert_eq!(config.hold_ms, 1500);
        assert_eq!(config.monitor_gain, 0.5);
        assert_eq!(config.ramp_ms, DEFAULT_RAMP_MS);
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let content = "# Comment\nmeter_interval_ms=fast\nexport_bits=\nunknown_key=1";
        let config = Config::parse(content);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = Config {
            default_genre: "jazz".to_string(),
            export_bits: 24,
            meter_window_ticks: 20,
            ..Config::default()
        };
        assert_eq!(Config::parse(&config.serialize()), config);
    }

    #[test]
    fn test_capture_config_uses_settings() {
        let config = Config {
            export_timeslice_ms: 500,
            export_safety_margin_s: 3,
            ..Config::default()
        };
        let capture = config.capture_config(44100);
        assert_eq!(capture.sample_rate, 44100);
        assert_eq!(capture.timeslice, Duration::from_millis(500));
        assert_eq!(capture.safety_margin, Duration::from_secs(3));
    }
}
