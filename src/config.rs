//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `host.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - SerialConfig: which device to open, baud rate, fixed reopen delay.
//!     - StreamConfig: batch flush period and maximum retained samples.
//!     - LivenessConfig: how often to check and how long silence may last.
//!     - TargetsConfig: initial systolic / diastolic / heart-rate targets.
//!     - ServerConfig: dashboard bind address and static file directory.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct HostConfig {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub targets: TargetsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub reopen_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StreamConfig {
    pub flush_interval_ms: u64,
    pub max_batch_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LivenessConfig {
    pub check_interval_ms: u64,
    pub silence_threshold_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TargetsConfig {
    pub systolic: i32,
    pub diastolic: i32,
    pub heart_rate: i32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub static_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 9600,
            reopen_delay_ms: 2000,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { flush_interval_ms: 10, max_batch_size: 200 }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self { check_interval_ms: 250, silence_threshold_ms: 3000 }
    }
}

impl Default for TargetsConfig {
    fn default() -> Self {
        Self { systolic: 120, diastolic: 80, heart_rate: 75 }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            static_dir: "public".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: false }
    }
}

impl SerialConfig {
    pub fn reopen_delay(&self) -> Duration {
        Duration::from_millis(self.reopen_delay_ms)
    }
}

impl StreamConfig {
    pub fn flush_interval(&self) -> Duration {
        // a zero period would make tokio's interval panic
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
}

impl LivenessConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.max(1))
    }

    pub fn silence_threshold(&self) -> Duration {
        Duration::from_millis(self.silence_threshold_ms)
    }
}

impl HostConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        Self::parse(&content)
    }

    /// Parse configuration from toml text
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: HostConfig = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        Ok(config)
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let paths = [
            std::path::PathBuf::from("config").join("host.toml"),
            std::path::PathBuf::from("..").join("config").join("host.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("┌─────────────────────────────────────────┐");
        println!("│           HOST CONFIGURATION            │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Serial: {} @ {} baud", self.serial.port, self.serial.baud_rate);
        println!("│ Reopen Delay: {}ms", self.serial.reopen_delay_ms);
        println!("│ Flush: {}ms (max {} samples)", self.stream.flush_interval_ms, self.stream.max_batch_size);
        println!("│ Silence Threshold: {}ms", self.liveness.silence_threshold_ms);
        println!("│ Dashboard: http://{}", self.server.bind);
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}
