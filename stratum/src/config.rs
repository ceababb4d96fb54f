// Copyright (C) 2024, 2025 P2Poolv2 Developers (see AUTHORS)
//
// This file is part of P2Poolv2
//
// P2Poolv2 is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// P2Poolv2 is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// P2Poolv2. If not, see <https://www.gnu.org/licenses/>.

use crate::difficulty_adjuster::RetargetConfig;
use crate::emission::SinkPolicy;
use crate::server::{ConnectionLimits, MAX_LINE_LENGTH};
use crate::session::EXTRANONCE2_SIZE;
use crate::session_timeout::SessionTimeouts;
use crate::share_validator::ShareValidatorConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct StratumConfig {
    /// The hostname for the Stratum server
    pub hostname: String,
    /// The port for the Stratum server
    pub port: u16,
    /// The start difficulty for all miners that connect to the server
    #[serde(default = "default_start_difficulty")]
    pub start_difficulty: f64,
    /// The minimum difficulty for the pool
    #[serde(default = "default_minimum_difficulty")]
    pub minimum_difficulty: f64,
    /// The maximum difficulty for the pool
    #[serde(default = "default_maximum_difficulty")]
    pub maximum_difficulty: f64,
    #[serde(default = "default_extranonce2_size")]
    pub extranonce2_size: u32,
    /// The version mask to use for version-rolling, as hex. Disabled when absent.
    #[serde(default, deserialize_with = "deserialize_version_mask")]
    pub version_mask: Option<u32>,
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Accepted username/password pairs. Any username is accepted when absent.
    /// Keys are case-insensitive, the config loader lowercases them.
    #[serde(default)]
    pub credentials: Option<HashMap<String, String>>,
}

fn deserialize_version_mask<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = serde::Deserialize::deserialize(deserializer)?;
    s.map(|s| u32::from_str_radix(s.trim_start_matches("0x"), 16))
        .transpose()
        .map_err(serde::de::Error::custom)
}

fn default_start_difficulty() -> f64 {
    1.0
}

fn default_minimum_difficulty() -> f64 {
    1.0
}

fn default_maximum_difficulty() -> f64 {
    1e15
}

fn default_extranonce2_size() -> u32 {
    EXTRANONCE2_SIZE
}

fn default_max_line_length() -> usize {
    MAX_LINE_LENGTH
}

fn default_write_timeout_secs() -> u64 {
    10
}

fn default_idle_timeout_secs() -> u64 {
    900
}

fn default_sweep_interval_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DifficultyConfig {
    /// Share intervals collected before retargeting
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Desired seconds between shares from one session
    #[serde(default = "default_target_interval_secs")]
    pub target_interval_secs: f64,
    #[serde(default = "default_update_channel_capacity")]
    pub update_channel_capacity: usize,
}

impl Default for DifficultyConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            target_interval_secs: default_target_interval_secs(),
            update_channel_capacity: default_update_channel_capacity(),
        }
    }
}

fn default_window_size() -> usize {
    16
}

fn default_target_interval_secs() -> f64 {
    10.0
}

fn default_update_channel_capacity() -> usize {
    256
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct JobsConfig {
    /// Jobs kept for validating shares, oldest dropped first
    #[serde(default = "default_recent_jobs_capacity")]
    pub recent_jobs_capacity: usize,
    /// Seconds older jobs stay valid after a clean job
    #[serde(default = "default_clean_grace_secs")]
    pub clean_grace_secs: u64,
    #[serde(default = "default_template_poll_secs")]
    pub template_poll_secs: u64,
    /// JSON file the block template is read from
    #[serde(default = "default_template_file")]
    pub template_file: String,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            recent_jobs_capacity: default_recent_jobs_capacity(),
            clean_grace_secs: default_clean_grace_secs(),
            template_poll_secs: default_template_poll_secs(),
            template_file: default_template_file(),
        }
    }
}

fn default_recent_jobs_capacity() -> usize {
    16
}

fn default_clean_grace_secs() -> u64 {
    5
}

fn default_template_poll_secs() -> u64 {
    1
}

fn default_template_file() -> String {
    "template.json".to_string()
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ValidatorConfig {
    /// Maximum number of concurrent validation tasks
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_submission_timeout_ms")]
    pub submission_timeout_ms: u64,
    #[serde(default = "default_solution_sink_capacity")]
    pub solution_sink_capacity: usize,
    /// "block" or "drop"
    #[serde(default)]
    pub sink_policy: SinkPolicy,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            submission_timeout_ms: default_submission_timeout_ms(),
            solution_sink_capacity: default_solution_sink_capacity(),
            sink_policy: SinkPolicy::default(),
        }
    }
}

fn default_max_workers() -> usize {
    4
}

fn default_submission_timeout_ms() -> u64 {
    5000
}

fn default_solution_sink_capacity() -> usize {
    1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log to file if specified
    pub file: Option<String>,
    /// Log level (defaults to "info")
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log to the console, defaults to true
    pub console: Option<bool>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: None,
            level: default_log_level(),
            console: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub stratum: StratumConfig,
    #[serde(default)]
    pub difficulty: DifficultyConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load from a config file, with `STRATUM_<SECTION>_<KEY>` environment overrides.
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("STRATUM").separator("_"))
            .build()?
            .try_deserialize()
    }

    pub fn retarget_config(&self) -> RetargetConfig {
        RetargetConfig {
            window_size: self.difficulty.window_size,
            target_interval: Duration::from_secs_f64(self.difficulty.target_interval_secs.max(0.001)),
            minimum_difficulty: self.stratum.minimum_difficulty,
            maximum_difficulty: self.stratum.maximum_difficulty,
        }
    }

    pub fn validator_config(&self) -> ShareValidatorConfig {
        ShareValidatorConfig {
            max_workers: self.validator.max_workers,
            submission_timeout: Duration::from_millis(self.validator.submission_timeout_ms),
            sink_policy: self.validator.sink_policy,
        }
    }

    pub fn session_timeouts(&self) -> SessionTimeouts {
        SessionTimeouts {
            idle_timeout: Duration::from_secs(self.stratum.idle_timeout_secs),
            sweep_interval: Duration::from_secs(self.stratum.sweep_interval_secs.max(1)),
        }
    }

    pub fn connection_limits(&self) -> ConnectionLimits {
        ConnectionLimits {
            max_line_length: self.stratum.max_line_length,
            write_timeout: Duration::from_secs(self.stratum.write_timeout_secs),
        }
    }

    pub fn with_stratum_hostname(mut self, stratum_hostname: String) -> Self {
        self.stratum.hostname = stratum_hostname;
        self
    }

    pub fn with_stratum_port(mut self, stratum_port: u16) -> Self {
        self.stratum.port = stratum_port;
        self
    }

    pub fn with_start_difficulty(mut self, start_difficulty: f64) -> Self {
        self.stratum.start_difficulty = start_difficulty;
        self
    }

    pub fn with_version_mask(mut self, version_mask: Option<u32>) -> Self {
        self.stratum.version_mask = version_mask;
        self
    }

    pub fn with_template_file(mut self, template_file: String) -> Self {
        self.jobs.template_file = template_file;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use temp_env::with_var;

    const FULL_CONFIG: &str = r#"
[stratum]
hostname = "0.0.0.0"
port = 3333
start_difficulty = 32
minimum_difficulty = 8
maximum_difficulty = 1000000
version_mask = "1fffe000"
idle_timeout_secs = 600

[stratum.credentials]
alice = "secret"

[difficulty]
window_size = 8
target_interval_secs = 15

[jobs]
recent_jobs_capacity = 32
template_file = "/var/lib/pool/template.json"

[validator]
max_workers = 8
submission_timeout_ms = 250
sink_policy = "drop"

[logging]
level = "debug"
console = false
"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_full_config() {
        let file = write_config(FULL_CONFIG);
        let config = Config::load(file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.stratum.hostname, "0.0.0.0");
        assert_eq!(config.stratum.start_difficulty, 32.0);
        assert_eq!(config.stratum.version_mask, Some(0x1fffe000));
        assert_eq!(
            config.stratum.credentials.as_ref().unwrap().get("alice"),
            Some(&"secret".to_string())
        );
        assert_eq!(config.difficulty.window_size, 8);
        assert_eq!(config.jobs.recent_jobs_capacity, 32);
        assert_eq!(config.jobs.template_file, "/var/lib/pool/template.json");
        assert_eq!(config.validator.sink_policy, SinkPolicy::Drop);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.console, Some(false));

        let retarget = config.retarget_config();
        assert_eq!(retarget.target_interval, Duration::from_secs(15));
        assert_eq!(retarget.minimum_difficulty, 8.0);
        assert_eq!(retarget.maximum_difficulty, 1e6);

        let validator = config.validator_config();
        assert_eq!(validator.max_workers, 8);
        assert_eq!(validator.submission_timeout, Duration::from_millis(250));
        assert_eq!(config.session_timeouts().idle_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let file = write_config("[stratum]\nhostname = \"127.0.0.1\"\nport = 3333\n");
        let config = Config::load(file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.stratum.extranonce2_size, 8);
        assert_eq!(config.stratum.version_mask, None);
        assert!(config.stratum.credentials.is_none());
        assert_eq!(config.difficulty, DifficultyConfig::default());
        assert_eq!(config.jobs, JobsConfig::default());
        assert_eq!(config.validator, ValidatorConfig::default());
        assert_eq!(config.validator.sink_policy, SinkPolicy::Block);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.connection_limits(), ConnectionLimits::default());
        assert_eq!(config.session_timeouts(), SessionTimeouts::default());
    }

    #[test]
    fn test_invalid_version_mask() {
        let file = write_config(
            "[stratum]\nhostname = \"127.0.0.1\"\nport = 3333\nversion_mask = \"xyz\"\n",
        );
        assert!(Config::load(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_config_builder() {
        let file = write_config(FULL_CONFIG);
        let config = Config::load(file.path().to_str().unwrap())
            .unwrap()
            .with_stratum_hostname("127.0.0.1".to_string())
            .with_stratum_port(0)
            .with_start_difficulty(2.0)
            .with_version_mask(None)
            .with_template_file("template.json".to_string());

        assert_eq!(config.stratum.hostname, "127.0.0.1");
        assert_eq!(config.stratum.port, 0);
        assert_eq!(config.stratum.start_difficulty, 2.0);
        assert_eq!(config.stratum.version_mask, None);
        assert_eq!(config.jobs.template_file, "template.json");
    }

    #[test]
    fn test_config_from_env_vars() {
        let file = write_config(FULL_CONFIG);
        with_var("STRATUM_STRATUM_PORT", Some("4444"), || {
            let config = Config::load(file.path().to_str().unwrap()).unwrap();

            // Check that the environment variable overrides the config file value
            assert_eq!(config.stratum.port, 4444);
        });
    }
}
