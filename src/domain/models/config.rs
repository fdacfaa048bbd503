use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use super::failure::FailureType;

/// Main configuration structure for loadfleet
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Failure collection settings on the coordinator
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Worker health supervision settings on each agent
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Coordinator-side failure handling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CoordinatorConfig {
    /// Directory that receives one JSON file per recorded failure
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Failure types that do not fail the run. Accepts a YAML list or a
    /// comma-separated string (handy for environment overrides).
    #[serde(default, deserialize_with = "deserialize_failure_types")]
    pub non_critical_failures: Vec<FailureType>,
}

impl CoordinatorConfig {
    pub fn non_critical_set(&self) -> HashSet<FailureType> {
        self.non_critical_failures.iter().copied().collect()
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("failures")
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            non_critical_failures: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FailureTypeList {
    List(Vec<FailureType>),
    Csv(String),
}

fn deserialize_failure_types<'de, D>(deserializer: D) -> Result<Vec<FailureType>, D::Error>
where
    D: Deserializer<'de>,
{
    match FailureTypeList::deserialize(deserializer)? {
        FailureTypeList::List(types) => Ok(types),
        FailureTypeList::Csv(raw) => {
            let mut types: Vec<FailureType> = FailureType::parse_set(&raw)
                .map_err(serde::de::Error::custom)?
                .into_iter()
                .collect();
            types.sort();
            Ok(types)
        }
    }
}

/// Agent-side health supervision
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SupervisorConfig {
    /// Delay between supervision passes in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Directory workers drop `.oome` and `.exception` files into
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Endpoint attached to failures reported by this agent
    #[serde(default = "default_agent_endpoint")]
    pub agent_endpoint: String,
}

const fn default_interval_ms() -> u64 {
    1000
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("workers")
}

fn default_agent_endpoint() -> String {
    "127.0.0.1:9000".to_string()
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            scratch_dir: default_scratch_dir(),
            agent_endpoint: default_agent_endpoint(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub enable_stdout: bool,

    /// Log file rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

const fn default_true() -> bool {
    true
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            enable_stdout: true,
            rotation: default_rotation(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_critical_failures_from_list() {
        let yaml = r"
coordinator:
  non_critical_failures:
    - WORKER_TIMEOUT
    - WORKER_EXIT
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.coordinator.non_critical_failures,
            vec![FailureType::WorkerTimeout, FailureType::WorkerExit]
        );
    }

    #[test]
    fn test_non_critical_failures_from_csv() {
        let yaml = "coordinator:\n  non_critical_failures: \"WORKER_EXIT, WORKER_TIMEOUT\"\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let set = config.coordinator.non_critical_set();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&FailureType::WorkerExit));
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.supervisor.interval_ms, 1000);
        assert_eq!(config.coordinator.output_dir, PathBuf::from("failures"));
        assert!(config.coordinator.non_critical_failures.is_empty());
        assert_eq!(config.logging.level, "info");
    }
}
