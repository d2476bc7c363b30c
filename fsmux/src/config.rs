use std::num::ParseIntError;
use std::time::Duration;

use clap::Args;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Tunables of the file service.
///
/// Every setting can be given as a flag or through its `FSMUX_*`
/// environment variable.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct FileServiceConfig {
    /// Capacity of each broadcast channel; lagging subscribers lose the oldest
    /// events
    #[arg(long, env = "FSMUX_EVENT_CAPACITY", default_value_t = 256)]
    pub event_capacity: usize,

    /// Upper bound in milliseconds on waiting for activation joiners, unset
    /// waits for all
    #[arg(
        long = "activation-timeout-ms",
        env = "FSMUX_ACTIVATION_TIMEOUT_MS",
        value_parser = parse_millis
    )]
    pub activation_timeout: Option<Duration>,

    /// Files larger than this are refused by reads with
    /// FILE_EXCEEDS_MEMORY_LIMIT
    #[arg(long, env = "FSMUX_MAX_IN_MEMORY_SIZE")]
    pub max_in_memory_size: Option<u64>,

    /// Buffer size for handle based reads
    #[arg(long, env = "FSMUX_READ_CHUNK_SIZE", default_value_t = 256 * 1024)]
    pub read_chunk_size: usize,
}

impl Default for FileServiceConfig {
    fn default() -> Self {
        Self {
            event_capacity: 256,
            activation_timeout: None,
            max_in_memory_size: None,
            read_chunk_size: 256 * 1024, // 256KiB
        }
    }
}

impl FileServiceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_capacity == 0 {
            return Err(ConfigError::Zero("event_capacity"));
        }
        if self.read_chunk_size == 0 {
            return Err(ConfigError::Zero("read_chunk_size"));
        }
        Ok(())
    }
}

fn parse_millis(value: &str) -> Result<Duration, ParseIntError> {
    value.trim().parse().map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{CommandFactory, Parser};

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        config: FileServiceConfig,
    }

    #[test]
    fn test_defaults_match_flags() {
        let cli = TestCli::try_parse_from(["fsmux"]).unwrap();
        assert_eq!(cli.config, FileServiceConfig::default());
    }

    #[test]
    fn test_flag_overrides() {
        let cli = TestCli::try_parse_from([
            "fsmux",
            "--event-capacity",
            "16",
            "--activation-timeout-ms",
            "1500",
            "--max-in-memory-size",
            "4096",
            "--read-chunk-size",
            "8",
        ])
        .unwrap();
        assert_eq!(cli.config.event_capacity, 16);
        assert_eq!(
            cli.config.activation_timeout,
            Some(Duration::from_millis(1500))
        );
        assert_eq!(cli.config.max_in_memory_size, Some(4096));
        assert_eq!(cli.config.read_chunk_size, 8);
    }

    #[test]
    fn test_settings_are_bound_to_env() {
        let command = TestCli::command();
        let env_of = |id: &str| {
            command
                .get_arguments()
                .find(|arg| arg.get_id() == id)
                .and_then(|arg| arg.get_env())
                .map(|env| env.to_string_lossy().into_owned())
        };
        assert_eq!(env_of("event_capacity").as_deref(), Some("FSMUX_EVENT_CAPACITY"));
        assert_eq!(
            env_of("activation_timeout").as_deref(),
            Some("FSMUX_ACTIVATION_TIMEOUT_MS")
        );
        assert_eq!(
            env_of("max_in_memory_size").as_deref(),
            Some("FSMUX_MAX_IN_MEMORY_SIZE")
        );
        assert_eq!(env_of("read_chunk_size").as_deref(), Some("FSMUX_READ_CHUNK_SIZE"));
    }

    #[test]
    fn test_invalid_values() {
        assert!(TestCli::try_parse_from(["fsmux", "--event-capacity", "lots"]).is_err());
        assert!(TestCli::try_parse_from(["fsmux", "--activation-timeout-ms", "soon"]).is_err());

        let cli = TestCli::try_parse_from(["fsmux", "--read-chunk-size", "0"]).unwrap();
        assert_eq!(
            cli.config.validate(),
            Err(ConfigError::Zero("read_chunk_size"))
        );
    }
}
