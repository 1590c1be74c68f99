//! Config for statement execution: retries, timeouts, paging and consistency.

use std::{
    num::{NonZeroU32, NonZeroUsize},
    time::Duration,
};

use cql_client::{SessionConfig, cql_types::Consistency};

/// Consistency level accepted on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ConsistencyLevel {
    Any,
    One,
    Two,
    Three,
    #[default]
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    LocalOne,
}

impl From<ConsistencyLevel> for Consistency {
    fn from(level: ConsistencyLevel) -> Self {
        match level {
            ConsistencyLevel::Any => Self::Any,
            ConsistencyLevel::One => Self::One,
            ConsistencyLevel::Two => Self::Two,
            ConsistencyLevel::Three => Self::Three,
            ConsistencyLevel::Quorum => Self::Quorum,
            ConsistencyLevel::All => Self::All,
            ConsistencyLevel::LocalQuorum => Self::LocalQuorum,
            ConsistencyLevel::EachQuorum => Self::EachQuorum,
            ConsistencyLevel::LocalOne => Self::LocalOne,
        }
    }
}

/// CLI config for executing statements against a cluster.
#[derive(Debug, Clone, clap::Parser)]
#[allow(missing_copy_implementations)]
pub struct ExecutionConfig {
    /// Maximum number of times a statement or batch is dispatched, the first attempt
    /// included.
    #[clap(long = "max-attempts", env = "CQL_MAX_ATTEMPTS", default_value = "3", action)]
    pub max_attempts: NonZeroU32,

    /// Wait before the first retry. Doubles with every further retry.
    #[clap(
        long = "retry-backoff-min",
        env = "CQL_RETRY_BACKOFF_MIN",
        default_value = "10ms",
        value_parser = humantime::parse_duration
    )]
    pub retry_backoff_min: Duration,

    /// Upper bound on the wait between retries.
    #[clap(
        long = "retry-backoff-max",
        env = "CQL_RETRY_BACKOFF_MAX",
        default_value = "1s",
        value_parser = humantime::parse_duration
    )]
    pub retry_backoff_max: Duration,

    /// How long a single dispatch may wait for its response. `0s` disables the timeout.
    #[clap(
        long = "request-timeout",
        env = "CQL_REQUEST_TIMEOUT",
        default_value = "12s",
        value_parser = humantime::parse_duration
    )]
    pub request_timeout: Duration,

    /// Rows per page for statements that do not set their own page size.
    #[clap(long = "page-size", env = "CQL_PAGE_SIZE", default_value = "5000", action)]
    pub page_size: NonZeroUsize,

    /// Consistency for statements and batches that do not set their own.
    #[clap(
        long = "consistency",
        env = "CQL_CONSISTENCY",
        default_value_t = ConsistencyLevel::default(),
        value_enum,
        action
    )]
    pub consistency: ConsistencyLevel,
}

impl From<&ExecutionConfig> for SessionConfig {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            retry_backoff_min: config.retry_backoff_min,
            retry_backoff_max: config.retry_backoff_max,
            request_timeout: (!config.request_timeout.is_zero()).then_some(config.request_timeout),
            page_size: Some(config.page_size),
            consistency: config.consistency.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_the_session_defaults() {
        let config = ExecutionConfig::try_parse_from(["client"]).unwrap();
        assert_eq!(SessionConfig::from(&config), SessionConfig::default());
    }

    #[test]
    fn flags_override_defaults() {
        let config = ExecutionConfig::try_parse_from([
            "client",
            "--max-attempts",
            "5",
            "--retry-backoff-min",
            "50ms",
            "--retry-backoff-max",
            "2s",
            "--request-timeout",
            "0s",
            "--page-size",
            "100",
            "--consistency",
            "local-quorum",
        ])
        .unwrap();

        let session = SessionConfig::from(&config);
        assert_eq!(session.max_attempts.get(), 5);
        assert_eq!(session.retry_backoff_min, Duration::from_millis(50));
        assert_eq!(session.retry_backoff_max, Duration::from_secs(2));
        assert_eq!(session.request_timeout, None);
        assert_eq!(session.page_size, NonZeroUsize::new(100));
        assert_eq!(session.consistency, Consistency::LocalQuorum);
    }

    #[test]
    fn zero_attempts_are_rejected() {
        assert!(ExecutionConfig::try_parse_from(["client", "--max-attempts", "0"]).is_err());
        assert!(ExecutionConfig::try_parse_from(["client", "--page-size", "0"]).is_err());
    }

    #[test]
    fn unknown_consistency_is_rejected() {
        assert!(ExecutionConfig::try_parse_from(["client", "--consistency", "serial"]).is_err());
    }
}
