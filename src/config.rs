use std::time::Duration;

use anyhow::{Result, bail};

use crate::cleanup::CleanupConfig;
use crate::sbs::{AssemblyMode, ReaderConfig};
use crate::scheduler::parse_schedule;

/// Current rows are kept this many seconds past the read window
const CURRENT_WINDOW_SLACK_SECONDS: u64 = 2;

#[derive(Debug, Clone, clap::Args)]
pub struct DatabaseArgs {
    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Maximum pooled connections
    #[arg(long, env = "DATABASE_POOL_SIZE", default_value_t = 5)]
    pub pool_size: u32,
}

/// Settings for the ingestion cycle and the retention job
#[derive(Debug, Clone, clap::Args)]
pub struct PipelineConfig {
    /// SBS feed address (host:port)
    #[arg(long, env = "SBS_SOURCE", default_value = "localhost:30003")]
    pub sbs_source: String,

    /// Seconds to sleep between successful ingestion cycles
    #[arg(long, env = "UPDATING_PERIOD", default_value_t = 10)]
    pub updating_period: u64,

    /// Seconds to read from the feed each cycle
    #[arg(long, env = "WAITING_TIME", default_value_t = 4)]
    pub waiting_time: u64,

    /// Days of history kept, measured back from the newest history row
    #[arg(long, env = "MAX_DAYS_HISTORY", default_value_t = 1)]
    pub max_days_history: i64,

    /// Cron expression for the retention job (5 or 6 fields, UTC)
    #[arg(long, env = "CLEANUP_SCHEDULE", default_value = "0 0 * * *")]
    pub cleanup_schedule: String,

    /// How lines are grouped into MSG,1/3/4 triplets
    #[arg(long, env = "SBS_ASSEMBLY", value_enum, default_value_t = AssemblyMode::Keyed)]
    pub assembly: AssemblyMode,

    /// Seconds a partial triplet waits for its remaining parts
    #[arg(long, env = "PARTIAL_EXPIRY", default_value_t = 10)]
    pub partial_expiry: u64,

    /// Seconds to wait after a failed or empty read
    #[arg(long, env = "RETRY_DELAY", default_value_t = 4)]
    pub retry_delay: u64,

    /// Cap on the backoff between failed connection attempts
    #[arg(long, env = "MAX_RETRY_DELAY", default_value_t = 60)]
    pub max_retry_delay: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sbs_source: "localhost:30003".to_string(),
            updating_period: 10,
            waiting_time: 4,
            max_days_history: 1,
            cleanup_schedule: "0 0 * * *".to_string(),
            assembly: AssemblyMode::Keyed,
            partial_expiry: 10,
            retry_delay: 4,
            max_retry_delay: 60,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sbs_source.trim().is_empty() {
            bail!("SBS_SOURCE must not be empty");
        }
        if self.waiting_time == 0 {
            bail!("WAITING_TIME must be at least 1 second");
        }
        if self.updating_period == 0 {
            bail!("UPDATING_PERIOD must be at least 1 second");
        }
        if self.max_days_history < 0 {
            bail!("MAX_DAYS_HISTORY must not be negative");
        }
        if self.max_retry_delay < self.retry_delay {
            bail!(
                "MAX_RETRY_DELAY ({}) must not be less than RETRY_DELAY ({})",
                self.max_retry_delay,
                self.retry_delay
            );
        }
        parse_schedule(&self.cleanup_schedule)?;
        Ok(())
    }

    pub fn reader_config(&self) -> ReaderConfig {
        ReaderConfig {
            address: self.sbs_source.clone(),
            window: Duration::from_secs(self.waiting_time),
            assembly: self.assembly,
            partial_expiry: Duration::from_secs(self.partial_expiry),
        }
    }

    pub fn cleanup_config(&self) -> CleanupConfig {
        CleanupConfig {
            max_days_history: self.max_days_history,
            current_window_seconds: (self.waiting_time + CURRENT_WINDOW_SLACK_SECONDS) as i64,
        }
    }

    pub fn updating_period(&self) -> Duration {
        Duration::from_secs(self.updating_period)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_secs(self.max_retry_delay)
    }
}

#[derive(Debug, Clone, clap::Args)]
pub struct WebArgs {
    /// Interface to bind the read API to
    #[arg(long, env = "WEB_INTERFACE", default_value = "localhost")]
    pub interface: String,

    #[arg(long, env = "WEB_PORT", default_value_t = 8080)]
    pub port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        config: PipelineConfig,
    }

    #[test]
    fn test_defaults_validate() {
        let config = PipelineConfig::default();
        config.validate().unwrap();

        let reader = config.reader_config();
        assert_eq!(reader.window, Duration::from_secs(4));
        assert_eq!(reader.assembly, AssemblyMode::Keyed);
        assert_eq!(config.cleanup_config().current_window_seconds, 6);
        assert_eq!(config.cleanup_config().max_days_history, 1);
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::try_parse_from([
            "skytrail",
            "--sbs-source",
            "feeder:30003",
            "--waiting-time",
            "2",
            "--assembly",
            "sequential",
            "--cleanup-schedule",
            "0 */6 * * *",
        ])
        .unwrap();

        assert_eq!(cli.config.sbs_source, "feeder:30003");
        assert_eq!(cli.config.assembly, AssemblyMode::Sequential);
        assert_eq!(cli.config.cleanup_config().current_window_seconds, 4);
        cli.config.validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_values() {
        let config = PipelineConfig {
            waiting_time: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            cleanup_schedule: "every day".to_string(),
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            retry_delay: 30,
            max_retry_delay: 10,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
