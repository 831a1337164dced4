use std::path::Path;
use std::time::Duration;
use anyhow::anyhow;
use tracing::debug;
use crate::error::{ArqError, ArqResult};

/// This is the number of consecutive timeouts without acknowledgement progress that a sender
///  tolerates: the timeout after that aborts the session.
pub const DEFAULT_MAX_TIMEOUTS: u32 = 6;

#[derive(Debug, Clone)]
pub struct ArqConfig {
    /// maximum number of unacknowledged segments in flight
    pub window_size: usize,
    /// how long a single receive attempt waits before the window is resent
    pub timeout: Duration,
    /// segment payload size in bytes; the last segment of a message may be shorter
    pub max_segment_size: usize,
    pub max_timeouts: u32,
}

impl ArqConfig {
    pub fn new(window_size: usize, timeout: Duration, max_segment_size: usize) -> ArqConfig {
        ArqConfig {
            window_size,
            timeout,
            max_segment_size,
            max_timeouts: DEFAULT_MAX_TIMEOUTS,
        }
    }

    pub fn validate(&self) -> ArqResult<()> {
        if self.window_size == 0 {
            return Err(ArqError::InvalidConfiguration("window size must be positive".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(ArqError::InvalidConfiguration("timeout must be positive".to_string()));
        }
        if self.max_segment_size == 0 {
            return Err(ArqError::InvalidConfiguration("maximum segment size must be positive".to_string()));
        }
        Ok(())
    }
}


/// Settings as they are kept in a settings file: one `key: value` pair per line, split on the
///  first colon. Lines without a colon are ignored, unknown keys are skipped.
///
/// ```ascii
/// message: hello world
/// window_size: 4
/// timeout: 2.5
/// maximum_msg_size: 20
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSettings {
    pub message: Option<String>,
    pub window_size: Option<usize>,
    pub timeout: Option<Duration>,
    pub maximum_msg_size: Option<usize>,
}

impl SessionSettings {
    pub async fn from_file(path: impl AsRef<Path>) -> anyhow::Result<SessionSettings> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await
            .map_err(|e| anyhow!("cannot read settings file {:?}: {}", path, e))?;
        SessionSettings::parse(&text)
    }

    pub fn parse(text: &str) -> anyhow::Result<SessionSettings> {
        let mut result = SessionSettings::default();

        for line in text.lines() {
            let Some((key, value)) = line.trim().split_once(':') else {
                continue;
            };
            let value = value.trim();

            match key.trim() {
                "message" => result.message = Some(value.to_string()),
                "window_size" => result.window_size = Some(value.parse()
                    .map_err(|e| anyhow!("invalid window_size {:?}: {}", value, e))?),
                "timeout" => result.timeout = Some(parse_seconds(value)?),
                "maximum_msg_size" => result.maximum_msg_size = Some(value.parse()
                    .map_err(|e| anyhow!("invalid maximum_msg_size {:?}: {}", value, e))?),
                other => debug!("skipping unknown settings key {:?}", other),
            }
        }
        Ok(result)
    }
}

pub fn parse_seconds(s: &str) -> anyhow::Result<Duration> {
    let seconds: f64 = s.trim().parse()
        .map_err(|e| anyhow!("invalid number of seconds {:?}: {}", s, e))?;
    Duration::try_from_secs_f64(seconds)
        .map_err(|e| anyhow!("invalid number of seconds {:?}: {}", s, e))
}
