use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

/// Tuning knobs for the tutoring session manager. Loaded once at startup
/// and passed explicitly to the components that need it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TutorConfig {
    /// Delay between run status checks, in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum number of status checks before a run counts as timed out.
    pub max_poll_attempts: u32,
    /// Deployment-wide instruction template, used when neither the lesson
    /// nor the course carries a knowledge base.
    pub global_instructions: Option<String>,
}

impl Default for TutorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            max_poll_attempts: 60,
            global_instructions: None,
        }
    }
}

impl TutorConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_bounded() {
        let config = TutorConfig::default();
        assert!(config.max_poll_attempts > 0);
        assert!(config.poll_interval() > Duration::ZERO);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: TutorConfig = toml::from_str("poll_interval_ms = 250").unwrap();
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.max_poll_attempts, TutorConfig::default().max_poll_attempts);
        assert!(config.global_instructions.is_none());
    }
}
