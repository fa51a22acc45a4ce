//! Executor configuration.

use serde::{Deserialize, Serialize};

/// Prefix marking locally synthesized entities that await their server copy.
pub const DEFAULT_PROVISIONAL_PREFIX: &str = "temp-";

/// Default capacity of the notice and store event channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// How a failed mutation puts its views back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackPolicy {
    /// Restore the captured value only where the view still holds this
    /// mutation's write; elsewhere revert just the entities it still owns (default)
    #[default]
    Guarded,
    /// Write every captured value back verbatim, even over newer commits
    LastSettleWins,
}

impl std::str::FromStr for RollbackPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "guarded" => Ok(RollbackPolicy::Guarded),
            "last-settle-wins" => Ok(RollbackPolicy::LastSettleWins),
            other => Err(format!("unknown rollback policy: {other}")),
        }
    }
}

/// Configuration for a [`crate::MutationExecutor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutorConfig {
    /// Rollback behaviour on remote failure
    pub rollback_policy: RollbackPolicy,
    /// Id prefix of provisional entities
    pub provisional_prefix: String,
    /// Capacity of the notice broadcast channel
    pub notice_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            rollback_policy: RollbackPolicy::default(),
            provisional_prefix: DEFAULT_PROVISIONAL_PREFIX.to_string(),
            notice_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ExecutorConfig {
    /// Use the given rollback policy.
    pub fn with_rollback_policy(mut self, policy: RollbackPolicy) -> Self {
        self.rollback_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ExecutorConfig::default();
        assert_eq!(config.rollback_policy, RollbackPolicy::Guarded);
        assert_eq!(config.provisional_prefix, "temp-");
    }

    #[test]
    fn parse_policy() {
        assert_eq!("guarded".parse(), Ok(RollbackPolicy::Guarded));
        assert_eq!(
            "last-settle-wins".parse(),
            Ok(RollbackPolicy::LastSettleWins)
        );
        assert!("newest".parse::<RollbackPolicy>().is_err());
    }

    #[test]
    fn deserialize_partial() {
        let config: ExecutorConfig =
            serde_json::from_str(r#"{"rollbackPolicy": "last-settle-wins"}"#).unwrap();
        assert_eq!(config.rollback_policy, RollbackPolicy::LastSettleWins);
        assert_eq!(config.provisional_prefix, DEFAULT_PROVISIONAL_PREFIX);
    }
}
