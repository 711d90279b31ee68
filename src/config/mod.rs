//! Election parameters fixed into a ledger at construction.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ledger::{Amount, BASE_UNIT};

pub const DEFAULT_CAMPAIGN_DURATION_SECS: u64 = 3 * 24 * 3600;
pub const DEFAULT_VOTE_PRICE: Amount = BASE_UNIT / 100;
pub const DEFAULT_COMMISSION_BPS: u32 = 1_000;
pub const BPS_DENOMINATOR: u32 = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("vote_price must be > 0")]
    ZeroVotePrice,
    #[error("commission_bps must be <= 10000, got {0}")]
    CommissionOutOfRange(u32),
    #[error("campaign_duration_secs must be > 0")]
    ZeroDuration,
    #[error("read config {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse config {}: {}", .path.display(), .source)]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Pricing and timing of every campaign run by one ledger.
///
/// Missing fields in a config file fall back to the defaults: a 0.01 unit
/// vote, a 10% commission and a three day voting window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ElectionConfig {
    /// Exact value, in minimal units, that must accompany each vote.
    pub vote_price: Amount,
    /// Share of each vote retained as owner commission, in basis points.
    pub commission_bps: u32,
    /// Length of the voting window measured from campaign creation.
    pub campaign_duration_secs: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            vote_price: DEFAULT_VOTE_PRICE,
            commission_bps: DEFAULT_COMMISSION_BPS,
            campaign_duration_secs: DEFAULT_CAMPAIGN_DURATION_SECS,
        }
    }
}

impl ElectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vote_price == 0 {
            return Err(ConfigError::ZeroVotePrice);
        }
        if self.commission_bps > BPS_DENOMINATOR {
            return Err(ConfigError::CommissionOutOfRange(self.commission_bps));
        }
        if self.campaign_duration_secs == 0 {
            return Err(ConfigError::ZeroDuration);
        }
        Ok(())
    }

    /// Splits an attached value into `(commission, pooled)`.
    ///
    /// The commission is rounded down, so `commission + pooled == value`.
    /// A rate above 100% is capped at the whole value.
    pub fn split(&self, value: Amount) -> (Amount, Amount) {
        let bps = Amount::from(self.commission_bps.min(BPS_DENOMINATOR));
        let denominator = Amount::from(BPS_DENOMINATOR);
        let commission = value / denominator * bps + value % denominator * bps / denominator;
        (commission, value.saturating_sub(commission))
    }
}

/// Load config from a JSON file.
///
/// If the file is missing, returns `ElectionConfig::default()`.
pub fn load_config(path: &Path) -> Result<ElectionConfig, ConfigError> {
    if !path.exists() {
        return Ok(ElectionConfig::default());
    }
    let raw = fs::read(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: ElectionConfig =
        serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_split_of_one_vote() {
        let config = ElectionConfig::default();
        let (commission, pooled) = config.split(config.vote_price);
        assert_eq!(commission, BASE_UNIT / 1_000);
        assert_eq!(pooled, BASE_UNIT * 9 / 1_000);
    }

    #[test]
    fn split_rounds_commission_down_without_losing_value() {
        let config = ElectionConfig {
            vote_price: 7,
            ..ElectionConfig::default()
        };
        assert_eq!(config.split(7), (0, 7));
        assert_eq!(config.split(19), (1, 18));
        assert_eq!(config.split(Amount::MAX).0 + config.split(Amount::MAX).1, Amount::MAX);
    }

    #[test]
    fn split_never_hands_out_more_than_the_value() {
        let config = ElectionConfig {
            commission_bps: 20_000,
            ..ElectionConfig::default()
        };
        assert_eq!(config.split(1_000), (1_000, 0));
    }

    #[test]
    fn validate_rejects_degenerate_values() {
        let bad_price = ElectionConfig {
            vote_price: 0,
            ..ElectionConfig::default()
        };
        assert!(matches!(bad_price.validate(), Err(ConfigError::ZeroVotePrice)));

        let bad_bps = ElectionConfig {
            commission_bps: 10_001,
            ..ElectionConfig::default()
        };
        assert!(matches!(
            bad_bps.validate(),
            Err(ConfigError::CommissionOutOfRange(10_001))
        ));

        let bad_duration = ElectionConfig {
            campaign_duration_secs: 0,
            ..ElectionConfig::default()
        };
        assert!(matches!(bad_duration.validate(), Err(ConfigError::ZeroDuration)));
    }

    #[test]
    fn load_config_fills_missing_fields_and_defaults_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let missing = load_config(&dir.path().join("nope.json")).unwrap();
        assert_eq!(missing, ElectionConfig::default());

        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "campaign_duration_secs": 60 }"#).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.campaign_duration_secs, 60);
        assert_eq!(config.vote_price, DEFAULT_VOTE_PRICE);

        fs::write(&path, r#"{ "commission_bps": 20000 }"#).unwrap();
        assert!(load_config(&path).is_err());
    }
}
