//! Retention tiers and their effect on stored-object lifecycle.

use std::collections::BTreeMap;
use std::num::NonZeroU32;

use time::{Duration, OffsetDateTime};

use crate::domain::error::DomainError;

/// Name of the tier used when a deployment configures none.
pub const DEFAULT_TIER: &str = "standard";

/// Roughly seven years, the common regulatory floor for retained evidence.
pub const DEFAULT_RETENTION_DAYS: u32 = 2_555;

/// Effect a tier has on an object's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierEffect {
    pub retain_days: NonZeroU32,
}

impl TierEffect {
    pub fn retain_until(&self, captured_at: OffsetDateTime) -> OffsetDateTime {
        captured_at + Duration::days(i64::from(self.retain_days.get()))
    }
}

/// Enumerated `{tier: effect}` table handed to the pipeline at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    default_tier: String,
    tiers: BTreeMap<String, TierEffect>,
}

impl RetentionPolicy {
    pub fn new(
        default_tier: impl Into<String>,
        tiers: BTreeMap<String, TierEffect>,
    ) -> Result<Self, DomainError> {
        let default_tier = default_tier.into();
        if !tiers.contains_key(&default_tier) {
            return Err(DomainError::validation(format!(
                "default retention tier `{default_tier}` is not defined"
            )));
        }
        Ok(Self {
            default_tier,
            tiers,
        })
    }

    pub fn default_tier(&self) -> &str {
        &self.default_tier
    }

    /// Resolve a requested tier name, falling back to the default.
    pub fn resolve(&self, requested: Option<&str>) -> Result<(&str, TierEffect), DomainError> {
        let name = requested
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(self.default_tier.as_str());

        self.tiers
            .get_key_value(name)
            .map(|(name, effect)| (name.as_str(), *effect))
            .ok_or_else(|| DomainError::validation(format!("unknown retention tier `{name}`")))
    }

    pub fn tiers(&self) -> impl Iterator<Item = (&str, &TierEffect)> {
        self.tiers.iter().map(|(name, effect)| (name.as_str(), effect))
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        let mut tiers = BTreeMap::new();
        tiers.insert(
            DEFAULT_TIER.to_string(),
            TierEffect {
                retain_days: NonZeroU32::new(DEFAULT_RETENTION_DAYS).unwrap_or(NonZeroU32::MIN),
            },
        );
        Self {
            default_tier: DEFAULT_TIER.to_string(),
            tiers,
        }
    }
}
