//! Core runtime configuration.
//!
//! Configuration is resolved once at startup and passed by reference into every manager.
//! Nothing in the core reads environment variables while handling an operation.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Prefix for the variables understood by [`CoreConfig::from_lookup`].
pub const ENV_PREFIX: &str = "BLOODBANK_";

/// Policy knobs for the request lifecycle, ledger and outreach.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoreConfig {
    /// Minimum interval between donations
    pub donation_cooldown_days: u32,
    /// Expiry = collection date + shelf life
    pub shelf_life_days: u32,
    pub max_units_per_request: u32,
    pub max_units_per_donation: u32,
    /// Outreach notifications count as pending for this long
    pub outreach_ttl_hours: u32,
    /// Donors contacted per outreach cycle
    pub outreach_batch_limit: u32,
    /// Days after a donation-driven fulfillment that collection is scheduled
    pub collection_lead_days: u32,
    /// Default pickup point written into collection plans
    pub default_collection_location: String,
    pub busy_timeout_ms: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            donation_cooldown_days: 90,
            shelf_life_days: 35,
            max_units_per_request: 10,
            max_units_per_donation: 2,
            outreach_ttl_hours: 48,
            outreach_batch_limit: 50,
            collection_lead_days: 1,
            default_collection_location: "Blood bank dispatch desk".to_string(),
            busy_timeout_ms: 5_000,
        }
    }
}

impl CoreConfig {
    /// Check that the policy is coherent.
    pub fn validate(&self) -> CoreResult<()> {
        let positive = [
            ("donation_cooldown_days", self.donation_cooldown_days),
            ("shelf_life_days", self.shelf_life_days),
            ("max_units_per_request", self.max_units_per_request),
            ("max_units_per_donation", self.max_units_per_donation),
            ("outreach_ttl_hours", self.outreach_ttl_hours),
            ("outreach_batch_limit", self.outreach_batch_limit),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(CoreError::Validation(format!("{name} must be positive")));
            }
        }

        if self.max_units_per_donation > self.max_units_per_request {
            return Err(CoreError::Validation(
                "max_units_per_donation cannot exceed max_units_per_request".into(),
            ));
        }

        if self.default_collection_location.trim().is_empty() {
            return Err(CoreError::Validation(
                "default_collection_location cannot be empty".into(),
            ));
        }

        Ok(())
    }

    /// Build a configuration from `BLOODBANK_*` values supplied by the caller,
    /// typically `|key| std::env::var(key).ok()` at process start.
    ///
    /// Unset or blank values keep their defaults; unparseable values are rejected.
    pub fn from_lookup<F>(lookup: F) -> CoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn read<T: std::str::FromStr>(
            lookup: &dyn Fn(&str) -> Option<String>,
            name: &str,
            target: &mut T,
        ) -> CoreResult<()> {
            let key = format!("{ENV_PREFIX}{name}");
            let Some(raw) = lookup(&key).map(|v| v.trim().to_string()) else {
                return Ok(());
            };
            if raw.is_empty() {
                return Ok(());
            }
            *target = raw
                .parse()
                .map_err(|_| CoreError::Validation(format!("{key} has invalid value {raw:?}")))?;
            Ok(())
        }

        let mut config = Self::default();
        read(&lookup, "DONATION_COOLDOWN_DAYS", &mut config.donation_cooldown_days)?;
        read(&lookup, "SHELF_LIFE_DAYS", &mut config.shelf_life_days)?;
        read(&lookup, "MAX_UNITS_PER_REQUEST", &mut config.max_units_per_request)?;
        read(&lookup, "MAX_UNITS_PER_DONATION", &mut config.max_units_per_donation)?;
        read(&lookup, "OUTREACH_TTL_HOURS", &mut config.outreach_ttl_hours)?;
        read(&lookup, "OUTREACH_BATCH_LIMIT", &mut config.outreach_batch_limit)?;
        read(&lookup, "COLLECTION_LEAD_DAYS", &mut config.collection_lead_days)?;
        read(&lookup, "DEFAULT_COLLECTION_LOCATION", &mut config.default_collection_location)?;
        read(&lookup, "BUSY_TIMEOUT_MS", &mut config.busy_timeout_ms)?;

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = CoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.donation_cooldown_days, 90);
        assert_eq!(config.shelf_life_days, 35);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            ("BLOODBANK_OUTREACH_TTL_HOURS", "12"),
            ("BLOODBANK_SHELF_LIFE_DAYS", " "),
        ]
        .into_iter()
        .collect();

        let config = CoreConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.outreach_ttl_hours, 12);
        assert_eq!(config.shelf_life_days, 35);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result = CoreConfig::from_lookup(|k| {
            (k == "BLOODBANK_MAX_UNITS_PER_REQUEST").then(|| "ten".to_string())
        });
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_incoherent_limits() {
        let config = CoreConfig {
            max_units_per_donation: 4,
            max_units_per_request: 3,
            ..CoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_json() {
        let config: CoreConfig = serde_json::from_str(r#"{"outreach_batch_limit": 5}"#).unwrap();
        assert_eq!(config.outreach_batch_limit, 5);
        assert_eq!(config.donation_cooldown_days, 90);
    }
}
