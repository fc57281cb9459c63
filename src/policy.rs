//! TTL policy value types

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{PolicyError, ResolveError};

/// Unit a TTL amount is expressed in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeUnit {
    Seconds,
    #[default]
    Minutes,
    Hours,
}

impl TimeUnit {
    /// Parse a configuration token (`s`, `m`, `h`).
    pub fn parse_token(token: &str) -> Result<Self, ResolveError> {
        match token {
            "s" => Ok(Self::Seconds),
            "m" => Ok(Self::Minutes),
            "h" => Ok(Self::Hours),
            other => Err(ResolveError::InvalidTimeUnit(other.to_owned())),
        }
    }

    /// Parse a token declared directly on a directive.
    ///
    /// Unlike [`TimeUnit::parse_token`], an unrecognized or missing token falls
    /// back to minutes.
    pub fn from_token_or_minutes(token: Option<&str>) -> Self {
        match token {
            None => Self::Minutes,
            Some(token) => Self::parse_token(token).unwrap_or_else(|_| {
                warn!("Unrecognized time unit {:?} on directive, using minutes", token);
                Self::Minutes
            }),
        }
    }

    /// The token this unit is configured with
    pub fn token(self) -> &'static str {
        match self {
            Self::Seconds => "s",
            Self::Minutes => "m",
            Self::Hours => "h",
        }
    }

    /// Convert an amount in this unit to a duration
    pub fn to_duration(self, amount: u64) -> Duration {
        let secs = match self {
            Self::Seconds => amount,
            Self::Minutes => amount.saturating_mul(60),
            Self::Hours => amount.saturating_mul(3600),
        };
        Duration::from_secs(secs)
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Seconds => "seconds",
            Self::Minutes => "minutes",
            Self::Hours => "hours",
        };
        f.write_str(name)
    }
}

/// Kind of store a cache name is backed by
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BackingStoreKind {
    #[default]
    Redis,
    /// Declared for forward compatibility; no store implements it yet.
    Hazelcast,
}

impl FromStr for BackingStoreKind {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "REDIS" => Ok(Self::Redis),
            "HAZELCAST" => Ok(Self::Hazelcast),
            _ => Err(ResolveError::UnknownBackingStoreKind(s.to_owned())),
        }
    }
}

impl fmt::Display for BackingStoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Redis => f.write_str("REDIS"),
            Self::Hazelcast => f.write_str("HAZELCAST"),
        }
    }
}

/// Resolved time-to-live policy for one cache name.
///
/// A negative amount is a legitimate value meaning caching is disabled for
/// the name. Consumers call [`TtlPolicy::validate`] before using a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TtlPolicy {
    pub amount: i64,
    pub unit: TimeUnit,
    pub kind: BackingStoreKind,
}

impl TtlPolicy {
    pub fn new(amount: i64, unit: TimeUnit, kind: BackingStoreKind) -> Self {
        Self { amount, unit, kind }
    }

    /// Policy that disables caching for a name
    pub fn disabled(kind: BackingStoreKind) -> Self {
        Self::new(-1, TimeUnit::default(), kind)
    }

    pub fn is_disabled(&self) -> bool {
        self.amount < 0
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.amount <= 0 {
            return Err(PolicyError::InvalidPolicy("TTL must be positive"));
        }
        Ok(())
    }

    /// Time-to-live as a duration, `None` unless the policy validates
    pub fn ttl(&self) -> Option<Duration> {
        self.validate().ok()?;
        u64::try_from(self.amount)
            .ok()
            .map(|amount| self.unit.to_duration(amount))
    }
}

impl fmt::Display for TtlPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} on {}", self.amount, self.unit, self.kind)
    }
}
