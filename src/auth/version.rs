//! Product-version record and the version floor.
//!
//! Tokens embed the product version current at issue time. Anything below the
//! minimum supported version is refused with an upgrade-required error.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sqlx::{PgPool, Row};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use tracing::{info_span, Instrument};

use crate::cache::StoreError;

/// Dotted numeric version; missing components compare as zero (`1.2 == 1.2.0`).
#[derive(Clone, Debug, Default)]
pub struct ProductVersion {
    parts: Vec<u64>,
}

impl ProductVersion {
    #[must_use]
    pub fn new(parts: Vec<u64>) -> Self {
        Self { parts }
    }

    /// Version assumed for tokens that carry no `ver` claim.
    #[must_use]
    pub fn zero() -> Self {
        Self { parts: vec![0] }
    }

    fn significant(&self) -> &[u64] {
        let len = self
            .parts
            .iter()
            .rposition(|part| *part != 0)
            .map_or(0, |idx| idx + 1);
        &self.parts[..len]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid product version: {0}")]
pub struct InvalidVersion(pub String);

impl FromStr for ProductVersion {
    type Err = InvalidVersion;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim().trim_start_matches(['v', 'V']);
        if trimmed.is_empty() {
            return Err(InvalidVersion(value.to_string()));
        }
        let parts = trimmed
            .split('.')
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| InvalidVersion(value.to_string()))?;
        Ok(Self { parts })
    }
}

impl fmt::Display for ProductVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.parts.iter().map(ToString::to_string).collect();
        f.write_str(&rendered.join("."))
    }
}

impl PartialEq for ProductVersion {
    fn eq(&self, other: &Self) -> bool {
        self.significant() == other.significant()
    }
}

impl Eq for ProductVersion {}

impl PartialOrd for ProductVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProductVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for idx in 0..len {
            let left = self.parts.get(idx).copied().unwrap_or(0);
            let right = other.parts.get(idx).copied().unwrap_or(0);
            match left.cmp(&right) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl Serialize for ProductVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProductVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Older tokens carried the version as a bare number.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Text(String),
            Integer(u64),
            Float(f64),
        }

        match Wire::deserialize(deserializer)? {
            Wire::Text(text) => text.parse().map_err(serde::de::Error::custom),
            Wire::Integer(value) => Ok(Self::new(vec![value])),
            Wire::Float(value) => value.to_string().parse().map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("minimum supported version {min_supported} exceeds latest {latest}")]
    FloorAboveLatest {
        latest: ProductVersion,
        min_supported: ProductVersion,
    },
}

/// Latest and minimum-supported versions. Always satisfies `min_supported <= latest`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionInfo {
    latest: ProductVersion,
    min_supported: ProductVersion,
}

impl VersionInfo {
    /// # Errors
    /// Returns an error when the floor is above the latest version.
    pub fn new(latest: ProductVersion, min_supported: ProductVersion) -> Result<Self, VersionError> {
        if min_supported > latest {
            return Err(VersionError::FloorAboveLatest {
                latest,
                min_supported,
            });
        }
        Ok(Self {
            latest,
            min_supported,
        })
    }

    #[must_use]
    pub fn latest(&self) -> &ProductVersion {
        &self.latest
    }

    #[must_use]
    pub fn min_supported(&self) -> &ProductVersion {
        &self.min_supported
    }
}

/// Read on every token operation so a raised floor takes effect immediately.
#[async_trait]
pub trait VersionSource: Send + Sync {
    async fn current(&self) -> Result<VersionInfo, StoreError>;
}

#[derive(Clone, Debug)]
pub struct StaticVersionSource {
    info: VersionInfo,
}

impl StaticVersionSource {
    #[must_use]
    pub fn new(info: VersionInfo) -> Self {
        Self { info }
    }
}

#[async_trait]
impl VersionSource for StaticVersionSource {
    async fn current(&self) -> Result<VersionInfo, StoreError> {
        Ok(self.info.clone())
    }
}

/// Reads the newest row of `product_versions`, falling back to the configured pair.
pub struct PgVersionSource {
    pool: PgPool,
    fallback: VersionInfo,
}

impl PgVersionSource {
    #[must_use]
    pub fn new(pool: PgPool, fallback: VersionInfo) -> Self {
        Self { pool, fallback }
    }
}

#[async_trait]
impl VersionSource for PgVersionSource {
    async fn current(&self) -> Result<VersionInfo, StoreError> {
        let query = r"
            SELECT latest, min_supported
            FROM product_versions
            ORDER BY updated_at DESC
            LIMIT 1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(query)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        let Some(row) = row else {
            return Ok(self.fallback.clone());
        };

        let parse = |column: &str| -> Result<ProductVersion, StoreError> {
            let raw: String = row.get(column);
            raw.parse().map_err(|_| StoreError::Malformed {
                key: format!("product_versions.{column}"),
            })
        };
        VersionInfo::new(parse("latest")?, parse("min_supported")?).map_err(|_| {
            StoreError::Malformed {
                key: "product_versions".to_string(),
            }
        })
    }
}
