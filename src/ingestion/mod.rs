mod context;
mod key;
mod pprof;

use crate::metadata::{AggregationType, Units};
use crate::parser::Stack;
use crate::profile::RawProfile;
use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
pub use context::{Context, ContextError};
pub use key::{Key, ParseKeyError, RESERVED_NAME_LABEL};
pub use pprof::PprofIngester;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Consumer of submitted profiles.
#[async_trait]
pub trait Ingester: Send + Sync {
    /// Decodes `input.profile` according to `input.format`, attributes the
    /// result to `input.metadata.key` and hands it on for storage. Work must
    /// stop once `cx` is done.
    async fn ingest(&self, cx: &Context, input: &IngestInput) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct IngestInput {
    pub format: Format,
    pub profile: Arc<RawProfile>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Pprof,
    Jfr,
    Trie,
    Tree,
    Lines,
    Speedscope,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pprof => "pprof",
            Self::Jfr => "jfr",
            Self::Trie => "trie",
            Self::Tree => "tree",
            Self::Lines => "lines",
            Self::Speedscope => "speedscope",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let f = match s {
            "pprof" => Self::Pprof,
            "jfr" => Self::Jfr,
            "trie" => Self::Trie,
            "tree" => Self::Tree,
            "lines" => Self::Lines,
            "speedscope" => Self::Speedscope,
            _ => bail!("unknown format {:?}", s),
        };
        Ok(f)
    }
}

#[derive(Debug, Clone)]
pub struct Metadata {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub key: Key,
    pub spy_name: String,
    pub sample_rate: u32,
    pub units: Units,
    pub aggregation_type: AggregationType,
}

impl Metadata {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.start_time > self.end_time {
            bail!(
                "start time {} is after end time {}",
                self.start_time,
                self.end_time
            );
        }
        if self.key.app_name().is_empty() {
            bail!("key has no app name");
        }
        Ok(())
    }
}

/// One decoded sample type, ready to be merged into its timeline.
#[derive(Debug, Clone)]
pub struct PutInput {
    pub key: Key,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub spy_name: String,
    pub sample_rate: u32,
    pub units: Units,
    pub aggregation_type: AggregationType,
    pub samples: BTreeMap<Stack, i64>,
}

/// Destination for decoded samples: aggregation and storage live behind it.
pub trait Putter: Send + Sync {
    fn put(&self, input: PutInput) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn metadata(start: i64, end: i64) -> Metadata {
        Metadata {
            start_time: Utc.timestamp_opt(start, 0).unwrap(),
            end_time: Utc.timestamp_opt(end, 0).unwrap(),
            key: Key::parse("app.cpu{env=test}").unwrap(),
            spy_name: "gospy".to_string(),
            sample_rate: 100,
            units: Units::Samples,
            aggregation_type: AggregationType::Sum,
        }
    }

    #[test]
    fn test_metadata_validate() {
        assert!(metadata(10, 20).validate().is_ok());
        assert!(metadata(20, 20).validate().is_ok());
        assert!(metadata(21, 20).validate().is_err());
    }

    #[test]
    fn test_format() {
        assert_eq!(Format::Pprof, "pprof".parse().unwrap());
        assert_eq!("speedscope", Format::Speedscope.to_string());
        assert!("protobuf".parse::<Format>().is_err());
    }
}
