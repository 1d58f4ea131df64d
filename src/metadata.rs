use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unit of the values carried by a sample type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Units {
    #[default]
    Samples,
    Objects,
    Goroutines,
    Bytes,
    LockSamples,
    LockNanoseconds,
}

impl Units {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Samples => "samples",
            Self::Objects => "objects",
            Self::Goroutines => "goroutines",
            Self::Bytes => "bytes",
            Self::LockSamples => "lock_samples",
            Self::LockNanoseconds => "lock_nanoseconds",
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Units {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let u = match s {
            "samples" => Self::Samples,
            "objects" => Self::Objects,
            "goroutines" => Self::Goroutines,
            "bytes" => Self::Bytes,
            "lock_samples" => Self::LockSamples,
            "lock_nanoseconds" => Self::LockNanoseconds,
            _ => bail!("unknown units {:?}", s),
        };
        Ok(u)
    }
}

/// How values of consecutive samples in a timeline are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationType {
    #[default]
    Sum,
    Average,
}

impl AggregationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Average => "average",
        }
    }
}

impl fmt::Display for AggregationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "sum" => Ok(Self::Sum),
            "average" | "avg" => Ok(Self::Average),
            _ => bail!("unknown aggregation type {:?}", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_from_str() {
        assert_eq!(Units::LockNanoseconds, "lock_nanoseconds".parse().unwrap());
        assert_eq!("bytes", Units::Bytes.to_string());
        assert!("megabytes".parse::<Units>().is_err());
    }

    #[test]
    fn test_units_serde() {
        let json = serde_json::to_string(&Units::LockSamples).unwrap();
        assert_eq!("\"lock_samples\"", json);
        let u: Units = serde_json::from_str("\"goroutines\"").unwrap();
        assert_eq!(Units::Goroutines, u);
    }

    #[test]
    fn test_aggregation_type() {
        assert_eq!(AggregationType::Average, "avg".parse().unwrap());
        assert_eq!(AggregationType::Sum, AggregationType::default());
        assert_eq!(
            "\"average\"",
            serde_json::to_string(&AggregationType::Average).unwrap()
        );
    }
}
