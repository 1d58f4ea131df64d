use crate::metadata::{AggregationType, Units};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sample type name to its decoding hints.
pub type SampleTypeConfigs = HashMap<String, SampleTypeConfig>;

/// Per sample type hints for the parser and whatever aggregates its output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleTypeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<Units>,
    #[serde(
        default,
        rename = "display-name",
        skip_serializing_if = "Option::is_none"
    )]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregationType>,
    /// Values are monotonically increasing counters and must be diffed
    /// against the previous sample.
    #[serde(default, skip_serializing_if = "is_false")]
    pub cumulative: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub sampled: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_omits_defaults() {
        let c = SampleTypeConfig {
            units: Some(Units::Bytes),
            cumulative: true,
            ..Default::default()
        };
        assert_eq!(
            r#"{"units":"bytes","cumulative":true}"#,
            serde_json::to_string(&c).unwrap()
        );
    }

    #[test]
    fn test_decode_go_style_config() {
        let raw = r#"{
            "alloc_space": {"units": "bytes", "aggregation": "sum", "display-name": "alloc_space", "cumulative": true},
            "cpu": {"units": "samples", "sampled": true}
        }"#;
        let configs: SampleTypeConfigs = serde_json::from_str(raw).unwrap();
        assert_eq!(2, configs.len());
        let alloc = &configs["alloc_space"];
        assert!(alloc.cumulative);
        assert_eq!(Some("alloc_space"), alloc.display_name.as_deref());
        assert_eq!(Some(AggregationType::Sum), alloc.aggregation);
        assert!(configs["cpu"].sampled);
        assert!(!configs["cpu"].cumulative);
    }
}
