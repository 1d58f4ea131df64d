pub mod pprof;
pub mod pprofpb;
mod validate;

use crate::profile::{SampleTypeConfig, SampleTypeConfigs};
pub use pprof::PprofParser;
use std::collections::BTreeMap;
use std::sync::Arc;
pub use validate::validate_pprof_profile;

#[derive(Debug, Clone, Default)]
pub struct ParserConfig {
    pub sample_types: Arc<SampleTypeConfigs>,
    pub skip_exemplars: bool,
}

/// Stateful profile decoder.
///
/// A parser outlives a single parse call: for cumulative sample types it
/// keeps the counters of the last profile it has seen, which become the
/// baseline for the next one.
pub trait Parser: Send {
    /// Records `previous` as the baseline for cumulative sample types
    /// without producing any output.
    fn seed(&mut self, previous: &[u8]) -> anyhow::Result<()>;

    fn parse(&mut self, profile: &[u8]) -> anyhow::Result<Vec<ParsedProfile>>;
}

pub trait ParserFactory: Send + Sync {
    fn new_parser(&self, config: ParserConfig) -> Box<dyn Parser>;
}

impl<F> ParserFactory for F
where
    F: Fn(ParserConfig) -> Box<dyn Parser> + Send + Sync,
{
    fn new_parser(&self, config: ParserConfig) -> Box<dyn Parser> {
        self(config)
    }
}

/// A call stack with the labels attached to its sample.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stack {
    pub labels: BTreeMap<String, String>,
    /// Function names, root first, separated by `;`.
    pub frames: String,
}

impl Stack {
    pub fn new(frames: impl Into<String>) -> Self {
        Self {
            labels: BTreeMap::new(),
            frames: frames.into(),
        }
    }
}

/// Values of one sample type, keyed by stack. For cumulative types these are
/// already deltas against the previous profile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedProfile {
    pub sample_type: String,
    pub unit: String,
    pub config: SampleTypeConfig,
    pub samples: BTreeMap<Stack, i64>,
}

impl ParsedProfile {
    pub fn total(&self) -> i64 {
        self.samples
            .values()
            .fold(0i64, |acc, v| acc.saturating_add(*v))
    }

    /// Name the sample type should be reported under.
    pub fn display_name(&self) -> &str {
        self.config
            .display_name
            .as_deref()
            .unwrap_or(&self.sample_type)
    }
}
