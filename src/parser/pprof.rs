use super::pprofpb::{Function, Location, Profile, Sample};
use super::{validate_pprof_profile, ParsedProfile, Parser, ParserConfig, ParserFactory, Stack};
use crate::profile::SampleTypeConfig;
use anyhow::Context;
use flate2::read::GzDecoder;
use prost::Message;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;

const EXEMPLAR_LABELS: [&str; 2] = ["profile_id", "span_id"];

/// Parser for pprof payloads, optionally gzipped.
#[derive(Debug)]
pub struct PprofParser {
    config: ParserConfig,
    // Totals of the last profile seen, cumulative sample types only.
    baseline: HashMap<String, BTreeMap<Stack, i64>>,
}

impl PprofParser {
    pub fn new(config: ParserConfig) -> Self {
        Self {
            config,
            baseline: HashMap::new(),
        }
    }

    pub fn factory() -> impl ParserFactory {
        |config: ParserConfig| -> Box<dyn Parser> { Box::new(PprofParser::new(config)) }
    }

    fn decode(data: &[u8]) -> anyhow::Result<Profile> {
        let mut decompressed = Vec::new();
        let data = if data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b {
            GzDecoder::new(data)
                .read_to_end(&mut decompressed)
                .context("failed to decompress gzip")?;
            decompressed.as_slice()
        } else {
            data
        };

        let p = Profile::decode(data).context("failed to decode pprof")?;

        validate_pprof_profile(&p)?;
        Ok(p)
    }

    /// Sample types to extract, by index into `sample_type`. Without any
    /// configuration every sample type is taken as a plain, non cumulative one.
    fn selected(&self, p: &Profile) -> Vec<(usize, String, String, SampleTypeConfig)> {
        p.sample_type
            .iter()
            .enumerate()
            .filter_map(|(i, st)| {
                let name = string_at(&p.string_table, st.r#type).to_string();
                let unit = string_at(&p.string_table, st.unit).to_string();
                if self.config.sample_types.is_empty() {
                    return Some((i, name, unit, SampleTypeConfig::default()));
                }
                let config = self.config.sample_types.get(&name)?.clone();
                Some((i, name, unit, config))
            })
            .collect()
    }

    fn totals(&self, p: &Profile, index: usize) -> BTreeMap<Stack, i64> {
        let mut totals: BTreeMap<Stack, i64> = BTreeMap::new();
        for sample in p.sample.iter() {
            let value = sample.value[index];
            if value == 0 {
                continue;
            }
            let stack = Stack {
                labels: self.labels(p, sample),
                frames: frames(p, sample),
            };
            let total = totals.entry(stack).or_default();
            *total = total.saturating_add(value);
        }
        totals
    }

    fn labels(&self, p: &Profile, sample: &Sample) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        for label in sample.label.iter() {
            if label.str == 0 {
                continue;
            }
            let key = string_at(&p.string_table, label.key);
            if self.config.skip_exemplars && EXEMPLAR_LABELS.contains(&key) {
                continue;
            }
            labels
                .entry(key.to_string())
                .or_insert_with(|| string_at(&p.string_table, label.str).to_string());
        }
        labels
    }
}

impl Parser for PprofParser {
    fn seed(&mut self, previous: &[u8]) -> anyhow::Result<()> {
        let p = Self::decode(previous).context("previous profile")?;
        for (i, name, _, config) in self.selected(&p) {
            if config.cumulative {
                let totals = self.totals(&p, i);
                self.baseline.insert(name, totals);
            }
        }
        Ok(())
    }

    fn parse(&mut self, profile: &[u8]) -> anyhow::Result<Vec<ParsedProfile>> {
        let p = Self::decode(profile)?;
        let mut parsed = Vec::new();

        for (i, name, unit, config) in self.selected(&p) {
            let totals = self.totals(&p, i);
            let samples = if config.cumulative {
                match self.baseline.insert(name.clone(), totals.clone()) {
                    Some(prev) => delta(&prev, totals),
                    None => {
                        log::debug!("No baseline for cumulative sample type {}, skipping", name);
                        continue;
                    }
                }
            } else {
                totals
            };

            parsed.push(ParsedProfile {
                sample_type: name,
                unit,
                config,
                samples,
            });
        }

        Ok(parsed)
    }
}

fn delta(prev: &BTreeMap<Stack, i64>, current: BTreeMap<Stack, i64>) -> BTreeMap<Stack, i64> {
    current
        .into_iter()
        .filter_map(|(stack, value)| {
            let d = value.saturating_sub(prev.get(&stack).copied().unwrap_or_default());
            match d {
                0 => None,
                // Counter went backwards: the process restarted.
                d if d < 0 => Some((stack, value)),
                d => Some((stack, d)),
            }
        })
        .collect()
}

fn string_at(string_table: &[String], idx: i64) -> &str {
    usize::try_from(idx)
        .ok()
        .and_then(|i| string_table.get(i))
        .map(String::as_str)
        .unwrap_or("")
}

fn frames(p: &Profile, sample: &Sample) -> String {
    let mut names: Vec<String> = Vec::with_capacity(sample.location_id.len());
    // Leaf first in pprof, both across locations and across inlined lines.
    for id in sample.location_id.iter().rev() {
        let location = &p.location[*id as usize - 1];
        location_names(p, location, &mut names);
    }
    names.join(";")
}

fn location_names(p: &Profile, location: &Location, names: &mut Vec<String>) {
    if location.line.is_empty() {
        names.push(format!("0x{:x}", location.address));
        return;
    }
    for line in location.line.iter().rev() {
        let name = match line.function_id {
            0 => "",
            id => function_name(p, &p.function[id as usize - 1]),
        };
        if name.is_empty() {
            names.push(format!("0x{:x}", location.address));
        } else {
            names.push(name.to_string());
        }
    }
}

fn function_name<'a>(p: &'a Profile, function: &Function) -> &'a str {
    match string_at(&p.string_table, function.name) {
        "" => string_at(&p.string_table, function.system_name),
        name => name,
    }
}
