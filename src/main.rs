use anyhow::{bail, Context as _};
use chrono::Utc;
use evprofiler_ingest::ingestion::{
    Context, Format, IngestInput, Ingester, Key, Metadata, PprofIngester, PutInput, Putter,
};
use evprofiler_ingest::metadata::{AggregationType, Units};
use evprofiler_ingest::profile::{RawProfile, SampleTypeConfigs};
use std::sync::Arc;
use std::time::Duration;

const USAGE: &str = "usage: evprofiler-ingest [--cumulative] [--config sample_types.json] \
                     [--timeout secs] <key> <profile.pprof>...";

/// Logs what would be stored.
struct LogPutter;

impl Putter for LogPutter {
    fn put(&self, input: PutInput) -> anyhow::Result<()> {
        let total: i64 = input.samples.values().sum();
        log::info!(
            "{}: {} stacks, {} {} ({})",
            input.key,
            input.samples.len(),
            total,
            input.units,
            input.aggregation_type
        );
        for (stack, value) in input.samples.iter() {
            log::debug!("  {} {}", stack.frames, value);
        }
        Ok(())
    }
}

struct Args {
    cumulative: bool,
    config: Option<String>,
    timeout: Duration,
    key: Key,
    files: Vec<String>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut cumulative = false;
    let mut config = None;
    let mut timeout = Duration::from_secs(30);
    let mut positional = vec![];

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--cumulative" => cumulative = true,
            "--config" => config = Some(args.next().context("--config needs a path")?),
            "--timeout" => {
                let secs: u64 = args
                    .next()
                    .context("--timeout needs a value")?
                    .parse()
                    .context("--timeout must be a number of seconds")?;
                timeout = Duration::from_secs(secs);
            }
            "-h" | "--help" => bail!(USAGE),
            _ => positional.push(arg),
        }
    }

    if positional.len() < 2 {
        bail!(USAGE);
    }
    let key = Key::parse(&positional[0])?;
    Ok(Args {
        cumulative,
        config,
        timeout,
        key,
        files: positional.split_off(1),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    colog::init();

    let args = parse_args()?;

    let config: SampleTypeConfigs = match &args.config {
        Some(path) => {
            let raw = tokio::fs::read(path).await?;
            serde_json::from_slice(&raw)?
        }
        None => SampleTypeConfigs::new(),
    };

    log::info!(
        "Ingesting {} profiles into {} (cumulative: {})",
        args.files.len(),
        args.key,
        args.cumulative
    );

    let ingester = PprofIngester::new(LogPutter);
    let cx = Context::with_timeout(args.timeout);

    let mut current = Arc::new(RawProfile::builder().sample_type_config(config).build());
    for path in args.files.iter() {
        let data = tokio::fs::read(path).await?;
        let start_time = Utc::now();
        let next = current.push(data, args.cumulative);

        let input = IngestInput {
            format: Format::Pprof,
            profile: Arc::clone(&current),
            metadata: Metadata {
                start_time,
                end_time: Utc::now(),
                key: args.key.clone(),
                spy_name: "evprofiler-ingest".to_string(),
                sample_rate: 100,
                units: Units::Samples,
                aggregation_type: AggregationType::Sum,
            },
        };

        match ingester.ingest(&cx, &input).await {
            Ok(_) => log::info!("Ingested {}", path),
            Err(e) => log::error!("Failed to ingest {}: {:#}", path, e),
        }

        current = match next {
            Some(next) => next,
            None => Arc::new(
                RawProfile::builder()
                    .sample_type_config(current.sample_type_config()?)
                    .build(),
            ),
        };
    }

    Ok(())
}
