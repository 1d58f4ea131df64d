use super::{Context, Format, IngestInput, Ingester, PutInput, Putter};
use crate::parser::{ParserFactory, PprofParser};
use anyhow::bail;
use async_trait::async_trait;
use std::sync::Arc;

/// Ingests pprof submissions: parses the raw profile (diffing cumulative
/// sample types along its chain) and puts one timeline per sample type.
pub struct PprofIngester<P> {
    putter: P,
    factory: Arc<dyn ParserFactory>,
}

impl<P: Putter> PprofIngester<P> {
    pub fn new(putter: P) -> Self {
        Self::with_factory(putter, Arc::new(PprofParser::factory()))
    }

    pub fn with_factory(putter: P, factory: Arc<dyn ParserFactory>) -> Self {
        Self { putter, factory }
    }

    pub fn putter(&self) -> &P {
        &self.putter
    }
}

#[async_trait]
impl<P: Putter> Ingester for PprofIngester<P> {
    async fn ingest(&self, cx: &Context, input: &IngestInput) -> anyhow::Result<()> {
        input.metadata.validate()?;
        if input.format != Format::Pprof {
            bail!("unsupported format {}", input.format);
        }

        let profile = Arc::clone(&input.profile);
        let factory = Arc::clone(&self.factory);
        // A parse abandoned on cancellation still runs to completion on the
        // blocking pool, so chain state stays consistent.
        let parsed = cx
            .run(tokio::task::spawn_blocking(move || {
                profile.parse(factory.as_ref())
            }))
            .await???;

        let md = &input.metadata;
        let count = parsed.len();
        for p in parsed {
            if let Some(err) = cx.err() {
                return Err(err.into());
            }
            let key = md
                .key
                .with_app_name(format!("{}.{}", md.key.app_name(), p.display_name()));
            log::debug!(
                "Putting {} stacks ({} total) into {}",
                p.samples.len(),
                p.total(),
                key
            );
            self.putter.put(PutInput {
                key,
                start_time: md.start_time,
                end_time: md.end_time,
                spy_name: md.spy_name.clone(),
                sample_rate: md.sample_rate,
                units: p.config.units.unwrap_or(md.units),
                aggregation_type: p.config.aggregation.unwrap_or(md.aggregation_type),
                samples: p.samples,
            })?;
        }

        log::info!("Ingested {} sample types for {}", count, md.key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::{ContextError, Key, Metadata};
    use crate::metadata::{AggregationType, Units};
    use crate::parser::pprof::tests::{heap_config, heap_profile};
    use crate::parser::Stack;
    use crate::profile::RawProfile;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryPutter {
        puts: Mutex<Vec<PutInput>>,
    }

    impl Putter for MemoryPutter {
        fn put(&self, input: PutInput) -> anyhow::Result<()> {
            self.puts.lock().unwrap().push(input);
            Ok(())
        }
    }

    impl MemoryPutter {
        fn take(&self) -> Vec<PutInput> {
            std::mem::take(&mut *self.puts.lock().unwrap())
        }
    }

    fn input(profile: Arc<RawProfile>) -> IngestInput {
        IngestInput {
            format: Format::Pprof,
            profile,
            metadata: Metadata {
                start_time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                end_time: Utc.timestamp_opt(1_700_000_010, 0).unwrap(),
                key: Key::parse("app{env=test}").unwrap(),
                spy_name: "gospy".to_string(),
                sample_rate: 100,
                units: Units::Samples,
                aggregation_type: AggregationType::Sum,
            },
        }
    }

    fn find<'a>(puts: &'a [PutInput], name: &str) -> Option<&'a PutInput> {
        puts.iter().find(|p| p.key.app_name() == name)
    }

    fn alloc(puts: &[PutInput]) -> i64 {
        find(puts, "app.alloc_space")
            .map(|p| p.samples.values().sum())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_cumulative_chain() {
        let ingester = PprofIngester::new(MemoryPutter::default());
        let cx = Context::new();

        let p0 = Arc::new(RawProfile::builder().sample_type_config(heap_config()).build());
        let p1 = p0.push(heap_profile([10, 20], [1, 2]), true).unwrap();
        ingester.ingest(&cx, &input(Arc::clone(&p0))).await.unwrap();

        let puts = ingester.putter().take();
        assert!(find(&puts, "app.alloc_space").is_none());
        let inuse = find(&puts, "app.inuse_space").unwrap();
        assert_eq!("app.inuse_space{env=test}", inuse.key.to_string());
        assert_eq!(Units::Samples, inuse.units);

        let p2 = p1.push(heap_profile([15, 27], [1, 2]), true).unwrap();
        ingester.ingest(&cx, &input(Arc::clone(&p1))).await.unwrap();
        assert_eq!(12, alloc(&ingester.putter().take()));

        p2.push(heap_profile([16, 27], [1, 2]), true).unwrap();
        ingester.ingest(&cx, &input(p2)).await.unwrap();
        let puts = ingester.putter().take();
        let a = find(&puts, "app.alloc_space").unwrap();
        assert_eq!(Some(&1), a.samples.get(&Stack::new("main;alloc")));
        assert_eq!(1, a.samples.len());
    }

    #[tokio::test]
    async fn test_falls_back_without_predecessor() {
        let ingester = PprofIngester::new(MemoryPutter::default());
        let cx = Context::new();

        let p0 = RawProfile::builder().sample_type_config(heap_config()).build();
        let p1 = p0.push(heap_profile([10, 20], [1, 2]), true).unwrap();
        p1.push(heap_profile([15, 27], [1, 2]), true).unwrap();

        // p0 is never parsed, so p1 re-derives its baseline.
        ingester.ingest(&cx, &input(p1)).await.unwrap();
        assert_eq!(12, alloc(&ingester.putter().take()));
    }

    #[tokio::test]
    async fn test_push_after_link_drops_parser_state() {
        let ingester = PprofIngester::new(MemoryPutter::default());
        let cx = Context::new();

        let p0 = Arc::new(RawProfile::builder().sample_type_config(heap_config()).build());
        let p1 = p0.push(heap_profile([10, 20], [1, 2]), true).unwrap();
        // Overwrites the sample p1 was seeded with, without relinking.
        assert!(p0.push(heap_profile([100, 200], [1, 2]), false).is_none());
        ingester.ingest(&cx, &input(Arc::clone(&p0))).await.unwrap();
        ingester.putter().take();

        p1.push(heap_profile([15, 27], [1, 2]), true).unwrap();
        ingester.ingest(&cx, &input(p1)).await.unwrap();
        assert_eq!(12, alloc(&ingester.putter().take()));
    }

    #[tokio::test]
    async fn test_failed_parse_breaks_link() {
        let ingester = PprofIngester::new(MemoryPutter::default());
        let cx = Context::new();

        let p0 = Arc::new(RawProfile::builder().sample_type_config(heap_config()).build());
        let p1 = p0.push(b"\xff\xff\xff garbage".to_vec(), true).unwrap();
        assert!(ingester.ingest(&cx, &input(p0)).await.is_err());

        // Baseline is garbage too, so the fallback fails as well, without
        // panicking or reusing anything.
        let p2 = p1.push(heap_profile([10, 20], [1, 2]), true).unwrap();
        assert!(ingester.ingest(&cx, &input(p1)).await.is_err());

        p2.push(heap_profile([11, 20], [1, 2]), true).unwrap();
        ingester.ingest(&cx, &input(p2)).await.unwrap();
        assert_eq!(1, alloc(&ingester.putter().take()));
    }

    #[tokio::test]
    async fn test_from_wire_form() {
        let ingester = PprofIngester::new(MemoryPutter::default());
        let cx = Context::new();

        let p0 = RawProfile::builder().sample_type_config(heap_config()).build();
        let p1 = p0.push(heap_profile([10, 20], [1, 2]), true).unwrap();
        p1.push(heap_profile([15, 27], [1, 2]), true).unwrap();

        let raw = p1.bytes().unwrap().unwrap();
        let received = Arc::new(RawProfile::from_form(raw, p1.content_type()));
        ingester.ingest(&cx, &input(received)).await.unwrap();
        assert_eq!(12, alloc(&ingester.putter().take()));
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let ingester = PprofIngester::new(MemoryPutter::default());
        let cx = Context::new();
        let profile = Arc::new(RawProfile::from_pprof(heap_profile([1, 1], [1, 1])));

        let mut i = input(Arc::clone(&profile));
        i.format = Format::Jfr;
        assert!(ingester.ingest(&cx, &i).await.is_err());

        let mut i = input(Arc::clone(&profile));
        std::mem::swap(&mut i.metadata.start_time, &mut i.metadata.end_time);
        assert!(ingester.ingest(&cx, &i).await.is_err());

        assert!(ingester.putter().take().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled() {
        let ingester = PprofIngester::new(MemoryPutter::default());
        let cx = Context::new();
        cx.cancel();

        let profile = Arc::new(RawProfile::from_pprof(heap_profile([1, 1], [1, 1])));
        let err = ingester.ingest(&cx, &input(profile)).await.unwrap_err();
        assert_eq!(
            Some(&ContextError::Cancelled),
            err.downcast_ref::<ContextError>()
        );
        assert!(ingester.putter().take().is_empty());
    }
}
