pub mod form;
mod sample_type;

use crate::error::{Error, Result};
use crate::parser::{ParsedProfile, Parser, ParserConfig, ParserFactory};
pub use form::FormOptions;
pub use sample_type::{SampleTypeConfig, SampleTypeConfigs};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const DEFAULT_CONTENT_TYPE: &str = "binary/octet-stream";

/// Which of the two equivalent representations a [`RawProfile`] currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Empty,
    /// Only the wire form (request body) is present.
    RawOnly,
    /// Only the decoded pprof fields are present.
    DecodedOnly,
    Both,
}

/// A submitted profile, held as a multipart request body, as decoded pprof
/// payloads, or both. Each form is derived lazily from the other and cached.
///
/// Cumulative profile types need two consecutive samples to produce a delta.
/// [`RawProfile::push`] links the container to a successor that is pre-seeded
/// with the sample just pushed, and [`RawProfile::parse`] hands its parser
/// state to that successor once it has parsed successfully.
#[derive(Default)]
pub struct RawProfile {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    // Parser is stateful: for cumulative types it holds the counters of the
    // last parsed sample.
    parser: Option<Box<dyn Parser>>,
    next: Option<Arc<RawProfile>>,
    // Bumped on every push. `next` is only seeded from the current profile
    // while `linked_generation` matches.
    generation: u64,
    linked_generation: u64,

    raw_data: Option<Arc<[u8]>>,
    form_content_type: Option<String>,

    // Set once the decoded fields hold the data, even if every part was empty.
    decoded: bool,
    profile: Vec<u8>,
    previous_profile: Vec<u8>,
    skip_exemplars: bool,
    sample_type_config: Arc<SampleTypeConfigs>,

    form_options: FormOptions,
}

impl RawProfile {
    pub fn builder() -> RawProfileBuilder {
        RawProfileBuilder::default()
    }

    /// Wraps an inbound request body. `content_type` must carry the
    /// multipart boundary the body was written with.
    pub fn from_form(raw: impl Into<Arc<[u8]>>, content_type: impl Into<String>) -> Self {
        Self::builder().form(raw, content_type).build()
    }

    pub fn from_pprof(profile: Vec<u8>) -> Self {
        Self::builder().profile(profile).build()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> State {
        self.lock().state()
    }

    pub fn content_type(&self) -> String {
        self.lock()
            .form_content_type
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
    }

    pub fn skip_exemplars(&self) -> bool {
        self.lock().skip_exemplars
    }

    /// Loads `profile` into the container, dropping the now stale request
    /// body, and returns the container to be used at the next push.
    ///
    /// A successor is allocated on every call. For cumulative types it is
    /// seeded with `profile` as its previous sample, linked as `next` (any
    /// earlier link is replaced) and returned. Otherwise `None` is returned
    /// and the existing link is kept.
    pub fn push(&self, profile: Vec<u8>, cumulative: bool) -> Option<Arc<RawProfile>> {
        let mut inner = self.lock();
        inner.raw_data = None;
        inner.form_content_type = None;
        inner.decoded = true;
        inner.generation += 1;

        let mut n = Inner {
            sample_type_config: Arc::clone(&inner.sample_type_config),
            skip_exemplars: inner.skip_exemplars,
            form_options: inner.form_options,
            ..Default::default()
        };

        if !cumulative {
            inner.profile = profile;
            return None;
        }

        // Parser state is only handed over after a successful parse.
        n.previous_profile = profile.clone();
        n.decoded = true;
        inner.profile = profile;
        inner.linked_generation = inner.generation;
        let next = Arc::new(RawProfile {
            inner: Mutex::new(n),
        });
        inner.next = Some(Arc::clone(&next));
        Some(next)
    }

    /// Successor linked by the last cumulative push, if any.
    pub fn next(&self) -> Option<Arc<RawProfile>> {
        self.lock().next.clone()
    }

    /// Returns the request body, building the multipart envelope on first use.
    /// `Ok(None)` means there is nothing to send.
    pub fn bytes(&self) -> Result<Option<Arc<[u8]>>> {
        self.lock().bytes()
    }

    pub fn profile(&self) -> Result<Vec<u8>> {
        let mut inner = self.lock();
        inner.ensure_decoded()?;
        Ok(inner.profile.clone())
    }

    pub fn previous_profile(&self) -> Result<Vec<u8>> {
        let mut inner = self.lock();
        inner.ensure_decoded()?;
        Ok(inner.previous_profile.clone())
    }

    pub fn sample_type_config(&self) -> Result<Arc<SampleTypeConfigs>> {
        let mut inner = self.lock();
        inner.ensure_decoded()?;
        Ok(Arc::clone(&inner.sample_type_config))
    }

    /// Parses the profile, reusing parser state handed over by the
    /// predecessor when there is one.
    ///
    /// Without such state (first container of a chain, a failed parse
    /// upstream or an out of order call) the parser is rebuilt from
    /// `previous_profile` and `profile`.
    pub fn parse<F>(&self, factory: &F) -> Result<Vec<ParsedProfile>>
    where
        F: ParserFactory + ?Sized,
    {
        let mut inner = self.lock();
        if inner.state() == State::Empty {
            return Ok(vec![]);
        }
        inner.ensure_decoded()?;
        if inner.profile.is_empty() {
            return Ok(vec![]);
        }

        let mut parser = match inner.parser.take() {
            Some(p) => p,
            None => {
                let mut p = factory.new_parser(ParserConfig {
                    sample_types: Arc::clone(&inner.sample_type_config),
                    skip_exemplars: inner.skip_exemplars,
                });
                if !inner.previous_profile.is_empty() {
                    log::debug!("No parser state to reuse, seeding from previous profile");
                    p.seed(&inner.previous_profile).map_err(Error::Decode)?;
                }
                p
            }
        };

        let parsed = parser.parse(&inner.profile).map_err(Error::Decode)?;

        match &inner.next {
            Some(next) if inner.linked_generation == inner.generation => {
                next.lock().parser = Some(parser)
            }
            Some(_) => log::warn!(
                "Profile was pushed again after its successor was seeded, dropping parser state"
            ),
            None => log::debug!("Profile is not linked, dropping parser state"),
        }

        Ok(parsed)
    }
}

impl fmt::Debug for RawProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("RawProfile")
            .field("state", &inner.state())
            .field("content_type", &inner.form_content_type)
            .field("raw_data_len", &inner.raw_data.as_ref().map(|r| r.len()))
            .field("profile_len", &inner.profile.len())
            .field("previous_profile_len", &inner.previous_profile.len())
            .field("skip_exemplars", &inner.skip_exemplars)
            .field("sample_types", &inner.sample_type_config.len())
            .field("has_parser", &inner.parser.is_some())
            .field("has_next", &inner.next.is_some())
            .finish()
    }
}

impl Inner {
    fn state(&self) -> State {
        match (self.raw_data.is_some(), self.decoded) {
            (false, false) => State::Empty,
            (true, false) => State::RawOnly,
            (false, true) => State::DecodedOnly,
            (true, true) => State::Both,
        }
    }

    fn bytes(&mut self) -> Result<Option<Arc<[u8]>>> {
        self.bytes_with(form::encode)
    }

    fn bytes_with<E>(&mut self, encode: E) -> Result<Option<Arc<[u8]>>>
    where
        E: FnOnce(&form::Form) -> Result<form::Envelope>,
    {
        if let Some(raw) = &self.raw_data {
            // Initialized with a request body or already built.
            return Ok(Some(Arc::clone(raw)));
        }
        if self.profile.is_empty() && self.previous_profile.is_empty() {
            return Ok(None);
        }

        let envelope = encode(&form::Form {
            profile: self.profile.clone(),
            previous_profile: self.previous_profile.clone(),
            sample_type_config: Some(self.sample_type_config.as_ref().clone()),
        })?;

        let raw: Arc<[u8]> = envelope.body.into();
        self.raw_data = Some(Arc::clone(&raw));
        self.form_content_type = Some(envelope.content_type);
        Ok(Some(raw))
    }

    fn ensure_decoded(&mut self) -> Result<()> {
        match self.state() {
            State::RawOnly => self.load_from_form(),
            _ => Ok(()),
        }
    }

    fn load_from_form(&mut self) -> Result<()> {
        let raw = match &self.raw_data {
            Some(raw) => Arc::clone(raw),
            None => return Ok(()),
        };
        let content_type = self.form_content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE);

        let decoded = form::decode(&raw, content_type, &self.form_options)?;

        self.profile = decoded.profile;
        self.previous_profile = decoded.previous_profile;
        if let Some(config) = decoded.sample_type_config {
            self.sample_type_config = Arc::new(config);
        }
        self.decoded = true;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RawProfileBuilder {
    raw_data: Option<Arc<[u8]>>,
    form_content_type: Option<String>,
    profile: Vec<u8>,
    previous_profile: Vec<u8>,
    skip_exemplars: bool,
    sample_type_config: Option<Arc<SampleTypeConfigs>>,
    form_options: FormOptions,
}

impl RawProfileBuilder {
    pub fn form(mut self, raw: impl Into<Arc<[u8]>>, content_type: impl Into<String>) -> Self {
        self.raw_data = Some(raw.into());
        self.form_content_type = Some(content_type.into());
        self
    }

    pub fn profile(mut self, profile: Vec<u8>) -> Self {
        self.profile = profile;
        self
    }

    pub fn previous_profile(mut self, previous_profile: Vec<u8>) -> Self {
        self.previous_profile = previous_profile;
        self
    }

    pub fn skip_exemplars(mut self, skip: bool) -> Self {
        self.skip_exemplars = skip;
        self
    }

    pub fn sample_type_config(mut self, config: impl Into<Arc<SampleTypeConfigs>>) -> Self {
        self.sample_type_config = Some(config.into());
        self
    }

    pub fn form_options(mut self, options: FormOptions) -> Self {
        self.form_options = options;
        self
    }

    pub fn build(self) -> RawProfile {
        RawProfile {
            inner: Mutex::new(Inner {
                decoded: !self.profile.is_empty() || !self.previous_profile.is_empty(),
                raw_data: self.raw_data,
                form_content_type: self.form_content_type,
                profile: self.profile,
                previous_profile: self.previous_profile,
                skip_exemplars: self.skip_exemplars,
                sample_type_config: self.sample_type_config.unwrap_or_default(),
                form_options: self.form_options,
                ..Default::default()
            }),
        }
    }
}
