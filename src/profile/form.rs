//! Multipart envelope carrying a profile, its predecessor (cumulative types
//! only) and the sample type config as one request body.

use super::sample_type::SampleTypeConfigs;
use crate::error::{Error, Result};
use multipart::client::lazy::Multipart as FormWriter;
use multipart::server::save::{Entries, SaveResult};
use multipart::server::Multipart as FormReader;
use std::io::{Cursor, Read};

pub const FIELD_PROFILE: &str = "profile";
pub const FILE_PROFILE: &str = "profile.pprof";
pub const FIELD_PREVIOUS_PROFILE: &str = "prev_profile";
pub const FILE_PREVIOUS_PROFILE: &str = "profile.pprof";
pub const FIELD_SAMPLE_TYPE_CONFIG: &str = "sample_type_config";
pub const FILE_SAMPLE_TYPE_CONFIG: &str = "sample_type_config.json";

const DEFAULT_MEMORY_THRESHOLD: u64 = 32 << 20;

// profile, prev_profile and sample_type_config.
const PART_COUNT: u64 = 3;

/// Limits applied when reading an envelope back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormOptions {
    /// Memory budget shared by all parts of one envelope. Each part may hold
    /// up to a third of it in memory before being spilled to a temporary
    /// directory.
    pub memory_threshold: u64,
    /// Hard cap per part. `None` means unlimited.
    pub size_limit: Option<u64>,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            memory_threshold: DEFAULT_MEMORY_THRESHOLD,
            size_limit: None,
        }
    }
}

/// Decoded contents of an envelope. Empty byte vectors stand for absent parts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Form {
    pub profile: Vec<u8>,
    pub previous_profile: Vec<u8>,
    pub sample_type_config: Option<SampleTypeConfigs>,
}

/// Encoded body together with the descriptor needed to read it.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub body: Vec<u8>,
    pub content_type: String,
}

pub fn encode(form: &Form) -> Result<Envelope> {
    let config = match &form.sample_type_config {
        Some(c) if !c.is_empty() => Some(
            serde_json::to_vec(c).map_err(|e| Error::encoding("sample type config", e))?,
        ),
        _ => None,
    };

    let mut writer = FormWriter::new();
    if !form.profile.is_empty() {
        writer.add_stream(
            FIELD_PROFILE,
            Cursor::new(form.profile.as_slice()),
            Some(FILE_PROFILE),
            Some(mime::APPLICATION_OCTET_STREAM),
        );
    }
    if !form.previous_profile.is_empty() {
        writer.add_stream(
            FIELD_PREVIOUS_PROFILE,
            Cursor::new(form.previous_profile.as_slice()),
            Some(FILE_PREVIOUS_PROFILE),
            Some(mime::APPLICATION_OCTET_STREAM),
        );
    }
    if let Some(config) = &config {
        writer.add_stream(
            FIELD_SAMPLE_TYPE_CONFIG,
            Cursor::new(config.as_slice()),
            Some(FILE_SAMPLE_TYPE_CONFIG),
            Some(mime::APPLICATION_JSON),
        );
    }

    let mut prepared = writer
        .prepare()
        .map_err(|e| Error::encoding("multipart envelope", e.error))?;
    let mut body = Vec::new();
    prepared
        .read_to_end(&mut body)
        .map_err(|e| Error::encoding("multipart envelope", e))?;

    Ok(Envelope {
        body,
        content_type: format!("multipart/form-data; boundary={}", prepared.boundary()),
    })
}

/// Extracts the multipart boundary from a content type descriptor.
pub fn parse_boundary(content_type: &str) -> Result<String> {
    let mime: mime::Mime = content_type
        .parse()
        .map_err(|e| Error::format("content type", e))?;

    if mime.type_() != mime::MULTIPART {
        return Err(Error::format(
            "content type",
            format!("expected multipart, got {}", mime.essence_str()),
        ));
    }

    match mime.get_param(mime::BOUNDARY) {
        Some(b) if !b.as_str().is_empty() => Ok(b.as_str().to_string()),
        _ => Err(Error::format("content type", "no boundary parameter found")),
    }
}

pub fn decode(body: &[u8], content_type: &str, options: &FormOptions) -> Result<Form> {
    // Spilled parts live in a temporary directory owned by `entries`; it is
    // removed when `entries` is dropped, whichever way we leave.
    let entries = read_entries(body, content_type, options)?;

    let profile = read_field(&entries, FIELD_PROFILE)?.unwrap_or_default();
    let previous_profile = read_field(&entries, FIELD_PREVIOUS_PROFILE)?.unwrap_or_default();
    let sample_type_config = match read_field(&entries, FIELD_SAMPLE_TYPE_CONFIG)? {
        Some(raw) => Some(
            serde_json::from_slice::<SampleTypeConfigs>(&raw)
                .map_err(|e| Error::format("sample type config", e))?,
        ),
        None => None,
    };

    Ok(Form {
        profile,
        previous_profile,
        sample_type_config,
    })
}

fn read_entries(body: &[u8], content_type: &str, options: &FormOptions) -> Result<Entries> {
    let boundary = parse_boundary(content_type)?;
    let mut reader = FormReader::with_body(Cursor::new(body), boundary);

    match reader
        .save()
        .size_limit(options.size_limit)
        .memory_threshold(options.memory_threshold / PART_COUNT)
        .ignore_text()
        .temp()
    {
        SaveResult::Full(entries) => Ok(entries),
        SaveResult::Partial(_, reason) => Err(Error::format(
            "multipart envelope",
            format!("envelope truncated: {:?}", reason),
        )),
        SaveResult::Error(e) => Err(Error::format("multipart envelope", e)),
    }
}

fn read_field(entries: &Entries, name: &str) -> Result<Option<Vec<u8>>> {
    let field = match entries.fields.get(name).and_then(|f| f.first()) {
        Some(f) => f,
        None => return Ok(None),
    };

    let mut buf = Vec::new();
    field
        .data
        .readable()
        .and_then(|mut r| r.read_to_end(&mut buf))
        .map_err(|e| Error::format("multipart envelope", e))?;
    Ok(Some(buf))
}
