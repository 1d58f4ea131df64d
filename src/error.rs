use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Building the wire envelope (or one of its parts) failed.
    #[error("failed to encode {what}: {source}")]
    Encoding {
        what: &'static str,
        #[source]
        source: BoxError,
    },

    /// The submission could not be read back: bad boundary descriptor,
    /// truncated envelope or malformed sample type config.
    #[error("malformed {what}: {source}")]
    Format {
        what: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("failed to decode profile: {0:#}")]
    Decode(#[source] anyhow::Error),
}

impl Error {
    pub(crate) fn encoding(what: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Encoding {
            what,
            source: source.into(),
        }
    }

    pub(crate) fn format(what: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Format {
            what,
            source: source.into(),
        }
    }

    pub fn is_encoding(&self) -> bool {
        matches!(self, Self::Encoding { .. })
    }

    pub fn is_format(&self) -> bool {
        matches!(self, Self::Format { .. })
    }
}
