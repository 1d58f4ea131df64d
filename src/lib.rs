pub mod error;
pub mod ingestion;
pub mod metadata;
pub mod parser;
pub mod profile;

pub use error::{Error, Result};
pub use ingestion::{IngestInput, Ingester, Metadata};
pub use profile::RawProfile;
