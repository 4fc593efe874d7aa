//! Error taxonomy for the ingestion engine.
//!
//! One variant per error kind named in the design: callers match on kind
//! rather than string-matching an `anyhow` chain. `NoDataFromVendor` is
//! deliberately absent — "no data" is represented as `Ok(None)`/`Ok(vec![])`,
//! never as an `Err`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("transient connectivity failure talking to {target}: {source}")]
    TransientConnectivity {
        target: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("malformed config ({what}): {detail}")]
    MalformedConfig { what: &'static str, detail: String },

    #[error("vendor response missing expected columns for {context}")]
    SchemaMismatch { context: String },

    #[error("historical ingest aborted: within trading hours")]
    TradingHoursGate,

    #[error("not found: {what} {id}")]
    NotFound { what: &'static str, id: String },
}

pub type Result<T> = std::result::Result<T, IngestError>;
