use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

/// Failures surfaced by the browser seam.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DriverError {
    #[error("timed out after {timeout:?} waiting for `{selector}`")]
    Timeout { selector: String, timeout: Duration },

    #[error("no element matches `{0}`")]
    NoSuchElement(String),

    #[error("no new tab opened within {0:?}")]
    NoPopup(Duration),

    #[error("browser error: {0}")]
    Browser(String),
}

/// A single field could not be read from a row or detail page.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExtractionError {
    #[error("nothing matches `{selector}`")]
    NotFound { selector: String },

    #[error("attribute `{attribute}` is missing")]
    MissingAttribute { attribute: String },

    #[error("element has no text")]
    Empty,
}

/// The detail view for one row could not be read. The row is still emitted.
#[derive(Debug, Error)]
pub enum DetailUnavailable {
    #[error("row has no detail link")]
    NoLink,

    #[error("detail tab did not open: {0}")]
    Open(#[source] DriverError),

    #[error("detail content never rendered: {0}")]
    MarkerMissing(#[source] DriverError),

    #[error("could not read detail content: {0}")]
    Content(#[source] DriverError),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("listing page never rendered: {0}")]
    Navigation(#[source] DriverError),

    #[error("pagination did not reach page {target}: {reason}")]
    PageSync { target: usize, reason: String },

    #[error("failed to write {}: {source}", path.display())]
    Serialization {
        path: PathBuf,
        #[source]
        source: SinkError,
    },

    #[error("invalid source definition: {0}")]
    Config(String),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Empty-string-and-continue policy for field reads.
///
/// Every field primitive returns `Result<String, ExtractionError>`; this is the one
/// place that decides a failed read becomes a placeholder. Returns `None` for the
/// warning count when the read succeeded.
pub fn recover_field(
    field: &str,
    row: usize,
    result: Result<String, ExtractionError>,
) -> (String, Option<ExtractionError>) {
    match result {
        Ok(value) => (value, None),
        Err(e) => {
            warn!(field, row, error = %e, "field extraction failed, using empty value");
            (String::new(), Some(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recover_field_keeps_value() {
        let (value, warning) = recover_field("title", 1, Ok("算法工程师".to_string()));
        assert_eq!(value, "算法工程师");
        assert!(warning.is_none());
    }

    #[test]
    fn recover_field_substitutes_empty_string() {
        let err = ExtractionError::NotFound {
            selector: ".cat".to_string(),
        };
        let (value, warning) = recover_field("category", 3, Err(err.clone()));
        assert_eq!(value, "");
        assert_eq!(warning, Some(err));
    }
}
