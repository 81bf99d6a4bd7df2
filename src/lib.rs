pub mod browser;
pub mod crawler;
pub mod detail;
pub mod error;
pub mod extract;
pub mod list;
pub mod models;
pub mod pipeline;
pub mod source;
pub mod utils;
pub mod writer;

pub use browser::{
    BrowserSession, ChromeSession, DetailHandle, DetailTab, LaunchConfig, PageView,
};
pub use crawler::{Navigator, Paginator};
pub use detail::DetailFetcher;
pub use error::{DetailUnavailable, DriverError, ExtractionError, ScrapeError, SinkError};
pub use list::{ListExtractor, ListedRow};
pub use models::{DetailFields, JobRecord, PageCursor, RowTarget};
pub use pipeline::{
    CancelFlag, CrawlPipeline, PipelineWithRecords, RunReport, RunState, StopReason,
};
pub use source::ListingSource;
pub use writer::{read_records, render_text, OutputFormat, OutputTarget, RecordSink};

pub type Result<T, E = ScrapeError> = std::result::Result<T, E>;
