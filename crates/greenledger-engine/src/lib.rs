//! Pipeline runtime: extraction and notification seams, the document run
//! state machine, gap detection, alert reconciliation, and the compliance
//! monitor that ties them to the evidence ledger.

pub mod adapters;
pub mod alerts;
pub mod clock;
mod error;
pub mod gaps;
mod json_extractor;
pub mod monitor;
pub mod orchestrator;
pub mod query;
pub mod retry;
pub mod run;

pub use adapters::{DeliveryError, ExtractionAdapter, ExtractionError, LogSink, NotificationSink};
pub use alerts::{AlertEngine, DeliveryReport, Reconciliation, severity_for};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorClass, PipelineError};
pub use gaps::{ComplianceReport, detect};
pub use json_extractor::{JSON_MIME, JsonExtractor, parse_fields};
pub use monitor::{ComplianceMonitor, CycleResult};
pub use orchestrator::Orchestrator;
pub use query::{ComplianceSummary, ComplianceView, GapDetail};
pub use retry::RetryPolicy;
pub use run::{RunId, RunRecord, RunState, Stage};
