//! Core types for Greenledger: the versioned ESRS taxonomy, evidence data
//! points, ledger/gap/alert records, reporting periods, and configuration.

pub mod compliance;
pub mod config;
pub mod evidence;
pub mod period;
pub mod schema;
pub mod sort_key;
pub mod taxonomy;

pub use compliance::{Alert, DedupeKey, EntryStatus, Gap, GapReason, LedgerEntry, RollUp, Severity};
pub use config::{ConfigError, GreenledgerConfig};
pub use evidence::{
    DataPointError, DataPointId, DataValue, Document, EvidenceType, ExtractedDataPoint,
    ExtractedField, Provenance,
};
pub use period::{PeriodError, ReportingPeriod};
pub use schema::ledger;
pub use sort_key::normalize_code;
pub use taxonomy::{
    Obligation, RequirementId, RequirementNode, RequirementSpec, Taxonomy, TaxonomyDocument,
    TaxonomyError, TaxonomyStore,
};
