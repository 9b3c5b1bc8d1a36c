use std::fmt;
use std::time::Duration;

use greenledger_core::{
    ConfigError, DataPointError, PeriodError, RequirementId, TaxonomyError,
};
use greenledger_store::StoreError;
use thiserror::Error;

use crate::adapters::{DeliveryError, ExtractionError};
use crate::run::RunState;

/// How a failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Timeouts, throttling, dropped connections: retried with backoff.
    TransientIo,
    /// Bad input: fails only the affected run.
    PermanentInput,
    /// Concurrent modification: retried internally.
    ConflictingState,
    /// Invalid taxonomy or settings: fatal at startup.
    Configuration,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TransientIo => "transient_io",
            Self::PermanentInput => "permanent_input",
            Self::ConflictingState => "conflicting_state",
            Self::Configuration => "configuration",
        })
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    InvalidDataPoint(#[from] DataPointError),

    #[error("no taxonomy has been published")]
    NoTaxonomy,

    #[error("requirement {0} is not in the published taxonomy")]
    UnknownRequirement(RequirementId),

    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Period(#[from] PeriodError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("illegal run transition {from:?} -> {to:?}")]
    IllegalTransition { from: RunState, to: RunState },

    #[error("run cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Extraction(ExtractionError::Transient(_))
            | Self::Timeout(_)
            | Self::Delivery(DeliveryError::Transient(_))
            | Self::Store(_) => ErrorClass::TransientIo,
            Self::Extraction(_)
            | Self::InvalidDataPoint(_)
            | Self::Delivery(DeliveryError::Rejected(_))
            | Self::UnknownRequirement(_)
            | Self::Cancelled => ErrorClass::PermanentInput,
            Self::IllegalTransition { .. } => ErrorClass::ConflictingState,
            Self::NoTaxonomy | Self::Taxonomy(_) | Self::Config(_) | Self::Period(_) => {
                ErrorClass::Configuration
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::TransientIo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_follow_failure_kind() {
        assert_eq!(
            PipelineError::from(ExtractionError::Transient("503".into())).class(),
            ErrorClass::TransientIo
        );
        assert_eq!(
            PipelineError::Timeout(Duration::from_secs(30)).class(),
            ErrorClass::TransientIo
        );
        assert_eq!(
            PipelineError::from(ExtractionError::Malformed("bad json".into())).class(),
            ErrorClass::PermanentInput
        );
        assert_eq!(
            PipelineError::from(ExtractionError::Unsupported("image/png".into())).class(),
            ErrorClass::PermanentInput
        );
        assert_eq!(PipelineError::NoTaxonomy.class(), ErrorClass::Configuration);
        assert_eq!(
            PipelineError::from(TaxonomyError::VersionConflict(3)).class(),
            ErrorClass::Configuration
        );
        assert_eq!(
            PipelineError::IllegalTransition {
                from: RunState::Committed,
                to: RunState::Mapping
            }
            .class(),
            ErrorClass::ConflictingState
        );
    }
}
