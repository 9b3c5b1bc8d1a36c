//! Pipeline run records and their state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use greenledger_core::{DataPointId, ExtractedDataPoint, LedgerEntry, ReportingPeriod};
use serde::Serialize;
use uuid::Uuid;

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extraction,
    Mapping,
    Commit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Extracting,
    Mapping,
    Committing,
    Committed,
    ExtractionFailed,
    MappingFailed,
    CommitFailed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Committed
                | Self::ExtractionFailed
                | Self::MappingFailed
                | Self::CommitFailed
                | Self::Cancelled
        )
    }

    pub fn is_failed(self) -> bool {
        matches!(
            self,
            Self::ExtractionFailed | Self::MappingFailed | Self::CommitFailed | Self::Cancelled
        )
    }

    /// The transition table. Terminal states have no exits; a run can be
    /// cancelled at any point before commit starts.
    pub fn can_transition(self, to: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, to),
            (Pending, Extracting | Cancelled)
                | (Extracting, Mapping | ExtractionFailed | Cancelled)
                | (Mapping, Committing | MappingFailed | Cancelled)
                | (Committing, Committed | CommitFailed)
        )
    }

    /// The failure state for a stage.
    pub fn failed_at(stage: Stage) -> RunState {
        match stage {
            Stage::Extraction => Self::ExtractionFailed,
            Stage::Mapping => Self::MappingFailed,
            Stage::Commit => Self::CommitFailed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Extracting => "extracting",
            Self::Mapping => "mapping",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::ExtractionFailed => "extraction_failed",
            Self::MappingFailed => "mapping_failed",
            Self::CommitFailed => "commit_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: RunId,
    pub source_document_id: String,
    pub content_hash: String,
    pub reporting_period: ReportingPeriod,
    pub state: RunState,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failed_stage: Option<Stage>,
    /// Operator-facing reason for a failed or cancelled run.
    pub failure: Option<String>,
    pub extraction_attempts: u32,
    /// Data points extracted so far, kept even if a later stage fails.
    pub data_points: Vec<ExtractedDataPoint>,
    pub unmapped: Vec<DataPointId>,
    pub committed: Vec<LedgerEntry>,
}

impl RunRecord {
    pub fn new(
        source_document_id: String,
        content_hash: String,
        reporting_period: ReportingPeriod,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RunId::new(),
            source_document_id,
            content_hash,
            reporting_period,
            state: RunState::Pending,
            submitted_at,
            finished_at: None,
            failed_stage: None,
            failure: None,
            extraction_attempts: 0,
            data_points: Vec::new(),
            unmapped: Vec::new(),
            committed: Vec::new(),
        }
    }

    pub fn transition(&mut self, to: RunState, at: DateTime<Utc>) -> Result<(), PipelineError> {
        if !self.state.can_transition(to) {
            return Err(PipelineError::IllegalTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        if to.is_terminal() {
            self.finished_at = Some(at);
        }
        Ok(())
    }

    pub fn fail(
        &mut self,
        stage: Stage,
        reason: String,
        at: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        self.transition(RunState::failed_at(stage), at)?;
        self.failed_stage = Some(stage);
        self.failure = Some(reason);
        Ok(())
    }
}
