//! Evidence ledger: sharded in-memory commit log, Arrow conversion, and
//! DuckDB persistence of the ledger, gaps, and alert state.

mod batch;
mod error;
mod ledger;

pub use batch::{
    alerts_from_batches, alerts_to_batch, entries_from_batches, entries_to_batch, gaps_to_batch,
};
pub use error::{LedgerError, StoreError};
pub use ledger::{Commit, CommitOutcome, EvidenceLedger, LedgerSnapshot};

#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
pub use duck::{DuckLedgerStore, StoredTable};
