//! The change engine of the statistical business register.
//!
//! [`Registry`] applies creates, edits, deletes and restores as single atomic
//! store writes. Each change historizes the edited unit, propagates
//! membership changes to neighbouring units in the hierarchy, and mirrors the
//! result into a search index through a [`SearchIndexSynchronizer`].
//!
//! ```rust,ignore
//! let registry = Registry::new(store, index, AcceptAll, EngineConfig::default());
//! let outcome = registry.edit(&who, ChangeRequest::new(unit)).await?;
//! ```

pub mod bulk;
pub mod config;
pub mod error;
pub mod import;
pub mod memory_index;
pub mod propagate;
pub mod rules;
pub mod sync;
pub mod transaction;
pub mod validate;

pub use bulk::BulkHistoryBuffer;
pub use config::EngineConfig;
pub use error::{BusinessRule, ChangeError, Result, Stage, SyncError};
pub use import::{BulkImport, ImportSummary, RowFailure};
pub use memory_index::MemoryIndex;
pub use sync::{SearchIndexSynchronizer, SyncReport};
pub use transaction::{ChangeOutcome, ChangeRequest, ChangeState, Registry};
pub use validate::MandatoryFields;

#[cfg(test)]
mod tests;
