//! Cascading deletion of everything a deleted root record owns.

pub mod batch;
pub mod drain;
pub mod engine;
pub mod error;
pub mod plan;
pub mod prefix;

pub use batch::{BatchDeleter, Page};
pub use drain::{CollectionDrain, DrainReport};
pub use engine::{CascadeDeletionEngine, CascadeOutcome, EntryOutcome};
pub use error::{CascadeError, DrainError, EntryError};
pub use plan::{DeletionPlan, PlanEntry, RootKind};
pub use prefix::BlobPrefixDeleter;
