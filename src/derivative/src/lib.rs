//! Derivative (thumbnail) generation for uploaded images.
//!
//! A run streams the primary object through a fit-inside resize into a
//! derivative object next to it, requests access descriptors for both and
//! links them onto the owning metadata record. When linking fails for good,
//! the committed blobs are removed again.

pub mod error;
pub mod linker;
pub mod pipeline;
pub mod rollback;
pub mod transformer;
pub mod writer;

pub use error::{LinkError, PipelineError, SkipReason, TransformError, WriteError, WriterError};
pub use linker::MetadataLinker;
pub use pipeline::{DerivativePipeline, PipelineOutcome, PipelineReport, PipelineState};
pub use rollback::{RollbackCompensator, RollbackReport};
pub use transformer::{StreamTransformer, TransformHandle, TransformRequest, TransformStats};
pub use writer::{DerivativeWriter, PendingDerivative, WrittenDerivative};
