//! Staged conversion pipeline.
//!
//! Takes a validated input checkpoint through zero, one, or two format
//! transformations (checkpoint -> intermediate graph -> accelerator binary)
//! according to the model family's routing, resolving calibration data and
//! applying the quantization-fallback policy along the way.
//!
//! Each job runs to completion on the calling task against its own compiler
//! session; the session is not reentrant. Concurrent jobs targeting
//! different output paths are fine, each with its own session.

pub mod engine;
pub mod types;

pub use engine::ConversionPipeline;
pub use types::{
    ConversionJob, ConversionOutcome, ConversionRequest, ConversionStage, QuantFallback,
};
