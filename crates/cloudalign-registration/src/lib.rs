#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Error types for the registration stages.
pub mod error;
pub use error::RegistrationError;

/// The registration result contract shared by every stage.
pub mod result;
pub use result::{Correspondence, RegistrationResult, Termination};

/// Closed-form rigid alignment of paired point sets.
pub mod kabsch;

/// Descriptor-space correspondence search.
pub mod matching;

/// RANSAC-based global registration.
pub mod ransac;

/// Fast Global Registration (graduated non-convexity).
pub mod fgr;

/// Point-to-plane ICP refinement.
pub mod icp;

/// The three-operation pipeline facade.
pub mod pipeline;
pub use pipeline::{global_register, preprocess, refine, GlobalStrategy};
