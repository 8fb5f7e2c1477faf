#![deny(missing_docs)]
#![doc = "Core error, serialization, and provenance types shared across the vex workspace."]

pub mod errors;
pub mod hash;
pub mod provenance;
pub mod serde;

pub use errors::{ErrorInfo, VexError};
pub use hash::stable_hash_string;
pub use provenance::{checkpoint_commit, detect_git_hash, timestamp_now};
pub use serde::{from_json_slice, to_canonical_json_bytes};
