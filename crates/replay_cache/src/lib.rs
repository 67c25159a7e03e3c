//! Build-artifact cache for compiler and analyzer invocations.
//!
//! Given a source file, a tool and its arguments, the [`Engine`] either
//! replays a recorded execution (stdout, stderr, exit code and every file
//! the tool produced) or runs the tool and records the result. Validity is
//! decided per dependency: size and timestamps first, content hash when
//! they drifted. Whole-tree tools such as documentation generators are
//! cached through [`Engine::execute_over_tree`].

#![warn(missing_docs)]

pub mod capture;
pub mod command;
pub mod decide;
pub mod deps;
pub mod engine;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod index;
pub mod lock;
pub mod normalize;
pub mod options;
pub mod request_log;
pub mod store;

pub use command::{OutputArg, ToolCommand, ToolKind};
pub use decide::{Decider, Decision};
pub use engine::{CacheStats, Engine, ToolOutput, TreeRequest};
pub use error::CacheError;
pub use executor::{ProcessExecutor, ProcessOutput, ProcessSpec, ToolExecutor};
pub use fingerprint::{
    fingerprint_command, fingerprint_file, fingerprint_file_hashed, hash_file, CommandFingerprint,
    FileFingerprint,
};
pub use index::{CacheIndex, EntryId, IndexEntry};
pub use options::{CacheOptions, ContentHashing, InvalidationPolicy};
pub use request_log::{Outcome, RequestLog};
