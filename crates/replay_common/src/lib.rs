//! Shared foundational types used across the Replay build cache.
//!
//! This crate provides content hashing and repository-relative path handling,
//! the two identities every cached record is keyed on.

#![warn(missing_docs)]

pub mod hash;
pub mod repo_path;

pub use hash::{ContentHash, ContentHasher, ParseContentHashError};
pub use repo_path::{normalize_path, OutsideRepoError, RepoPath};
