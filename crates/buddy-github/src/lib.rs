//! Buddy-GitHub: typed access to the EdgeTX firmware repository
//!
//! This crate is the remote artifact layer of EdgeTX Buddy. It wraps the
//! paginated GitHub REST API (releases, pull requests, check runs, workflow
//! jobs and run artifacts) behind the [`ArtifactClient`] trait.
//!
//! ## Absence is not an error
//!
//! A 404 on a single-entity lookup (`release_by_tag`, `pull`, `job`) is
//! returned as `Ok(None)`. Every other HTTP failure is a [`GithubError`].
//!
//! ## Key Components
//!
//! - `GithubClient`: reqwest-backed client, constructed explicitly from a
//!   [`GithubConfig`]
//! - `fakes::MemoryArtifactClient`: in-memory implementation for mocked
//!   contexts and tests

mod client;
mod config;
mod error;
pub mod fakes;
pub mod models;

pub use client::{ArtifactClient, GithubClient};
pub use config::GithubConfig;
pub use error::GithubError;
pub use models::{
    Artifact, CheckRun, CheckRunApp, PullCommit, PullHead, PullRequest, Release, ReleaseAsset,
    WorkflowJob,
};

/// Result type for GitHub operations
pub type Result<T> = std::result::Result<T, GithubError>;
