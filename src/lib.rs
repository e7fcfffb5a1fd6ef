//! issuesense: enrich a GitHub issue with surrounding context (linked
//! pull requests, changed files, recent commit history, repository
//! metadata) and render it as a bounded text document for downstream
//! analysis.

pub mod config;
pub mod enrich;
pub mod extract;
pub mod github;
pub mod render;

pub use config::Config;
pub use enrich::types::{EnrichedContext, IssueRef, RepoId};
pub use enrich::{Enricher, PipelineError};
pub use github::{ApiError, GithubClient, IssueHost};
