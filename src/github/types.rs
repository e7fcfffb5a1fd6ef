use chrono::{DateTime, Utc};
use serde::Deserialize;

/// GitHub account attached to issues, comments, and commits.
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub login: String,
}

/// Issue label; only the name matters to the pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct Label {
    pub name: String,
}

/// Present on an issue payload exactly when the number is a pull request.
/// The combined /issues/{n} endpoint serves both kinds.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestMarker {
    pub url: Option<String>,
}

/// An issue (or pull request, see [`PullRequestMarker`]) from the
/// /repos/{owner}/{repo}/issues/{number} endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub state: String,
    #[serde(default)]
    pub labels: Vec<Label>,
    pub user: Option<User>,
    pub pull_request: Option<PullRequestMarker>,
}

impl Issue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }

    pub fn author_login(&self) -> String {
        self.user
            .as_ref()
            .map(|u| u.login.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// One issue comment from /issues/{number}/comments.
#[derive(Debug, Clone, Deserialize)]
pub struct IssueComment {
    pub user: Option<User>,
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One changed file from /pulls/{number}/files.
#[derive(Debug, Clone, Deserialize)]
pub struct PullFile {
    pub filename: String,
    pub status: String,
    pub additions: u64,
    pub deletions: u64,
    pub patch: Option<String>,
}

/// Nested commit payload carrying message and author date.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitDetail {
    pub message: String,
    pub author: Option<CommitAuthor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitAuthor {
    pub name: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

/// One entry from /commits?path=...&since=...
#[derive(Debug, Clone, Deserialize)]
pub struct RepoCommit {
    pub sha: String,
    pub commit: CommitDetail,
}

impl RepoCommit {
    pub fn author_name(&self) -> String {
        self.commit
            .author
            .as_ref()
            .and_then(|a| a.name.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn authored_at(&self) -> Option<DateTime<Utc>> {
        self.commit.author.as_ref().and_then(|a| a.date)
    }
}

/// Repository snapshot from /repos/{owner}/{repo}.
#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub stargazers_count: u64,
    pub language: Option<String>,
    pub open_issues_count: u64,
}
