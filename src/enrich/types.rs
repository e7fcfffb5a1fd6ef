use chrono::{DateTime, Utc};
use serde::Serialize;

/// Repository coordinates on the hosting service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for RepoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// The enrichment key: one repository, one issue number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueRef {
    pub repo: RepoId,
    pub number: u64,
}

impl std::fmt::Display for IssueRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.repo, self.number)
    }
}

/// Core fields of the root issue as fetched.
#[derive(Debug, Clone, Serialize)]
pub struct IssueDetails {
    pub title: String,
    pub body: String,
    pub state: String,
    pub labels: Vec<String>,
    pub author: String,
}

/// A single issue comment, chronological within the retained window.
#[derive(Debug, Clone, Serialize)]
pub struct Comment {
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Whether a linked item resolved as an issue or a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ItemKind {
    Issue,
    PullRequest,
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemKind::Issue => write!(f, "issue"),
            ItemKind::PullRequest => write!(f, "pull request"),
        }
    }
}

/// A cross-referenced item that resolved server-side.
/// The set is deduplicated by number and kept sorted ascending.
#[derive(Debug, Clone, Serialize)]
pub struct LinkedItem {
    pub number: u64,
    pub kind: ItemKind,
    pub title: String,
    pub state: String,
}

/// Change status of a file within a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeStatus {
    Added,
    Modified,
    Removed,
    Renamed,
}

impl ChangeStatus {
    /// Map the hosting API's status string; unknown values read as Modified.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "added" => ChangeStatus::Added,
            "removed" => ChangeStatus::Removed,
            "renamed" => ChangeStatus::Renamed,
            _ => ChangeStatus::Modified,
        }
    }
}

impl std::fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeStatus::Added => write!(f, "added"),
            ChangeStatus::Modified => write!(f, "modified"),
            ChangeStatus::Removed => write!(f, "removed"),
            ChangeStatus::Renamed => write!(f, "renamed"),
        }
    }
}

/// A file changed by a linked pull request.
#[derive(Debug, Clone, Serialize)]
pub struct ChangedFile {
    pub path: String,
    pub status: ChangeStatus,
    pub additions: u64,
    pub deletions: u64,
    /// Diff fragment from the API, truncated to the configured budget.
    pub patch: Option<String>,
}

/// Which text field a diagnostic fragment was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiagnosticSource {
    IssueBody,
    /// Index into the retained comment sequence.
    Comment(usize),
}

impl std::fmt::Display for DiagnosticSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiagnosticSource::IssueBody => write!(f, "issue body"),
            DiagnosticSource::Comment(i) => write!(f, "comment {}", i + 1),
        }
    }
}

/// An error/stack-trace-looking span pulled out of free text.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticFragment {
    pub text: String,
    pub source: DiagnosticSource,
}

/// One commit touching a gathered file path.
#[derive(Debug, Clone, Serialize)]
pub struct CommitRecord {
    pub sha: String,
    pub message: String,
    pub author: String,
    pub committed_at: DateTime<Utc>,
}

/// Repository snapshot; all fields absent when the fetch degraded.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepositoryMeta {
    pub stars: Option<u64>,
    pub language: Option<String>,
    pub open_issues: Option<u64>,
}

/// Outcome of a single pipeline stage.
///
/// `Failed` means the stage produced nothing because of an error;
/// `Degraded` means some sub-fetches were lost but usable output remains.
/// Legitimately-empty output is `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StageHealth {
    Ok,
    Degraded,
    Failed,
}

impl StageHealth {
    /// True when the stage lost any data to an error.
    pub fn is_impaired(self) -> bool {
        !matches!(self, StageHealth::Ok)
    }
}

impl std::fmt::Display for StageHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageHealth::Ok => write!(f, "ok"),
            StageHealth::Degraded => write!(f, "degraded"),
            StageHealth::Failed => write!(f, "failed"),
        }
    }
}

/// Per-stage health for everything that can degrade without aborting.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub comments: StageHealth,
    pub references: StageHealth,
    pub files: StageHealth,
    pub commits: StageHealth,
    pub repo_meta: StageHealth,
}

impl StageReport {
    /// All stages failed except the root fetch itself; used when the
    /// deadline expires before anything past IssueFetch can run.
    pub fn all_failed() -> Self {
        Self {
            comments: StageHealth::Failed,
            references: StageHealth::Failed,
            files: StageHealth::Failed,
            commits: StageHealth::Failed,
            repo_meta: StageHealth::Failed,
        }
    }

    pub fn any_impaired(&self) -> bool {
        self.comments.is_impaired()
            || self.references.is_impaired()
            || self.files.is_impaired()
            || self.commits.is_impaired()
            || self.repo_meta.is_impaired()
    }
}

/// The aggregate handed to the caller: every field always present,
/// degraded stages leave empty sequences or `None` fields behind.
/// Immutable once assembled.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedContext {
    pub issue_ref: IssueRef,
    pub issue: IssueDetails,
    pub comments: Vec<Comment>,
    pub linked_items: Vec<LinkedItem>,
    pub changed_files: Vec<ChangedFile>,
    pub diagnostics: Vec<DiagnosticFragment>,
    pub commits: Vec<CommitRecord>,
    pub repo_meta: RepositoryMeta,
    pub stages: StageReport,
}
