pub mod assemble;
pub mod types;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{Limits, PipelineConfig};
use crate::extract;
use crate::github::types::{Issue, IssueComment, PullFile};
use crate::github::{ApiError, IssueHost};
use types::{
    ChangeStatus, ChangedFile, Comment, CommitRecord, DiagnosticFragment, DiagnosticSource,
    EnrichedContext, IssueDetails, IssueRef, ItemKind, LinkedItem, RepositoryMeta, StageHealth,
    StageReport,
};

/// The only failures surfaced to the caller. Every other error degrades a
/// stage and the pipeline keeps going.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("issue {issue_ref} not found")]
    RootIssueNotFound { issue_ref: IssueRef },

    #[error("failed to fetch issue {issue_ref}: {source}")]
    RootIssueUnavailable {
        issue_ref: IssueRef,
        source: ApiError,
    },

    #[error("deadline expired before the issue could be fetched")]
    DeadlineExceeded,
}

/// Drives the enrichment pipeline: five ordered stages, sequential across
/// stages, bounded fan-out within a stage, no stage failure fatal except
/// the root issue fetch itself.
pub struct Enricher {
    host: Arc<dyn IssueHost>,
    limits: Limits,
    concurrency: usize,
}

impl Enricher {
    pub fn new(host: Arc<dyn IssueHost>, limits: Limits, pipeline: &PipelineConfig) -> Self {
        Self {
            host,
            limits,
            concurrency: pipeline.concurrency.max(1),
        }
    }

    /// Enrich one issue under an overall deadline.
    ///
    /// An expired deadline mid-pipeline marks the remaining stages failed
    /// and returns the best context assembled so far; only the root fetch
    /// itself can turn the deadline into an error.
    pub async fn enrich(
        &self,
        issue_ref: IssueRef,
        deadline: Instant,
    ) -> Result<EnrichedContext, PipelineError> {
        let now = Utc::now();
        if Instant::now() >= deadline {
            return Err(PipelineError::DeadlineExceeded);
        }

        // IssueFetch: the one fatal stage.
        let root_fetch = self
            .host
            .fetch_issue(&issue_ref.repo, issue_ref.number)
            .instrument(info_span!("stage", name = "issue_fetch"));
        let issue: Issue = match timeout_at(deadline, root_fetch).await {
            Err(_) => return Err(PipelineError::DeadlineExceeded),
            Ok(Err(ApiError::NotFound)) => {
                return Err(PipelineError::RootIssueNotFound { issue_ref })
            }
            Ok(Err(source)) => {
                return Err(PipelineError::RootIssueUnavailable { issue_ref, source })
            }
            Ok(Ok(issue)) => issue,
        };
        let details = IssueDetails {
            title: issue.title.clone(),
            body: issue.body.clone().unwrap_or_default(),
            state: issue.state.clone(),
            labels: issue.labels.iter().map(|l| l.name.clone()).collect(),
            author: issue.author_login(),
        };
        info!(issue = %issue_ref, state = %details.state, "fetched root issue");

        let (comments, comments_health) = run_stage(
            deadline,
            "comments",
            Vec::new(),
            self.gather_comments(&issue_ref),
        )
        .await;

        // Pure text analysis: no I/O, no deadline exposure.
        let diagnostics = self.collect_diagnostics(&details.body, &comments);

        let (linked_items, references_health) = run_stage(
            deadline,
            "reference_resolution",
            Vec::new(),
            self.resolve_references(&issue_ref, &details.body, &comments),
        )
        .await;

        let (changed_files, files_health) = run_stage(
            deadline,
            "file_gathering",
            Vec::new(),
            self.gather_files(&issue_ref, &linked_items),
        )
        .await;

        let since = now - ChronoDuration::days(self.limits.commit_lookback_days);
        let (commits, commits_health) = run_stage(
            deadline,
            "commit_gathering",
            Vec::new(),
            self.gather_commits(&issue_ref, &changed_files, since),
        )
        .await;

        let (repo_meta, repo_meta_health) = run_stage(
            deadline,
            "repo_meta_fetch",
            RepositoryMeta::default(),
            self.fetch_repo_meta(&issue_ref),
        )
        .await;

        let stages = StageReport {
            comments: comments_health,
            references: references_health,
            files: files_health,
            commits: commits_health,
            repo_meta: repo_meta_health,
        };
        if stages.any_impaired() {
            warn!(issue = %issue_ref, ?stages, "context assembled with degraded stages");
        }

        Ok(assemble::assemble(
            issue_ref,
            details,
            comments,
            linked_items,
            changed_files,
            diagnostics,
            commits,
            repo_meta,
            stages,
            &self.limits,
        ))
    }

    /// Fetch all comments, keep the most recent N in chronological order.
    async fn gather_comments(&self, issue_ref: &IssueRef) -> (Vec<Comment>, StageHealth) {
        match self
            .host
            .fetch_comments(&issue_ref.repo, issue_ref.number)
            .await
        {
            Ok(raw) => {
                let mut comments: Vec<Comment> = raw
                    .into_iter()
                    .map(|c: IssueComment| Comment {
                        author: c
                            .user
                            .map(|u| u.login)
                            .unwrap_or_else(|| "unknown".to_string()),
                        body: c.body.unwrap_or_default(),
                        created_at: c.created_at,
                    })
                    .collect();
                comments.sort_by_key(|c| c.created_at);
                let keep_from = comments.len().saturating_sub(self.limits.max_comments);
                comments.drain(..keep_from);
                debug!(retained = comments.len(), "retained most recent comments");
                (comments, StageHealth::Ok)
            }
            Err(e) => {
                warn!(error = %e, "comment fetch failed, continuing without comments");
                (Vec::new(), StageHealth::Failed)
            }
        }
    }

    /// Scan issue body then each retained comment, in order, until the
    /// fragment budget is spent.
    fn collect_diagnostics(&self, body: &str, comments: &[Comment]) -> Vec<DiagnosticFragment> {
        let mut fragments: Vec<DiagnosticFragment> = Vec::new();
        let sources = std::iter::once((DiagnosticSource::IssueBody, body)).chain(
            comments
                .iter()
                .enumerate()
                .map(|(i, c)| (DiagnosticSource::Comment(i), c.body.as_str())),
        );
        for (source, text) in sources {
            let remaining = self.limits.max_diagnostics - fragments.len();
            if remaining == 0 {
                break;
            }
            for found in
                extract::extract_diagnostics(text, remaining, self.limits.max_diagnostic_len)
            {
                fragments.push(DiagnosticFragment {
                    text: found.text,
                    source,
                });
            }
        }
        fragments
    }

    /// Extract reference candidates and resolve each against the combined
    /// issue endpoint. 404s are dropped silently; other failures skip the
    /// candidate and degrade the stage.
    async fn resolve_references(
        &self,
        issue_ref: &IssueRef,
        body: &str,
        comments: &[Comment],
    ) -> (Vec<LinkedItem>, StageHealth) {
        let mut numbers: Vec<u64> = extract::extract_references(body)
            .into_iter()
            .chain(
                comments
                    .iter()
                    .flat_map(|c| extract::extract_references(&c.body)),
            )
            .map(|c| c.number)
            .filter(|&n| n != issue_ref.number)
            .collect();
        numbers.sort_unstable();
        numbers.dedup();
        if numbers.is_empty() {
            return (Vec::new(), StageHealth::Ok);
        }
        debug!(candidates = numbers.len(), "resolving reference candidates");

        let results: Vec<(u64, Result<Issue, ApiError>)> = stream::iter(numbers)
            .map(|number| {
                let host = Arc::clone(&self.host);
                let repo = issue_ref.repo.clone();
                async move { (number, host.fetch_issue(&repo, number).await) }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut items: Vec<LinkedItem> = Vec::new();
        let mut errors = 0_usize;
        for (number, result) in results {
            match result {
                Ok(issue) => items.push(LinkedItem {
                    number,
                    kind: if issue.is_pull_request() {
                        ItemKind::PullRequest
                    } else {
                        ItemKind::Issue
                    },
                    title: issue.title,
                    state: issue.state,
                }),
                Err(ApiError::NotFound) => {
                    debug!(number, "dropping candidate that resolved to 404")
                }
                Err(e) => {
                    warn!(number, error = %e, "candidate resolution failed");
                    errors += 1;
                }
            }
        }
        items.sort_by_key(|item| item.number);
        let health = stage_health(errors, !items.is_empty());
        (items, health)
    }

    /// Fetch changed files per linked pull request, ascending PR number,
    /// concatenated in that order and capped.
    async fn gather_files(
        &self,
        issue_ref: &IssueRef,
        linked: &[LinkedItem],
    ) -> (Vec<ChangedFile>, StageHealth) {
        let prs: Vec<u64> = linked
            .iter()
            .filter(|item| item.kind == ItemKind::PullRequest)
            .map(|item| item.number)
            .collect();
        if prs.is_empty() {
            return (Vec::new(), StageHealth::Ok);
        }

        let mut results: Vec<(u64, Result<Vec<PullFile>, ApiError>)> = stream::iter(prs)
            .map(|number| {
                let host = Arc::clone(&self.host);
                let repo = issue_ref.repo.clone();
                async move { (number, host.fetch_pull_files(&repo, number).await) }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        // Completion order is nondeterministic; restore ascending PR order.
        results.sort_by_key(|(number, _)| *number);

        let mut files: Vec<ChangedFile> = Vec::new();
        let mut errors = 0_usize;
        for (number, result) in results {
            match result {
                Ok(raw) => {
                    for file in raw {
                        if files.len() >= self.limits.max_files {
                            break;
                        }
                        files.push(self.to_changed_file(file));
                    }
                }
                Err(e) => {
                    warn!(pr = number, error = %e, "skipping files of unfetchable pull request");
                    errors += 1;
                }
            }
        }
        let health = stage_health(errors, !files.is_empty());
        (files, health)
    }

    fn to_changed_file(&self, file: PullFile) -> ChangedFile {
        ChangedFile {
            path: file.filename,
            status: ChangeStatus::parse(&file.status),
            additions: file.additions,
            deletions: file.deletions,
            patch: file
                .patch
                .map(|p| extract::truncate_chars(&p, self.limits.max_patch_len)),
        }
    }

    /// Fetch recent commits per distinct path (first-seen order), merge,
    /// sort newest-first with sha tiebreak, dedupe, cap.
    async fn gather_commits(
        &self,
        issue_ref: &IssueRef,
        files: &[ChangedFile],
        since: DateTime<Utc>,
    ) -> (Vec<CommitRecord>, StageHealth) {
        let mut seen = HashSet::new();
        let paths: Vec<String> = files
            .iter()
            .map(|f| f.path.clone())
            .filter(|p| seen.insert(p.clone()))
            .collect();
        if paths.is_empty() {
            return (Vec::new(), StageHealth::Ok);
        }

        let results: Vec<Result<Vec<crate::github::types::RepoCommit>, ApiError>> =
            stream::iter(paths)
                .map(|path| {
                    let host = Arc::clone(&self.host);
                    let repo = issue_ref.repo.clone();
                    async move { host.fetch_commits_for_path(&repo, &path, since).await }
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        let mut merged: Vec<CommitRecord> = Vec::new();
        let mut errors = 0_usize;
        for result in results {
            match result {
                Ok(raw) => merged.extend(raw.into_iter().map(|c| CommitRecord {
                    author: c.author_name(),
                    committed_at: c.authored_at().unwrap_or(DateTime::<Utc>::MIN_UTC),
                    message: c.commit.message,
                    sha: c.sha,
                })),
                Err(e) => {
                    warn!(error = %e, "skipping commit history for one path");
                    errors += 1;
                }
            }
        }
        merged.sort_by(|a, b| {
            b.committed_at
                .cmp(&a.committed_at)
                .then_with(|| a.sha.cmp(&b.sha))
        });
        let mut shas = HashSet::new();
        merged.retain(|c| shas.insert(c.sha.clone()));
        merged.truncate(self.limits.max_commits);
        let health = stage_health(errors, !merged.is_empty());
        (merged, health)
    }

    async fn fetch_repo_meta(&self, issue_ref: &IssueRef) -> (RepositoryMeta, StageHealth) {
        match self.host.fetch_repository(&issue_ref.repo).await {
            Ok(repo) => (
                RepositoryMeta {
                    stars: Some(repo.stargazers_count),
                    language: repo.language,
                    open_issues: Some(repo.open_issues_count),
                },
                StageHealth::Ok,
            ),
            Err(e) => {
                warn!(error = %e, "repository metadata fetch failed");
                (RepositoryMeta::default(), StageHealth::Failed)
            }
        }
    }
}

/// Run one non-fatal stage under the overall deadline. A stage that cannot
/// start or finish in time yields its fallback and a `Failed` mark; the
/// pipeline keeps going either way.
async fn run_stage<T>(
    deadline: Instant,
    stage: &'static str,
    fallback: T,
    fut: impl std::future::Future<Output = (T, StageHealth)>,
) -> (T, StageHealth) {
    if Instant::now() >= deadline {
        warn!(stage, "deadline expired before stage started");
        return (fallback, StageHealth::Failed);
    }
    match timeout_at(deadline, fut.instrument(info_span!("stage", name = stage))).await {
        Ok(out) => out,
        Err(_) => {
            warn!(stage, "deadline expired mid-stage, abandoning sub-fetches");
            (fallback, StageHealth::Failed)
        }
    }
}

/// Failed iff errors left the stage empty; degraded when usable output
/// survived some errors.
fn stage_health(errors: usize, produced: bool) -> StageHealth {
    if errors == 0 {
        StageHealth::Ok
    } else if produced {
        StageHealth::Degraded
    } else {
        StageHealth::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::github::types::{
        CommitAuthor, CommitDetail, Label, PullRequestMarker, RepoCommit, Repository, User,
    };
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn repo() -> crate::enrich::types::RepoId {
        crate::enrich::types::RepoId::new("octo", "widgets")
    }

    fn root_ref() -> IssueRef {
        IssueRef {
            repo: repo(),
            number: 1,
        }
    }

    fn issue(number: u64, body: &str, is_pr: bool) -> Issue {
        Issue {
            number,
            title: format!("item {number}"),
            body: Some(body.to_string()),
            state: "open".to_string(),
            labels: vec![Label {
                name: "bug".to_string(),
            }],
            user: Some(User {
                login: "alice".to_string(),
            }),
            pull_request: is_pr.then(|| PullRequestMarker { url: None }),
        }
    }

    fn comment(author: &str, body: &str, ts: &str) -> IssueComment {
        IssueComment {
            user: Some(User {
                login: author.to_string(),
            }),
            body: Some(body.to_string()),
            created_at: ts.parse().unwrap(),
        }
    }

    fn pull_file(path: &str) -> PullFile {
        PullFile {
            filename: path.to_string(),
            status: "modified".to_string(),
            additions: 3,
            deletions: 1,
            patch: Some("@@ -1 +1 @@\n-old\n+new".to_string()),
        }
    }

    fn commit(sha: &str, ts: &str) -> RepoCommit {
        RepoCommit {
            sha: sha.to_string(),
            commit: CommitDetail {
                message: format!("commit {sha}"),
                author: Some(CommitAuthor {
                    name: Some("bob".to_string()),
                    date: Some(ts.parse().unwrap()),
                }),
            },
        }
    }

    /// In-memory IssueHost with failure injection and a call counter.
    #[derive(Default)]
    struct MockHost {
        issues: HashMap<u64, Issue>,
        comments: Vec<IssueComment>,
        files: HashMap<u64, Vec<PullFile>>,
        failing_file_prs: Vec<u64>,
        commits: HashMap<String, Vec<RepoCommit>>,
        repository: Option<Repository>,
        calls: AtomicUsize,
        /// Applied to everything except the root issue and comment fetches,
        /// so deadline tests can cut the pipeline mid-flight.
        late_stage_delay: Option<Duration>,
        root: u64,
    }

    impl MockHost {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        async fn maybe_delay(&self) {
            if let Some(delay) = self.late_stage_delay {
                tokio::time::sleep(delay).await;
            }
        }
    }

    #[async_trait]
    impl IssueHost for MockHost {
        async fn fetch_issue(
            &self,
            _repo: &crate::enrich::types::RepoId,
            number: u64,
        ) -> Result<Issue, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if number != self.root {
                self.maybe_delay().await;
            }
            self.issues.get(&number).cloned().ok_or(ApiError::NotFound)
        }

        async fn fetch_comments(
            &self,
            _repo: &crate::enrich::types::RepoId,
            _number: u64,
        ) -> Result<Vec<IssueComment>, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.comments.clone())
        }

        async fn fetch_pull_files(
            &self,
            _repo: &crate::enrich::types::RepoId,
            number: u64,
        ) -> Result<Vec<PullFile>, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.maybe_delay().await;
            if self.failing_file_prs.contains(&number) {
                return Err(ApiError::Transient("simulated outage".to_string()));
            }
            Ok(self.files.get(&number).cloned().unwrap_or_default())
        }

        async fn fetch_file_content(
            &self,
            _repo: &crate::enrich::types::RepoId,
            _path: &str,
            _git_ref: Option<&str>,
        ) -> Result<String, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::NotFound)
        }

        async fn fetch_commits_for_path(
            &self,
            _repo: &crate::enrich::types::RepoId,
            path: &str,
            _since: DateTime<Utc>,
        ) -> Result<Vec<RepoCommit>, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.maybe_delay().await;
            Ok(self.commits.get(path).cloned().unwrap_or_default())
        }

        async fn fetch_repository(
            &self,
            _repo: &crate::enrich::types::RepoId,
        ) -> Result<Repository, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.maybe_delay().await;
            self.repository
                .clone()
                .ok_or(ApiError::Transient("meta outage".to_string()))
        }
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(300)
    }

    #[tokio::test]
    async fn test_root_not_found_is_fatal_with_no_further_calls() {
        let host = MockHost {
            root: 1,
            ..Default::default()
        };
        let host = Arc::new(host);
        let config = Config::default();
        let enricher = Enricher::new(host.clone(), config.limits, &config.pipeline);

        let err = enricher.enrich(root_ref(), far_deadline()).await.unwrap_err();
        assert!(matches!(err, PipelineError::RootIssueNotFound { .. }));
        assert_eq!(host.calls(), 1);
    }

    #[tokio::test]
    async fn test_reference_resolution_drops_404_candidates() {
        let mut host = MockHost {
            root: 1,
            repository: Some(Repository {
                stargazers_count: 10,
                language: Some("Rust".to_string()),
                open_issues_count: 2,
            }),
            ..Default::default()
        };
        host.issues.insert(1, issue(1, "see #42 and #57", false));
        host.issues.insert(42, issue(42, "", true));
        // #57 is absent: resolves NotFound, silently dropped.

        let enricher = enricher_from(host);
        let context = enricher.enrich(root_ref(), far_deadline()).await.unwrap();

        assert_eq!(context.linked_items.len(), 1);
        assert_eq!(context.linked_items[0].number, 42);
        assert_eq!(context.linked_items[0].kind, ItemKind::PullRequest);
        assert_eq!(context.stages.references, StageHealth::Ok);
    }

    #[tokio::test]
    async fn test_partial_pr_failure_keeps_other_files_and_flags_stage() {
        let mut host = MockHost {
            root: 1,
            ..Default::default()
        };
        host.issues.insert(1, issue(1, "see #42 and #43", false));
        host.issues.insert(42, issue(42, "", true));
        host.issues.insert(43, issue(43, "", true));
        host.files.insert(43, vec![pull_file("src/lib.rs")]);
        host.failing_file_prs.push(42);

        let enricher = enricher_from(host);
        let context = enricher.enrich(root_ref(), far_deadline()).await.unwrap();

        assert_eq!(context.changed_files.len(), 1);
        assert_eq!(context.changed_files[0].path, "src/lib.rs");
        assert_eq!(context.stages.files, StageHealth::Degraded);
    }

    #[tokio::test]
    async fn test_all_prs_failing_marks_stage_failed() {
        let mut host = MockHost {
            root: 1,
            ..Default::default()
        };
        host.issues.insert(1, issue(1, "see #42", false));
        host.issues.insert(42, issue(42, "", true));
        host.failing_file_prs.push(42);

        let enricher = enricher_from(host);
        let context = enricher.enrich(root_ref(), far_deadline()).await.unwrap();

        assert!(context.changed_files.is_empty());
        assert_eq!(context.stages.files, StageHealth::Failed);
    }

    #[tokio::test]
    async fn test_comment_window_keeps_most_recent_five() {
        let mut host = MockHost {
            root: 1,
            ..Default::default()
        };
        host.issues.insert(1, issue(1, "", false));
        for day in 1..=8 {
            host.comments.push(comment(
                "alice",
                &format!("comment {day}"),
                &format!("2026-01-0{day}T00:00:00Z"),
            ));
        }

        let enricher = enricher_from(host);
        let context = enricher.enrich(root_ref(), far_deadline()).await.unwrap();

        assert_eq!(context.comments.len(), 5);
        assert_eq!(context.comments[0].body, "comment 4");
        assert_eq!(context.comments[4].body, "comment 8");
        // chronological within the window
        assert!(context.comments.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[tokio::test]
    async fn test_commits_merged_sorted_deduped_capped() {
        let mut host = MockHost {
            root: 1,
            ..Default::default()
        };
        host.issues.insert(1, issue(1, "see #42", false));
        host.issues.insert(42, issue(42, "", true));
        host.files.insert(
            42,
            vec![pull_file("a.rs"), pull_file("b.rs"), pull_file("a.rs")],
        );
        host.commits.insert(
            "a.rs".to_string(),
            vec![
                commit("c1", "2026-08-01T00:00:00Z"),
                commit("c2", "2026-08-03T00:00:00Z"),
                commit("shared", "2026-08-05T00:00:00Z"),
            ],
        );
        host.commits.insert(
            "b.rs".to_string(),
            vec![
                commit("shared", "2026-08-05T00:00:00Z"),
                commit("c3", "2026-08-02T00:00:00Z"),
                commit("c4", "2026-08-04T00:00:00Z"),
                commit("c5", "2026-07-01T00:00:00Z"),
                commit("c6", "2026-07-02T00:00:00Z"),
            ],
        );

        let enricher = enricher_from(host);
        let context = enricher.enrich(root_ref(), far_deadline()).await.unwrap();

        assert_eq!(context.commits.len(), 5);
        let shas: Vec<&str> = context.commits.iter().map(|c| c.sha.as_str()).collect();
        assert_eq!(shas, vec!["shared", "c4", "c2", "c3", "c1"]);
        assert!(context
            .commits
            .windows(2)
            .all(|w| w[0].committed_at >= w[1].committed_at));
    }

    #[tokio::test]
    async fn test_diagnostics_from_body_and_comments() {
        let mut host = MockHost {
            root: 1,
            ..Default::default()
        };
        let trace = format!(
            "Traceback (most recent call last):\n{}",
            "  very long frame line with plenty of characters\n".repeat(20)
        );
        host.issues.insert(1, issue(1, &trace, false));
        host.comments.push(comment(
            "bob",
            "Error: disk full\n    at write (io.rs:9)",
            "2026-01-01T00:00:00Z",
        ));

        let enricher = enricher_from(host);
        let context = enricher.enrich(root_ref(), far_deadline()).await.unwrap();

        assert_eq!(context.diagnostics.len(), 2);
        assert_eq!(context.diagnostics[0].source, DiagnosticSource::IssueBody);
        assert_eq!(context.diagnostics[0].text.chars().count(), 500);
        assert_eq!(context.diagnostics[1].source, DiagnosticSource::Comment(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_after_issue_fetch_degrades_remaining_stages() {
        let mut host = MockHost {
            root: 1,
            late_stage_delay: Some(Duration::from_secs(10)),
            repository: Some(Repository {
                stargazers_count: 1,
                language: None,
                open_issues_count: 0,
            }),
            ..Default::default()
        };
        host.issues.insert(1, issue(1, "see #42", false));
        host.issues.insert(42, issue(42, "", true));
        host.comments
            .push(comment("alice", "still happening", "2026-01-01T00:00:00Z"));

        let enricher = enricher_from(host);
        let deadline = Instant::now() + Duration::from_millis(100);
        let context = enricher.enrich(root_ref(), deadline).await.unwrap();

        assert_eq!(context.issue.title, "item 1");
        assert_eq!(context.comments.len(), 1);
        assert_eq!(context.stages.comments, StageHealth::Ok);
        assert_eq!(context.stages.references, StageHealth::Failed);
        assert_eq!(context.stages.files, StageHealth::Failed);
        assert_eq!(context.stages.commits, StageHealth::Failed);
        assert_eq!(context.stages.repo_meta, StageHealth::Failed);
    }

    #[tokio::test]
    async fn test_deadline_before_root_fetch_is_fatal() {
        let mut host = MockHost {
            root: 1,
            late_stage_delay: None,
            ..Default::default()
        };
        host.issues.insert(1, issue(1, "", false));

        let enricher = enricher_from(host);
        let deadline = Instant::now() - Duration::from_millis(1);
        let err = enricher.enrich(root_ref(), deadline).await.unwrap_err();
        assert!(matches!(err, PipelineError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_determinism_across_runs() {
        let mut host = MockHost {
            root: 1,
            repository: Some(Repository {
                stargazers_count: 9,
                language: Some("Rust".to_string()),
                open_issues_count: 3,
            }),
            ..Default::default()
        };
        host.issues
            .insert(1, issue(1, "see #42, #43 and Error: boom", false));
        host.issues.insert(42, issue(42, "", true));
        host.issues.insert(43, issue(43, "", true));
        host.files.insert(42, vec![pull_file("a.rs")]);
        host.files.insert(43, vec![pull_file("b.rs")]);
        host.commits
            .insert("a.rs".to_string(), vec![commit("x1", "2026-08-01T00:00:00Z")]);
        host.commits
            .insert("b.rs".to_string(), vec![commit("x2", "2026-08-02T00:00:00Z")]);

        let enricher = enricher_from(host);
        let first = enricher.enrich(root_ref(), far_deadline()).await.unwrap();
        let second = enricher.enrich(root_ref(), far_deadline()).await.unwrap();

        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        // Files follow ascending PR order regardless of completion order.
        let paths: Vec<&str> = first.changed_files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.rs", "b.rs"]);
    }

    #[tokio::test]
    async fn test_repo_meta_failure_degrades_to_empty_snapshot() {
        let mut host = MockHost {
            root: 1,
            repository: None,
            ..Default::default()
        };
        host.issues.insert(1, issue(1, "", false));

        let enricher = enricher_from(host);
        let context = enricher.enrich(root_ref(), far_deadline()).await.unwrap();

        assert_eq!(context.stages.repo_meta, StageHealth::Failed);
        assert!(context.repo_meta.stars.is_none());
        assert!(context.repo_meta.language.is_none());
        assert!(context.repo_meta.open_issues.is_none());
    }

    fn enricher_from(host: MockHost) -> Enricher {
        let config = Config::default();
        Enricher::new(Arc::new(host), config.limits.clone(), &config.pipeline)
    }
}
