//! Final merge of the stage outputs into one [`EnrichedContext`].
//!
//! The assembler trusts nothing: caps, ordering, and uniqueness are
//! re-applied here so the aggregate honors its invariants even when an
//! upstream stage misbehaved or degraded. Degraded fields stay present as
//! empty sequences or `None`-valued records; the schema never shrinks.

use std::collections::HashSet;

use crate::config::Limits;
use crate::extract;

use super::types::{
    ChangedFile, Comment, CommitRecord, DiagnosticFragment, EnrichedContext, IssueDetails,
    IssueRef, LinkedItem, RepositoryMeta, StageReport,
};

#[allow(clippy::too_many_arguments)]
pub fn assemble(
    issue_ref: IssueRef,
    issue: IssueDetails,
    mut comments: Vec<Comment>,
    mut linked_items: Vec<LinkedItem>,
    mut changed_files: Vec<ChangedFile>,
    mut diagnostics: Vec<DiagnosticFragment>,
    mut commits: Vec<CommitRecord>,
    repo_meta: RepositoryMeta,
    stages: StageReport,
    limits: &Limits,
) -> EnrichedContext {
    // Comments: chronological, most recent window only.
    comments.sort_by_key(|c| c.created_at);
    let drop = comments.len().saturating_sub(limits.max_comments);
    comments.drain(..drop);

    // Linked items: unique numbers, ascending.
    linked_items.sort_by_key(|item| item.number);
    linked_items.dedup_by_key(|item| item.number);

    // Files: capped count, capped per-file diff fragment.
    changed_files.truncate(limits.max_files);
    for file in &mut changed_files {
        if let Some(patch) = &file.patch {
            if patch.chars().count() > limits.max_patch_len {
                file.patch = Some(extract::truncate_chars(patch, limits.max_patch_len));
            }
        }
    }

    // Diagnostics: capped count and per-fragment length.
    diagnostics.truncate(limits.max_diagnostics);
    for fragment in &mut diagnostics {
        if fragment.text.chars().count() > limits.max_diagnostic_len {
            fragment.text = extract::truncate_chars(&fragment.text, limits.max_diagnostic_len);
        }
    }

    // Commits: newest first (sha tiebreak), unique shas, capped.
    commits.sort_by(|a, b| {
        b.committed_at
            .cmp(&a.committed_at)
            .then_with(|| a.sha.cmp(&b.sha))
    });
    let mut shas = HashSet::new();
    commits.retain(|c| shas.insert(c.sha.clone()));
    commits.truncate(limits.max_commits);

    EnrichedContext {
        issue_ref,
        issue,
        comments,
        linked_items,
        changed_files,
        diagnostics,
        commits,
        repo_meta,
        stages,
    }
}
