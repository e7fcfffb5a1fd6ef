//! Textual rendering of an [`EnrichedContext`].
//!
//! The plain rendering is what downstream analysis consumes: fixed section
//! order, deterministic content, total size bounded by the per-field caps
//! enforced at assembly. Degraded stages render an explicit "(unavailable)"
//! marker so the section list never varies.

use std::path::Path;

use colored::Colorize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::enrich::types::{EnrichedContext, StageHealth};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Failed to write context file: {0}")]
    FileWrite(#[from] std::io::Error),
}

/// Output the context to terminal (default) or to a plain-text file.
#[instrument(skip(context), fields(issue = %context.issue_ref))]
pub fn output(context: &EnrichedContext, output_path: Option<&Path>) -> Result<(), RenderError> {
    match output_path {
        None => {
            debug!("writing context to terminal");
            print_terminal(context);
            Ok(())
        }
        Some(path) => {
            debug!(path = %path.display(), "writing context to file");
            write_file(context, path)
        }
    }
}

/// Render the full context as plain text in a fixed section order.
pub fn render_text(context: &EnrichedContext) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "ISSUE {}: \"{}\" [{}]\n",
        context.issue_ref, context.issue.title, context.issue.state
    ));
    out.push_str(&format!("Author: {}\n", context.issue.author));
    if !context.issue.labels.is_empty() {
        out.push_str(&format!("Labels: {}\n", context.issue.labels.join(", ")));
    }
    out.push('\n');
    out.push_str(&context.issue.body);
    out.push('\n');

    out.push_str(&section(
        "RECENT COMMENTS",
        context.stages.comments,
        context.comments.is_empty(),
    ));
    for comment in &context.comments {
        out.push_str(&format!(
            "[{}] {}: {}\n",
            comment.created_at.format("%Y-%m-%d %H:%M"),
            comment.author,
            comment.body
        ));
    }

    out.push_str(&section(
        "LINKED ITEMS",
        context.stages.references,
        context.linked_items.is_empty(),
    ));
    for item in &context.linked_items {
        out.push_str(&format!(
            "#{} ({}, {}): {}\n",
            item.number, item.kind, item.state, item.title
        ));
    }

    out.push_str(&section(
        "CHANGED FILES",
        context.stages.files,
        context.changed_files.is_empty(),
    ));
    for file in &context.changed_files {
        out.push_str(&format!(
            "{} ({}, +{} -{})\n",
            file.path, file.status, file.additions, file.deletions
        ));
        if let Some(patch) = &file.patch {
            out.push_str(patch);
            out.push('\n');
        }
    }

    out.push_str(&section(
        "DIAGNOSTICS",
        StageHealth::Ok,
        context.diagnostics.is_empty(),
    ));
    for fragment in &context.diagnostics {
        out.push_str(&format!("--- from {} ---\n{}\n", fragment.source, fragment.text));
    }

    out.push_str(&section(
        "RECENT COMMITS",
        context.stages.commits,
        context.commits.is_empty(),
    ));
    for commit in &context.commits {
        let summary = commit.message.lines().next().unwrap_or("");
        out.push_str(&format!(
            "{} {} ({}, {})\n",
            &commit.sha[..commit.sha.len().min(8)],
            summary,
            commit.author,
            commit.committed_at.format("%Y-%m-%d")
        ));
    }

    out.push_str(&section(
        "REPOSITORY",
        context.stages.repo_meta,
        context.repo_meta.stars.is_none(),
    ));
    if let Some(stars) = context.repo_meta.stars {
        out.push_str(&format!(
            "Stars: {} | Language: {} | Open issues: {}\n",
            stars,
            context.repo_meta.language.as_deref().unwrap_or("unknown"),
            context
                .repo_meta
                .open_issues
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        ));
    }

    out
}

fn section(title: &str, health: StageHealth, empty: bool) -> String {
    let marker = match (health, empty) {
        (StageHealth::Ok, true) => " (none)",
        (StageHealth::Ok, false) => "",
        (StageHealth::Degraded, _) => " (partial)",
        (StageHealth::Failed, _) => " (unavailable)",
    };
    format!("\n=== {title}{marker} ===\n")
}

/// Colored terminal display of the context and its stage health.
pub fn print_terminal(context: &EnrichedContext) {
    println!();
    println!(
        "{} \"{}\" [{}]",
        format!("Issue {}:", context.issue_ref).bold(),
        context.issue.title,
        context.issue.state
    );
    println!(
        "Author: {} | Comments: {} | Linked: {} | Files: {} | Commits: {}",
        context.issue.author,
        context.comments.len(),
        context.linked_items.len(),
        context.changed_files.len(),
        context.commits.len()
    );
    println!();

    for (name, health) in [
        ("Comments", context.stages.comments),
        ("References", context.stages.references),
        ("Files", context.stages.files),
        ("Commits", context.stages.commits),
        ("Repository", context.stages.repo_meta),
    ] {
        println!("  {} {}", colorize_health(health), name);
    }
    println!();
    println!("{}", render_text(context));
}

/// Write the plain rendering to a file.
pub fn write_file(context: &EnrichedContext, path: &Path) -> Result<(), RenderError> {
    std::fs::write(path, render_text(context))?;
    Ok(())
}

fn colorize_health(health: StageHealth) -> colored::ColoredString {
    match health {
        StageHealth::Ok => "ok        ".green(),
        StageHealth::Degraded => "degraded  ".yellow(),
        StageHealth::Failed => "failed    ".red().bold(),
    }
}
