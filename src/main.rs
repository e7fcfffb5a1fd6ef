use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::time::Instant;
use tracing::{debug, info, info_span};
use tracing_subscriber::EnvFilter;

use issuesense::config::Config;
use issuesense::enrich::types::{IssueRef, RepoId};
use issuesense::enrich::{Enricher, PipelineError};
use issuesense::github::GithubClient;
use issuesense::render;

/// issuesense: fetches a GitHub issue, enriches it with linked PRs,
/// changed files, and recent commit history, and prints a bounded context
/// document suitable for LLM analysis.
#[derive(Parser, Debug)]
#[command(name = "issuesense", version, about)]
struct Cli {
    /// Repository in owner/name form (e.g., rust-lang/rust)
    repo: String,

    /// Issue number within the repository
    issue_number: u64,

    /// Optional output file path for the rendered context
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Overall deadline in seconds; overrides the configured default
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let repo = parse_repo(&cli.repo)?;
    let issue_ref = IssueRef {
        repo,
        number: cli.issue_number,
    };

    let _main_span = info_span!("enrich_issue", issue = %issue_ref).entered();

    info!("loading configuration");
    let config = Config::load()?;

    let timeout = cli
        .timeout_secs
        .map(std::time::Duration::from_secs)
        .unwrap_or_else(|| config.overall_timeout());
    debug!(timeout_secs = timeout.as_secs(), "resolved deadline");

    let client = GithubClient::new(&config)?;
    let enricher = Enricher::new(Arc::new(client), config.limits.clone(), &config.pipeline);

    info!("enriching issue context");
    let deadline = Instant::now() + timeout;
    let context = match enricher.enrich(issue_ref, deadline).await {
        Ok(context) => context,
        Err(e @ PipelineError::RootIssueNotFound { .. }) => {
            return Err(format!("{e}; check the repository and issue number").into());
        }
        Err(e @ PipelineError::DeadlineExceeded) => {
            return Err(format!("{e}; raise --timeout-secs and retry").into());
        }
        Err(e) => return Err(e.into()),
    };
    info!(
        comments = context.comments.len(),
        linked = context.linked_items.len(),
        files = context.changed_files.len(),
        commits = context.commits.len(),
        degraded = context.stages.any_impaired(),
        "context assembled"
    );

    render::output(&context, cli.output.as_deref())?;
    Ok(())
}

/// Parse an owner/name repository identifier.
fn parse_repo(raw: &str) -> Result<RepoId, String> {
    match raw.split_once('/') {
        Some((owner, name))
            if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
        {
            Ok(RepoId::new(owner, name))
        }
        _ => Err(format!(
            "invalid repository \"{raw}\": expected owner/name (e.g., rust-lang/rust)"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_repo() {
        let repo = parse_repo("rust-lang/rust").unwrap();
        assert_eq!(repo.owner, "rust-lang");
        assert_eq!(repo.name, "rust");
    }

    #[test]
    fn test_parse_invalid_repo() {
        assert!(parse_repo("rust-lang").is_err());
        assert!(parse_repo("a/b/c").is_err());
        assert!(parse_repo("/rust").is_err());
        assert!(parse_repo("rust/").is_err());
    }
}
