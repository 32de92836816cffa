//! The `report` subcommand: synchronize one repository and render its page.

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use console::style;
use tracing::info;

use crate::cache;
use crate::config::{load_config, split_logins};
use crate::github::Client;
use crate::render::{build_report, write_report};
use crate::scrape::HttpSearchPage;
use crate::sync::{synchronize, GraphSource, Tier};

#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Repository to report on, as OWNER/NAME
    pub repo: String,

    /// Directory snapshots and reports are written under (default ./repos)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// How many reviewers the ranking keeps (default 100)
    #[arg(long)]
    pub top: Option<usize>,

    /// Comma-separated logins to exclude from discovery
    #[arg(long)]
    pub exclude: Option<String>,

    /// Ignore any cached snapshot and rebuild from scratch
    #[arg(long)]
    pub refresh: bool,

    /// Skip writing the HTML report
    #[arg(long)]
    pub no_html: bool,

    /// Explicit config file (default: discovered review-pulse.toml/.yaml)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

pub fn run(args: ReportArgs) -> Result<()> {
    let (owner, name) = split_repo(&args.repo)?;

    let working_dir = std::env::current_dir().context("resolving working directory")?;
    let file_config = load_config(&working_dir, args.config.as_deref())?;

    let output = args.output.or(file_config.output).unwrap_or_else(|| PathBuf::from("./repos"));
    let top = args.top.or(file_config.top).unwrap_or(100);
    if top == 0 {
        anyhow::bail!("--top must be at least 1");
    }
    let exclude: BTreeSet<String> = args
        .exclude
        .as_deref()
        .map(split_logins)
        .or(file_config.exclude)
        .unwrap_or_default()
        .into_iter()
        .collect();

    let repo_dir = output.join(owner).join(name);
    let snapshot_path = cache::snapshot_path(&output, owner, name);
    let cached = if args.refresh { None } else { cache::load(&snapshot_path) };

    let api = Client::new();
    let page = HttpSearchPage::new().context("building the scrape client")?;
    let clock = crate::github::SystemClock;
    let source = GraphSource::new(&api, &page, &clock);

    let now = Utc::now();
    println!("Synchronizing {}/{}", owner, name);
    let outcome = synchronize(&source, owner, name, cached, top, &exclude, now.date_naive())
        .with_context(|| format!("synchronizing {owner}/{name}"))?;
    info!("synchronized {}/{} at tier {:?}", owner, name, outcome.tier);

    cache::save(&snapshot_path, &outcome.snapshot)
        .with_context(|| format!("saving snapshot for {owner}/{name}"))?;

    if !args.no_html {
        let data = build_report(&args.repo, &outcome.snapshot, now);
        let report_path = write_report(&repo_dir, &data)
            .with_context(|| format!("rendering report for {owner}/{name}"))?;
        println!("Report written to {}", report_path.display());
    }

    println!(
        "{} {} reviewers tracked, history {}..{} ({})",
        style("✓").green(),
        outcome.snapshot.reviewers.len(),
        outcome.snapshot.start_month,
        outcome.snapshot.end_month,
        tier_note(outcome.tier)
    );
    Ok(())
}

fn tier_note(tier: Tier) -> &'static str {
    match tier {
        Tier::Cold => "built from scratch",
        Tier::FullSkip => "no upstream changes",
        Tier::SkipDiscovery => "reviewer set unchanged",
        Tier::SkipMerges => "merge history unchanged",
        Tier::FullRefresh => "stale window refreshed",
    }
}

fn split_repo(repo: &str) -> Result<(&str, &str)> {
    match repo.split_once('/') {
        Some((owner, repo_name))
            if !owner.is_empty() && !repo_name.is_empty() && !repo_name.contains('/') =>
        {
            Ok((owner, repo_name))
        }
        _ => anyhow::bail!("repository must be OWNER/NAME, got '{repo}'"),
    }
}
