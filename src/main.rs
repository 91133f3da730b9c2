use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use media_harvester::app::{ProfileSyncSettings, ProfileSyncUseCase, RepostSettings, RepostUseCase};
use media_harvester::config::{Config, InstagramCredentials, RedditCredentials};
use media_harvester::constants::DEFAULT_USER_AGENT;
use media_harvester::infra::{
    build_client, build_media_client, HistoryDb, InstagramClient, RedditClient, ReqwestFetcher,
    VerticalStitcher,
};
use media_harvester::observability::{init_logging, init_metrics};
use media_harvester::pipeline::{HarvestSettings, Harvester};

#[derive(Parser)]
#[command(name = "media_harvester")]
#[command(about = "Harvest subreddit images, sync Instagram posts and repost them to Reddit")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download images from subreddit searches, skipping anything already downloaded
    RedditImages {
        /// Comma-separated subreddits; prompted for when omitted
        #[arg(long)]
        subreddits: Option<String>,
        /// Comma-separated search terms; prompted for when omitted
        #[arg(long)]
        terms: Option<String>,
        #[arg(long)]
        max_items: Option<usize>,
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Save recent posts of Instagram profiles into per-post folders
    Instagram {
        /// Profile to sync (repeatable)
        #[arg(long, required = true)]
        profile: Vec<String>,
        #[arg(long)]
        lookback_days: Option<i64>,
        #[arg(long)]
        output_root: Option<PathBuf>,
    },
    /// Post image+caption folders to a subreddit
    Repost {
        #[arg(long)]
        base_folder: Option<PathBuf>,
        #[arg(long)]
        subreddit: Option<String>,
        #[arg(long)]
        flair: Option<String>,
    },
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn prompt_list(question: &str) -> anyhow::Result<Vec<String>> {
    print!("{question}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(split_list(&line))
}

async fn run_reddit_images(
    config: &mut Config,
    subreddits: Option<String>,
    terms: Option<String>,
    max_items: Option<usize>,
    workers: Option<usize>,
) -> anyhow::Result<()> {
    if let Some(n) = max_items {
        config.harvest.max_items = n;
    }
    if let Some(n) = workers {
        config.harvest.workers = n;
    }
    config.validate()?;
    let creds = RedditCredentials::from_env()?;

    let subreddits = match subreddits {
        Some(raw) => split_list(&raw),
        None => prompt_list("Enter the subreddit names, separated by commas: ")?,
    };
    let terms = match terms {
        Some(raw) => split_list(&raw),
        None => prompt_list("Enter the search terms, separated by commas: ")?,
    };
    if subreddits.is_empty() || terms.is_empty() {
        warn!("Nothing to do: at least one subreddit and one search term are needed");
        return Ok(());
    }

    let http = build_client(
        &creds.user_agent,
        config.harvest.fetch_timeout(),
        config.harvest.connect_timeout(),
    )?;
    let media = build_media_client(&creds.user_agent, config.harvest.connect_timeout())?;
    let history = Arc::new(
        HistoryDb::open(&config.storage.database_path)
            .with_context(|| format!("opening {}", config.storage.database_path.display()))?,
    );
    let harvester = Harvester::new(
        Arc::new(RedditClient::new(http, creds)),
        history,
        Arc::new(ReqwestFetcher::new(media, config.harvest.read_timeout())),
        HarvestSettings::from_config(config),
    );

    for subreddit in &subreddits {
        for term in &terms {
            match harvester.run(subreddit, term).await {
                Ok(report) => {
                    println!("\n📊 r/{} \"{}\":", report.subreddit, report.search_term);
                    println!("   Pages: {}", report.pages);
                    println!("   Candidates: {}", report.candidates);
                    println!("   Already seen: {}", report.skipped_seen);
                    println!("   Downloaded: {}/{}", report.succeeded, report.submitted);
                    println!(
                        "   Failed: {} ({} transient)",
                        report.failed, report.transient_failures
                    );
                    if let Some(err) = &report.listing_error {
                        println!("   Stopped early: {err}");
                    }
                    println!("   Elapsed: {:.2}s", report.elapsed.as_secs_f64());
                }
                Err(e) => error!("Harvest of r/{} for '{}' failed: {}", subreddit, term, e),
            }
        }
    }
    Ok(())
}

async fn run_instagram(
    config: &mut Config,
    profiles: Vec<String>,
    lookback_days: Option<i64>,
    output_root: Option<PathBuf>,
) -> anyhow::Result<()> {
    if let Some(days) = lookback_days {
        config.instagram.lookback_days = days;
    }
    if let Some(root) = output_root {
        config.instagram.output_root = root;
    }
    config.validate()?;
    let creds = InstagramCredentials::from_env()?;

    let http = build_client(
        DEFAULT_USER_AGENT,
        config.harvest.fetch_timeout(),
        config.harvest.connect_timeout(),
    )?;
    let media = build_media_client(DEFAULT_USER_AGENT, config.harvest.connect_timeout())?;
    let db = Arc::new(
        HistoryDb::open(&config.storage.database_path)
            .with_context(|| format!("opening {}", config.storage.database_path.display()))?,
    );
    let sync = ProfileSyncUseCase::new(
        Arc::new(InstagramClient::new(http, creds)),
        db,
        Arc::new(ReqwestFetcher::new(media, config.harvest.read_timeout())),
        Arc::new(VerticalStitcher),
        ProfileSyncSettings::from_config(&config.instagram),
    );

    for profile in &profiles {
        match sync.run(profile).await {
            Ok(report) => {
                println!("\n📸 {}:", report.profile);
                println!("   New posts: {}", report.posts_seen);
                println!("   Saved: {}", report.posts_saved);
                println!("   Composites: {}", report.composites);
                println!("   Failures: {}", report.failures);
            }
            Err(e) => error!("Sync of profile '{}' failed: {}", profile, e),
        }
    }
    Ok(())
}

async fn run_repost(
    config: &mut Config,
    base_folder: Option<PathBuf>,
    subreddit: Option<String>,
    flair: Option<String>,
) -> anyhow::Result<()> {
    if let Some(folder) = base_folder {
        config.repost.base_folder = folder;
    }
    if let Some(sub) = subreddit {
        config.repost.subreddit = sub;
    }
    if let Some(text) = flair {
        config.repost.flair = text;
    }
    let creds = RedditCredentials::from_env()?;

    let http = build_client(
        &creds.user_agent,
        config.harvest.fetch_timeout(),
        config.harvest.connect_timeout(),
    )?;
    let repost = RepostUseCase::new(
        Arc::new(RedditClient::new(http, creds)),
        RepostSettings::from_config(&config.repost),
    );

    match repost.run().await {
        Ok(report) => {
            println!("\n📮 Repost results:");
            println!("   Folders processed: {}", report.processed);
            println!("   Posted: {}", report.posted);
            println!("   Archived: {}", report.archived);
            println!("   Comment failures: {}", report.reply_failures);
            println!("   Failed: {}", report.failed);
        }
        Err(e) => error!("Error in main function: {}", e),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let _log_guard = init_logging()?;
    init_metrics();

    let cli = Cli::parse();
    let mut config = Config::load()?;

    match cli.command {
        Commands::RedditImages {
            subreddits,
            terms,
            max_items,
            workers,
        } => {
            info!("Running reddit image harvest");
            run_reddit_images(&mut config, subreddits, terms, max_items, workers).await?;
        }
        Commands::Instagram {
            profile,
            lookback_days,
            output_root,
        } => {
            info!("Running Instagram profile sync");
            run_instagram(&mut config, profile, lookback_days, output_root).await?;
        }
        Commands::Repost {
            base_folder,
            subreddit,
            flair,
        } => {
            info!("Running repost");
            run_repost(&mut config, base_folder, subreddit, flair).await?;
        }
    }
    Ok(())
}
