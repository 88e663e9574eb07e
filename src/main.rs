use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;

use newsrank::models::{ActionKind, PreferenceUpdate};
use newsrank::scheduler::TriggerOutcome;
use newsrank::{App, Config, Result};

/// Personalized news ranking over RSS/Atom feeds.
#[derive(Parser)]
#[command(name = "newsrank", version, about)]
struct Cli {
    /// Path to the TOML config. Defaults to the user config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at INFO instead of WARN (RUST_LOG still wins).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scheduled ingestion until Ctrl-C.
    Serve,

    /// Run one ingestion pass now and print its report.
    Ingest,

    /// Embed stored articles that have no embedding yet.
    Backfill {
        #[arg(long, default_value_t = 500)]
        limit: usize,
    },

    /// Delete articles published more than `days` ago.
    Purge {
        #[arg(long)]
        days: u32,
    },

    /// Newest articles, not personalized.
    Latest {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Only articles from this source
        #[arg(long)]
        source: Option<String>,
    },

    /// Articles whose title or description contains a keyword.
    Search {
        keyword: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Ranked articles for a user.
    Recommend {
        #[arg(long)]
        user: i64,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    User {
        #[command(subcommand)]
        action: UserAction,
    },

    Pref {
        #[command(subcommand)]
        action: PrefAction,
    },

    /// Record that a user viewed, clicked or dismissed an article.
    Interact {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        url: String,
        /// viewed, clicked or dismissed ("read" is accepted for viewed)
        #[arg(long)]
        action: String,
    },

    /// A user's interactions, newest first.
    History {
        #[arg(long)]
        user: i64,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Print the full text of an article, fetching it if needed.
    Content { url: String },

    /// Corpus size and embedding cache counters.
    Status,
}

#[derive(Subcommand)]
enum UserAction {
    Add {
        username: String,
        #[arg(long)]
        credential: String,
        #[arg(long)]
        email: Option<String>,
    },
    Delete {
        id: i64,
        /// Show what would be removed and keep the user
        #[arg(long)]
        dry_run: bool,
    },
    List,
}

#[derive(Subcommand)]
enum PrefAction {
    Add {
        #[arg(long)]
        user: i64,
        description: String,
        #[arg(long)]
        weight: Option<f32>,
    },
    List {
        #[arg(long)]
        user: i64,
    },
    Update {
        #[arg(long)]
        user: i64,
        id: i64,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        weight: Option<f32>,
    },
    Remove {
        #[arg(long)]
        user: i64,
        id: i64,
    },
    Clear {
        #[arg(long)]
        user: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(cli.config.as_deref())?;
    let app = App::new(&config).await?;

    run(&app, cli.command).await?;
    Ok(())
}

async fn run(app: &App, command: Commands) -> Result<()> {
    match command {
        Commands::Serve => {
            app.scheduler().start();
            println!("Scheduler running, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            println!("Waiting for the current ingestion run to finish...");
            app.scheduler().shutdown().await;
        }
        Commands::Ingest => match app.trigger_ingestion().await? {
            TriggerOutcome::Completed(report) => print_json(&report)?,
            TriggerOutcome::Coalesced => println!("An ingestion run is already in progress"),
        },
        Commands::Backfill { limit } => {
            let outcome = app.backfill(limit).await?;
            print_json(&outcome)?;
        }
        Commands::Purge { days } => {
            let purged = app.purge_older_than_days(days).await?;
            println!("Purged {} articles", purged);
        }
        Commands::Latest { limit, source } => match source {
            Some(source) => print_json(&app.get_articles_by_source(&source, limit).await?)?,
            None => print_json(&app.get_latest_articles(limit).await?)?,
        },
        Commands::Search { keyword, limit } => {
            print_json(&app.search_articles(&keyword, limit).await?)?
        }
        Commands::Recommend { user, limit } => {
            print_json(&app.get_recommendations(user, limit).await?)?
        }
        Commands::User { action } => match action {
            UserAction::Add {
                username,
                credential,
                email,
            } => print_json(
                &app.register_user(&username, &credential, email.as_deref())
                    .await?,
            )?,
            UserAction::Delete { id, dry_run: true } => {
                print_json(&app.deletion_preview(id).await?)?
            }
            UserAction::Delete { id, dry_run: false } => print_json(&app.delete_user(id).await?)?,
            UserAction::List => print_json(&app.list_users().await?)?,
        },
        Commands::Pref { action } => match action {
            PrefAction::Add {
                user,
                description,
                weight,
            } => print_json(&app.add_preference(user, &description, weight).await?)?,
            PrefAction::List { user } => print_json(&app.list_preferences(user).await?)?,
            PrefAction::Update {
                user,
                id,
                description,
                weight,
            } => {
                let update = PreferenceUpdate {
                    description,
                    weight,
                };
                print_json(&app.update_preference(user, id, update).await?)?
            }
            PrefAction::Remove { user, id } => {
                app.remove_preference(user, id).await?;
                println!("Removed preference {}", id);
            }
            PrefAction::Clear { user } => {
                let removed = app.clear_preferences(user).await?;
                println!("Removed {} preferences", removed);
            }
        },
        Commands::Interact { user, url, action } => {
            let action: ActionKind = action.parse()?;
            print_json(&app.record_interaction(user, &url, action).await?)?
        }
        Commands::History { user, limit } => {
            print_json(&app.reading_history(user, limit).await?)?
        }
        Commands::Content { url } => match app.article_content(&url).await? {
            Some(text) => println!("{}", text),
            None => println!("No readable content found for {}", url),
        },
        Commands::Status => {
            #[derive(Serialize)]
            struct Status {
                articles: u64,
                cache: newsrank::embedding::CacheStats,
                scheduler: newsrank::scheduler::SchedulerStatus,
            }
            print_json(&Status {
                articles: app.article_count().await?,
                cache: app.cache_stats(),
                scheduler: app.scheduler_status(),
            })?
        }
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
