use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quizline::config::Config;
use quizline::content::{ContentNormalizer, SourceInput, UploadedFile};
use quizline::delivery::{BotApiSender, CancelSignal, ConsoleSender, DeliveryEngine, MessageSender};
use quizline::error::QuizErrorTrait;
use quizline::generation::GeminiClient;
use quizline::metrics;
use quizline::models::{Destination, Difficulty, RenderFormat, UserId};
use quizline::pipeline::{QuizOrchestrator, QuizSubmission, SubmitOutcome};
use quizline::quota::QuotaGate;
use quizline::scheduler::{JobBook, JobExecutor, Poller};
use quizline::storage::{QuizRepository, SqliteStore, UserRepository};

#[derive(Parser)]
#[command(
    name = "quizline",
    version,
    about = "Generate multiple-choice quizzes from study material and deliver them on a schedule",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); environment variables are used otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduled-job poller
    Serve {
        /// Print messages instead of calling the bot API
        #[arg(long)]
        console: bool,
    },

    /// Generate a quiz and deliver it now
    Generate {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        target: TargetArgs,

        /// Number of questions (defaults to the user's setting)
        #[arg(short = 'n', long)]
        count: Option<u32>,

        /// Render format (text, poll)
        #[arg(short, long)]
        format: Option<RenderFormat>,

        /// Seconds between messages
        #[arg(long)]
        pacing: Option<u32>,

        /// Print messages instead of calling the bot API
        #[arg(long)]
        console: bool,
    },

    /// Schedule a quiz for later delivery
    Schedule {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        target: TargetArgs,

        /// Local time, YYYY-MM-DD HH:MM
        #[arg(long)]
        at: String,

        /// Number of questions (defaults to the user's setting)
        #[arg(short = 'n', long)]
        count: Option<u32>,

        /// Render format (text, poll)
        #[arg(short, long)]
        format: Option<RenderFormat>,

        /// Seconds between messages
        #[arg(long, default_value = "5")]
        pacing: u32,
    },

    /// Manage scheduled jobs
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },

    /// List a user's quizzes, newest first
    Quizzes {
        #[arg(short, long)]
        user: UserId,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum JobsAction {
    /// List a user's scheduled jobs
    List {
        #[arg(short, long)]
        user: UserId,
    },

    /// Delete one of a user's scheduled jobs
    Delete {
        #[arg(short, long)]
        user: UserId,

        /// Job id
        id: String,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// Requesting user id
    #[arg(short, long)]
    user: UserId,

    /// Study note text
    #[arg(long, group = "source")]
    note: Option<String>,

    /// Bare topic title
    #[arg(long, group = "source")]
    title: Option<String>,

    /// Plain-text file
    #[arg(long, group = "source")]
    file: Option<PathBuf>,

    /// Difficulty (easy, medium, hard)
    #[arg(short, long, default_value = "medium")]
    difficulty: Difficulty,

    /// Allow questions beyond the given material
    #[arg(long)]
    beyond: bool,
}

#[derive(Args)]
struct TargetArgs {
    /// Destination chat id (defaults to the user's direct chat)
    #[arg(long, allow_negative_numbers = true)]
    chat: Option<i64>,

    /// Destination label shown in summaries
    #[arg(long)]
    label: Option<String>,
}

impl TargetArgs {
    fn destination(&self, user: UserId) -> Destination {
        match self.chat {
            Some(chat) if chat != user => {
                Destination::new(chat, self.label.clone().unwrap_or_else(|| chat.to_string()))
            }
            _ => Destination::direct(user),
        }
    }
}

impl SourceArgs {
    fn input(&self) -> Result<SourceInput> {
        if let Some(note) = &self.note {
            return Ok(SourceInput::Note(note.clone()));
        }
        if let Some(title) = &self.title {
            return Ok(SourceInput::Title(title.clone()));
        }
        if let Some(path) = &self.file {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            return Ok(SourceInput::File(UploadedFile {
                bytes,
                filename: path.file_name().map(|n| n.to_string_lossy().into_owned()),
                mime_type: None,
            }));
        }
        anyhow::bail!("one of --note, --title or --file is required")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate()?;

    let log_format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    setup_tracing(log_format, &config.logging.level, cli.verbose)?;

    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics disabled");
    }

    let store = Arc::new(
        SqliteStore::new(&config.database.sqlite_path).context("Failed to open database")?,
    );

    match cli.command {
        Commands::Serve { console } => serve(&config, store, console).await?,

        Commands::Generate {
            source,
            target,
            count,
            format,
            pacing,
            console,
        } => {
            tracing::info!(user_id = source.user, "Starting generate command");
            generate(&config, store, &source, &target, count, format, pacing, console).await?;
        }

        Commands::Schedule {
            source,
            target,
            at,
            count,
            format,
            pacing,
        } => {
            let gate = QuotaGate::new(store.clone(), config.quota.clone());
            let user = store.get_or_create(source.user)?;
            let normalized = ContentNormalizer::default().normalize(source.input()?).await?;
            let request = normalized.into_request(
                source.user,
                // scheduled jobs run on the service key
                count.map_or_else(
                    || gate.items_per_request(source.user, None),
                    |c| c.clamp(1, config.quota.per_request_cap(user.tier(None)).max(1)),
                ),
                source.difficulty,
                source.beyond,
            );
            let book = book(&config, store.clone());
            let job = book.schedule(
                request,
                target.destination(source.user),
                format.unwrap_or(user.default_format),
                pacing,
                &at,
            )?;
            println!("Scheduled {} for {} to {}", job.id, book.local_time(&job), job.destination);
        }

        Commands::Jobs { action } => {
            let book = book(&config, store);
            match action {
                JobsAction::List { user } => {
                    let jobs = book.list(user)?;
                    if jobs.is_empty() {
                        println!("No scheduled jobs.");
                    }
                    for job in jobs {
                        println!(
                            "{}  {}  {:<10}  {}",
                            job.id,
                            book.local_time(&job),
                            job.status,
                            job.destination.label
                        );
                    }
                }
                JobsAction::Delete { user, id } => {
                    book.delete(user, &id)?;
                    println!("Deleted {id}");
                }
            }
        }

        Commands::Quizzes { user, limit } => {
            for quiz in store.list_quizzes_for_owner(user, limit)? {
                println!(
                    "{}  {}  {} question(s)  played {}  shared {}",
                    quiz.id,
                    quiz.created_at.format("%Y-%m-%d %H:%M"),
                    quiz.items.len(),
                    quiz.play_count,
                    quiz.share_count
                );
                println!("    {}", quiz.title);
            }
        }
    }

    Ok(())
}

fn book(config: &Config, store: Arc<SqliteStore>) -> JobBook {
    JobBook::new(store, config.quota.utc_offset_hours)
        .with_pacing_bounds(config.delivery.min_pacing_secs, config.delivery.max_pacing_secs)
}

fn sender(config: &Config, console: bool) -> Result<Arc<dyn MessageSender>> {
    if console {
        return Ok(Arc::new(ConsoleSender));
    }
    let sender = BotApiSender::new(&config.delivery)
        .context("Bot API sender unavailable (set QUIZLINE_BOT_TOKEN or use --console)")?;
    Ok(Arc::new(sender))
}

async fn serve(config: &Config, store: Arc<SqliteStore>, console: bool) -> Result<()> {
    let generator = Arc::new(GeminiClient::new(config.generation.clone())?);
    let delivery = DeliveryEngine::new(sender(config, console)?, store.clone(), store.clone());
    let operator = config
        .delivery
        .operator_chat_id
        .map(|chat| Destination::new(chat, "operator"));

    let executor = JobExecutor::new(generator, delivery, store.clone(), config.generation.max_chunk_chars)
        .with_pacing_bounds(config.delivery.min_pacing_secs, config.delivery.max_pacing_secs)
        .with_operator(operator);
    let poller = Poller::new(store, executor, config.scheduler.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    poller.run(shutdown_rx).await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn generate(
    config: &Config,
    store: Arc<SqliteStore>,
    source: &SourceArgs,
    target: &TargetArgs,
    count: Option<u32>,
    format: Option<RenderFormat>,
    pacing: Option<u32>,
    console: bool,
) -> Result<()> {
    let generator = Arc::new(GeminiClient::new(config.generation.clone())?);
    let delivery = DeliveryEngine::new(sender(config, console)?, store.clone(), store.clone());
    let orchestrator = QuizOrchestrator::new(
        ContentNormalizer::default(),
        QuotaGate::new(store.clone(), config.quota.clone()),
        generator,
        delivery,
        store,
        config.generation.max_chunk_chars,
    )
    .with_pacing(
        config.delivery.min_pacing_secs,
        config.delivery.max_pacing_secs,
        config.delivery.default_pacing_secs,
    );

    let user_key = std::env::var("QUIZLINE_USER_API_KEY").ok();
    if user_key.is_some() {
        orchestrator.register_api_key(source.user, user_key.as_deref())?;
    }

    let submission = QuizSubmission {
        destination: target.destination(source.user),
        desired_count: count,
        format,
        difficulty: source.difficulty,
        allow_beyond_source: source.beyond,
        pacing_secs: pacing,
        api_key: user_key,
        ..QuizSubmission::new(source.user, source.input()?)
    };

    match orchestrator.deliver_now(submission, CancelSignal::never()).await {
        Ok(SubmitOutcome::Delivered(quiz)) => {
            if quiz.title_mode_warning {
                println!("Note: questions were generated from a title only and may go beyond it.");
            }
            println!(
                "Delivered {}/{} question(s) of \"{}\"",
                quiz.report.delivered, quiz.requested, quiz.title
            );
            if let Some(id) = quiz.report.quiz_id {
                println!("Quiz id: {id}");
            }
        }
        Ok(refused) => {
            if let Some(notice) = refused.notice() {
                println!("{notice}");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, category = e.category().as_str(), "Generation failed");
            println!("{}", e.user_message());
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("quizline=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_new(format!("quizline={level},warn"))
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("quizline=info,warn"))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_schedule() {
        let cli = Cli::try_parse_from([
            "quizline", "schedule", "--user", "7", "--title", "Rivers", "--at", "2030-01-01 10:00",
            "--chat", "-1001", "--label", "Geo",
        ])
        .unwrap();
        let Commands::Schedule { source, target, at, .. } = cli.command else {
            panic!("expected schedule");
        };
        assert_eq!(at, "2030-01-01 10:00");
        assert_eq!(target.destination(source.user), Destination::new(-1001, "Geo"));
    }

    #[test]
    fn test_sources_are_exclusive() {
        let parsed = Cli::try_parse_from([
            "quizline", "generate", "--user", "1", "--note", "a", "--title", "b",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_direct_destination_by_default() {
        let target = TargetArgs {
            chat: None,
            label: None,
        };
        assert_eq!(target.destination(9), Destination::direct(9));
    }
}
