use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SideArg {
    Contractor,
    Homeowner,
    Other,
}

#[derive(Debug, Parser)]
#[command(name = "remail", version, about = "Renovation project mail ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output structured JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log debug detail to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Settings file (defaults to ~/.remail/config.json)
    #[arg(long, global = true, env = "REMAIL_CONFIG")]
    config: Option<PathBuf>,

    /// Read mail from a directory of JSON messages instead of Gmail
    #[arg(long, global = true, env = "REMAIL_ARCHIVE")]
    archive: Option<PathBuf>,

    /// Gmail bearer token, overrides the settings file
    #[arg(long, global = true, env = "REMAIL_GMAIL_TOKEN", hide_env_values = true)]
    gmail_token: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Manage projects
    Projects {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Manage a project's team
    Members {
        #[command(subcommand)]
        command: MemberCommands,
    },
    /// List candidate message ids for a date window
    Discover(WindowArgs),
    /// Import a date window in rate-limited batches
    Import(ImportArgs),
    /// Reconstruct and validate conversation threads
    Threads(ThreadArgs),
    /// Handle one push notification payload
    Notify(NotifyArgs),
    /// Handle newline-delimited push payloads from stdin
    Listen(ListenArgs),
    /// Subscribe a project's mailbox to push notifications
    Watch(ProjectArg),
    /// Cancel a project's push subscription
    Stop(ProjectArg),
    /// Record a relevance score for a message
    Score { message_id: String, score: f64 },
    /// Show store stats
    Stats,
}

#[derive(Debug, Subcommand)]
enum ProjectCommands {
    /// Register or update a project
    Add {
        project_id: String,
        /// Mailbox the project's mail is read from
        #[arg(long)]
        mailbox: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "default")]
        user: String,
        /// Default discovery keyword (repeatable)
        #[arg(long = "keyword")]
        keywords: Vec<String>,
    },
    /// List projects
    List,
}

#[derive(Debug, Subcommand)]
enum MemberCommands {
    /// Add or update a team member
    Add {
        project_id: String,
        email: String,
        #[arg(long, value_enum, default_value = "contractor")]
        side: SideArg,
        #[arg(long)]
        name: Option<String>,
    },
    /// List a project's team
    List { project_id: String },
    /// Remove a team member
    Remove { project_id: String, email: String },
}

#[derive(Debug, Args)]
struct ProjectArg {
    #[arg(long)]
    project: String,
}

#[derive(Debug, Args)]
struct WindowArgs {
    #[arg(long)]
    project: String,
    /// First day of the window (YYYY-MM-DD)
    #[arg(long)]
    since: String,
    /// Last day of the window, inclusive (YYYY-MM-DD)
    #[arg(long)]
    until: String,
    /// Keyword filter (repeatable); defaults to the project's keywords
    #[arg(long = "keyword")]
    keywords: Vec<String>,
    /// Sender filter (repeatable)
    #[arg(long = "from")]
    senders: Vec<String>,
    #[arg(long, default_value_t = 500)]
    max_results: usize,
}

#[derive(Debug, Args)]
struct ImportArgs {
    #[command(flatten)]
    window: WindowArgs,
    #[arg(long, env = "REMAIL_BATCH_SIZE")]
    batch_size: Option<usize>,
    #[arg(long, env = "REMAIL_BATCH_DELAY_MS")]
    batch_delay_ms: Option<u64>,
    #[arg(long, env = "REMAIL_MAX_IN_FLIGHT")]
    max_in_flight: Option<usize>,
    #[arg(long, env = "REMAIL_MAX_RETRIES")]
    max_retries: Option<u32>,
}

#[derive(Debug, Args)]
struct ThreadArgs {
    #[arg(long)]
    project: String,
    #[arg(long)]
    since: Option<String>,
    #[arg(long)]
    until: Option<String>,
    #[arg(long)]
    max_gap_hours: Option<f64>,
    #[arg(long)]
    min_relevance: Option<f64>,
    /// Restrict to these provider message ids (repeatable)
    #[arg(long = "id", value_name = "MESSAGE_ID")]
    ids: Vec<String>,
}

#[derive(Debug, Args)]
struct NotifyArgs {
    #[arg(long)]
    project: String,
    /// File holding the payload; stdin when omitted or "-"
    payload: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ListenArgs {
    #[arg(long)]
    project: String,
    #[arg(long, env = "REMAIL_LISTEN_CONCURRENCY")]
    concurrency: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    commands::dispatch(cli).await
}

mod commands {
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use anyhow::{anyhow, bail, Context, Result};
    use chrono::{DateTime, NaiveDate, Utc};
    use tokio::io::{AsyncReadExt, BufReader};

    use remail::blob::FsBlobStore;
    use remail::config::Settings;
    use remail::db::models::{IngestionStatus, Project, Side, TeamMember};
    use remail::db::{Database, MessageFilters};
    use remail::output::{self, OutputFormat};
    use remail::pipeline::{
        self, DiscoveryRequest, ImportRequest, IngestContext, IngestOptions, LogProgress,
    };
    use remail::provider::{ArchiveProvider, GmailProvider, MailProvider, StaticToken};
    use remail::threads::{self, SideDirectory};

    use super::{
        Cli, Commands, ImportArgs, ListenArgs, MemberCommands, NotifyArgs, ProjectCommands,
        SideArg, ThreadArgs, WindowArgs,
    };

    /// Shared state every command starts from.
    struct Env {
        settings: Settings,
        db: Database,
        format: OutputFormat,
        archive: Option<std::path::PathBuf>,
        gmail_token: Option<String>,
    }

    pub async fn dispatch(cli: Cli) -> Result<()> {
        let settings = Settings::load(cli.config.as_deref()).context("load remail settings")?;
        let db_path = settings.db_path().context("resolve remail database path")?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create data directory {}", parent.display()))?;
        }
        let db = Database::open(&db_path)
            .with_context(|| format!("open remail database at {}", db_path.display()))?;

        let mut env = Env {
            settings,
            db,
            format: OutputFormat::from_json_flag(cli.json),
            archive: cli.archive,
            gmail_token: cli.gmail_token,
        };

        match cli.command {
            Commands::Projects { command } => handle_projects(&env, command),
            Commands::Members { command } => handle_members(&env, command),
            Commands::Discover(args) => handle_discover(&env, args).await,
            Commands::Import(args) => handle_import(&mut env, args).await,
            Commands::Threads(args) => handle_threads(&env, args),
            Commands::Notify(args) => handle_notify(&env, args).await,
            Commands::Listen(args) => handle_listen(&env, args).await,
            Commands::Watch(args) => handle_watch(&env, &args.project).await,
            Commands::Stop(args) => handle_stop(&env, &args.project).await,
            Commands::Score { message_id, score } => handle_score(&env, &message_id, score),
            Commands::Stats => handle_stats(&env),
        }
    }

    fn handle_projects(env: &Env, command: ProjectCommands) -> Result<()> {
        match command {
            ProjectCommands::Add {
                project_id,
                mailbox,
                name,
                user,
                keywords,
            } => {
                let project = Project {
                    name: name.unwrap_or_else(|| project_id.clone()),
                    project_id,
                    user_id: user,
                    mailbox,
                    keywords,
                    created_at: None,
                };
                env.db.insert_project(&project)?;
                println!("Added project: {}", project.project_id);
            }
            ProjectCommands::List => {
                let projects = env.db.list_projects()?;
                println!("{}", output::format_projects(env.format, &projects)?);
            }
        }
        Ok(())
    }

    fn handle_members(env: &Env, command: MemberCommands) -> Result<()> {
        match command {
            MemberCommands::Add {
                project_id,
                email,
                side,
                name,
            } => {
                require_project(&env.db, &project_id)?;
                let member = TeamMember {
                    project_id,
                    email_address: email,
                    display_name: name,
                    side: map_side(side),
                };
                env.db.upsert_team_member(&member)?;
                println!(
                    "Added {} member {} to {}",
                    member.side, member.email_address, member.project_id
                );
            }
            MemberCommands::List { project_id } => {
                require_project(&env.db, &project_id)?;
                let members = env.db.list_team_members(&project_id)?;
                println!("{}", output::format_members(env.format, &members)?);
            }
            MemberCommands::Remove { project_id, email } => {
                let removed = env.db.remove_team_member(&project_id, &email)?;
                if removed == 0 {
                    println!("No member {email} in {project_id}");
                } else {
                    println!("Removed member {email} from {project_id}");
                }
            }
        }
        Ok(())
    }

    async fn handle_discover(env: &Env, args: WindowArgs) -> Result<()> {
        let project = require_project(&env.db, &args.project)?;
        let provider = build_provider(env, &project.mailbox)?;

        let mut request = DiscoveryRequest::new(
            parse_date_arg("since", &args.since)?,
            parse_date_arg("until", &args.until)?,
        );
        request.keywords = if args.keywords.is_empty() {
            project.keywords.clone()
        } else {
            args.keywords
        };
        request.senders = args.senders;
        request.max_results = args.max_results;

        let ids = pipeline::discover(provider.as_ref(), &request)
            .await
            .with_context(|| format!("discover messages for {}", project.project_id))?;
        let query = pipeline::build_query(&request);
        println!("{}", output::format_candidates(env.format, &query, &ids)?);
        Ok(())
    }

    async fn handle_import(env: &mut Env, args: ImportArgs) -> Result<()> {
        if let Some(delay) = args.batch_delay_ms {
            env.settings.batch_delay_ms = delay;
        }
        if let Some(max_in_flight) = args.max_in_flight {
            env.settings.max_in_flight = max_in_flight;
        }
        if let Some(max_retries) = args.max_retries {
            env.settings.max_retries = max_retries;
        }
        env.settings.validate().context("invalid import settings")?;

        let window = args.window;
        let project = require_project(&env.db, &window.project)?;
        let ctx = build_context(env, &project.mailbox)?;

        let mut request = ImportRequest::new(
            project.project_id.clone(),
            parse_date_arg("since", &window.since)?,
            parse_date_arg("until", &window.until)?,
        );
        request.batch_size = args.batch_size;
        request.keywords = window.keywords;
        request.senders = window.senders;
        request.max_results = window.max_results;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_signal = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("stopping after the current batch");
                stop_signal.store(true, Ordering::SeqCst);
            }
        });

        let summary = pipeline::run_import(&ctx, &request, &LogProgress, &stop)
            .await
            .with_context(|| format!("import {}", project.project_id))?;
        println!("{}", output::format_import(env.format, &summary)?);
        Ok(())
    }

    fn handle_threads(env: &Env, args: ThreadArgs) -> Result<()> {
        let project = require_project(&env.db, &args.project)?;
        let mut rules = env.settings.threads.clone();
        if let Some(hours) = args.max_gap_hours {
            rules.max_gap_hours = hours;
        }
        if args.min_relevance.is_some() {
            rules.min_relevance = args.min_relevance;
        }

        let messages = env
            .db
            .list_messages(&thread_filters(&project.project_id, &args)?)?;
        let members = env.db.list_team_members(&project.project_id)?;
        let directory = SideDirectory::from_members(&members);

        let threads = threads::reconstruct(&messages, &directory, &rules);
        println!("{}", output::format_threads(env.format, &threads)?);
        Ok(())
    }

    async fn handle_notify(env: &Env, args: NotifyArgs) -> Result<()> {
        let project = require_project(&env.db, &args.project)?;
        let ctx = build_context(env, &project.mailbox)?;

        let payload = match args.payload.as_deref() {
            Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
                .with_context(|| format!("read payload {}", path.display()))?,
            _ => {
                let mut buffer = String::new();
                tokio::io::stdin()
                    .read_to_string(&mut buffer)
                    .await
                    .context("read payload from stdin")?;
                buffer
            }
        };

        let report = pipeline::handle_notification(&ctx, payload.trim())
            .await
            .context("handle push notification")?;
        println!("{}", output::format_notification(env.format, &report)?);
        Ok(())
    }

    async fn handle_listen(env: &Env, args: ListenArgs) -> Result<()> {
        let project = require_project(&env.db, &args.project)?;
        let ctx = Arc::new(build_context(env, &project.mailbox)?);
        let concurrency = args
            .concurrency
            .unwrap_or(env.settings.listen_concurrency)
            .max(1);

        let reader = BufReader::new(tokio::io::stdin());
        let mut writer = tokio::io::stdout();
        tokio::select! {
            summary = pipeline::listen(ctx, reader, &mut writer, concurrency) => {
                let summary = summary.context("read push payloads")?;
                eprintln!("{}", output::format_listen(env.format, &summary)?);
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("listener interrupted");
            }
        }
        Ok(())
    }

    async fn handle_watch(env: &Env, project_id: &str) -> Result<()> {
        let project = require_project(&env.db, project_id)?;
        let ctx = build_context(env, &project.mailbox)?;
        let handle = pipeline::start_watch(&ctx)
            .await
            .with_context(|| format!("watch mailbox {}", project.mailbox))?;
        println!("{}", output::format_watch(env.format, &handle)?);
        Ok(())
    }

    async fn handle_stop(env: &Env, project_id: &str) -> Result<()> {
        let project = require_project(&env.db, project_id)?;
        let ctx = build_context(env, &project.mailbox)?;
        match pipeline::stop_watch(&ctx)
            .await
            .with_context(|| format!("stop watching {}", project.mailbox))?
        {
            Some(_) => println!("Stopped watching {}", project.mailbox),
            None => println!("No active watch for {}", project.mailbox),
        }
        Ok(())
    }

    fn handle_score(env: &Env, message_id: &str, score: f64) -> Result<()> {
        env.db
            .set_relevance_score(message_id, score)
            .with_context(|| format!("score message {message_id}"))?;
        let message = env
            .db
            .get_message(message_id)?
            .ok_or_else(|| anyhow!("message not found for id '{message_id}'"))?;
        println!("{}", output::format_message(env.format, &message)?);
        Ok(())
    }

    fn handle_stats(env: &Env) -> Result<()> {
        let stats = env.db.get_stats()?;
        println!("{}", output::format_stats(env.format, &stats)?);
        Ok(())
    }

    fn build_provider(env: &Env, mailbox: &str) -> Result<Arc<dyn MailProvider>> {
        if let Some(root) = &env.archive {
            let provider = ArchiveProvider::new(root, mailbox)
                .with_context(|| format!("open archive {}", root.display()))?;
            return Ok(Arc::new(provider));
        }

        let token = env
            .gmail_token
            .clone()
            .or_else(|| env.settings.gmail.access_token.clone())
            .ok_or_else(|| {
                anyhow!("no Gmail access token; set REMAIL_GMAIL_TOKEN or pass --archive <dir>")
            })?;
        let mut provider = GmailProvider::new(mailbox, Arc::new(StaticToken::new(token)))
            .with_topic(env.settings.gmail.topic.clone());
        if let Some(api_base) = &env.settings.gmail.api_base {
            provider = provider.with_api_base(api_base.clone());
        }
        Ok(Arc::new(provider))
    }

    fn build_context(env: &Env, mailbox: &str) -> Result<IngestContext> {
        let provider = build_provider(env, mailbox)?;
        let blob_root = env.settings.blob_root().context("resolve blob directory")?;
        Ok(IngestContext::new(
            provider,
            env.db.clone(),
            Arc::new(FsBlobStore::new(blob_root)),
            IngestOptions::from_settings(&env.settings),
        ))
    }

    fn require_project(db: &Database, project_id: &str) -> Result<Project> {
        match db.get_project(project_id)? {
            Some(project) => Ok(project),
            None => bail!("project not found: {project_id}; use 'remail projects add' first"),
        }
    }

    /// Completed messages of one project, narrowed by window and ids.
    fn thread_filters(project_id: &str, args: &ThreadArgs) -> Result<MessageFilters> {
        let since = args
            .since
            .as_deref()
            .map(|raw| parse_date_arg("since", raw).map(start_of_day))
            .transpose()?;
        let until = args
            .until
            .as_deref()
            .map(|raw| parse_date_arg("until", raw).map(end_of_day))
            .transpose()?;

        Ok(MessageFilters {
            project_id: Some(project_id.to_string()),
            status: Some(IngestionStatus::Completed),
            since,
            until,
            ids: args
                .ids
                .iter()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect(),
            ..MessageFilters::default()
        })
    }

    fn parse_date_arg(label: &str, value: &str) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
            .with_context(|| format!("invalid --{label} date '{value}', expected YYYY-MM-DD"))
    }

    fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
        date.and_time(chrono::NaiveTime::MIN).and_utc()
    }

    fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
        date.and_hms_opt(23, 59, 59)
            .map(|at| at.and_utc())
            .unwrap_or_else(|| start_of_day(date))
    }

    fn map_side(value: SideArg) -> Side {
        match value {
            SideArg::Contractor => Side::Contractor,
            SideArg::Homeowner => Side::Homeowner,
            SideArg::Other => Side::Other,
        }
    }

    #[cfg(test)]
    mod tests {
        use clap::Parser;

        use super::thread_filters;
        use crate::{Cli, Commands};

        fn thread_args(argv: &[&str]) -> super::ThreadArgs {
            let cli = Cli::try_parse_from(argv).expect("parse cli");
            match cli.command {
                Commands::Threads(args) => args,
                other => panic!("expected threads command, got {other:?}"),
            }
        }

        #[test]
        fn repeated_id_flags_narrow_thread_filters() {
            let args = thread_args(&[
                "remail", "threads", "--project", "kitchen", "--id", "quote", "--id", " reply ",
            ]);
            let filters = thread_filters("kitchen", &args).expect("filters");
            assert_eq!(filters.ids, vec!["quote", "reply"]);
            assert_eq!(filters.project_id.as_deref(), Some("kitchen"));
        }

        #[test]
        fn thread_filters_without_ids_cover_the_window() {
            let args = thread_args(&[
                "remail", "threads", "--project", "kitchen", "--since", "2026-03-01",
            ]);
            let filters = thread_filters("kitchen", &args).expect("filters");
            assert!(filters.ids.is_empty());
            assert_eq!(
                filters.since.map(|at| at.to_rfc3339()),
                Some("2026-03-01T00:00:00+00:00".to_string())
            );

            let bad = thread_args(&[
                "remail", "threads", "--project", "kitchen", "--until", "March",
            ]);
            assert!(thread_filters("kitchen", &bad).is_err());
        }
    }
}
