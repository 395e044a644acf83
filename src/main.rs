use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TabArg {
    Inbox,
    Sent,
    Draft,
}

#[derive(Debug, Parser)]
#[command(name = "mailsync", version, about = "Mailbox sync engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output structured JSON
    #[arg(long, global = true)]
    json: bool,

    /// SQLite database path
    #[arg(long, global = true, env = "MAILSYNC_DB_PATH")]
    db: Option<PathBuf>,

    /// Owning user for account lookups
    #[arg(long, global = true, env = "MAILSYNC_USER_ID", default_value = "local")]
    user: String,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Manage linked accounts
    Accounts {
        #[command(subcommand)]
        command: AccountCommands,
    },
    /// Run an initial or incremental sync
    Sync(SyncArgs),
    /// List threads in one tab
    Threads(ThreadsArgs),
    /// Show one thread with its messages
    Thread {
        thread_id: String,
        #[arg(long)]
        account: String,
    },
    /// Search thread subjects, bodies and senders
    Search(SearchArgs),
    /// Send a new message
    Send(ComposeArgs),
    /// Reply to a message
    Reply {
        message_id: String,
        #[command(flatten)]
        compose: ComposeArgs,
    },
    /// Show database stats
    Stats,
}

#[derive(Debug, Subcommand)]
enum AccountCommands {
    /// List accounts of the current user
    List,
    /// Link an account with a provider bearer token
    Add {
        email: String,
        #[arg(long, env = "MAILSYNC_ACCESS_TOKEN", hide_env_values = true)]
        token: String,
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
    /// Remove an account and its mail
    Remove { account_id: String },
}

#[derive(Debug, Args)]
struct SyncArgs {
    /// Account to sync; all accounts of the user when omitted
    #[arg(long)]
    account: Option<String>,
    /// Run the bootstrap sync instead of a delta sync
    #[arg(long, default_value_t = false)]
    initial: bool,
}

#[derive(Debug, Args)]
struct ThreadsArgs {
    #[arg(long)]
    account: String,
    #[arg(long, value_enum, default_value = "inbox")]
    tab: TabArg,
    #[arg(long, default_value_t = false)]
    done: bool,
    #[arg(long, default_value_t = 15)]
    limit: usize,
    /// Print only the number of threads in the tab
    #[arg(long, default_value_t = false)]
    count: bool,
}

#[derive(Debug, Args)]
struct SearchArgs {
    query: String,
    #[arg(long)]
    account: String,
    #[arg(long, default_value_t = 25)]
    limit: usize,
}

#[derive(Debug, Args)]
struct ComposeArgs {
    #[arg(long)]
    account: String,
    #[arg(long, required = true)]
    to: Vec<String>,
    #[arg(long)]
    cc: Vec<String>,
    #[arg(long)]
    bcc: Vec<String>,
    #[arg(long)]
    subject: String,
    #[arg(long)]
    body: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    commands::dispatch(cli).await
}

mod commands {
    use anyhow::{anyhow, Context, Result};
    use uuid::Uuid;

    use mailsync::compose::{self, ComposeRequest};
    use mailsync::config::Config;
    use mailsync::db::models::{Account, FolderLabel};
    use mailsync::db::{Database, ThreadFilter};
    use mailsync::output::{self, OutputFormat};
    use mailsync::provider::AurinkoClient;
    use mailsync::trigger;

    use super::{AccountCommands, Cli, Commands, ComposeArgs, TabArg};

    struct Session {
        config: Config,
        db: Database,
        user: String,
        format: OutputFormat,
    }

    pub async fn dispatch(cli: Cli) -> Result<()> {
        let config = Config::from_env().context("read mailsync configuration")?;
        let db_path = match cli.db.clone().or_else(|| config.db_path.clone()) {
            Some(path) => path,
            None => Database::default_db_path().context("resolve default database path")?,
        };
        let db = Database::open(&db_path)
            .with_context(|| format!("open database at {}", db_path.display()))?
            .with_token_key(config.token_key.clone());

        let session = Session {
            config,
            db,
            user: cli.user.trim().to_string(),
            format: OutputFormat::from_json_flag(cli.json),
        };

        match cli.command {
            Commands::Accounts { command } => handle_accounts(&session, command),
            Commands::Sync(args) => handle_sync(&session, args).await,
            Commands::Threads(args) => handle_threads(&session, args),
            Commands::Thread { thread_id, account } => {
                handle_thread(&session, &account, &thread_id)
            }
            Commands::Search(args) => handle_search(&session, args),
            Commands::Send(args) => handle_send(&session, args, None).await,
            Commands::Reply {
                message_id,
                compose,
            } => handle_send(&session, compose, Some(message_id)).await,
            Commands::Stats => handle_stats(&session),
        }
    }

    fn provider(session: &Session) -> AurinkoClient {
        AurinkoClient::new(&session.config.api_base, session.config.sync_window.clone())
    }

    fn owned_account(session: &Session, account_id: &str) -> Result<Account> {
        session
            .db
            .get_account(account_id)?
            .filter(|account| account.user_id == session.user)
            .ok_or_else(|| anyhow!("account not found: {account_id}"))
    }

    fn handle_accounts(session: &Session, command: AccountCommands) -> Result<()> {
        match command {
            AccountCommands::List => {
                let accounts = session.db.list_accounts(Some(&session.user))?;
                println!("{}", output::format_accounts(session.format, &accounts)?);
            }
            AccountCommands::Add {
                email,
                token,
                id,
                name,
            } => {
                let email = email.trim().to_string();
                if !email.contains('@') {
                    return Err(anyhow!("invalid account email address: {email}"));
                }
                let account = Account {
                    id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                    user_id: session.user.clone(),
                    email_address: email,
                    name,
                    access_token: token.trim().to_string(),
                    next_delta_token: None,
                    last_sync: None,
                };
                session
                    .db
                    .insert_account(&account)
                    .with_context(|| format!("store account {}", account.email_address))?;
                println!("Added account: {} ({})", account.email_address, account.id);
            }
            AccountCommands::Remove { account_id } => {
                owned_account(session, &account_id)?;
                let removed = session.db.remove_account(&account_id)?;
                if removed == 0 {
                    println!("No account found: {account_id}");
                } else {
                    println!("Removed account: {account_id}");
                }
            }
        }
        Ok(())
    }

    async fn handle_sync(session: &Session, args: super::SyncArgs) -> Result<()> {
        let account_ids: Vec<String> = match args.account {
            Some(account_id) => vec![account_id],
            None => session
                .db
                .list_accounts(Some(&session.user))?
                .into_iter()
                .map(|account| account.id)
                .collect(),
        };
        if account_ids.is_empty() {
            return Err(anyhow!("no accounts configured for user {}", session.user));
        }

        let provider = provider(session);
        let mut failures = 0usize;
        for account_id in &account_ids {
            let result = if args.initial {
                trigger::run_initial_sync(
                    &session.db,
                    &provider,
                    &session.config.sync,
                    account_id,
                    &session.user,
                )
                .await
            } else {
                trigger::run_incremental_sync(&session.db, &provider, account_id, &session.user).await
            };

            match result {
                Ok(outcome) => {
                    println!("{}", output::format_sync_outcome(session.format, &outcome)?);
                }
                Err(error) => {
                    failures += 1;
                    eprintln!("sync failed for {account_id}: [{}] {error}", error.code());
                }
            }
        }

        if failures > 0 {
            return Err(anyhow!(
                "{failures} of {} account sync(s) failed",
                account_ids.len()
            ));
        }
        Ok(())
    }

    fn handle_threads(session: &Session, args: super::ThreadsArgs) -> Result<()> {
        let account = owned_account(session, &args.account)?;
        let tab = map_tab(args.tab);

        if args.count {
            let count = session.db.count_threads(&account.id, tab)?;
            if session.format == OutputFormat::Json {
                println!("{}", serde_json::json!({ "tab": tab, "count": count }));
            } else {
                println!("{count}");
            }
            return Ok(());
        }

        let threads = session.db.list_threads(&ThreadFilter {
            account_id: account.id,
            tab,
            done: args.done,
            limit: args.limit,
        })?;
        println!("{}", output::format_threads(session.format, &threads)?);
        Ok(())
    }

    fn handle_thread(session: &Session, account_id: &str, thread_id: &str) -> Result<()> {
        let account = owned_account(session, account_id)?;
        let view = session
            .db
            .get_thread_view(&account.id, thread_id)?
            .ok_or_else(|| anyhow!("thread not found: {thread_id}"))?;
        println!("{}", output::format_thread(session.format, &view)?);
        Ok(())
    }

    fn handle_search(session: &Session, args: super::SearchArgs) -> Result<()> {
        let account = owned_account(session, &args.account)?;
        let threads = session.db.search_threads(&account.id, &args.query, args.limit)?;
        println!("{}", output::format_search_results(session.format, &threads)?);
        Ok(())
    }

    async fn handle_send(
        session: &Session,
        args: ComposeArgs,
        reply_to: Option<String>,
    ) -> Result<()> {
        let request = ComposeRequest {
            account_id: args.account,
            user_id: session.user.clone(),
            to: args.to,
            cc: args.cc,
            bcc: args.bcc,
            subject: args.subject,
            body: args.body,
        };
        let provider = provider(session);

        let sent = match &reply_to {
            Some(message_id) => compose::send_reply(&session.db, &provider, &request, message_id).await,
            None => compose::send_email(&session.db, &provider, &request).await,
        }?;

        if session.format == OutputFormat::Json {
            println!("{}", serde_json::json!({ "success": true, "message": sent }));
        } else {
            match (&reply_to, &sent.id) {
                (Some(message_id), _) => println!("Reply to {message_id} sent"),
                (None, Some(id)) => println!("Message sent: {id}"),
                (None, None) => println!("Message sent"),
            }
        }
        Ok(())
    }

    fn handle_stats(session: &Session) -> Result<()> {
        let stats = session.db.get_stats()?;
        println!("{}", output::format_stats(session.format, &stats)?);
        Ok(())
    }

    fn map_tab(tab: TabArg) -> FolderLabel {
        match tab {
            TabArg::Inbox => FolderLabel::Inbox,
            TabArg::Sent => FolderLabel::Sent,
            TabArg::Draft => FolderLabel::Draft,
        }
    }
}
