//! The `clai` multitool: thin client subcommands for shell hooks and
//! widgets, plus `clai daemon` to run the service itself.
//!
//! Client subcommands follow the shell-integration contract: on any failure
//! they print nothing and exit 0, so a broken daemon can never break the
//! user's shell. Only `clai daemon` propagates errors into a non-zero exit.

use clap::Parser;
use clap::Subcommand;

use clai_client::ClaiClient;
use clai_client::ConnectOptions;
use clai_protocol::ClientOp;
use clai_protocol::ShellKind;

/// Shell command suggestions from your own history.
#[derive(Debug, Parser)]
#[clap(name = "clai", version)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Announce a new shell session.
    SessionStart {
        session_id: String,
        #[clap(long)]
        cwd: Option<String>,
        #[clap(long)]
        shell: Option<String>,
    },
    /// Announce the end of a shell session.
    SessionEnd { session_id: String },
    /// Record that a command started executing.
    LogStart {
        session_id: String,
        command_id: String,
        #[clap(long)]
        cwd: Option<String>,
        /// The raw command line.
        command: String,
    },
    /// Record a command's exit status.
    LogEnd {
        session_id: String,
        command_id: String,
        exit_code: i32,
        duration_ms: i64,
    },
    /// Rank suggestions for the current buffer; one line per suggestion.
    Suggest {
        session_id: String,
        #[clap(long)]
        cwd: Option<String>,
        #[clap(long, default_value = "")]
        buffer: String,
        #[clap(long)]
        cursor_pos: Option<usize>,
        #[clap(long)]
        include_ai: bool,
        #[clap(long)]
        max_results: Option<usize>,
        /// Second segment of the cache key; widgets bump it per request kind.
        #[clap(long, default_value_t = 0)]
        tab_generation: u32,
        #[clap(long)]
        include_low_confidence: bool,
    },
    /// Translate a natural-language prompt into commands.
    TextToCommand {
        session_id: String,
        prompt: String,
        #[clap(long)]
        cwd: Option<String>,
        #[clap(long)]
        max_suggestions: Option<usize>,
    },
    /// Report what happened to a suggestion.
    Feedback {
        session_id: String,
        /// accepted | dismissed | edited | never | unblock | ignored | timeout
        action: String,
        suggested: String,
        #[clap(long)]
        executed: Option<String>,
        #[clap(long)]
        prefix: Option<String>,
        #[clap(long)]
        latency_ms: Option<u64>,
    },
    /// Paginated history for the picker.
    History {
        session_id: String,
        #[clap(long)]
        cwd: Option<String>,
        /// global | repo | session
        #[clap(long, default_value = "global")]
        scope: String,
        #[clap(long)]
        limit: Option<usize>,
        #[clap(long)]
        offset: Option<usize>,
        #[clap(long)]
        filter: Option<String>,
    },
    /// Import an existing shell history file.
    ImportHistory {
        /// bash | zsh | fish
        shell: String,
        #[clap(long)]
        path: Option<String>,
    },
    /// Daemon status summary.
    Status,
    /// Daemon liveness check.
    Ping,
    /// Run the suggestion daemon in the foreground.
    Daemon,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Daemon => clai_daemon::run().await,
        command => {
            // Client operations are silent on failure and always exit 0.
            if let Err(_e) = run_client(command).await {
                // Intentionally nothing: the shell stays usable.
            }
            Ok(())
        }
    }
}

fn cwd_or_current(cwd: Option<String>) -> String {
    cwd.unwrap_or_else(|| {
        std::env::current_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
    })
}

fn parse_action(action: &str) -> Option<clai_protocol::FeedbackAction> {
    use clai_protocol::FeedbackAction::*;
    match action {
        "accepted" => Some(Accepted),
        "dismissed" => Some(Dismissed),
        "edited" => Some(Edited),
        "never" => Some(Never),
        "unblock" => Some(Unblock),
        "ignored" => Some(Ignored),
        "timeout" => Some(Timeout),
        _ => None,
    }
}

async fn run_client(command: Command) -> Result<(), clai_client::ClientError> {
    let options = ConnectOptions::default();
    let mut client = ClaiClient::establish(&options).await?;
    let now = clai_core::now_ms();

    match command {
        Command::Daemon => unreachable!("handled in main"),
        Command::SessionStart {
            session_id,
            cwd,
            shell,
        } => {
            let shell = shell
                .as_deref()
                .and_then(|s| s.parse::<ShellKind>().ok())
                .unwrap_or_default();
            client
                .send_event(ClientOp::SessionStart(clai_protocol::SessionStartParams {
                    session_id,
                    cwd: cwd_or_current(cwd),
                    shell,
                    ts_ms: now,
                    client: client_info(),
                }))
                .await
        }
        Command::SessionEnd { session_id } => {
            client
                .send_event(ClientOp::SessionEnd(clai_protocol::SessionEndParams {
                    session_id,
                    ts_ms: now,
                }))
                .await
        }
        Command::LogStart {
            session_id,
            command_id,
            cwd,
            command,
        } => {
            let cwd = cwd_or_current(cwd);
            let repo_root = clai_core::git::resolve_repo_root(std::path::Path::new(&cwd));
            let git_branch = repo_root.as_deref().and_then(clai_core::git::read_branch);
            let repo_name = repo_root
                .as_deref()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned());
            client
                .send_event(ClientOp::CommandStarted(
                    clai_protocol::CommandStartedParams {
                        session_id,
                        command_id,
                        ts_ms: now,
                        cwd,
                        cmd_raw: command,
                        git_branch,
                        repo_name,
                        repo_root: repo_root.map(|p| p.to_string_lossy().into_owned()),
                        prev_command_id: None,
                        ephemeral: false,
                    },
                ))
                .await
        }
        Command::LogEnd {
            session_id,
            command_id,
            exit_code,
            duration_ms,
        } => {
            client
                .send_event(ClientOp::CommandEnded(clai_protocol::CommandEndedParams {
                    session_id,
                    command_id,
                    ts_ms: now,
                    exit_code,
                    duration_ms,
                }))
                .await
        }
        Command::Suggest {
            session_id,
            cwd,
            buffer,
            cursor_pos,
            include_ai,
            max_results,
            tab_generation,
            include_low_confidence,
        } => {
            let suggestions = client
                .suggest(clai_protocol::SuggestParams {
                    session_id,
                    cwd: cwd_or_current(cwd),
                    buffer,
                    cursor_pos,
                    include_ai,
                    max_results,
                    include_low_confidence,
                    tab_generation,
                })
                .await?;
            for suggestion in suggestions {
                println!("{}", suggestion.text);
            }
            Ok(())
        }
        Command::TextToCommand {
            session_id,
            prompt,
            cwd,
            max_suggestions,
        } => {
            let suggestions = client
                .text_to_command(clai_protocol::TextToCommandParams {
                    session_id,
                    cwd: cwd_or_current(cwd),
                    prompt,
                    max_suggestions,
                })
                .await?;
            for suggestion in suggestions {
                println!("{}", suggestion.text);
            }
            Ok(())
        }
        Command::Feedback {
            session_id,
            action,
            suggested,
            executed,
            prefix,
            latency_ms,
        } => {
            let Some(action) = parse_action(&action) else {
                return Ok(()); // unknown action: silently drop
            };
            client
                .send_event(ClientOp::RecordFeedback(
                    clai_protocol::RecordFeedbackParams {
                        session_id,
                        action,
                        suggested,
                        executed,
                        prefix,
                        latency_ms,
                        sync: false,
                    },
                ))
                .await
        }
        Command::History {
            session_id,
            cwd,
            scope,
            limit,
            offset,
            filter,
        } => {
            let scope = match scope.as_str() {
                "repo" => clai_protocol::HistoryScope::Repo,
                "session" => clai_protocol::HistoryScope::Session,
                _ => clai_protocol::HistoryScope::Global,
            };
            let page = client
                .fetch_history(clai_protocol::FetchHistoryParams {
                    session_id,
                    cwd: cwd_or_current(cwd),
                    scope,
                    limit,
                    offset,
                    filter,
                })
                .await?;
            for entry in page.entries {
                println!("{}", entry.cmd_raw);
            }
            Ok(())
        }
        Command::ImportHistory { shell, path } => {
            let Ok(shell) = shell.parse::<ShellKind>() else {
                return Ok(());
            };
            let report = client
                .import_history(clai_protocol::ImportHistoryParams { shell, path })
                .await?;
            println!("imported {} (skipped {})", report.imported, report.skipped);
            Ok(())
        }
        Command::Status => {
            let status = client.status().await?;
            println!(
                "clai {} pid {} up {}s | sessions {} | commands {} | cache {}h/{}m {}B",
                status.version,
                status.pid,
                status.uptime_secs,
                status.active_sessions,
                status.commands_logged,
                status.cache.hits,
                status.cache.misses,
                status.cache.bytes,
            );
            Ok(())
        }
        Command::Ping => {
            client.ping().await?;
            println!("pong");
            Ok(())
        }
    }
}

fn client_info() -> clai_protocol::ClientInfo {
    clai_protocol::ClientInfo {
        host: std::env::var("HOSTNAME").unwrap_or_default(),
        user: std::env::var("USER").unwrap_or_default(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        os: std::env::consts::OS.to_string(),
    }
}
