use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use clap::{CommandFactory, Parser, Subcommand};
use keith_core::{load_config, LocalRoom};
use keith_schema::{Language, NewTask};
use keith_server::state::AppState;
use keith_store::{import_catalog, ResourceQuery};
use keith_tasks::{TaskOutcome, WaitPolicy};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod runtime;

use runtime::{open_resource_store, Runtime};

#[derive(Parser)]
#[command(name = "keith", version, about = "KEITH real-time triage agent")]
struct Cli {
    #[arg(
        long,
        default_value = ".",
        help = "Project root directory (contains config/, data/ and logs/)"
    )]
    root: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Start the HTTP server, room agent and task worker")]
    Start {
        #[arg(long, help = "Override the port from server.bind")]
        port: Option<u16>,
    },
    #[command(about = "Submit a task and wait for its result")]
    Ask {
        #[arg(help = "Message to send")]
        message: String,
        #[arg(long, help = "Seconds to wait (defaults to tasks.submit_timeout_secs)")]
        timeout_secs: Option<u64>,
        #[arg(long, help = "Run a task worker in this process while waiting")]
        local: bool,
    },
    #[command(about = "Local REPL against an in-process room")]
    Chat {
        #[arg(long, default_value = "caller", help = "Participant identity")]
        identity: String,
        #[arg(long, help = "Language hint attached to every turn (en, es)")]
        language: Option<String>,
    },
    #[command(about = "Validate config files")]
    Validate,
    #[command(subcommand, about = "Resource catalog management")]
    Resources(ResourceCommands),
}

#[derive(Subcommand)]
enum ResourceCommands {
    #[command(about = "Import resources from a YAML catalog file")]
    Import {
        #[arg(help = "Path to the catalog file")]
        file: PathBuf,
    },
    #[command(about = "List recently added resources")]
    List {
        #[arg(long, default_value = "20", help = "Maximum rows")]
        limit: usize,
    },
    #[command(about = "Search resource descriptions")]
    Search {
        #[arg(help = "Substring to look for")]
        term: String,
        #[arg(long, help = "Restrict to a category")]
        category: Option<String>,
        #[arg(long, default_value = "10", help = "Maximum rows")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    // Expand ~ to home directory
    if cli.root.starts_with("~") {
        if let Some(home) = std::env::var_os("HOME") {
            cli.root = PathBuf::from(home).join(cli.root.strip_prefix("~").unwrap_or(&cli.root));
        }
    }

    let log_dir = cli.root.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "keith.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    match command {
        Commands::Validate => {
            let config = load_config(&cli.root.join("config"))?;
            println!(
                "Config valid. Agent {} in room {}, tasks for {}, server on {}.",
                config.agent.identity,
                config.agent.room,
                config.tasks.assigned_agent,
                config.server.bind
            );
        }
        Commands::Start { port } => start(&cli.root, port).await?,
        Commands::Ask {
            message,
            timeout_secs,
            local,
        } => ask(&cli.root, &message, timeout_secs, local).await?,
        Commands::Chat { identity, language } => {
            chat(&cli.root, &identity, language.as_deref()).await?
        }
        Commands::Resources(cmd) => {
            let config = load_config(&cli.root.join("config"))?;
            let store = open_resource_store(&cli.root, &config)?;
            match cmd {
                ResourceCommands::Import { file } => {
                    let imported = import_catalog(store.as_ref(), &file).await?;
                    println!(
                        "Imported {imported} resources ({} total).",
                        store.count().await?
                    );
                }
                ResourceCommands::List { limit } => {
                    let resources = store.recent(limit).await?;
                    if resources.is_empty() {
                        println!("No resources.");
                    } else {
                        println!("{:<32} {:<14} {:<20}", "NAME", "CATEGORY", "SERVICE AREA");
                        for r in &resources {
                            println!(
                                "{:<32} {:<14} {:<20}",
                                r.name,
                                r.category_or_default(),
                                r.service_area()
                            );
                        }
                    }
                }
                ResourceCommands::Search {
                    term,
                    category,
                    limit,
                } => {
                    let mut query = ResourceQuery::description_contains(term).limit(limit);
                    if let Some(category) = category {
                        query = query.in_category(category);
                    }
                    let found = store.search(&query).await?;
                    if found.is_empty() {
                        println!("No matching resources.");
                    }
                    for r in &found {
                        println!("{} ({}): {}", r.name, r.category_or_default(), r.description);
                    }
                }
            }
        }
    }

    Ok(())
}

fn server_addr(bind: &str, port: Option<u16>) -> Result<String> {
    let mut addr: SocketAddr = bind
        .parse()
        .map_err(|e| anyhow!("invalid server.bind address {bind}: {e}"))?;
    if let Some(port) = port {
        addr.set_port(port);
    }
    Ok(addr.to_string())
}

async fn start(root: &Path, port: Option<u16>) -> Result<()> {
    let rt = Runtime::bootstrap(root).await?;
    let addr = server_addr(&rt.config.server.bind, port)?;

    let (room, events) = LocalRoom::new(rt.config.agent.room.clone());
    let cancel = CancellationToken::new();
    let orchestrator = tokio::spawn(rt.orchestrator(&room).run(events, cancel.clone()));
    let worker = tokio::spawn(rt.task_worker().run(cancel.clone()));

    let state = AppState {
        bus: rt.bus.clone(),
        tasks: rt.task_bridge(),
        room,
    };
    tracing::info!(
        room = %rt.config.agent.room,
        agent = %rt.config.agent.identity,
        "keith started"
    );

    let served = tokio::select! {
        res = keith_server::serve(state, &addr) => res,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
            Ok(())
        }
    };

    cancel.cancel();
    let _ = orchestrator.await;
    let _ = worker.await;
    served
}

async fn ask(root: &Path, message: &str, timeout_secs: Option<u64>, local: bool) -> Result<()> {
    let rt = Runtime::bootstrap(root).await?;
    let bridge = rt.task_bridge();

    let cancel = CancellationToken::new();
    let worker = local.then(|| tokio::spawn(rt.task_worker().run(cancel.clone())));

    let task = NewTask::message(message).assigned_to(rt.config.tasks.assigned_agent.clone());
    let record = bridge.submit(task).await?;
    eprintln!("Submitted task {} ({})", record.id, record.title);

    let deadline = timeout_secs.unwrap_or(rt.config.tasks.submit_timeout_secs);
    let policy = WaitPolicy {
        interval: Duration::from_millis(rt.config.tasks.poll_interval_ms),
        deadline: Duration::from_secs(deadline),
    };
    let outcome = bridge.wait_for_result(&record.id, policy).await;

    cancel.cancel();
    if let Some(worker) = worker {
        let _ = worker.await;
    }

    match outcome? {
        TaskOutcome::Completed(response) => println!("{response}"),
        TaskOutcome::Failed(error) => bail!("task {} failed: {error}", record.id),
        TaskOutcome::TimedOut => bail!(
            "no result for task {} after {deadline}s (is a worker running?)",
            record.id
        ),
    }
    Ok(())
}

async fn chat(root: &Path, identity: &str, language: Option<&str>) -> Result<()> {
    let hint = language
        .map(|tag| Language::from_tag(tag).ok_or_else(|| anyhow!("unsupported language: {tag}")))
        .transpose()?;

    let rt = Runtime::bootstrap(root).await?;
    let (room, events) = LocalRoom::new(rt.config.agent.room.clone());
    let cancel = CancellationToken::new();
    let orchestrator = tokio::spawn(rt.orchestrator(&room).run(events, cancel.clone()));

    let mut conn = room.join(identity, hint)?;
    println!("KEITH chat in room {}. Type 'quit' to exit.", room.name());
    println!("---");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            reply = conn.recv_text() => match reply {
                Some(text) => println!("keith> {text}"),
                None => break,
            },
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let input = line.trim();
                if input == "quit" || input == "exit" {
                    break;
                }
                if input.is_empty() {
                    continue;
                }
                conn.send_text(input)?;
            }
        }
    }

    conn.leave();
    cancel.cancel();
    let _ = orchestrator.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_addr_applies_port_override() {
        assert_eq!(server_addr("127.0.0.1:8848", None).unwrap(), "127.0.0.1:8848");
        assert_eq!(
            server_addr("0.0.0.0:8848", Some(9000)).unwrap(),
            "0.0.0.0:9000"
        );
        assert!(server_addr("localhost", Some(9000)).is_err());
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["keith", "ask", "system test", "--timeout-secs", "5"]).unwrap();
        match cli.command {
            Some(Commands::Ask {
                message,
                timeout_secs,
                local,
            }) => {
                assert_eq!(message, "system test");
                assert_eq!(timeout_secs, Some(5));
                assert!(!local);
            }
            _ => panic!("Expected Ask"),
        }

        let cli = Cli::try_parse_from([
            "keith", "resources", "search", "food", "--category", "food",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Resources(ResourceCommands::Search { .. }))
        ));
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
