//! Terminal guestbook client.
//!
//! Every line read from stdin signs the guestbook. Lines starting with `/` are
//! commands:
//!
//! - `/retry <id>` re-sends a message whose write failed
//! - `/list` prints the current messages
//! - `/quit` exits
//!
//! The merged view (confirmed, syncing, failed) is printed whenever it changes.

use std::time::Duration;

use clap::Parser;
use futures::channel::mpsc;
use guestbook_client::{
    ClientConfig, EntryStatus, Guestbook, GuestbookAction, GuestbookView, Ledger, MemoryLedger,
};
use guestbook_common::message::MessageId;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::LocalSet;
use tracing_subscriber::EnvFilter;

/// Donation suggested for every message unless overridden.
const SUGGESTED_DONATION: u64 = 1;

#[derive(Parser)]
#[command(name = "guestbook-cli", about = "Sign a Freenet guestbook from the terminal")]
struct Cli {
    /// Name to sign messages with.
    #[arg(long)]
    sender: String,

    /// WebSocket URL of the Freenet node
    /// (default: GUESTBOOK_NODE_URL, else ws://localhost:3001/...).
    #[arg(long)]
    node_url: Option<String>,

    /// How often to re-read confirmed messages, in milliseconds.
    #[arg(long)]
    poll_ms: Option<u64>,

    /// Donation attached to each message.
    #[arg(long, default_value_t = SUGGESTED_DONATION)]
    donation: u64,

    /// Keep the guestbook in memory instead of talking to a node.
    #[arg(long)]
    offline: bool,
}

#[derive(Debug, PartialEq)]
enum Command {
    Action(GuestbookAction),
    List,
    Quit,
    Empty,
    Unknown(String),
}

fn parse_command(line: &str, donation: u64) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Action(GuestbookAction::Sign {
            text: line.to_string(),
            donation,
        });
    };
    let mut parts = rest.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("quit"), None) => Command::Quit,
        (Some("list"), None) => Command::List,
        (Some("retry"), Some(id)) => Command::Action(GuestbookAction::Retry {
            id: MessageId::from(id),
        }),
        _ => Command::Unknown(line.to_string()),
    }
}

fn print_view(view: &GuestbookView) {
    println!("── Messages ({}) ──", view.len());
    for entry in view.entries() {
        let m = entry.message;
        let star = if m.is_premium() { "*" } else { " " };
        match entry.status {
            EntryStatus::Confirmed => println!("{star} {}: {}", m.sender, m.text),
            EntryStatus::Syncing => println!("{star} {}: {} (syncing)", m.sender, m.text),
            EntryStatus::Failed(reason) => println!(
                "{star} {}: {} (syncing failed! {reason}; /retry {})",
                m.sender, m.text, m.id
            ),
        }
    }
}

async fn serve<L>(book: Guestbook<L>, donation: u64) -> anyhow::Result<()>
where
    L: Ledger + Clone + 'static,
{
    let mut views = book.subscribe();
    let (actions, rx) = mpsc::unbounded();
    let driver = tokio::task::spawn_local(book.run(rx));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_command(&line, donation) {
                    Command::Action(action) => actions
                        .unbounded_send(action)
                        .map_err(|_| anyhow::anyhow!("guestbook stopped"))?,
                    Command::List => print_view(&views.borrow()),
                    Command::Quit => break,
                    Command::Empty => {}
                    Command::Unknown(cmd) => eprintln!("unknown command: {cmd}"),
                }
            }
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                print_view(&views.borrow_and_update());
            }
        }
    }

    drop(actions);
    driver.await?;
    Ok(())
}

#[cfg(feature = "use-node")]
async fn serve_node(config: ClientConfig, sender: String, donation: u64) -> anyhow::Result<()> {
    let ledger = guestbook_client::NodeLedger::connect(&config).await?;
    serve(Guestbook::start(ledger, &config, sender, None)?, donation).await
}

#[cfg(not(feature = "use-node"))]
async fn serve_node(_config: ClientConfig, _sender: String, _donation: u64) -> anyhow::Result<()> {
    anyhow::bail!("built without the `use-node` feature; run with --offline")
}

async fn run(cli: Cli, config: ClientConfig) -> anyhow::Result<()> {
    if cli.offline {
        tracing::info!("Running offline with an in-memory ledger");
        let ledger = MemoryLedger::new();
        let push = ledger.watch();
        return serve(
            Guestbook::start(ledger, &config, cli.sender, Some(push))?,
            cli.donation,
        )
        .await;
    }
    serve_node(config, cli.sender, cli.donation).await
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env()?;
    if let Some(url) = &cli.node_url {
        config.node_url = url.clone();
    }
    if let Some(ms) = cli.poll_ms {
        config.poll_interval = Duration::from_millis(ms);
    }
    config.validate()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    LocalSet::new().block_on(&runtime, run(cli, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_sign_with_default_donation() {
        assert_eq!(
            parse_command("  hello there ", 3),
            Command::Action(GuestbookAction::Sign {
                text: "hello there".into(),
                donation: 3
            })
        );
    }

    #[test]
    fn slash_commands() {
        assert_eq!(parse_command("/quit", 1), Command::Quit);
        assert_eq!(parse_command("/list", 1), Command::List);
        assert_eq!(
            parse_command("/retry abc-123", 1),
            Command::Action(GuestbookAction::Retry {
                id: MessageId::from("abc-123")
            })
        );
        assert_eq!(parse_command("", 1), Command::Empty);
        assert!(matches!(parse_command("/retry", 1), Command::Unknown(_)));
        assert!(matches!(parse_command("/dance", 1), Command::Unknown(_)));
    }
}
