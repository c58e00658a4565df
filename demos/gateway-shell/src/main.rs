use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use waypost::prelude::*;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

/// Interactive shell over a Waypost registry backed by the loopback engine.
#[derive(Parser, Debug)]
#[command(name = "gateway-shell", version)]
struct Cli {
    /// JSON config file (defaults, then this file, then env vars).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the data directory from config and environment.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log: String,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// One shell command. An empty id means the default session.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Create(String),
    Delete(String),
    List,
    ShowDefault,
    SetDefault(String),
    Connect(String),
    Disconnect(String),
    Logout(String),
    Qr(String),
    State(String),
    Pair { id: String, phone: String, name: String },
    Send { id: String, to: String, body: String },
    Save,
    Help,
    Quit,
}

const HELP: &str = "\
commands (use - or omit <id> for the default session):
  create <id>                 add a session
  delete <id>                 log out and remove a session
  list                        show every session
  default [<id>]              show or set the default session
  connect|disconnect|logout [<id>]
  qr [<id>]                   start pairing, print the challenge code
  pair <id> <phone> [name]    simulate the user scanning the code
  state [<id>]                print the session snapshot
  send <id> <to> <message>    send a text message
  save                        persist everything now
  quit";

fn session_arg(arg: Option<&str>) -> String {
    match arg {
        None | Some("-") => String::new(),
        Some(id) => id.to_string(),
    }
}

fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err("empty command".into());
    };
    let required = |arg: Option<&str>, what: &str| {
        arg.map(str::to_string)
            .ok_or_else(|| format!("{verb}: missing {what}"))
    };

    let command = match verb {
        "create" => Command::Create(required(words.next(), "<id>")?),
        "delete" => Command::Delete(required(words.next(), "<id>")?),
        "list" | "ls" => Command::List,
        "default" => match words.next() {
            Some(id) => Command::SetDefault(id.to_string()),
            None => Command::ShowDefault,
        },
        "connect" => Command::Connect(session_arg(words.next())),
        "disconnect" => Command::Disconnect(session_arg(words.next())),
        "logout" => Command::Logout(session_arg(words.next())),
        "qr" => Command::Qr(session_arg(words.next())),
        "state" => Command::State(session_arg(words.next())),
        "pair" => {
            let id = session_arg(words.next());
            let phone = required(words.next(), "<phone>")?;
            let name = words.collect::<Vec<_>>().join(" ");
            Command::Pair { id, phone, name }
        }
        "send" => {
            let id = session_arg(words.next());
            let to = required(words.next(), "<to>")?;
            let body = words.collect::<Vec<_>>().join(" ");
            if body.is_empty() {
                return Err("send: missing <message>".into());
            }
            Command::Send { id, to, body }
        }
        "save" => Command::Save,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command {other:?}; try `help`")),
    };
    Ok(command)
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

type Shell = Registry<LoopbackFactory>;

fn render(snapshot: &SessionSnapshot) -> String {
    serde_json::to_string_pretty(snapshot).unwrap_or_else(|e| format!("<unprintable: {e}>"))
}

async fn execute(
    registry: &Shell,
    factory: &LoopbackFactory,
    command: Command,
) -> Result<String, WaypostError> {
    let output = match command {
        Command::Create(id) => {
            registry.create(&id).await?;
            format!("created {id}")
        }
        Command::Delete(id) => {
            registry.delete(&id).await?;
            format!("deleted {id}")
        }
        Command::List => {
            let mut sessions = registry.list().await;
            sessions.sort_by(|a, b| a.id.cmp(&b.id));
            let default = registry.default_id().await;
            if sessions.is_empty() {
                "no sessions".to_string()
            } else {
                sessions
                    .iter()
                    .map(|s| {
                        let marker = if default.as_deref() == Some(s.id.as_str()) { "*" } else { " " };
                        format!("{marker} {:<16} {}", s.id, s.status)
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        Command::ShowDefault => registry
            .default_id()
            .await
            .unwrap_or_else(|| "no default session".to_string()),
        Command::SetDefault(id) => {
            registry.set_default(&id).await?;
            format!("default is now {id}")
        }
        Command::Connect(id) => {
            let session = registry.get(&id).await?;
            session.connect().await?;
            format!("{}: {}", session.id(), session.state().await.status)
        }
        Command::Disconnect(id) => {
            let session = registry.get(&id).await?;
            session.disconnect().await;
            format!("{}: disconnected", session.id())
        }
        Command::Logout(id) => {
            let session = registry.get(&id).await?;
            session.logout().await?;
            format!("{}: logged out", session.id())
        }
        Command::Qr(id) => {
            let session = registry.get(&id).await?;
            let code = session.generate_qr().await?;
            format!("{}: scan {code}", session.id())
        }
        Command::State(id) => render(&registry.get(&id).await?.state().await),
        Command::Pair { id, phone, name } => {
            let session = registry.get(&id).await?;
            factory.handle(session.id()).pair(phone, name);
            format!("{}: paired", session.id())
        }
        Command::Send { id, to, body } => {
            let session = registry.get(&id).await?;
            session.send_message(&to, &body).await?;
            format!("{}: sent to {}", session.id(), normalize_recipient(&to))
        }
        Command::Save => {
            registry.save_all().await?;
            "saved".to_string()
        }
        Command::Help => HELP.to_string(),
        Command::Quit => String::new(),
    };
    Ok(output)
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log);

    let mut config = GatewayConfig::load(cli.config.as_deref()).await?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if config.api_key.is_none() {
        tracing::warn!("no API_KEY configured; any HTTP surface in front of this registry is unauthenticated");
    }

    let factory = LoopbackFactory::new();
    let registry: Arc<Shell> = Registry::new(config.registry_config(), factory.clone());
    let report = registry.load_all().await?;
    eprintln!(
        "waypost shell: {} session(s) loaded from {} ({} skipped). type `help`.",
        report.loaded,
        config.data_dir.display(),
        report.skipped
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        match parse_command(&line) {
            Ok(Command::Quit) => break,
            Ok(command) => match execute(&registry, &factory, command).await {
                Ok(output) => println!("{output}"),
                Err(e) => println!("error: {e}"),
            },
            Err(message) => println!("{message}"),
        }
    }

    registry.close().await;
    Ok(())
}
