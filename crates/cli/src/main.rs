use clap::{Parser, Subcommand};
use convsync::api::{ConversationApi, HttpConversationApi};
use convsync::conversation::{current_conversation, Conversation};
use convsync::signals::{Notification, Severity};
use convsync::{ChatClient, ClientOptions};
use std::io::Write;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio::sync::broadcast;

#[derive(Parser)]
#[command(name = "convsync")]
#[command(about = "Convsync CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// List conversations on the service.
    List {
        /// Config file path (default: CONVSYNC_CONFIG_PATH or ~/.convsync/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Chat interactively. Lines are sent to the active conversation; /help lists commands.
    Chat {
        /// Config file path (default: CONVSYNC_CONFIG_PATH or ~/.convsync/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Name shown as the author of your messages (default: CONVSYNC_USERNAME, config, or the service's userinfo).
        #[arg(long, short, value_name = "NAME")]
        username: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("convsync {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::List { config }) => {
            if let Err(e) = run_list(config).await {
                log::error!("list failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat { config, username }) => {
            if let Err(e) = run_chat(config, username).await {
                log::error!("chat failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn http_api(config: &convsync::config::Config) -> HttpConversationApi {
    HttpConversationApi::new(
        &convsync::config::resolve_origin(config),
        &config.server.api_prefix,
    )
}

async fn run_list(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, _) = convsync::config::load_config(config_path)?;
    let conversations = http_api(&config).list_conversations().await?;
    if conversations.is_empty() {
        println!("no conversations");
    }
    for c in conversations {
        println!("{}\t{}", c.id, c.title.as_deref().unwrap_or("(untitled)"));
    }
    Ok(())
}

const HELP: &str = "commands: /list, /switch <n>, /new, /rename <title>, /delete, /quit";

async fn run_chat(
    config_path: Option<std::path::PathBuf>,
    username: Option<String>,
) -> anyhow::Result<()> {
    let (config, _) = convsync::config::load_config(config_path)?;
    let mut options = ClientOptions::from_config(&config);
    if username.is_some() {
        options.username = username;
    }
    log::info!("streaming endpoint {}", options.chat_url);

    let client = ChatClient::start(options, Arc::new(http_api(&config))).await;
    let mut notifications = client.notifications();
    client.bootstrap().await?;
    println!("chatting as {} ({})", client.username(), HELP);

    let mut conversations = client.conversations();
    let mut thought = client.thought();
    let mut renderer = Renderer::default();
    renderer.render(&conversations.borrow_and_update());

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                if input.eq_ignore_ascii_case("/quit") || input.eq_ignore_ascii_case("/exit") {
                    break;
                }
                // failures are already reported as notifications
                if let Err(e) = run_command(&client, input).await {
                    log::debug!("command failed: {}", e);
                }
            }
            changed = conversations.changed() => {
                if changed.is_err() {
                    break;
                }
                renderer.render(&conversations.borrow_and_update());
            }
            changed = thought.changed() => {
                if changed.is_err() {
                    break;
                }
                let text = thought.borrow_and_update().clone();
                renderer.thought(&text);
            }
            n = notifications.recv() => match n {
                Ok(n) => print_notification(&n),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("skipped {} notifications", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    client.shutdown();
    client.finished().await?;
    Ok(())
}

async fn run_command(client: &ChatClient, input: &str) -> Result<(), convsync::SyncError> {
    let (command, arg) = match input.split_once(' ') {
        Some((c, a)) => (c, a.trim()),
        None => (input, ""),
    };
    match command {
        "/help" => println!("{}", HELP),
        "/list" => print_list(&client.snapshot()),
        "/new" => {
            client.new_conversation().await?;
        }
        "/switch" => match arg.parse::<usize>().ok().and_then(|n| n.checked_sub(1)) {
            Some(i) => match client.snapshot().get(i) {
                Some(c) => client.select(&c.id).await?,
                None => println!("no chat #{}", arg),
            },
            None => println!("usage: /switch <n>"),
        },
        "/rename" => {
            let Some(active) = client.active_conversation() else {
                return Err(convsync::SyncError::NoActiveConversation);
            };
            if arg.is_empty() {
                println!("usage: /rename <title>");
            } else {
                client.rename(&active.id, arg).await?;
            }
        }
        "/delete" => {
            let Some(active) = client.active_conversation() else {
                return Err(convsync::SyncError::NoActiveConversation);
            };
            client.delete(&active.id).await?;
        }
        _ if input.starts_with('/') => println!("unknown command ({})", HELP),
        _ => client.send(input)?,
    }
    Ok(())
}

fn print_list(conversations: &[Conversation]) {
    for (i, c) in conversations.iter().enumerate() {
        let marker = if c.active { "*" } else { " " };
        println!(
            "{} {:>2}. {}",
            marker,
            i + 1,
            c.title.as_deref().unwrap_or("(untitled)")
        );
    }
}

fn print_notification(n: &Notification) {
    let label = match n.severity {
        Severity::Success => "ok",
        Severity::Error => "error",
    };
    println!("[{}] {}", label, n.message);
}

/// Prints the active conversation incrementally: whole messages once, then only the
/// content a stream adds to the message being written.
#[derive(Default)]
struct Renderer {
    conversation: Option<String>,
    /// Messages printed so far and the content length of the last one.
    printed: usize,
    last_len: usize,
    thought_len: usize,
}

impl Renderer {
    fn render(&mut self, conversations: &[Conversation]) {
        let Some(active) = current_conversation(conversations) else {
            return;
        };
        let mut out = std::io::stdout().lock();
        if self.conversation.as_deref() != Some(active.id.as_str())
            || active.messages.len() < self.printed
        {
            let _ = writeln!(
                out,
                "\n== {} ==",
                active.title.as_deref().unwrap_or("(untitled)")
            );
            self.conversation = Some(active.id.clone());
            self.printed = 0;
            self.last_len = 0;
        }
        if self.printed > 0 {
            let last = &active.messages[self.printed - 1];
            if let Some(tail) = last.content.get(self.last_len..) {
                let _ = write!(out, "{}", tail);
            }
            self.last_len = last.content.len();
        }
        for m in &active.messages[self.printed..] {
            let steps = m.intermediate_steps.as_ref().map_or(0, |s| s.len());
            if self.printed > 0 {
                let _ = writeln!(out);
            }
            let _ = write!(out, "{}> {}", m.from, m.content);
            if steps > 0 {
                let _ = write!(out, " [{} steps]", steps);
            }
            self.printed += 1;
            self.last_len = m.content.len();
        }
        let _ = out.flush();
    }

    fn thought(&mut self, text: &str) {
        if text.len() < self.thought_len {
            self.thought_len = 0;
        }
        if let Some(tail) = text.get(self.thought_len..) {
            if !tail.is_empty() {
                eprint!("{}", tail);
            }
        }
        self.thought_len = text.len();
    }
}
