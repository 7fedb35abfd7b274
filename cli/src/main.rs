use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use chatdeck::{
    Attachment, BotType, Change, ClientConfig, ClientError, Conversation, LocalStore, Message, RestClient, Role,
    Theme, Transport, UserProfile,
};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("failed to read stdin: {0}")]
    Stdin(#[source] std::io::Error),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("connection closed before the answer completed")]
    NoAnswer,
}

#[derive(Parser, Debug)]
#[command(name = "chatdeck", about = "Terminal client for the multi-bot chat backend")]
struct Cli {
    #[arg(long, env = "CHATDECK_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "CHATDECK_STORE_PATH")]
    store: Option<PathBuf>,

    #[arg(long, env = "CHATDECK_RESPONSE_TIMEOUT_SECS", help = "Give up on an answer after this many seconds")]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open and close the socket.
    Ping,
    /// Interactive streaming chat with one bot.
    Chat(ChatArgs),
    /// One question over REST, printed when complete.
    Ask(AskArgs),
    Excel(ExcelCommand),
    Prefs(PrefsCommand),
}

#[derive(Args, Debug)]
struct ChatArgs {
    #[arg(long, default_value = "general")]
    bot: BotType,

    #[arg(long, help = "File sent with the first message")]
    file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct AskArgs {
    #[arg(long, default_value = "general")]
    bot: BotType,

    #[arg(long)]
    file: Option<PathBuf>,

    message: String,
}

#[derive(Args, Debug)]
struct ExcelCommand {
    #[command(subcommand)]
    command: ExcelSubcommand,
}

#[derive(Subcommand, Debug)]
enum ExcelSubcommand {
    Upload {
        file: PathBuf,
    },
    Analytics {
        sheet: String,
        #[arg(long)]
        analysis: Option<String>,
    },
    Clean {
        sheet: String,
        #[arg(long = "op", required = true)]
        operations: Vec<String>,
    },
}

#[derive(Args, Debug)]
struct PrefsCommand {
    #[command(subcommand)]
    command: PrefsSubcommand,
}

#[derive(Subcommand, Debug)]
enum PrefsSubcommand {
    /// Show the theme, or set it to `light` or `dark`.
    Theme { value: Option<Theme> },
    /// Toggle between light and dark.
    ToggleTheme,
    /// Show the profile, or update the given fields.
    Profile {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        plan: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli)?;

    match cli.command {
        Command::Ping => run_ping(config).await,
        Command::Chat(args) => run_chat(config, args).await,
        Command::Ask(args) => run_ask(config, args).await,
        Command::Excel(excel) => run_excel(config, excel).await,
        Command::Prefs(prefs) => run_prefs(&config, prefs),
    }
}

fn build_config(cli: &Cli) -> Result<ClientConfig, CliError> {
    let mut config = ClientConfig::from_env()?;
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.trim_end_matches('/').to_owned();
    }
    if let Some(store) = &cli.store {
        config.store_path.clone_from(store);
    }
    if let Some(secs) = cli.timeout_secs {
        config.response_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    Ok(config)
}

async fn run_ping(config: ClientConfig) -> Result<(), CliError> {
    let transport = Transport::new(config);
    transport.connect().await?;
    transport.disconnect().await;
    println!("ok");
    Ok(())
}

// =============================================================================
// CHAT
// =============================================================================

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Quit,
    Attach(PathBuf),
    Analytics { sheet: String, analysis: Option<String> },
    Clean { sheet: String, operations: Vec<String> },
    Text(String),
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    let trimmed = line.trim();
    let Some(command) = trimmed.strip_prefix('/') else {
        return Input::Text(line.to_owned());
    };

    let mut parts = command.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some("quit" | "exit"), None, None) => Input::Quit,
        (Some("attach"), Some(path), None) => Input::Attach(PathBuf::from(path)),
        (Some("analytics"), Some(sheet), analysis) => {
            Input::Analytics { sheet: sheet.to_owned(), analysis: analysis.map(ToOwned::to_owned) }
        }
        (Some("clean"), Some(sheet), Some(ops)) => Input::Clean {
            sheet: sheet.to_owned(),
            operations: ops
                .split(',')
                .map(str::trim)
                .filter(|op| !op.is_empty())
                .map(ToOwned::to_owned)
                .collect(),
        },
        _ => Input::Unknown(trimmed.to_owned()),
    }
}

/// Incremental terminal rendering of a transcript. A streaming bot message
/// is printed once and then extended in place as chunks arrive.
#[derive(Debug, Default)]
struct Renderer {
    current: Option<String>,
    shown: String,
}

impl Renderer {
    fn render(&mut self, message: &Message) -> String {
        let mut out = String::new();
        match message.role {
            Role::User => {}
            Role::Error => {
                self.close_line(&mut out);
                let _ = writeln!(out, "[error] {}", message.text);
            }
            Role::Bot => {
                let continues = self.current.as_deref() == Some(message.id.as_str());
                match message.text.strip_prefix(self.shown.as_str()) {
                    Some(rest) if continues => out.push_str(rest),
                    _ => {
                        self.close_line(&mut out);
                        let _ = write!(out, "{}> {}", message.bot_type, message.text);
                    }
                }
                self.current = Some(message.id.clone());
                self.shown.clone_from(&message.text);
                if !message.streaming {
                    self.close_line(&mut out);
                }
            }
        }
        out
    }

    fn close_line(&mut self, out: &mut String) {
        if self.current.take().is_some() {
            out.push('\n');
        }
        self.shown.clear();
    }
}

fn show(renderer: &mut Renderer, conversation: &Conversation, change: Change) {
    let Some(message) = change
        .index()
        .and_then(|i| conversation.session().transcript().get(i))
    else {
        return;
    };
    print!("{}", renderer.render(message));
    let _ = std::io::Write::flush(&mut std::io::stdout());
}

async fn run_chat(config: ClientConfig, args: ChatArgs) -> Result<(), CliError> {
    let transport = Transport::new(config);
    transport.connect().await?;

    let mut conversation = Conversation::open(&transport, args.bot);
    if let Some(path) = args.file {
        conversation.attach_file(Attachment::Path(path));
    }
    info!(bot_type = %args.bot, session_id = %conversation.session().id(), "chat: started");
    eprintln!("chatting with the {} bot; /quit to leave", args.bot);

    let mut renderer = Renderer::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.map_err(CliError::Stdin)? else {
                    break;
                };
                let result = match parse_input(&line) {
                    Input::Quit => break,
                    Input::Attach(path) => {
                        conversation.attach_file(Attachment::Path(path));
                        continue;
                    }
                    Input::Unknown(command) => {
                        eprintln!("unknown command: {command}");
                        continue;
                    }
                    Input::Text(text) => {
                        if !conversation.session().accepts_input() {
                            eprintln!("still answering; wait for the reply");
                        }
                        conversation.submit(&text).await
                    }
                    Input::Analytics { sheet, analysis } => conversation.analytics(&sheet, analysis.as_deref()).await,
                    Input::Clean { sheet, operations } => conversation.cleaning(operations, &sheet).await,
                };
                // Send failures are already in the transcript as an error entry.
                if let Err(e) = result {
                    let Some(last) = conversation.session().transcript().len().checked_sub(1) else {
                        return Err(e.into());
                    };
                    show(&mut renderer, &conversation, Change::Appended(last));
                }
            }
            change = conversation.next_change() => {
                let Some(change) = change else {
                    break;
                };
                show(&mut renderer, &conversation, change);
            }
        }
    }

    let session = conversation.close();
    info!(session_id = %session.id(), messages = session.transcript().len(), "chat: finished");
    transport.disconnect().await;
    Ok(())
}

/// Run one socket request to completion, printing the answer as it streams.
async fn await_answer(conversation: &mut Conversation) -> Result<(), CliError> {
    let mut renderer = Renderer::default();
    while conversation.session().is_awaiting_response() {
        let change = conversation.next_change().await.ok_or(CliError::NoAnswer)?;
        show(&mut renderer, conversation, change);
    }
    Ok(())
}

// =============================================================================
// REST + EXCEL
// =============================================================================

async fn run_ask(config: ClientConfig, args: AskArgs) -> Result<(), CliError> {
    let client = RestClient::new(config)?;
    let file = args.file.map(Attachment::Path);
    let answer = client.ask(args.bot, &args.message, file.as_ref()).await?;
    println!("{answer}");
    Ok(())
}

async fn run_excel(config: ClientConfig, excel: ExcelCommand) -> Result<(), CliError> {
    if let ExcelSubcommand::Upload { file } = &excel.command {
        let client = RestClient::new(config)?;
        let body = client.upload_excel(&Attachment::Path(file.clone())).await?;
        return print_json(&body);
    }

    let transport = Transport::new(config);
    transport.connect().await?;
    let mut conversation = Conversation::open(&transport, BotType::Excel);
    match excel.command {
        ExcelSubcommand::Analytics { sheet, analysis } => {
            conversation.analytics(&sheet, analysis.as_deref()).await?;
        }
        ExcelSubcommand::Clean { sheet, operations } => {
            conversation.cleaning(operations, &sheet).await?;
        }
        ExcelSubcommand::Upload { .. } => {}
    }
    let outcome = await_answer(&mut conversation).await;
    drop(conversation);
    transport.disconnect().await;
    outcome
}

// =============================================================================
// PREFERENCES
// =============================================================================

fn run_prefs(config: &ClientConfig, prefs: PrefsCommand) -> Result<(), CliError> {
    let mut store = LocalStore::open(&config.store_path)?;
    match prefs.command {
        PrefsSubcommand::Theme { value: None } => println!("{}", store.theme().as_str()),
        PrefsSubcommand::Theme { value: Some(theme) } => {
            store.set_theme(theme)?;
            println!("{}", theme.as_str());
        }
        PrefsSubcommand::ToggleTheme => {
            let theme = store.theme().toggled();
            store.set_theme(theme)?;
            println!("{}", theme.as_str());
        }
        PrefsSubcommand::Profile { name, email, plan } => {
            let mut profile = store.profile().unwrap_or_default();
            let changed = name.is_some() || email.is_some() || plan.is_some();
            apply_profile_edits(&mut profile, name, email, plan);
            if changed {
                store.set_profile(&profile)?;
            }
            print_json(&serde_json::to_value(&profile)?)?;
        }
    }
    Ok(())
}

fn apply_profile_edits(profile: &mut UserProfile, name: Option<String>, email: Option<String>, plan: Option<String>) {
    if let Some(name) = name {
        profile.name = name;
    }
    if let Some(email) = email {
        profile.email = email;
    }
    if let Some(plan) = plan {
        profile.plan = plan;
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod main_test;
