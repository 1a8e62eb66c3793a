use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use examclock::channel::{ChannelError, ConnectivityState};
use examclock::client::{self, ClientParts, ClockHandle, LocalCommand, RunningClock};
use examclock::config::{ClockConfig, ConfigError};
use examclock::control::{Decision, OperatorPrompt, PendingControlRequest};
use examclock::error::SyncError;
use examclock::exam::{Exam, RawExamFields};
use examclock::identity::{IdentityError, IdentityStore};
use examclock::occupancy::{OccupancyState, wire_value};
use examclock::sync::DisplaySink;
use examclock::timefmt::{InvalidTimeFormat, format_time_of_day, parse_time_of_day};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Mutex, mpsc, watch};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),
    #[error("relay channel error: {0}")]
    Channel(#[from] ChannelError),
    #[error("clock stopped: {0}")]
    Sync(#[from] SyncError),
    #[error(transparent)]
    InvalidTime(#[from] InvalidTimeFormat),
    #[error("stdin read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("client task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "examclock", about = "Exam clock synchronization client")]
struct Cli {
    #[arg(long, env = "EXAMCLOCK_RELAY_URL")]
    relay_url: Option<String>,

    #[arg(long, env = "EXAMCLOCK_IDENTITY_PATH")]
    identity_path: Option<PathBuf>,

    #[arg(long, env = "EXAMCLOCK_CLOCK_NAME")]
    clock_name: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to the relay and take operator commands from stdin.
    Run(RunArgs),
    /// Parse a time of day and print it in 24-hour form.
    ParseTime { text: Vec<String> },
    /// Print the stored clock identity.
    Identity {
        #[arg(long, default_value_t = false)]
        regenerate: bool,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long, default_value_t = false, help = "Reject every control request")]
    closed: bool,

    #[arg(long, value_delimiter = ',', help = "Occupancy flag names")]
    flags: Option<Vec<String>>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = ClockConfig::from_env()?;
    if let Some(relay_url) = cli.relay_url {
        config.channel.relay_url = relay_url;
    }
    if let Some(path) = cli.identity_path {
        config.identity_path = path;
    }
    if let Some(name) = cli.clock_name {
        config.clock_name = name;
    }

    match cli.command {
        Command::Run(args) => run_clock(config, args).await,
        Command::ParseTime { text } => {
            let time = parse_time_of_day(&text.join(" "))?;
            println!("{}", format_time_of_day(time));
            Ok(())
        }
        Command::Identity { regenerate } => {
            let mut store = IdentityStore::load_or_create(&config.identity_path, &config.clock_name)?;
            if regenerate {
                store.regenerate_id()?;
            }
            println!("{}", serde_json::to_string_pretty(store.current())?);
            Ok(())
        }
    }
}

// =============================================================================
// RUN
// =============================================================================

async fn run_clock(config: ClockConfig, args: RunArgs) -> Result<(), CliError> {
    let identity = IdentityStore::load_or_create(&config.identity_path, &config.clock_name)?;
    let flags = args.flags.unwrap_or(config.occupancy_flags);
    let (open_tx, open_rx) = watch::channel(config.open_to_requests && !args.closed);
    let (decision_tx, decision_rx) = mpsc::unbounded_channel();

    let parts = ClientParts {
        identity,
        occupancy: OccupancyState::new(flags),
        display: Arc::new(ConsoleDisplay),
        prompt: Arc::new(ConsolePrompt { decisions: Mutex::new(decision_rx) }),
        open_to_requests: open_rx,
        decision_timeout: config.decision_timeout,
        max_collision_retries: config.max_collision_retries,
    };
    let RunningClock { handle, channel, mut task } = client::start(config.channel, parts)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let finished = loop {
        tokio::select! {
            joined = &mut task => break Some(joined),
            line = lines.next_line() => {
                let Some(line) = line? else { break None };
                match parse_command(&line) {
                    Ok(Some(ConsoleCommand::Quit)) => break None,
                    Ok(Some(command)) => execute(command, &handle, &open_tx, &decision_tx).await,
                    Ok(None) => {}
                    Err(message) => println!("error: {message}"),
                }
            }
        }
    };

    channel.close().await;
    let joined = match finished {
        Some(joined) => joined,
        None => task.await,
    };
    joined??;
    Ok(())
}

async fn execute(
    command: ConsoleCommand,
    handle: &ClockHandle,
    open: &watch::Sender<bool>,
    decisions: &mpsc::UnboundedSender<Decision>,
) {
    match command {
        ConsoleCommand::Local(local) => {
            if let Err(e) = handle.apply(local).await {
                println!("error: {e}");
            }
        }
        ConsoleCommand::List => match handle.snapshot().await {
            Ok(snapshot) => {
                println!("{} ({})", snapshot.identity.display_name, snapshot.identity.id);
                print_exams(&snapshot.exams);
                for (flag, occupied) in &snapshot.occupancy {
                    println!("  {flag}: {}", wire_value(*occupied));
                }
            }
            Err(e) => println!("error: {e}"),
        },
        ConsoleCommand::Open(value) => {
            open.send_replace(value);
            println!("{}", if value { "open to requests" } else { "closed to requests" });
        }
        ConsoleCommand::Decide(decision) => {
            let _ = decisions.send(decision);
        }
        ConsoleCommand::Quit => {}
    }
}

// =============================================================================
// CONSOLE COMMANDS
// =============================================================================

#[derive(Debug, PartialEq)]
enum ConsoleCommand {
    Local(LocalCommand),
    List,
    Open(bool),
    Decide(Decision),
    Quit,
}

/// Parse one stdin line. Blank lines yield `Ok(None)`.
fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&verb, rest)) = words.split_first() else {
        return Ok(None);
    };

    let command = match (verb, rest) {
        ("add", fields) => ConsoleCommand::Local(LocalCommand::AddExam(parse_exam_fields(fields)?.into_exam())),
        ("edit", [id, fields @ ..]) => {
            let draft = parse_exam_fields(fields)?;
            ConsoleCommand::Local(LocalCommand::EditExam(Exam {
                id: (*id).to_owned(),
                name: draft.name,
                date: draft.date,
                start: draft.start,
                end: draft.end,
            }))
        }
        ("del", [id]) => ConsoleCommand::Local(LocalCommand::RemoveExam((*id).to_owned())),
        ("occupy", [flag]) => {
            ConsoleCommand::Local(LocalCommand::SetOccupancy { flag: (*flag).to_owned(), occupied: true })
        }
        ("vacate", [flag]) => {
            ConsoleCommand::Local(LocalCommand::SetOccupancy { flag: (*flag).to_owned(), occupied: false })
        }
        ("toggle", [flag]) => ConsoleCommand::Local(LocalCommand::ToggleOccupancy((*flag).to_owned())),
        ("rename", name) if !name.is_empty() => ConsoleCommand::Local(LocalCommand::Rename(name.join(" "))),
        ("resync", []) => ConsoleCommand::Local(LocalCommand::Resync),
        ("list", []) => ConsoleCommand::List,
        ("open", []) => ConsoleCommand::Open(true),
        ("close", []) => ConsoleCommand::Open(false),
        ("accept", []) => ConsoleCommand::Decide(Decision::Accepted),
        ("reject", []) => ConsoleCommand::Decide(Decision::Rejected),
        ("quit" | "exit", []) => ConsoleCommand::Quit,
        _ => return Err(format!("cannot parse `{}`; {USAGE}", line.trim())),
    };
    Ok(Some(command))
}

const USAGE: &str = "commands: add <name> <yyyy-mm-dd> <start> <end> | edit <id> <name> <date> <start> <end> | \
                     del <id> | occupy|vacate|toggle <flag> | rename <name> | resync | list | open | close | \
                     accept | reject | quit";

/// `<name words...> <date> <start> <end>`
fn parse_exam_fields(words: &[&str]) -> Result<examclock::exam::ExamDraft, String> {
    let [name @ .., date, start, end] = words else {
        return Err(format!("expected <name> <date> <start> <end>; {USAGE}"));
    };
    if name.is_empty() {
        return Err("exam name is required".to_owned());
    }
    RawExamFields {
        name: name.join(" "),
        date: (*date).to_owned(),
        start: (*start).to_owned(),
        end: (*end).to_owned(),
    }
    .parse()
    .map_err(|e| e.to_string())
}

// =============================================================================
// COLLABORATORS
// =============================================================================

struct ConsoleDisplay;

impl DisplaySink for ConsoleDisplay {
    fn on_exams_changed(&self, exams: &[Exam]) {
        print_exams(exams);
    }

    fn on_occupancy_changed(&self, occupancy: &OccupancyState) {
        let flags: Vec<String> = occupancy
            .iter()
            .map(|(flag, occupied)| format!("{flag}={}", wire_value(occupied)))
            .collect();
        println!("occupancy: {}", flags.join(" "));
    }

    fn on_connectivity_changed(&self, state: ConnectivityState) {
        println!("relay: {state}");
    }
}

fn print_exams(exams: &[Exam]) {
    println!("exams ({}):", exams.len());
    for exam in exams {
        println!(
            "  {} {} {} {}-{}",
            exam.id,
            exam.name,
            exam.date_text(),
            format_time_of_day(exam.start),
            format_time_of_day(exam.end)
        );
    }
}

/// Operator prompt answered by `accept` / `reject` lines on stdin.
struct ConsolePrompt {
    decisions: Mutex<mpsc::UnboundedReceiver<Decision>>,
}

#[async_trait]
impl OperatorPrompt for ConsolePrompt {
    async fn confirm(&self, request: &PendingControlRequest) -> Decision {
        let mut decisions = self.decisions.lock().await;
        // Drop answers typed while no prompt was showing.
        while decisions.try_recv().is_ok() {}
        println!("{} ({}) requests control; type `accept` or `reject`", request.requester_name, request.requester);
        decisions.recv().await.unwrap_or(Decision::Rejected)
    }
}
