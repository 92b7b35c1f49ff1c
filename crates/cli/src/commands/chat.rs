use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use autostream_agent::AgentRuntime;
use autostream_core::analytics::SessionRecord;
use autostream_core::config::{DatabaseConfig, LoadOptions};
use autostream_core::domain::{ConversationState, LeadField, SessionId};
use autostream_db::{connect, migrations, SessionRepository, SqlSessionRepository};
use tracing::{info, warn};

use crate::commands::{async_runtime, load_config, CommandResult};
use crate::logging::init_logging;

pub const EXIT_WORDS: [&str; 3] = ["quit", "exit", "bye"];
pub const FAREWELL: &str = "Thank you for chatting with AutoStream! Have a great day!";
pub const MAX_TURNS_REACHED: &str = "Maximum conversation turns reached. Thank you for chatting!";

const RULE_WIDTH: usize = 60;

#[derive(Clone, Debug, PartialEq)]
pub struct ChatSummary {
    pub session_id: SessionId,
    pub turns: u32,
    pub lead_captured: bool,
    pub state: ConversationState,
}

pub fn run(options: LoadOptions) -> CommandResult {
    let config = match load_config("chat", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    init_logging(&config);

    let runtime = match async_runtime("chat") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };
    let agent = match AgentRuntime::from_config(&config) {
        Ok(agent) => agent,
        Err(error) => {
            return CommandResult::failure("chat", "agent_init", format!("{error:#}"), 3);
        }
    };

    let result = runtime.block_on(async {
        // the conversation still runs when the session log is unavailable
        let repository = match open_session_log(&config.database).await {
            Ok(repository) => Some(repository),
            Err(error) => {
                warn!(
                    event_name = "cli.session_log.unavailable",
                    error = %format!("{error:#}"),
                    "session log disabled"
                );
                None
            }
        };

        let stdin = io::stdin();
        let mut stdout = io::stdout();
        run_session(
            &agent,
            repository.as_ref().map(|repo| repo as &dyn SessionRepository),
            config.conversation.max_turns,
            stdin.lock(),
            &mut stdout,
        )
        .await
    });

    match result {
        Ok(_) => CommandResult { exit_code: 0, output: String::new() },
        Err(error) => CommandResult::failure("chat", "io", format!("{error:#}"), 1),
    }
}

async fn open_session_log(database: &DatabaseConfig) -> Result<SqlSessionRepository> {
    let pool = connect(database).await.context("failed to open session log")?;
    migrations::run_pending(&pool).await.context("failed to migrate session log")?;
    Ok(SqlSessionRepository::new(pool))
}

/// Interactive loop: one line of input is one turn. Errors are shown as an apology and the
/// conversation carries on with the previous state.
pub async fn run_session<R, W>(
    agent: &AgentRuntime,
    repository: Option<&dyn SessionRepository>,
    max_turns: u32,
    input: R,
    output: &mut W,
) -> Result<ChatSummary>
where
    R: BufRead,
    W: Write,
{
    let session_id = SessionId::generate();
    let mut state = ConversationState::new();
    let mut turns: u32 = 0;
    let mut lead_captured = false;
    let mut lines = input.lines();

    write_banner(output)?;
    info!(event_name = "cli.chat.started", session_id = %session_id, "chat session started");

    loop {
        if turns >= max_turns {
            writeln!(output, "\n{MAX_TURNS_REACHED}")?;
            break;
        }

        write!(output, "You: ")?;
        output.flush()?;
        let Some(line) = lines.next() else {
            writeln!(output)?;
            break;
        };
        let line = line.context("failed to read input")?;
        let text = line.trim();

        if text.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&text.to_lowercase().as_str()) {
            writeln!(output, "\nAgent: {FAREWELL}")?;
            break;
        }

        match agent.process_session_turn(&session_id, &mut state, text).await {
            Ok(outcome) => {
                turns += 1;
                lead_captured |= outcome.lead_captured;
                writeln!(output, "\nAgent: {}\n", outcome.reply)?;
            }
            Err(error) => {
                let interface = error.into_interface(format!("{session_id}-{}", turns + 1));
                writeln!(output, "\nAgent: {}\n", interface.user_message())?;
            }
        }
    }

    if let Some(repository) = repository {
        let record = SessionRecord::from_state(
            session_id.clone(),
            &state,
            turns,
            max_turns,
            lead_captured,
        );
        if let Err(error) = repository.save(record).await {
            warn!(
                event_name = "cli.session_log.write_failed",
                session_id = %session_id,
                error = %error,
                "failed to log session"
            );
        }
    }

    write_summary(output, turns, lead_captured, &state)?;
    Ok(ChatSummary { session_id, turns, lead_captured, state })
}

fn write_banner<W: Write>(output: &mut W) -> io::Result<()> {
    let rule = "=".repeat(RULE_WIDTH);
    writeln!(output, "{rule}")?;
    writeln!(output, "AutoStream AI Assistant")?;
    writeln!(output, "{rule}")?;
    writeln!(output, "Type 'quit', 'exit', or 'bye' to end the conversation\n")
}

fn write_summary<W: Write>(
    output: &mut W,
    turns: u32,
    lead_captured: bool,
    state: &ConversationState,
) -> io::Result<()> {
    let rule = "=".repeat(RULE_WIDTH);
    writeln!(output, "\n{rule}")?;
    writeln!(output, "CONVERSATION SUMMARY")?;
    writeln!(output, "{rule}")?;
    writeln!(output, "Total turns: {turns}")?;
    writeln!(output, "Lead captured: {}", if lead_captured { "Yes" } else { "No" })?;
    if lead_captured {
        let lead = state.lead_info();
        writeln!(output, "Lead info:")?;
        for field in LeadField::ORDER {
            writeln!(output, "  {field}: {}", lead.get(field).unwrap_or("-"))?;
        }
    }
    writeln!(output, "{rule}")
}
