//! Main chat loop.
//!
//! One task owns the terminal: it reads input, prints orchestrator events
//! and drives turns, so output ordering follows event order. The trigger
//! scheduler runs as its own task and reaches the character through the
//! same orchestrator; its replies show up through the event bus.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use console::style;
use rustyline_async::SharedWriter;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use companion_core::orchestrator::OrchestratorError;
use companion_core::scheduler::{SchedulerHandle, TriggerScheduler, spawn_scheduler};
use companion_types::chat::CharacterResponse;
use companion_types::event::CompanionEvent;

use crate::cli::status::affection_bar;
use crate::state::{AppState, Orchestrator};

use super::banner::print_welcome_banner;
use super::commands::{self, ChatCommand};
use super::input::{ChatInput, InputEvent};
use super::renderer::{EventPrinter, describe_failure};

enum TurnKind {
    Greet,
    Farewell,
    Message(String),
}

/// What the loop should do after handling a line or a turn.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Leave,
}

struct ChatSession {
    orchestrator: Arc<Orchestrator>,
    input: ChatInput,
    printer: EventPrinter<SharedWriter>,
    events: broadcast::Receiver<CompanionEvent>,
    /// Lines typed while a reply was streaming.
    pending: VecDeque<String>,
    scheduler: Option<SchedulerHandle>,
    key_hint: Option<String>,
    leaving: bool,
}

/// Run the interactive chat loop for one character.
pub async fn run_chat_loop(
    state: &AppState,
    character: &str,
    with_scheduler: bool,
    quiet: bool,
) -> anyhow::Result<()> {
    let orchestrator = state.orchestrator(character)?;
    let snapshot = orchestrator.snapshot().await?;

    if !quiet {
        print_welcome_banner(
            orchestrator.character(),
            &state.config.generator.model,
            &snapshot,
        );
    }

    let (input, writer) =
        ChatInput::new().map_err(|e| anyhow!("failed to initialize input: {e}"))?;
    let events = orchestrator.events().subscribe();

    let cancel = CancellationToken::new();
    let mut scheduler_task: Option<JoinHandle<()>> = None;
    let mut scheduler_handle = None;
    if with_scheduler && state.config.scheduler.enabled {
        let scheduler = TriggerScheduler::from_config(&state.config.scheduler)?;
        let tick = Duration::from_secs(state.config.scheduler.tick_secs.max(1));
        let (handle, task) =
            spawn_scheduler(scheduler, Arc::clone(&orchestrator), tick, cancel.clone());
        scheduler_handle = Some(handle);
        scheduler_task = Some(task);
        debug!(tick_secs = tick.as_secs(), "trigger scheduler started");
    }

    info!(character_id = %orchestrator.character().id, "chat session started");

    let mut session = ChatSession {
        printer: EventPrinter::new(writer, orchestrator.character().name.clone()),
        orchestrator,
        input,
        events,
        pending: VecDeque::new(),
        scheduler: scheduler_handle,
        key_hint: state.key_hint().map(str::to_string),
        leaving: false,
    };

    let result = session.run().await;

    cancel.cancel();
    if let Some(task) = scheduler_task {
        if let Err(e) = task.await {
            warn!(error = %e, "scheduler task ended abnormally");
        }
    }
    session.input.finish();
    println!();
    result
}

impl ChatSession {
    async fn run(&mut self) -> anyhow::Result<()> {
        if self.run_turn(TurnKind::Greet).await? == Flow::Leave {
            return Ok(());
        }

        loop {
            if self.leaving {
                return Ok(());
            }
            if let Some(line) = self.pending.pop_front() {
                if self.handle_line(line).await? == Flow::Leave {
                    return Ok(());
                }
                continue;
            }

            tokio::select! {
                event = self.events.recv() => self.print_event(event)?,
                line = self.input.read_line() => match line {
                    InputEvent::Message(text) => {
                        if self.handle_line(text).await? == Flow::Leave {
                            return Ok(());
                        }
                    }
                    InputEvent::Interrupted => {
                        self.printer.note(style("Type /bye to say goodbye, or Ctrl+D to leave.").dim())?;
                    }
                    InputEvent::Eof => return Ok(()),
                },
            }
        }
    }

    async fn handle_line(&mut self, text: String) -> anyhow::Result<Flow> {
        let Some(command) = commands::parse(&text) else {
            return self.run_turn(TurnKind::Message(text)).await;
        };

        match command {
            ChatCommand::Help => commands::print_help(self.printer.writer())?,
            ChatCommand::Bye => {
                self.run_turn(TurnKind::Farewell).await?;
                return Ok(Flow::Leave);
            }
            ChatCommand::Exit => return Ok(Flow::Leave),
            ChatCommand::Tray => match &self.scheduler {
                Some(handle) => {
                    if let Err(e) = handle.tray_restored().await {
                        self.printer.note(style(format!("! {e}")).yellow())?;
                    }
                }
                None => {
                    self.printer.note(style("The scheduler is off; nothing reacts to the tray.").dim())?;
                }
            },
            ChatCommand::Status => self.print_status().await?,
            ChatCommand::Reset => {
                self.orchestrator.reset_history().await?;
                self.printer.note(style("Conversation cleared. Affection is unchanged.").dim())?;
            }
            ChatCommand::Unknown(name) => {
                self.printer.note(format!(
                    "{} Unknown command: {}. Type /help for available commands.",
                    style("?").yellow().bold(),
                    style(name).dim()
                ))?;
            }
        }
        Ok(Flow::Continue)
    }

    /// Drive one turn to its end while still printing events and accepting
    /// input. Ctrl+C cancels the turn; lines typed meanwhile are queued.
    async fn run_turn(&mut self, kind: TurnKind) -> anyhow::Result<Flow> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let turn = async move {
            match kind {
                TurnKind::Greet => orchestrator.greet().await,
                TurnKind::Farewell => orchestrator.farewell().await,
                TurnKind::Message(text) => orchestrator.send_message(&text, false).await,
            }
        };
        tokio::pin!(turn);

        let result = loop {
            tokio::select! {
                result = &mut turn => break result,
                event = self.events.recv() => self.print_event(event)?,
                line = self.input.read_line() => match line {
                    InputEvent::Message(text) => self.pending.push_back(text),
                    InputEvent::Interrupted => {
                        self.orchestrator.cancel_current_turn();
                    }
                    InputEvent::Eof => {
                        self.orchestrator.cancel_current_turn();
                        self.leaving = true;
                    }
                },
            }
        };

        self.drain_events()?;
        self.report(result)?;
        Ok(if self.leaving { Flow::Leave } else { Flow::Continue })
    }

    fn report(
        &mut self,
        result: Result<CharacterResponse, OrchestratorError>,
    ) -> anyhow::Result<()> {
        match result {
            Ok(response) => {
                if let Some(failure) = &response.failure {
                    self.printer.print_response(&response)?;
                    self.printer.note(
                        style(describe_failure(failure, self.key_hint.as_deref())).yellow(),
                    )?;
                }
            }
            Err(OrchestratorError::Cancelled) => {
                self.printer.note(style("(reply cancelled)").dim())?;
            }
            Err(OrchestratorError::Debounced) => {
                self.printer.note(style("(slow down a little, that message was dropped)").dim())?;
            }
            Err(OrchestratorError::EmptyInput) => {}
            Err(OrchestratorError::Busy) => {
                self.printer.note(style("(still busy with another reply)").dim())?;
            }
            Err(e @ OrchestratorError::Persistence(_)) => {
                self.printer.note(style(format!("! {e}")).red())?;
            }
            Err(e @ OrchestratorError::Configuration(_)) => return Err(e.into()),
        }
        Ok(())
    }

    async fn print_status(&mut self) -> anyhow::Result<()> {
        let snapshot = self.orchestrator.snapshot().await?;
        let affection = snapshot.relationship.affection.value();
        self.printer.note(format!(
            "{} {} {} ({})",
            style("Affection:").bold(),
            affection_bar(affection),
            affection,
            snapshot.relationship.attitude.as_str()
        ))?;
        self.printer.note(format!(
            "{} {} ({} not yet summarized)",
            style("Messages:").bold(),
            snapshot.message_count,
            snapshot.unsummarized
        ))?;
        if let Some(summary) = &snapshot.summary {
            self.printer.note(format!("{} {}", style("Summary:").bold(), style(summary).dim()))?;
        }
        Ok(())
    }

    fn print_event(&mut self, event: Result<CompanionEvent, RecvError>) -> anyhow::Result<()> {
        match event {
            Ok(event) => self.printer.handle(&event)?,
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "chat output fell behind events"),
            // The orchestrator outlives this loop, so the bus never closes here.
            Err(RecvError::Closed) => {}
        }
        Ok(())
    }

    /// Print events published before the turn returned.
    fn drain_events(&mut self) -> anyhow::Result<()> {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.printer.handle(&event)?,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "chat output fell behind events");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return Ok(()),
            }
        }
    }
}
