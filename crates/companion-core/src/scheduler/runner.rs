//! The scheduler task: a fixed tick plus a command channel.
//!
//! UI events never touch trigger state directly; they send a
//! [`SchedulerCommand`] and the task applies it, so the scheduler stays the
//! single writer of every `TriggerState`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use companion_types::chat::CharacterResponse;

use super::trigger::{FiredTrigger, TRAY_TRIGGER_ID, TriggerContext};
use super::{SchedulerError, TriggerScheduler};
use crate::orchestrator::OrchestratorError;

/// Where fired triggers go; implemented by the orchestrator.
pub trait TurnSink: Send + Sync + 'static {
    /// Time since the user last interacted.
    fn idle_for(&self) -> Duration;

    /// Run a synthetic turn. Must not queue behind an in-flight turn.
    fn deliver(
        &self,
        fired: &FiredTrigger,
    ) -> impl Future<Output = Result<CharacterResponse, OrchestratorError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerCommand {
    /// Arm a manual trigger; it is evaluated immediately.
    Arm(String),
    /// Evaluate triggers now instead of waiting for the tick.
    TickNow,
}

/// Cheap handle for talking to a running scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    pub async fn send(&self, command: SchedulerCommand) -> Result<(), SchedulerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SchedulerError::Stopped)
    }

    /// The window came back from the system tray.
    pub async fn tray_restored(&self) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::Arm(TRAY_TRIGGER_ID.to_string()))
            .await
    }
}

/// Spawn the scheduler loop for one sink.
///
/// The loop ends when `cancel` fires. Delivery errors are logged; a `Busy`
/// sink simply drops the trigger.
pub fn spawn_scheduler<K: TurnSink>(
    mut scheduler: TriggerScheduler,
    sink: Arc<K>,
    tick: Duration,
    cancel: CancellationToken,
) -> (SchedulerHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(16);

    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so nothing fires at startup.
        interval.tick().await;
        let mut commands_open = true;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                command = rx.recv(), if commands_open => match command {
                    Some(SchedulerCommand::Arm(id)) => {
                        if let Err(e) = scheduler.arm(&id) {
                            warn!(trigger = %id, error = %e, "cannot arm trigger");
                            continue;
                        }
                    }
                    Some(SchedulerCommand::TickNow) => {}
                    None => {
                        commands_open = false;
                        continue;
                    }
                },
                _ = interval.tick() => {}
            }

            let ctx = TriggerContext::new(Local::now(), sink.idle_for());
            let Some(fired) = scheduler.tick(&ctx) else {
                continue;
            };
            info!(trigger = %fired.trigger_id, priority = fired.priority, "trigger fired");
            match sink.deliver(&fired).await {
                Ok(response) => debug!(success = response.is_success(), "trigger turn finished"),
                Err(OrchestratorError::Busy) => {
                    debug!(trigger = %fired.trigger_id, "turn in flight, trigger dropped")
                }
                Err(e) => warn!(trigger = %fired.trigger_id, error = %e, "trigger turn failed"),
            }
        }
        debug!("scheduler stopped");
    });

    (SchedulerHandle { commands: tx }, task)
}
