//! Trigger trait and the built-in trigger kinds.
//!
//! Triggers are stateless decision functions: everything that changes over
//! time (cooldown clock, fired slots, arming) lives in a [`TriggerState`]
//! owned and mutated by the scheduler.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Days, Local, NaiveDate, NaiveDateTime, NaiveTime};

use super::SchedulerError;

/// What the orchestrator should do for a fired trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerAction {
    /// Pick a topic and start small talk.
    ChitChat,
    /// React to the window coming back from the tray.
    TrayRestore,
    /// Speak about a fixed system event.
    Say(String),
}

/// A trigger's wish to fire on this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerFire {
    pub action: TriggerAction,
    pub priority: u8,
    /// Start of the slot occurrence, for triggers that fire once per slot.
    pub slot: Option<NaiveDateTime>,
}

/// The single trigger selected on a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredTrigger {
    pub trigger_id: String,
    pub action: TriggerAction,
    pub priority: u8,
}

/// Inputs available to every trigger on a tick.
#[derive(Debug, Clone)]
pub struct TriggerContext {
    pub now: DateTime<Local>,
    /// Time since the user last sent a message.
    pub idle_for: Duration,
}

impl TriggerContext {
    pub fn new(now: DateTime<Local>, idle_for: Duration) -> Self {
        Self { now, idle_for }
    }
}

/// Per-trigger mutable state, owned by the scheduler.
#[derive(Debug, Clone, Default)]
pub struct TriggerState {
    pub last_fired: Option<DateTime<Local>>,
    /// Slot occurrences already fired, by local start time.
    pub fired_slots: HashSet<NaiveDateTime>,
    pub armed: bool,
}

impl TriggerState {
    /// Forget fired slots that started before yesterday. Yesterday's are
    /// kept because a late slot's window can run past midnight.
    pub fn roll_date(&mut self, today: NaiveDate) {
        let Some(yesterday) = today.checked_sub_days(Days::new(1)) else {
            return;
        };
        self.fired_slots.retain(|start| start.date() >= yesterday);
    }
}

pub trait Trigger: Send + Sync {
    fn id(&self) -> &str;

    /// Whether the trigger wants to fire now.
    fn evaluate(&self, ctx: &TriggerContext, state: &TriggerState) -> Option<TriggerFire>;

    /// Called for the selected trigger only.
    fn on_fired(&self, fire: &TriggerFire, ctx: &TriggerContext, state: &mut TriggerState) {
        let _ = fire;
        state.last_fired = Some(ctx.now);
    }

    /// Whether UI events may arm this trigger.
    fn armable(&self) -> bool {
        false
    }
}

/// Fires after a stretch of user inactivity, then waits out a cooldown.
#[derive(Debug, Clone)]
pub struct IdleTrigger {
    pub idle_after: Duration,
    pub cooldown: Duration,
    pub priority: u8,
}

impl Trigger for IdleTrigger {
    fn id(&self) -> &str {
        "idle"
    }

    fn evaluate(&self, ctx: &TriggerContext, state: &TriggerState) -> Option<TriggerFire> {
        if ctx.idle_for < self.idle_after {
            return None;
        }
        if let Some(last) = state.last_fired {
            let since = (ctx.now - last).to_std().unwrap_or_default();
            if since < self.cooldown {
                return None;
            }
        }
        Some(TriggerFire {
            action: TriggerAction::ChitChat,
            priority: self.priority,
            slot: None,
        })
    }
}

/// One wall-clock slot of a [`TimeOfDayTrigger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSlot {
    pub at: NaiveTime,
    pub message: String,
    pub priority: u8,
}

impl TimeSlot {
    /// Parse an `HH:MM` slot.
    pub fn parse(at: &str, message: impl Into<String>, priority: u8) -> Result<Self, SchedulerError> {
        let at = NaiveTime::parse_from_str(at.trim(), "%H:%M")
            .map_err(|_| SchedulerError::InvalidTimeSlot(at.to_string()))?;
        Ok(Self {
            at,
            message: message.into(),
            priority,
        })
    }

    /// Start of the most recent occurrence at or before `now`.
    fn last_start(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        let today = now.date();
        if self.at <= now.time() {
            Some(today.and_time(self.at))
        } else {
            today
                .checked_sub_days(Days::new(1))
                .map(|yesterday| yesterday.and_time(self.at))
        }
    }
}

/// Fires once per slot per day, within `grace` after the slot time. The
/// window may cross midnight.
#[derive(Debug, Clone)]
pub struct TimeOfDayTrigger {
    pub slots: Vec<TimeSlot>,
    pub grace: Duration,
}

impl TimeOfDayTrigger {
    pub fn new(slots: Vec<TimeSlot>) -> Self {
        Self {
            slots,
            grace: Duration::from_secs(30 * 60),
        }
    }
}

impl Trigger for TimeOfDayTrigger {
    fn id(&self) -> &str {
        "time_of_day"
    }

    fn evaluate(&self, ctx: &TriggerContext, state: &TriggerState) -> Option<TriggerFire> {
        let now = ctx.now.naive_local();
        self.slots.iter().find_map(|slot| {
            let start = slot.last_start(now)?;
            let open = (now - start).to_std().is_ok_and(|elapsed| elapsed < self.grace);
            (open && !state.fired_slots.contains(&start)).then(|| TriggerFire {
                action: TriggerAction::Say(slot.message.clone()),
                priority: slot.priority,
                slot: Some(start),
            })
        })
    }

    fn on_fired(&self, fire: &TriggerFire, ctx: &TriggerContext, state: &mut TriggerState) {
        state.roll_date(ctx.now.date_naive());
        if let Some(start) = fire.slot {
            state.fired_slots.insert(start);
        }
        state.last_fired = Some(ctx.now);
    }
}

/// Armed by a UI event (tray restore); fires once per arming.
#[derive(Debug, Clone)]
pub struct ManualTrigger {
    pub id: String,
    pub priority: u8,
}

/// Id of the tray-restore trigger registered by default.
pub const TRAY_TRIGGER_ID: &str = "tray";

impl Trigger for ManualTrigger {
    fn id(&self) -> &str {
        &self.id
    }

    fn evaluate(&self, _ctx: &TriggerContext, state: &TriggerState) -> Option<TriggerFire> {
        state.armed.then(|| TriggerFire {
            action: TriggerAction::TrayRestore,
            priority: self.priority,
            slot: None,
        })
    }

    fn on_fired(&self, _fire: &TriggerFire, ctx: &TriggerContext, state: &mut TriggerState) {
        state.armed = false;
        state.last_fired = Some(ctx.now);
    }

    fn armable(&self) -> bool {
        true
    }
}
