//! Trigger scheduler: decides when a character speaks unprompted.
//!
//! On every tick all enabled triggers are evaluated; if several want to
//! fire, the highest priority wins and ties go to the earliest registered.
//! Only the winner's `on_fired` runs, so the others keep their state and
//! may fire on a later tick.

pub mod runner;
pub mod trigger;

use std::time::Duration;

use companion_types::config::SchedulerConfig;
use tracing::debug;

pub use runner::{SchedulerCommand, SchedulerHandle, TurnSink, spawn_scheduler};
pub use trigger::{
    FiredTrigger, IdleTrigger, ManualTrigger, TRAY_TRIGGER_ID, TimeOfDayTrigger, TimeSlot, Trigger,
    TriggerAction, TriggerContext, TriggerFire, TriggerState,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("unknown trigger '{0}'")]
    UnknownTrigger(String),

    #[error("trigger '{0}' cannot be armed")]
    NotArmable(String),

    #[error("invalid time slot '{0}', expected HH:MM")]
    InvalidTimeSlot(String),

    #[error("scheduler is not running")]
    Stopped,
}

struct Entry {
    trigger: Box<dyn Trigger>,
    state: TriggerState,
    enabled: bool,
}

/// Registry of triggers plus their scheduler-owned state.
#[derive(Default)]
pub struct TriggerScheduler {
    entries: Vec<Entry>,
}

impl TriggerScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idle, time-of-day and tray triggers as configured.
    pub fn from_config(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        let slots = config
            .time_slots
            .iter()
            .map(|slot| TimeSlot::parse(&slot.at, slot.message.clone(), slot.priority))
            .collect::<Result<Vec<_>, _>>()?;

        let mut scheduler = Self::new();
        scheduler.register(IdleTrigger {
            idle_after: Duration::from_secs(config.idle_after_secs),
            cooldown: Duration::from_secs(config.idle_cooldown_secs),
            priority: config.idle_priority,
        });
        if !slots.is_empty() {
            scheduler.register(TimeOfDayTrigger::new(slots));
        }
        scheduler.register(ManualTrigger {
            id: TRAY_TRIGGER_ID.to_string(),
            priority: config.tray_priority,
        });
        Ok(scheduler)
    }

    pub fn register<T: Trigger + 'static>(&mut self, trigger: T) {
        self.entries.push(Entry {
            trigger: Box::new(trigger),
            state: TriggerState::default(),
            enabled: true,
        });
    }

    pub fn trigger_ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.trigger.id()).collect()
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<(), SchedulerError> {
        self.entry_mut(id)?.enabled = enabled;
        Ok(())
    }

    /// Arm a manual trigger so it fires on the next tick.
    pub fn arm(&mut self, id: &str) -> Result<(), SchedulerError> {
        let entry = self.entry_mut(id)?;
        if !entry.trigger.armable() {
            return Err(SchedulerError::NotArmable(id.to_string()));
        }
        entry.state.armed = true;
        Ok(())
    }

    /// Evaluate every enabled trigger and select at most one.
    pub fn tick(&mut self, ctx: &TriggerContext) -> Option<FiredTrigger> {
        let today = ctx.now.date_naive();
        for entry in &mut self.entries {
            entry.state.roll_date(today);
        }

        let mut winner: Option<(usize, TriggerFire)> = None;
        for (index, entry) in self.entries.iter().enumerate() {
            if !entry.enabled {
                continue;
            }
            let Some(fire) = entry.trigger.evaluate(ctx, &entry.state) else {
                continue;
            };
            debug!(trigger = entry.trigger.id(), priority = fire.priority, "trigger wants to fire");
            if winner.as_ref().is_none_or(|(_, best)| fire.priority > best.priority) {
                winner = Some((index, fire));
            }
        }

        let (index, fire) = winner?;
        let entry = &mut self.entries[index];
        entry.trigger.on_fired(&fire, ctx, &mut entry.state);
        Some(FiredTrigger {
            trigger_id: entry.trigger.id().to_string(),
            action: fire.action,
            priority: fire.priority,
        })
    }

    fn entry_mut(&mut self, id: &str) -> Result<&mut Entry, SchedulerError> {
        self.entries
            .iter_mut()
            .find(|e| e.trigger.id() == id)
            .ok_or_else(|| SchedulerError::UnknownTrigger(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    struct Always {
        id: &'static str,
        priority: u8,
    }

    impl Trigger for Always {
        fn id(&self) -> &str {
            self.id
        }

        fn evaluate(&self, _ctx: &TriggerContext, _state: &TriggerState) -> Option<TriggerFire> {
            Some(TriggerFire {
                action: TriggerAction::Say(self.id.to_string()),
                priority: self.priority,
                slot: None,
            })
        }
    }

    fn ctx() -> TriggerContext {
        TriggerContext::new(
            Local.with_ymd_and_hms(2026, 5, 4, 15, 0, 0).unwrap(),
            Duration::ZERO,
        )
    }

    #[test]
    fn highest_priority_wins() {
        let mut scheduler = TriggerScheduler::new();
        scheduler.register(Always { id: "low", priority: 10 });
        scheduler.register(Always { id: "high", priority: 90 });
        scheduler.register(Always { id: "mid", priority: 50 });

        let fired = scheduler.tick(&ctx()).unwrap();
        assert_eq!(fired.trigger_id, "high");
    }

    #[test]
    fn ties_go_to_first_registered() {
        let mut scheduler = TriggerScheduler::new();
        scheduler.register(Always { id: "first", priority: 50 });
        scheduler.register(Always { id: "second", priority: 50 });
        assert_eq!(scheduler.tick(&ctx()).unwrap().trigger_id, "first");
    }

    #[test]
    fn only_the_winner_consumes_its_state() {
        let mut scheduler = TriggerScheduler::new();
        scheduler.register(ManualTrigger { id: "tray".into(), priority: 80 });
        scheduler.register(ManualTrigger { id: "other".into(), priority: 20 });
        scheduler.arm("tray").unwrap();
        scheduler.arm("other").unwrap();

        assert_eq!(scheduler.tick(&ctx()).unwrap().trigger_id, "tray");
        assert_eq!(scheduler.tick(&ctx()).unwrap().trigger_id, "other");
        assert!(scheduler.tick(&ctx()).is_none());
    }

    #[test]
    fn disabled_triggers_are_skipped() {
        let mut scheduler = TriggerScheduler::new();
        scheduler.register(Always { id: "a", priority: 90 });
        scheduler.register(Always { id: "b", priority: 10 });
        scheduler.set_enabled("a", false).unwrap();
        assert_eq!(scheduler.tick(&ctx()).unwrap().trigger_id, "b");
    }

    #[test]
    fn arming_errors() {
        let mut scheduler = TriggerScheduler::new();
        scheduler.register(Always { id: "a", priority: 1 });
        assert_eq!(scheduler.arm("a"), Err(SchedulerError::NotArmable("a".into())));
        assert_eq!(scheduler.arm("zzz"), Err(SchedulerError::UnknownTrigger("zzz".into())));
    }

    #[test]
    fn from_config_registers_default_triggers() {
        let scheduler = TriggerScheduler::from_config(&SchedulerConfig::default()).unwrap();
        assert_eq!(scheduler.trigger_ids(), vec!["idle", "time_of_day", TRAY_TRIGGER_ID]);
    }
}
