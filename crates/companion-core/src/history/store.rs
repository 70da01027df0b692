//! In-memory chat history with a rolling window and a summary watermark.
//!
//! The history holds ordered messages plus at most one summary marker. The
//! marker is a checkpoint: everything after it is "live" (unsummarized).
//! The window bounds the number of non-marker messages and evicts from the
//! front; a marker evicted this way stays active as the retired summary,
//! since every message still in the window is newer than it.

use std::collections::VecDeque;

use companion_types::chat::{ChatMessage, ContextSummary};
use uuid::Uuid;

/// Errors from history mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    #[error("summary position {position} is beyond history length {len}")]
    PositionOutOfRange { position: usize, len: usize },

    #[error("summary would precede the active summary checkpoint")]
    StaleSummary,

    #[error("message is not a summary marker")]
    NotASummary,
}

/// Ordered per-character message log.
#[derive(Debug, Clone)]
pub struct ChatHistory {
    character_id: String,
    window: usize,
    entries: VecDeque<ChatMessage>,
    retired_summary: Option<ChatMessage>,
}

impl ChatHistory {
    pub fn new(character_id: impl Into<String>, window: usize) -> Self {
        Self {
            character_id: character_id.into(),
            window: window.max(1),
            entries: VecDeque::new(),
            retired_summary: None,
        }
    }

    /// Rebuild a history from persisted messages and the latest summary.
    ///
    /// The marker is placed right after the message it covers; when that
    /// message has fallen out of the window the marker goes first.
    pub fn from_persisted(
        character_id: impl Into<String>,
        window: usize,
        messages: Vec<ChatMessage>,
        summary: Option<&ContextSummary>,
    ) -> Self {
        let mut history = Self::new(character_id, window);
        let skip = messages.len().saturating_sub(history.window);
        history.entries.extend(messages.into_iter().skip(skip));

        if let Some(summary) = summary {
            let position = history.position_after(summary.covers_until);
            let marker = summary.to_marker();
            history.entries.insert(position, marker);
        }
        history
    }

    pub fn character_id(&self) -> &str {
        &self.character_id
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Append a message, evicting the oldest entries past the window.
    pub fn append(&mut self, message: ChatMessage) {
        self.entries.push_back(message);
        self.enforce_window();
    }

    /// All entries in order, summary marker included.
    pub fn messages(&self) -> Vec<&ChatMessage> {
        self.entries.iter().collect()
    }

    /// Number of non-marker messages.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|m| !m.is_summary()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Messages after the active summary, in order.
    pub fn unsummarized(&self) -> Vec<&ChatMessage> {
        match self.marker_index() {
            Some(index) => self.entries.range(index + 1..).collect(),
            None => self.entries.iter().collect(),
        }
    }

    pub fn unsummarized_count(&self) -> usize {
        match self.marker_index() {
            Some(index) => self.entries.len() - index - 1,
            None => self.entries.len(),
        }
    }

    /// The active summary marker.
    pub fn active_summary(&self) -> Option<&ChatMessage> {
        self.marker_index()
            .and_then(|index| self.entries.get(index))
            .or(self.retired_summary.as_ref())
    }

    /// Insert a summary marker so that exactly the entries at index
    /// `position` and later remain unsummarized.
    ///
    /// Any earlier marker is dropped. A marker that would land before the
    /// current checkpoint is rejected.
    pub fn insert_summary(
        &mut self,
        marker: ChatMessage,
        position: usize,
    ) -> Result<(), HistoryError> {
        if !marker.is_summary() {
            return Err(HistoryError::NotASummary);
        }
        if position > self.entries.len() {
            return Err(HistoryError::PositionOutOfRange {
                position,
                len: self.entries.len(),
            });
        }

        let mut position = position;
        if let Some(existing) = self.marker_index() {
            if existing >= position {
                return Err(HistoryError::StaleSummary);
            }
            self.entries.remove(existing);
            position -= 1;
        }

        self.entries.insert(position, marker);
        self.retired_summary = None;
        Ok(())
    }

    /// Insert a persisted summary right after the message it covers.
    pub fn apply_summary(&mut self, summary: &ContextSummary) -> Result<(), HistoryError> {
        let position = self.position_after(summary.covers_until);
        self.insert_summary(summary.to_marker(), position)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.retired_summary = None;
    }

    /// Index just past the message with `id`, or 0 when it is not present.
    fn position_after(&self, id: Option<Uuid>) -> usize {
        id.and_then(|id| self.entries.iter().position(|m| m.id == id))
            .map(|index| index + 1)
            .unwrap_or(0)
    }

    fn marker_index(&self) -> Option<usize> {
        self.entries.iter().rposition(ChatMessage::is_summary)
    }

    fn enforce_window(&mut self) {
        while self.len() > self.window {
            match self.entries.pop_front() {
                Some(evicted) if evicted.is_summary() => self.retired_summary = Some(evicted),
                Some(_) => {}
                None => break,
            }
        }
    }
}
