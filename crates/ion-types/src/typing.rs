//! Client-side typing state: the producer debounce and the observer roster.
//!
//! Both are plain state machines driven by explicit instants so callers can
//! plug them into whatever timer they already run.

use std::time::{Duration, Instant};

use crate::RoomId;
use crate::events::{TypingPayload, TypingSignal};

/// Quiet period after the last keystroke before `typing:false` is emitted.
pub const TYPING_DEBOUNCE: Duration = Duration::from_secs(2);

/// Per-input debounce. Every keystroke yields a `typing:true` signal and
/// pushes the stop deadline out by the debounce window.
#[derive(Debug)]
pub struct TypingDebouncer {
    room_id: RoomId,
    window: Duration,
    deadline: Option<Instant>,
}

impl TypingDebouncer {
    pub fn new(room_id: impl Into<RoomId>) -> Self {
        Self::with_window(room_id, TYPING_DEBOUNCE)
    }

    pub fn with_window(room_id: impl Into<RoomId>, window: Duration) -> Self {
        Self {
            room_id: room_id.into(),
            window,
            deadline: None,
        }
    }

    pub fn keystroke(&mut self, now: Instant) -> TypingSignal {
        self.deadline = Some(now + self.window);
        self.signal(true)
    }

    /// Yields `typing:false` once the window has elapsed without input.
    pub fn poll(&mut self, now: Instant) -> Option<TypingSignal> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                Some(self.signal(false))
            }
            _ => None,
        }
    }

    /// Stops immediately, e.g. when the message is sent.
    pub fn cancel(&mut self) -> Option<TypingSignal> {
        self.deadline.take().map(|_| self.signal(false))
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn signal(&self, typing: bool) -> TypingSignal {
        TypingSignal {
            room_id: self.room_id.clone(),
            typing,
        }
    }
}

/// Observer-side set of users currently typing in one room.
///
/// Entries leave on an explicit `typing:false` or when they have not been
/// refreshed within the expiry window, so a peer that vanished mid-sentence
/// does not leave a stale indicator behind.
///
/// Keyed by username: the server relays a single `typing:false` per user,
/// only after the last of that user's connections in the room has stopped.
#[derive(Debug)]
pub struct TypingRoster {
    room_id: RoomId,
    expiry: Duration,
    // Insertion order is display order.
    typing: Vec<(String, Instant)>,
}

impl TypingRoster {
    pub fn new(room_id: impl Into<RoomId>, expiry: Duration) -> Self {
        Self {
            room_id: room_id.into(),
            expiry,
            typing: Vec::new(),
        }
    }

    /// Applies a relayed signal. Signals for other rooms are ignored.
    pub fn apply(&mut self, payload: &TypingPayload, now: Instant) {
        if payload.room_id != self.room_id {
            return;
        }
        let existing = self.typing.iter().position(|(name, _)| *name == payload.username);
        match (payload.typing, existing) {
            (true, Some(idx)) => self.typing[idx].1 = now + self.expiry,
            (true, None) => self.typing.push((payload.username.clone(), now + self.expiry)),
            (false, Some(idx)) => {
                self.typing.remove(idx);
            }
            (false, None) => {}
        }
    }

    pub fn expire(&mut self, now: Instant) {
        self.typing.retain(|(_, until)| *until > now);
    }

    pub fn usernames(&self) -> impl Iterator<Item = &str> {
        self.typing.iter().map(|(name, _)| name.as_str())
    }

    /// "ada is typing..." / "ada, bob are typing...", or `None` when idle.
    pub fn render(&self) -> Option<String> {
        if self.typing.is_empty() {
            return None;
        }
        let names: Vec<&str> = self.usernames().collect();
        let verb = if names.len() == 1 { "is" } else { "are" };
        Some(format!("{} {} typing...", names.join(", "), verb))
    }
}
