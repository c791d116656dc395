use std::time::Instant;

use crate::protocol::is_trigger;

/// What the listener observed.  Only BLE notifications exist today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A value notification on the trigger characteristic.
    Notify,
}

/// One notification, packaged by the listener and consumed exactly once by
/// the Dispatch Loop.
///
/// Built inside the notification callback and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub kind: EventKind,
    /// Raw characteristic value.  One byte in practice.
    pub payload: Vec<u8>,
    /// Monotonic receipt time on the listener side.
    ///
    /// Used by [`crate::dispatch::BusyPolicy::DropWhileBusy`] to tell events
    /// that arrived during an animation from those that arrived after it.
    pub timestamp: Instant,
}

impl NotificationEvent {
    /// Package a notification value received right now.
    pub fn notify(payload: impl Into<Vec<u8>>) -> Self {
        Self::notify_at(payload, Instant::now())
    }

    pub fn notify_at(payload: impl Into<Vec<u8>>, timestamp: Instant) -> Self {
        Self {
            kind: EventKind::Notify,
            payload: payload.into(),
            timestamp,
        }
    }

    /// `true` for a `Notify` event carrying exactly the trigger byte.
    ///
    /// Preset availability is checked separately by the dispatcher.
    pub fn is_trigger(&self) -> bool {
        self.kind == EventKind::Notify && is_trigger(&self.payload)
    }
}

/// Connection state of the listener's reconnect loop.
///
/// ```text
/// Scanning ──match──▶ Connecting ──ok──▶ Subscribed ──notify──▶ Subscribed
///    ▲                    │                   │
///    └──── backoff ◀──────┴──── error / link lost
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerState {
    /// Looking for a peripheral advertising the target name.
    Scanning,
    /// Peripheral found; link + GATT discovery in progress.
    Connecting(String),
    /// Notifications are flowing from the named peripheral.
    Subscribed(String),
    /// Waiting out the fixed backoff before the next scan.
    Backoff,
    /// The stop signal fired; the loop has returned.
    Stopped,
}

impl std::fmt::Display for ListenerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerState::Scanning => write!(f, "Scanning"),
            ListenerState::Connecting(name) => write!(f, "Connecting({name})"),
            ListenerState::Subscribed(name) => write!(f, "Subscribed({name})"),
            ListenerState::Backoff => write!(f, "Backoff"),
            ListenerState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Operator input, applied by the presentation context between queue polls.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    /// Select the preset at this registry index.
    SelectIndex(usize),
    /// Select the preset with this label.
    SelectLabel(String),
    /// Deselect; triggers are ignored until a preset is chosen again.
    ClearSelection,
    /// Push a synthetic trigger onto the Event Queue (no hardware needed).
    ManualTrigger,
    Quit,
}

impl OperatorCommand {
    /// Parse one line of operator input.
    ///
    /// | Input | Command |
    /// |---|---|
    /// | `q` | `Quit` |
    /// | `t` | `ManualTrigger` |
    /// | `x` | `ClearSelection` |
    /// | `1`..`9` | `SelectIndex(n - 1)` |
    /// | anything else | `SelectLabel(line)` |
    ///
    /// Returns `None` for blank input.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        Some(match line {
            "q" => OperatorCommand::Quit,
            "t" => OperatorCommand::ManualTrigger,
            "x" => OperatorCommand::ClearSelection,
            other => match other.parse::<usize>() {
                Ok(n) if n >= 1 => OperatorCommand::SelectIndex(n - 1),
                _ => OperatorCommand::SelectLabel(other.to_owned()),
            },
        })
    }
}
