//! Per-process application context.
//!
//! Owns everything the presentation side needs (source image, preset table,
//! current selection, the receiving end of the Event Queue) plus the handles
//! that tie the listener to it (a queue sender and the stop handle).
//! Created once at startup, dropped at exit; dropping it stops the listener.

use std::thread::JoinHandle;

use anyhow::{bail, Result};
use log::{info, warn};

use crate::central::NotificationCentral;
use crate::image_grid::ImageGrid;
use crate::listener::{spawn_listener, stop_signal, ListenerConfig, ListenerStats, StopHandle};
use crate::presets::{Preset, PresetError, PresetRegistry, PresetSelection};
use crate::protocol::TRIGGER_PAYLOAD;
use crate::queue::{event_queue, EventReceiver, EventSender};
use crate::types::{NotificationEvent, OperatorCommand};

/// What an [`OperatorCommand`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Selected(Preset),
    Cleared,
    Triggered,
    Quit,
}

#[derive(Debug)]
pub struct AppContext {
    pub grid: ImageGrid,
    pub registry: PresetRegistry,
    pub selection: PresetSelection,
    events: EventReceiver,
    sender: EventSender,
    stop: StopHandle,
    listener: Option<JoinHandle<ListenerStats>>,
}

impl AppContext {
    pub fn new(grid: ImageGrid, registry: PresetRegistry) -> Self {
        let (sender, events) = event_queue();
        let (stop, _) = stop_signal();
        Self {
            grid,
            registry,
            selection: PresetSelection::default(),
            events,
            sender,
            stop,
            listener: None,
        }
    }

    /// Start the listener thread.  Only one listener may run per context.
    ///
    /// The listener receives a queue sender and a stop signal, nothing else.
    pub fn start_listener<C>(&mut self, central: C, config: ListenerConfig) -> Result<()>
    where
        C: NotificationCentral + Send + 'static,
    {
        if self.listener.is_some() {
            bail!("listener already started");
        }
        info!(
            "Starting listener for {:?} (service {}, characteristic {})",
            config.target_name, config.subscription.service, config.subscription.characteristic
        );
        let handle = spawn_listener(central, config, self.sender.clone(), self.stop.signal())?;
        self.listener = Some(handle);
        Ok(())
    }

    pub fn listener_started(&self) -> bool {
        self.listener.is_some()
    }

    /// Consumer end of the Event Queue.
    pub fn events(&self) -> &EventReceiver {
        &self.events
    }

    /// An extra producer, e.g. for manual triggers from the operator.
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Apply one operator command.  Selection changes take effect on the
    /// next animation; a running one is never affected.
    pub fn apply(&mut self, command: &OperatorCommand) -> Result<CommandOutcome, PresetError> {
        match command {
            OperatorCommand::SelectIndex(i) => {
                let preset = self.registry.get(*i)?.clone();
                Ok(self.select(preset))
            }
            OperatorCommand::SelectLabel(label) => {
                let preset = self.registry.find(label)?.clone();
                Ok(self.select(preset))
            }
            OperatorCommand::ClearSelection => {
                info!("Selection cleared");
                self.selection.clear();
                Ok(CommandOutcome::Cleared)
            }
            OperatorCommand::ManualTrigger => {
                if let Err(e) = self.sender.put(NotificationEvent::notify(TRIGGER_PAYLOAD)) {
                    warn!("Manual trigger dropped: {e}");
                }
                Ok(CommandOutcome::Triggered)
            }
            OperatorCommand::Quit => Ok(CommandOutcome::Quit),
        }
    }

    fn select(&mut self, preset: Preset) -> CommandOutcome {
        info!("Selected preset: {}", preset.caption());
        self.selection.select(preset.clone());
        CommandOutcome::Selected(preset)
    }

    /// Stop the listener and wait for its thread.
    ///
    /// `Ok(None)` when no listener was ever started; an error when its
    /// thread panicked.
    pub fn shutdown(&mut self) -> Result<Option<ListenerStats>> {
        self.stop.stop();
        let Some(handle) = self.listener.take() else {
            return Ok(None);
        };
        match handle.join() {
            Ok(stats) => Ok(Some(stats)),
            Err(_) => bail!("listener thread panicked"),
        }
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_grid::tests::gradient;
    use crate::simulator::SimulatedCentral;
    use std::time::Duration;

    fn ctx() -> AppContext {
        AppContext::new(gradient(2, 20), PresetRegistry::builtin())
    }

    #[test]
    fn operator_selects_by_index_and_label() {
        let mut ctx = ctx();
        assert!(ctx.selection.current().is_none());

        let out = ctx.apply(&OperatorCommand::SelectIndex(2)).unwrap();
        assert_eq!(out, CommandOutcome::Selected(Preset::new("Mumbai", 151.748)));
        assert_eq!(ctx.selection.current().unwrap().label, "Mumbai");

        ctx.apply(&OperatorCommand::SelectLabel("Seoul".into()))
            .unwrap();
        assert_eq!(ctx.selection.current().unwrap().latency_ms, 244.0);

        assert_eq!(
            ctx.apply(&OperatorCommand::ClearSelection).unwrap(),
            CommandOutcome::Cleared
        );
        assert!(ctx.selection.current().is_none());
    }

    #[test]
    fn bad_selection_keeps_previous_preset() {
        let mut ctx = ctx();
        ctx.apply(&OperatorCommand::SelectIndex(0)).unwrap();
        assert!(ctx.apply(&OperatorCommand::SelectIndex(42)).is_err());
        assert!(ctx
            .apply(&OperatorCommand::SelectLabel("Atlantis".into()))
            .is_err());
        assert_eq!(ctx.selection.current().unwrap().label, "No NCC");
    }

    #[test]
    fn manual_trigger_lands_on_the_queue() {
        let mut ctx = ctx();
        assert_eq!(
            ctx.apply(&OperatorCommand::ManualTrigger).unwrap(),
            CommandOutcome::Triggered
        );
        let ev = ctx.events().try_get().unwrap().unwrap();
        assert!(ev.is_trigger());
    }

    #[test]
    fn listener_starts_once_and_stops_on_shutdown() {
        let mut ctx = ctx();
        let sim = SimulatedCentral {
            misses_before_match: 0,
            scan_time: Duration::from_millis(1),
            interval: Duration::from_millis(5),
            ..Default::default()
        };
        ctx.start_listener(sim.clone(), ListenerConfig::default())
            .unwrap();
        assert!(ctx.listener_started());
        assert!(ctx.start_listener(sim, ListenerConfig::default()).is_err());

        let ev = ctx.events().get(Duration::from_secs(5)).unwrap();
        assert!(ev.is_some());

        let stats = ctx.shutdown().unwrap().unwrap();
        assert!(stats.forwarded >= 1);
        assert!(!ctx.listener_started());
    }

    #[test]
    fn shutdown_without_listener_reports_nothing_to_stop() {
        let mut ctx = ctx();
        assert!(matches!(ctx.shutdown(), Ok(None)));
    }
}
