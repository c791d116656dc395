//! The listener: a never-ending scan → connect → subscribe loop that turns
//! every notification into a [`NotificationEvent`] on the Event Queue.
//!
//! No error ends the loop.  Scan failures, "not found", connect failures
//! and dropped links are all logged and followed by the same fixed backoff
//! before the next scan.  Only the [`StopSignal`] makes it return.
//!
//! The loop runs on its own OS thread with a private tokio runtime
//! ([`spawn_listener`]) so the blocking presentation loop on the main thread
//! never has to be async-aware.  The only thing the two sides share is the
//! [`EventSender`].

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::watch;

use crate::central::{Discovered, NotificationCentral, Subscription};
use crate::protocol::{is_trigger, RECONNECT_BACKOFF, TARGET_NAME};
use crate::queue::EventSender;
use crate::types::{ListenerState, NotificationEvent};

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Advertised name of the Notification Source.  Default: `"IPAD_SYNC"`.
    pub target_name: String,
    /// Service / characteristic to subscribe to and the connect timeout.
    pub subscription: Subscription,
    /// Wait before every re-scan.  Default: 5 s.
    pub backoff: Duration,
    /// How long a single scan looks for the target.  Default: 5 s.
    pub scan_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            target_name: TARGET_NAME.into(),
            subscription: Subscription::default(),
            backoff: RECONNECT_BACKOFF,
            scan_timeout: Duration::from_secs(5),
        }
    }
}

// ── Stop signal ───────────────────────────────────────────────────────────────

/// Create a linked stop handle / signal pair.
pub fn stop_signal() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx: Arc::new(tx) }, StopSignal { rx })
}

/// Requests shutdown.  Clone freely.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    /// A new signal observing this handle.
    pub fn signal(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observes a [`StopHandle`].  Checked at every listener suspension point.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once stop has been requested.  Never resolves if every
    /// [`StopHandle`] is dropped without stopping.
    pub async fn stopped(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

// ── Stats ─────────────────────────────────────────────────────────────────────

/// Counters returned when the loop stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerStats {
    pub scans: u64,
    pub connections: u64,
    /// Notifications pushed onto the queue.
    pub forwarded: u64,
    /// Notifications lost because the queue was closed.
    pub dropped: u64,
    /// Links torn down after a connect attempt, successful or not.
    pub releases: u64,
}

// ── Reconnect loop ────────────────────────────────────────────────────────────

fn transition(state: &mut ListenerState, next: ListenerState) {
    if *state != next {
        info!("Listener: {state} → {next}");
        *state = next;
    }
}

/// Package one notification and enqueue it.  A closed queue is logged and
/// the event dropped; it never stops the listener.
fn forward(tx: &EventSender, payload: Vec<u8>, stats: &mut ListenerStats) {
    debug!("Notify: {payload:02x?}");
    if is_trigger(&payload) {
        info!("Trigger received (0x01)");
    }
    match tx.put(NotificationEvent::notify(payload)) {
        Ok(()) => stats.forwarded += 1,
        Err(e) => {
            warn!("Queue put error: {e}; notification dropped");
            stats.dropped += 1;
        }
    }
}

/// Why a connect attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkEnd {
    Failed,
    Lost,
    Stopped,
}

/// Subscribe to `device` and forward notifications until the link drops or
/// stop is requested.  Never releases the link itself.
async fn hold_link<C: NotificationCentral>(
    central: &mut C,
    device: &Discovered<C::Peripheral>,
    config: &ListenerConfig,
    tx: &EventSender,
    stop: &mut StopSignal,
    state: &mut ListenerState,
    stats: &mut ListenerStats,
) -> LinkEnd {
    let name = &device.name;
    let subscribed = tokio::select! {
        r = central.subscribe(device, &config.subscription) => r,
        _ = stop.stopped() => return LinkEnd::Stopped,
    };
    let mut notifications = match subscribed {
        Ok(stream) => stream,
        Err(e) => {
            warn!("BLE connection error: {e:#}");
            return LinkEnd::Failed;
        }
    };

    stats.connections += 1;
    transition(state, ListenerState::Subscribed(name.clone()));
    loop {
        tokio::select! {
            item = notifications.next() => match item {
                Some(payload) => forward(tx, payload, stats),
                None => {
                    info!("Notification stream from {name} ended; link lost.");
                    return LinkEnd::Lost;
                }
            },
            _ = stop.stopped() => return LinkEnd::Stopped,
        }
    }
}

/// Run the reconnect state machine until `stop` fires.
///
/// ```text
/// Scanning ─▶ Connecting ─▶ Subscribed ─(notify)─▶ Subscribed
///     ▲             │             │
///     └── Backoff ◀─┴─────────────┘   (miss / error / link lost)
/// ```
pub async fn run_listener<C: NotificationCentral>(
    mut central: C,
    config: ListenerConfig,
    tx: EventSender,
    mut stop: StopSignal,
) -> ListenerStats {
    let mut stats = ListenerStats::default();
    let mut state = ListenerState::Stopped;

    'outer: while !stop.is_stopped() {
        transition(&mut state, ListenerState::Scanning);
        stats.scans += 1;

        let found = tokio::select! {
            r = central.find(&config.target_name, config.scan_timeout) => r,
            _ = stop.stopped() => break 'outer,
        };

        match found {
            Err(e) => warn!("BLE scan error: {e:#}"),
            Ok(None) => info!("Not found: {}", config.target_name),
            Ok(Some(device)) => {
                let name = device.name.clone();
                info!("Found {name} id={}", device.id);
                transition(&mut state, ListenerState::Connecting(name.clone()));

                let end = hold_link(
                    &mut central,
                    &device,
                    &config,
                    &tx,
                    &mut stop,
                    &mut state,
                    &mut stats,
                )
                .await;
                debug!("Link to {name} ended: {end:?}");

                // Whatever ended the link, make sure it is really down before
                // the next scan; a half-open peripheral stops advertising.
                let limit = config.subscription.connect_timeout;
                match tokio::time::timeout(limit, central.release(&device)).await {
                    Ok(Ok(())) => debug!("Released {name}"),
                    Ok(Err(e)) => warn!("BLE disconnect error for {name}: {e:#}"),
                    Err(_) => warn!("BLE disconnect of {name} timed out after {limit:?}"),
                }
                stats.releases += 1;

                if end == LinkEnd::Stopped {
                    break 'outer;
                }
            }
        }

        transition(&mut state, ListenerState::Backoff);
        tokio::select! {
            _ = tokio::time::sleep(config.backoff) => {}
            _ = stop.stopped() => break 'outer,
        }
    }

    transition(&mut state, ListenerState::Stopped);
    info!(
        "Listener stopped: {} scans, {} connections, {} forwarded, {} dropped, {} released",
        stats.scans, stats.connections, stats.forwarded, stats.dropped, stats.releases
    );
    stats
}

/// Run [`run_listener`] on a dedicated thread with its own single-threaded
/// tokio runtime.
///
/// A runtime that fails to build is logged and the thread exits; the
/// presentation side keeps running and simply never sees an event.
pub fn spawn_listener<C>(
    central: C,
    config: ListenerConfig,
    tx: EventSender,
    stop: StopSignal,
) -> std::io::Result<thread::JoinHandle<ListenerStats>>
where
    C: NotificationCentral + Send + 'static,
{
    thread::Builder::new()
        .name("ble-listener".into())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!("Listener runtime failed to start: {e}");
                    return ListenerStats::default();
                }
            };
            rt.block_on(run_listener(central, config, tx, stop))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::central::{Discovered, NotificationStream};
    use crate::queue::{event_queue, EventReceiver};
    use anyhow::{anyhow, Result};
    use std::collections::VecDeque;
    use tokio::time::Instant;

    enum Step {
        Miss,
        ScanError,
        ConnectError,
        /// Match, then deliver these payloads and drop the link.
        Deliver(Vec<Vec<u8>>),
        /// Match and stay subscribed without ever notifying.
        Hang,
    }

    /// Scripted central.  When the script runs out it requests stop.
    struct ScriptedCentral {
        script: VecDeque<Step>,
        pending: Option<Step>,
        finds: Vec<Instant>,
        subscribes: Vec<Instant>,
        releases: Vec<Instant>,
        stop: StopHandle,
    }

    impl ScriptedCentral {
        fn new(script: Vec<Step>, stop: StopHandle) -> Self {
            Self {
                script: script.into(),
                pending: None,
                finds: vec![],
                subscribes: vec![],
                releases: vec![],
                stop,
            }
        }
    }

    impl NotificationCentral for &mut ScriptedCentral {
        type Peripheral = ();

        async fn find(
            &mut self,
            target_name: &str,
            _timeout: Duration,
        ) -> Result<Option<Discovered<()>>> {
            self.finds.push(Instant::now());
            match self.script.pop_front() {
                None => {
                    self.stop.stop();
                    Ok(None)
                }
                Some(Step::Miss) => Ok(None),
                Some(Step::ScanError) => Err(anyhow!("adapter busy")),
                Some(step) => {
                    self.pending = Some(step);
                    Ok(Some(Discovered {
                        name: target_name.to_owned(),
                        id: "00:11:22:33:44:55".into(),
                        peripheral: (),
                    }))
                }
            }
        }

        async fn subscribe(
            &mut self,
            _device: &Discovered<()>,
            _subscription: &Subscription,
        ) -> Result<NotificationStream> {
            self.subscribes.push(Instant::now());
            match self.pending.take() {
                Some(Step::Deliver(payloads)) => Ok(futures::stream::iter(payloads).boxed()),
                Some(Step::Hang) => Ok(futures::stream::pending().boxed()),
                _ => Err(anyhow!("connect() timed out")),
            }
        }

        async fn release(&mut self, _device: &Discovered<()>) -> Result<()> {
            self.releases.push(Instant::now());
            Ok(())
        }
    }

    fn drain(rx: &EventReceiver) -> Vec<Vec<u8>> {
        let mut out = vec![];
        while let Ok(Some(ev)) = rx.try_get() {
            out.push(ev.payload);
        }
        out
    }

    fn assert_backoff(a: Instant, b: Instant) {
        let gap = b - a;
        assert!(
            gap >= RECONNECT_BACKOFF && gap < RECONNECT_BACKOFF + Duration::from_millis(2),
            "gap was {gap:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retries_at_fixed_backoff_until_found() {
        let (handle, signal) = stop_signal();
        let (tx, rx) = event_queue();
        let mut central = ScriptedCentral::new(
            vec![
                Step::Miss,
                Step::Miss,
                Step::Miss,
                Step::Deliver(vec![vec![0x01], vec![0x00]]),
            ],
            handle,
        );

        let stats = run_listener(&mut central, ListenerConfig::default(), tx, signal).await;

        // Three misses, the match on the fourth scan, then one more scan
        // after the link drops (which ends the script).
        assert_eq!(central.finds.len(), 5);
        for pair in central.finds.windows(2) {
            assert_backoff(pair[0], pair[1]);
        }
        assert_eq!(central.subscribes.len(), 1);
        assert!(central.subscribes[0] - central.finds[3] < Duration::from_millis(1));

        assert_eq!(drain(&rx), vec![vec![0x01], vec![0x00]]);
        assert_eq!(
            stats,
            ListenerStats {
                scans: 5,
                connections: 1,
                forwarded: 2,
                dropped: 0,
                releases: 1,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn scan_and_connect_errors_back_off_like_misses() {
        let (handle, signal) = stop_signal();
        let (tx, rx) = event_queue();
        let mut central = ScriptedCentral::new(
            vec![
                Step::ScanError,
                Step::ConnectError,
                Step::Deliver(vec![vec![0x01]]),
            ],
            handle,
        );

        let stats = run_listener(&mut central, ListenerConfig::default(), tx, signal).await;

        assert_eq!(central.finds.len(), 4);
        for pair in central.finds.windows(2) {
            assert_backoff(pair[0], pair[1]);
        }
        assert_eq!(central.subscribes.len(), 2);
        assert_eq!(stats.connections, 1);
        assert_eq!(drain(&rx), vec![vec![0x01]]);
    }

    #[tokio::test(start_paused = true)]
    async fn every_connect_attempt_is_released_before_rescanning() {
        let (handle, signal) = stop_signal();
        let (tx, _rx) = event_queue();
        let mut central = ScriptedCentral::new(
            vec![
                Step::ConnectError,
                Step::Deliver(vec![vec![0x01]]),
                Step::Miss,
            ],
            handle,
        );

        let stats = run_listener(&mut central, ListenerConfig::default(), tx, signal).await;

        // Failed connect, then lost link: both torn down, each before the
        // following scan.  The miss has nothing to release.
        assert_eq!(central.releases.len(), 2);
        assert_eq!(stats.releases, 2);
        assert!(central.releases[0] >= central.subscribes[0]);
        assert!(central.releases[0] < central.finds[1]);
        assert!(central.releases[1] >= central.subscribes[1]);
        assert!(central.releases[1] < central.finds[2]);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_queue_drops_events_without_stopping() {
        let (handle, signal) = stop_signal();
        let (tx, rx) = event_queue();
        drop(rx);
        let mut central = ScriptedCentral::new(
            vec![
                Step::Deliver(vec![vec![0x01], vec![0x01]]),
                Step::Deliver(vec![vec![0x01]]),
            ],
            handle,
        );

        let stats = run_listener(&mut central, ListenerConfig::default(), tx, signal).await;

        assert_eq!(stats.connections, 2);
        assert_eq!(stats.forwarded, 0);
        assert_eq!(stats.dropped, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_a_live_subscription() {
        let (handle, signal) = stop_signal();
        let (tx, _rx) = event_queue();
        let mut central = ScriptedCentral::new(vec![Step::Hang], handle.clone());

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            handle.stop();
        });
        let started = Instant::now();
        let stats = run_listener(&mut central, ListenerConfig::default(), tx, signal).await;
        stopper.await.unwrap();

        assert_eq!(stats.scans, 1);
        assert_eq!(stats.connections, 1);
        assert_eq!(central.releases.len(), 1);
        assert_eq!(stats.releases, 1);
        let waited = Instant::now() - started;
        assert!(waited >= Duration::from_secs(60) && waited < Duration::from_secs(61));
    }

    #[tokio::test]
    async fn already_stopped_signal_never_scans() {
        let (handle, signal) = stop_signal();
        handle.stop();
        let (tx, _rx) = event_queue();
        let mut central = ScriptedCentral::new(vec![Step::Miss], handle);
        let stats = run_listener(&mut central, ListenerConfig::default(), tx, signal).await;
        assert_eq!(stats.scans, 0);
        assert!(central.finds.is_empty());
    }

    #[test]
    fn spawned_listener_feeds_a_blocking_consumer() {
        use crate::simulator::SimulatedCentral;

        let (handle, signal) = stop_signal();
        let (tx, rx) = event_queue();
        let central = SimulatedCentral {
            misses_before_match: 0,
            scan_time: Duration::from_millis(1),
            interval: Duration::from_millis(5),
            payload: vec![0x01],
            notifications_per_link: None,
        };
        let config = ListenerConfig {
            backoff: Duration::from_millis(10),
            ..Default::default()
        };
        let join = spawn_listener(central, config, tx, signal).unwrap();

        let ev = rx.get(Duration::from_secs(5)).unwrap().expect("an event");
        assert!(ev.is_trigger());

        handle.stop();
        let stats = join.join().unwrap();
        assert!(stats.forwarded >= 1);
    }
}
