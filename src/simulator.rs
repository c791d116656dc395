//! A software Notification Source for running the rig without an iPad.
//!
//! [`SimulatedCentral`] goes through the same scan / subscribe motions as the
//! BLE central: it misses a configurable number of scans first (to exercise
//! the reconnect backoff), then "connects" and notifies a fixed payload at a
//! fixed interval, optionally dropping the link after a number of
//! notifications.

use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use log::{debug, info};

use crate::central::{Discovered, NotificationCentral, NotificationStream, Subscription};
use crate::protocol::TRIGGER_PAYLOAD;

#[derive(Debug, Clone)]
pub struct SimulatedCentral {
    /// Scans that report "not found" before the device appears.
    pub misses_before_match: usize,
    /// How long each simulated scan takes (capped by the scan timeout).
    pub scan_time: Duration,
    /// Gap between notifications while subscribed.
    pub interval: Duration,
    pub payload: Vec<u8>,
    /// Drop the link after this many notifications.  `None` = never.
    pub notifications_per_link: Option<usize>,
}

impl Default for SimulatedCentral {
    fn default() -> Self {
        Self {
            misses_before_match: 1,
            scan_time: Duration::from_secs(1),
            interval: Duration::from_secs(8),
            payload: TRIGGER_PAYLOAD.to_vec(),
            notifications_per_link: None,
        }
    }
}

impl NotificationCentral for SimulatedCentral {
    type Peripheral = ();

    async fn find(
        &mut self,
        target_name: &str,
        timeout: Duration,
    ) -> Result<Option<Discovered<()>>> {
        tokio::time::sleep(self.scan_time.min(timeout)).await;
        if self.misses_before_match > 0 {
            self.misses_before_match -= 1;
            return Ok(None);
        }
        Ok(Some(Discovered {
            name: target_name.to_owned(),
            id: "SIMULATED".into(),
            peripheral: (),
        }))
    }

    async fn subscribe(
        &mut self,
        device: &Discovered<()>,
        _subscription: &Subscription,
    ) -> Result<NotificationStream> {
        info!(
            "Simulator: {} subscribed, notifying every {:?}",
            device.name, self.interval
        );
        let payload = self.payload.clone();
        let mut ticker = tokio::time::interval(self.interval);
        // The first tick of an interval completes immediately.
        ticker.tick().await;

        let stream = futures::stream::unfold(ticker, move |mut ticker| {
            let payload = payload.clone();
            async move {
                ticker.tick().await;
                Some((payload, ticker))
            }
        });
        Ok(match self.notifications_per_link {
            Some(n) => stream.take(n).boxed(),
            None => stream.boxed(),
        })
    }

    async fn release(&mut self, device: &Discovered<()>) -> Result<()> {
        debug!("Simulator: {} released", device.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn misses_then_matches() {
        let mut sim = SimulatedCentral {
            misses_before_match: 2,
            ..Default::default()
        };
        let timeout = Duration::from_secs(5);
        assert!(sim.find("IPAD_SYNC", timeout).await.unwrap().is_none());
        assert!(sim.find("IPAD_SYNC", timeout).await.unwrap().is_none());
        let dev = sim.find("IPAD_SYNC", timeout).await.unwrap().unwrap();
        assert_eq!(dev.name, "IPAD_SYNC");
    }

    #[tokio::test(start_paused = true)]
    async fn notifies_at_interval_and_drops_link() {
        let mut sim = SimulatedCentral {
            misses_before_match: 0,
            interval: Duration::from_secs(3),
            notifications_per_link: Some(2),
            ..Default::default()
        };
        let dev = sim.find("X", Duration::from_secs(5)).await.unwrap().unwrap();
        let mut stream = sim.subscribe(&dev, &Subscription::default()).await.unwrap();

        let start = Instant::now();
        let near = |expected: u64| {
            let gap = Instant::now() - start;
            let want = Duration::from_secs(expected);
            gap >= want && gap < want + Duration::from_millis(2)
        };
        assert_eq!(stream.next().await, Some(vec![0x01]));
        assert!(near(3));
        assert_eq!(stream.next().await, Some(vec![0x01]));
        assert!(near(6));
        assert_eq!(stream.next().await, None);
        sim.release(&dev).await.unwrap();
    }
}
