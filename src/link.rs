//! WiFi station link supervision.
//!
//! Each [`LinkSupervisor::check`] either confirms the link or issues one
//! `connect` and waits at most [`LINK_CHECK_INTERVAL`] for it to come up, so a
//! missing access point costs one period per attempt and never stalls the
//! task.

use core::time::Duration;

/// Supervision period, also the longest wait for an association.
pub const LINK_CHECK_INTERVAL: Duration = Duration::from_secs(5);
/// Link poll step while waiting for an association.
pub const LINK_POLL: Duration = Duration::from_millis(100);

/// Radio side of a WiFi station.
pub trait Station {
    type Error;

    fn is_connected(&mut self) -> bool;
    /// Start an association. Completion shows up in [`Station::is_connected`].
    fn connect(&mut self) -> Result<(), Self::Error>;
}

/// Delay source for the supervisor.
#[allow(async_fn_in_trait)]
pub trait Sleep {
    async fn sleep(&mut self, duration: Duration);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkStatus {
    Up,
    Down,
}

#[derive(Debug, Default)]
pub struct LinkSupervisor {
    was_up: bool,
    attempts: u32,
}

impl LinkSupervisor {
    pub const fn new() -> Self {
        Self {
            was_up: false,
            attempts: 0,
        }
    }

    /// Connection attempts since the link was last up.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Confirm the link, or issue one `connect` and wait a bounded time for it.
    pub async fn check<S: Station, D: Sleep>(
        &mut self,
        station: &mut S,
        sleep: &mut D,
    ) -> LinkStatus {
        if station.is_connected() {
            return self.mark_up();
        }
        if self.was_up {
            warn!("wifi: disconnected, reconnecting...");
            self.was_up = false;
        }

        self.attempts += 1;
        if station.connect().is_err() {
            error!("wifi: connect request failed (attempt {})", self.attempts);
            sleep.sleep(LINK_CHECK_INTERVAL).await;
            return LinkStatus::Down;
        }

        info!("wifi: connecting (attempt {})...", self.attempts);
        if wait_for_link(station, sleep).await {
            return self.mark_up();
        }
        warn!(
            "wifi: no link after {} ms, retrying",
            LINK_CHECK_INTERVAL.as_millis() as u32
        );
        LinkStatus::Down
    }

    fn mark_up(&mut self) -> LinkStatus {
        if !self.was_up {
            info!("wifi: connected");
            self.was_up = true;
            self.attempts = 0;
        }
        LinkStatus::Up
    }
}

async fn wait_for_link<S: Station, D: Sleep>(station: &mut S, sleep: &mut D) -> bool {
    let polls = LINK_CHECK_INTERVAL.as_millis() / LINK_POLL.as_millis();
    for _ in 0..polls {
        sleep.sleep(LINK_POLL).await;
        if station.is_connected() {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    /// Associates on the `accept_on`-th accepted `connect`, if ever.
    #[derive(Default)]
    struct FakeStation {
        connected: bool,
        refuse: bool,
        accept_on: Option<usize>,
        connects: usize,
    }

    impl Station for FakeStation {
        type Error = ();

        fn is_connected(&mut self) -> bool {
            self.connected
        }

        fn connect(&mut self) -> Result<(), ()> {
            if self.refuse {
                return Err(());
            }
            self.connects += 1;
            if self.accept_on == Some(self.connects) {
                self.connected = true;
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct Slept(Duration);

    impl Sleep for Slept {
        async fn sleep(&mut self, duration: Duration) {
            self.0 += duration;
        }
    }

    #[test]
    fn unreachable_access_point_is_retried_every_period() {
        let mut station = FakeStation::default();
        let mut slept = Slept::default();
        let mut supervisor = LinkSupervisor::new();

        for _ in 0..3 {
            let status = block_on(supervisor.check(&mut station, &mut slept));
            assert_eq!(status, LinkStatus::Down);
        }

        assert_eq!(station.connects, 3);
        assert_eq!(supervisor.attempts(), 3);
        assert_eq!(slept.0, LINK_CHECK_INTERVAL * 3);
    }

    #[test]
    fn refused_connect_waits_a_period_and_retries() {
        let mut station = FakeStation {
            refuse: true,
            accept_on: Some(1),
            ..Default::default()
        };
        let mut slept = Slept::default();
        let mut supervisor = LinkSupervisor::new();

        assert_eq!(block_on(supervisor.check(&mut station, &mut slept)), LinkStatus::Down);
        assert_eq!(slept.0, LINK_CHECK_INTERVAL);

        station.refuse = false;
        assert_eq!(block_on(supervisor.check(&mut station, &mut slept)), LinkStatus::Up);
        assert_eq!(station.connects, 1);
        assert_eq!(supervisor.attempts(), 0);
    }

    #[test]
    fn healthy_link_needs_no_connect() {
        let mut station = FakeStation {
            connected: true,
            ..Default::default()
        };
        let mut slept = Slept::default();
        let mut supervisor = LinkSupervisor::new();

        assert_eq!(block_on(supervisor.check(&mut station, &mut slept)), LinkStatus::Up);
        assert_eq!(station.connects, 0);
        assert_eq!(slept.0, Duration::ZERO);
    }

    #[test]
    fn dropped_link_is_reconnected() {
        let mut station = FakeStation {
            connected: true,
            accept_on: Some(1),
            ..Default::default()
        };
        let mut slept = Slept::default();
        let mut supervisor = LinkSupervisor::new();
        block_on(supervisor.check(&mut station, &mut slept));

        station.connected = false;
        assert_eq!(block_on(supervisor.check(&mut station, &mut slept)), LinkStatus::Up);
        assert_eq!(station.connects, 1);
        assert!(slept.0 <= LINK_POLL);
    }
}
