//! Periodic liveness pings.
use std::time::Duration;

use bytes::Bytes;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::{Frame, Result, WebSocketError};

/// Schedules heartbeat pings for an open connection and counts the ones left unanswered.
///
/// The monitor is idle until [`start`](Self::start) is called and goes back to idle on
/// [`cancel`](Self::cancel). While idle, [`tick`](Self::tick) never completes, so it can sit in
/// a `select!` branch unconditionally.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    period: Option<Duration>,
    payload: Bytes,
    max_missed: Option<u32>,
    interval: Option<Interval>,
    outstanding: u32,
}

impl HeartbeatMonitor {
    /// Creates an idle monitor.
    ///
    /// # Parameters
    /// - `period`: Time between two pings, `None` disables pings altogether.
    /// - `payload`: Application data carried by each ping.
    /// - `max_missed`: Number of unanswered pings tolerated, `None` for no limit.
    pub fn new(period: Option<Duration>, payload: Bytes, max_missed: Option<u32>) -> Self {
        Self {
            period,
            payload,
            max_missed,
            interval: None,
            outstanding: 0,
        }
    }

    /// Starts the schedule. The first ping is due one period from now.
    pub fn start(&mut self) {
        let Some(period) = self.period else {
            return;
        };

        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
        self.outstanding = 0;

        #[cfg(feature = "logging")]
        log::debug!("<Heartbeat>: started, period {period:?}");
    }

    /// Stops the schedule. No ping is produced after this returns.
    pub fn cancel(&mut self) {
        if self.interval.take().is_some() {
            #[cfg(feature = "logging")]
            log::debug!("<Heartbeat>: cancelled");
        }
    }

    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    /// Pings sent since the last pong.
    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }

    /// Waits for the next ping to be due and returns the frame to send.
    ///
    /// Cancel safe.
    ///
    /// # Errors
    /// Returns `WebSocketError::HeartbeatTimeout` when more pings than allowed are unanswered.
    /// The schedule is cancelled in that case.
    pub async fn tick(&mut self) -> Result<Frame> {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }

        if let Some(max) = self.max_missed {
            if self.outstanding > max {
                self.cancel();
                return Err(WebSocketError::HeartbeatTimeout(self.outstanding));
            }
        }

        self.outstanding += 1;

        #[cfg(feature = "logging")]
        log::debug!("<Heartbeat>: ping due ({} outstanding)", self.outstanding);

        Ok(Frame::ping(self.payload.clone()))
    }

    /// Records a pong from the server.
    pub fn on_pong(&mut self) {
        self.outstanding = 0;
    }
}
