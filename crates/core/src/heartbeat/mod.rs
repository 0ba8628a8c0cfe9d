use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{Broadcaster, Publish};

/// One heartbeat as delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beat {
    /// Tick time in nanoseconds since the Unix epoch.
    #[serde(rename = "Ts")]
    pub ts: i64,
    /// Starts at 1 and grows by one per tick.
    #[serde(rename = "Count")]
    pub count: u64,
}

impl Beat {
    /// Beat number `count` fired at `at`.
    pub fn new(at: SystemTime, count: u64) -> Self {
        Self {
            ts: unix_nanos(at),
            count,
        }
    }

    /// Wire encoding pushed to heartbeat subscribers.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn unix_nanos(at: SystemTime) -> i64 {
    match at.duration_since(UNIX_EPOCH) {
        Ok(since) => i64::try_from(since.as_nanos()).unwrap_or(i64::MAX),
        Err(before) => -i64::try_from(before.duration().as_nanos()).unwrap_or(i64::MAX),
    }
}

/// Source of ticks for the heartbeat.
pub trait Ticker: Send {
    /// Blocks until the next tick and returns its wall-clock time. `None`
    /// ends the heartbeat.
    fn tick(&mut self) -> Option<SystemTime>;
}

/// Fixed-period ticker on the real clock.
///
/// Ticks that are missed because the caller was late are skipped rather than
/// delivered in a burst.
#[derive(Debug)]
pub struct IntervalTicker {
    period: Duration,
    next: Instant,
}

impl IntervalTicker {
    /// The first tick fires one `period` after construction.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now() + period,
        }
    }
}

impl Ticker for IntervalTicker {
    fn tick(&mut self) -> Option<SystemTime> {
        let now = Instant::now();
        if self.next > now {
            thread::sleep(self.next - now);
        }
        let fired = Instant::now();
        while self.next <= fired {
            self.next += self.period;
        }
        Some(SystemTime::now())
    }
}

/// Replays a fixed list of tick times, then ends.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTicker {
    ticks: VecDeque<SystemTime>,
}

impl ScriptedTicker {
    /// Ticks at exactly the given times, in order.
    pub fn new(ticks: impl IntoIterator<Item = SystemTime>) -> Self {
        Self {
            ticks: ticks.into_iter().collect(),
        }
    }

    /// `count` ticks spaced `period` apart, starting at `start`.
    pub fn evenly(start: SystemTime, period: Duration, count: u32) -> Self {
        Self::new((0..count).map(|i| start + period * i))
    }
}

impl Ticker for ScriptedTicker {
    fn tick(&mut self) -> Option<SystemTime> {
        self.ticks.pop_front()
    }
}

/// Publishes a [`Beat`] through a [`Broadcaster`] on every tick.
pub struct HeartbeatGenerator<K> {
    ticker: K,
    beats: Broadcaster<Beat>,
    sequence: Arc<AtomicU64>,
}

impl<K: Ticker> HeartbeatGenerator<K> {
    /// Nothing is published until [`run`](Self::run) or
    /// [`spawn`](Self::spawn); the first beat carries sequence 1.
    pub fn new(ticker: K, beats: Broadcaster<Beat>) -> Self {
        Self {
            ticker,
            beats,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared view of the last issued sequence number.
    pub fn sequence(&self) -> Arc<AtomicU64> {
        self.sequence.clone()
    }

    /// Beats until the ticker runs out, then closes the broadcaster.
    pub fn run(mut self) {
        tracing::info!("beating...");
        let mut last: Option<Beat> = None;

        while let Some(at) = self.ticker.tick() {
            let (beat, _) = self.emit(at);
            let delta = last.map_or(0, |previous| beat.ts.saturating_sub(previous.ts));
            let delta = Duration::from_nanos(u64::try_from(delta).unwrap_or(0));
            tracing::debug!(sequence = beat.count, ?delta, "beat");
            last = Some(beat);
        }

        tracing::info!("heartbeat stopped");
        self.beats.close();
    }

    /// Issues the next sequence number and publishes it. The counter moves
    /// forward whether or not the publish went through.
    fn emit(&self, at: SystemTime) -> (Beat, Publish) {
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        let beat = Beat::new(at, sequence);
        let outcome = self.beats.publish(beat);
        if outcome == Publish::Dropped {
            tracing::warn!(sequence, "dropping beat");
        }
        (beat, outcome)
    }
}

impl<K: Ticker + 'static> HeartbeatGenerator<K> {
    /// Runs the heartbeat on its own named thread.
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("kbox-heartbeat".to_string())
            .spawn(move || self.run())
    }
}
