//! Notifications from device callbacks to the control thread.
//!
//! There are two channels behind one sender.  Level updates arrive every block and are superseded by the next one, so
//! they go through a bounded channel and are dropped when it is full; the latest level is in
//! [SourceControls](crate::controls::SourceControls) regardless.  Everything else happens at most a few times per run
//! and must not be lost, so it goes through an unbounded channel.
//!
//! Lifecycle events carry the [RunId] of the session start which produced them.  A source stopped and started again
//! gets a new run, and the registry ignores whatever the old one left queued.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::channel as chan;

use crate::registry::SourceId;

/// Identifies one start of a session.  Never reused.
#[derive(Copy, Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct RunId(u64);

impl RunId {
    pub(crate) fn next() -> RunId {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        RunId(COUNTER.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run {}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// The level of the block just rendered, in `0..=1`.
    Level { source: SourceId, level: f32 },

    /// A capture session has stopped.  Sent exactly once per start.
    MonitoringStopped { source: SourceId, run: RunId },

    /// A file reached its end.
    PlaybackCompleted { source: SourceId, run: RunId },

    /// A device failed while running.  The session is still open until the control thread stops it.
    DeviceError {
        source: SourceId,
        run: RunId,
        message: String,
    },
}

impl SessionEvent {
    pub fn source(&self) -> SourceId {
        match self {
            SessionEvent::Level { source, .. }
            | SessionEvent::MonitoringStopped { source, .. }
            | SessionEvent::PlaybackCompleted { source, .. }
            | SessionEvent::DeviceError { source, .. } => *source,
        }
    }

    /// The run a lifecycle event belongs to.  Levels have none.
    pub fn run(&self) -> Option<RunId> {
        match self {
            SessionEvent::Level { .. } => None,
            SessionEvent::MonitoringStopped { run, .. }
            | SessionEvent::PlaybackCompleted { run, .. }
            | SessionEvent::DeviceError { run, .. } => Some(*run),
        }
    }
}

/// The sending half, cloned into every session.
#[derive(Clone, Debug)]
pub struct EventSender {
    levels: chan::Sender<SessionEvent>,
    lifecycle: chan::Sender<SessionEvent>,
}

/// The receiving half, owned by whoever pumps events.
#[derive(Debug)]
pub struct EventReceiver {
    levels: chan::Receiver<SessionEvent>,
    lifecycle: chan::Receiver<SessionEvent>,
}

/// `level_capacity` bounds only the level updates.
pub fn event_channel(level_capacity: usize) -> (EventSender, EventReceiver) {
    let (levels_tx, levels_rx) = chan::bounded(level_capacity);
    let (lifecycle_tx, lifecycle_rx) = chan::unbounded();
    (
        EventSender {
            levels: levels_tx,
            lifecycle: lifecycle_tx,
        },
        EventReceiver {
            levels: levels_rx,
            lifecycle: lifecycle_rx,
        },
    )
}

impl EventSender {
    /// Send without blocking.  Returns whether the event was queued.
    ///
    /// Only level updates are ever dropped, and only when their channel is full.
    pub fn send(&self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Level { .. } => self.levels.try_send(event).is_ok(),
            _ => self.lifecycle.try_send(event).is_ok(),
        }
    }
}

impl EventReceiver {
    /// Everything queued right now: levels first, then lifecycle events in the order they were sent.
    pub fn drain(&self) -> Vec<SessionEvent> {
        let mut ret = self.levels.try_iter().collect::<Vec<_>>();
        ret.extend(self.lifecycle.try_iter());
        ret
    }

    /// Wait for one event of either kind.  A waiting lifecycle event wins over a waiting level.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<SessionEvent> {
        if let Ok(e) = self.lifecycle.try_recv() {
            return Some(e);
        }

        chan::select! {
            recv(self.lifecycle) -> e => e.ok(),
            recv(self.levels) -> e => e.ok(),
            default(timeout) => None,
        }
    }
}
