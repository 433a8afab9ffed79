//! Logging from inside device callbacks.
//!
//! Capture, output and device-error callbacks run on driver threads with hard deadlines, and whatever logger the
//! application installed behind `log` may lock or write to stderr.  Those callbacks are also where a ring overflows or
//! a decoder fails mid-file, so they still need to be heard.
//!
//! The `rt_*` macros below check [current_callback](crate::callback_thread::current_callback):
//!
//! - Off a callback thread they are plain `log` macros.
//! - On one, the message is formatted into a fixed-size inline buffer, tagged with the kind of callback, and pushed
//!   onto a preallocated queue.  A background thread drains the queue into `log`.
//!
//! Long messages are cut.  If the queue is full the message is counted against its callback kind, and the counts are
//! reported by the next message that gets through.  Messages that sat in the queue longer than [LATE_AFTER] say how
//! late they are, since the logger's timestamp is when they were forwarded.
use std::fmt::Arguments as FmtArgs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{park, JoinHandle};
use std::time::{Duration, Instant};

use arrayvec::ArrayString;
use thingbuf::{recycling::Recycle, ThingBuf};

use crate::callback_thread::CallbackKind;

/// Room for one message.  A few source ids and a device error string fit comfortably.
const MESSAGE_BYTES: usize = 256;

/// Messages which can wait to be forwarded.
const QUEUE_LEN: usize = 1024;

const LATE_AFTER: Duration = Duration::from_millis(250);

type MessageText = ArrayString<MESSAGE_BYTES>;

#[derive(Debug)]
#[allow(clippy::large_enum_variant)]
pub(crate) enum CallbackText {
    /// A message with no arguments needs no copy.
    Literal(&'static str),
    Formatted { text: MessageText, cut: bool },
}

impl CallbackText {
    fn format(args: FmtArgs<'_>) -> CallbackText {
        use std::fmt::Write;

        if let Some(s) = args.as_str() {
            return CallbackText::Literal(s);
        }

        let mut out = CuttingWriter {
            text: MessageText::new(),
            cut: false,
        };
        // CuttingWriter never reports an error, so nothing is lost here.
        let _ = write!(out, "{}", args);
        CallbackText::Formatted {
            text: out.text,
            cut: out.cut,
        }
    }

    fn as_str(&self) -> &str {
        match self {
            CallbackText::Literal(s) => s,
            CallbackText::Formatted { text, .. } => text.as_str(),
        }
    }

    fn was_cut(&self) -> bool {
        matches!(self, CallbackText::Formatted { cut: true, .. })
    }
}

/// Fills a [MessageText], then silently drops the rest.
struct CuttingWriter {
    text: MessageText,
    cut: bool,
}

impl std::fmt::Write for CuttingWriter {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        if self.cut {
            return Ok(());
        }
        if self.text.try_push_str(s).is_ok() {
            return Ok(());
        }

        self.cut = true;
        // Char by char, so the cut lands on a boundary.
        for c in s.chars() {
            if self.text.try_push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

pub(crate) struct CallbackRecord {
    callback: CallbackKind,
    level: log::Level,
    target: &'static str,
    text: CallbackText,
    queued_at: Instant,
}

pub(crate) fn record(
    callback: CallbackKind,
    level: log::Level,
    args: FmtArgs<'_>,
    target: &'static str,
) -> CallbackRecord {
    CallbackRecord {
        callback,
        level,
        target,
        text: CallbackText::format(args),
        queued_at: Instant::now(),
    }
}

struct EmptyRecord;

impl Recycle<CallbackRecord> for EmptyRecord {
    fn new_element(&self) -> CallbackRecord {
        record(CallbackKind::Output, log::Level::Trace, format_args!(""), module_path!())
    }

    fn recycle(&self, _element: &mut CallbackRecord) {
        // Pushing overwrites the whole slot.
    }
}

/// Messages lost to a full queue since the last report, by callback kind.
#[derive(Default)]
struct Lost {
    capture: AtomicU64,
    output: AtomicU64,
    device_error: AtomicU64,
}

impl Lost {
    fn counter(&self, kind: CallbackKind) -> &AtomicU64 {
        match kind {
            CallbackKind::Capture => &self.capture,
            CallbackKind::Output => &self.output,
            CallbackKind::DeviceError => &self.device_error,
        }
    }
}

struct CallbackLog {
    thread: JoinHandle<()>,
    queue: ThingBuf<CallbackRecord, EmptyRecord>,
    lost: Lost,
}

lazy_static::lazy_static! {
    static ref CALLBACK_LOG: CallbackLog = CallbackLog {
        // The spawned thread blocks on CALLBACK_LOG until this initializer returns.
        thread: std::thread::Builder::new()
            .name("binaural callback log".into())
            .spawn(forward_forever)
            .expect("Unable to spawn the callback log thread"),
        queue: ThingBuf::with_recycle(QUEUE_LEN, EmptyRecord),
        lost: Lost::default(),
    };
}

/// Where the macros go on a callback thread.
pub(crate) fn queue_from_callback(
    callback: CallbackKind,
    level: log::Level,
    args: FmtArgs<'_>,
    target: &'static str,
) {
    if level > log::max_level() {
        return;
    }

    let sink = &*CALLBACK_LOG;
    match sink.queue.push(record(callback, level, args, target)) {
        Ok(()) => sink.thread.thread().unpark(),
        Err(_) => {
            sink.lost.counter(callback).fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn report_lost(lost: &Lost) {
    for kind in [
        CallbackKind::Capture,
        CallbackKind::Output,
        CallbackKind::DeviceError,
    ] {
        let n = lost.counter(kind).swap(0, Ordering::Relaxed);
        if n != 0 {
            log::warn!("{} messages from the {} were lost to a full log queue", n, kind);
        }
    }
}

fn forward(record: CallbackRecord) {
    let late = record.queued_at.elapsed();
    let cut = if record.text.was_cut() { ", cut short" } else { "" };

    if late > LATE_AFTER {
        log::log!(
            target: record.target,
            record.level,
            "{} ({}{}, {:.3}s late)",
            record.text.as_str(),
            record.callback,
            cut,
            late.as_secs_f64()
        );
    } else {
        log::log!(
            target: record.target,
            record.level,
            "{} ({}{})",
            record.text.as_str(),
            record.callback,
            cut
        );
    }
}

fn forward_forever() {
    let sink = &*CALLBACK_LOG;
    loop {
        while let Some(r) = sink.queue.pop() {
            report_lost(&sink.lost);
            forward(r);
        }
        // An unpark racing with the drain is remembered, so this cannot miss a message.
        park();
    }
}

/// Spawn the forwarding thread from the control thread, before any callback can need it.
///
/// Sessions call this before opening devices.
pub(crate) fn ensure_forwarder() {
    lazy_static::initialize(&CALLBACK_LOG);
}

/// `log::log!`, but safe inside device callbacks.  The target is always the calling module.
#[allow(clippy::crate_in_macro_def)]
macro_rules! rt_log {
    ($level: expr, $fmt: expr $(, $args: expr)* $(,)?) => {
        let level = $level;
        match crate::callback_thread::current_callback() {
            Some(kind) => crate::logging::queue_from_callback(
                kind,
                level,
                format_args!($fmt, $($args),*),
                module_path!(),
            ),
            None => log::log!(level, $fmt, $($args),*),
        }
    }
}

macro_rules! rt_error {
    ($($args: tt)+) => {
        rt_log!(log::Level::Error, $($args)+);
    }
}

macro_rules! rt_warn {
    ($($args: tt)+) => {
        rt_log!(log::Level::Warn, $($args)+);
    }
}

macro_rules! rt_debug {
    ($($args: tt)+) => {
        rt_log!(log::Level::Debug, $($args)+);
    }
}
