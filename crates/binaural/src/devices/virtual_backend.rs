//! A backend with no hardware behind it.
//!
//! Capture blocks are pushed in by hand and output is pulled out by hand, on the calling thread.  Streams behave like
//! real ones otherwise: callbacks only run while a stream is started, and dropping a stream waits out any callback
//! running on another thread.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::*;

/// Identifies one open virtual stream.
pub type VirtualStreamId = u64;

struct Slot<C> {
    id: VirtualStreamId,
    device_index: usize,
    format: StreamFormat,
    running: Arc<AtomicBool>,

    /// Taken out (set to `None`) when the stream is dropped.  Holding the lock is what a callback in flight looks like.
    callback: Arc<Mutex<Option<C>>>,
    on_error: Arc<Mutex<ErrorCallback>>,
}

// Manual, since `C` itself is not `Clone`.
impl<C> Clone for Slot<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            device_index: self.device_index,
            format: self.format,
            running: self.running.clone(),
            callback: self.callback.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

#[derive(Default)]
struct State {
    input_names: Vec<String>,
    next_id: VirtualStreamId,
    fail_opens: bool,
    captures: Vec<Slot<CaptureCallback>>,
    outputs: Vec<Slot<FillCallback>>,
}

/// A cloneable handle; all clones drive the same devices.
#[derive(Clone, Default)]
pub struct VirtualBackend {
    state: Arc<Mutex<State>>,
}

/// What one output pull produced.
#[derive(Clone, Debug, PartialEq)]
pub struct Pulled {
    pub samples: Vec<f32>,

    /// Frames of real audio, as reported by the stream.
    pub frames: usize,
}

struct VirtualStream {
    state: Arc<Mutex<State>>,
    id: VirtualStreamId,
    running: Arc<AtomicBool>,
}

impl DeviceStream for VirtualStream {
    fn start(&mut self) -> Result<(), DeviceError> {
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), DeviceError> {
        self.running.store(false, Ordering::Release);
        Ok(())
    }
}

impl Drop for VirtualStream {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        let removed = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let id = self.id;
            let capture = state
                .captures
                .iter()
                .position(|s| s.id == id)
                .map(|i| state.captures.remove(i));
            let output = state
                .outputs
                .iter()
                .position(|s| s.id == id)
                .map(|i| state.outputs.remove(i));
            (capture, output)
        };

        // Outside the state lock, so that a callback which is running and calls back into the backend cannot deadlock
        // with us.  Taking the callback waits for it to finish.
        match removed {
            (Some(slot), _) => drop(lock(&slot.callback).take()),
            (_, Some(slot)) => drop(lock(&slot.callback).take()),
            _ => {}
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // A panic in a test callback poisons the lock; the data is still fine for our purposes.
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl VirtualBackend {
    /// A backend with the given input devices and one output device.
    pub fn new<S: Into<String>>(input_names: impl IntoIterator<Item = S>) -> Self {
        let state = State {
            input_names: input_names.into_iter().map(Into::into).collect(),
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Make every open fail until turned off again.
    pub fn set_fail_opens(&self, fail: bool) {
        lock(&self.state).fail_opens = fail;
    }

    /// How many capture streams are open on a device, started or not.
    pub fn open_captures(&self, device_index: usize) -> usize {
        lock(&self.state)
            .captures
            .iter()
            .filter(|s| s.device_index == device_index)
            .count()
    }

    pub fn open_outputs(&self) -> usize {
        lock(&self.state).outputs.len()
    }

    /// Ids of the output streams which are currently started, oldest first.
    pub fn running_outputs(&self) -> Vec<VirtualStreamId> {
        lock(&self.state)
            .outputs
            .iter()
            .filter(|s| s.running.load(Ordering::Acquire))
            .map(|s| s.id)
            .collect()
    }

    pub fn output_format(&self, id: VirtualStreamId) -> Option<StreamFormat> {
        lock(&self.state)
            .outputs
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.format)
    }

    /// Deliver a block to every started capture stream on `device_index`.  Returns how many streams received it.
    pub fn push_capture(&self, device_index: usize, block: &[i16]) -> usize {
        let slots = lock(&self.state)
            .captures
            .iter()
            .filter(|s| s.device_index == device_index)
            .cloned()
            .collect::<Vec<_>>();

        let mut delivered = 0;
        for slot in slots {
            let mut cb = lock(&slot.callback);
            // Checked under the callback lock, so a stream stopped by now never sees the block.
            if !slot.running.load(Ordering::Acquire) {
                continue;
            }
            if let Some(cb) = cb.as_mut() {
                cb(block);
                delivered += 1;
            }
        }
        delivered
    }

    /// Pull `frames` frames from an output stream.  `None` if the stream is gone or not started.
    pub fn pull_output(&self, id: VirtualStreamId, frames: usize) -> Option<Pulled> {
        let slot = lock(&self.state).outputs.iter().find(|s| s.id == id).cloned()?;

        let mut cb = lock(&slot.callback);
        if !slot.running.load(Ordering::Acquire) {
            return None;
        }
        let cb = cb.as_mut()?;
        let mut samples = vec![0.0; frames * slot.format.channels as usize];
        let frames = cb(&mut samples);
        Some(Pulled { samples, frames })
    }

    /// Pull from the oldest started output stream.
    pub fn pull_first_output(&self, frames: usize) -> Option<Pulled> {
        let id = *self.running_outputs().first()?;
        self.pull_output(id, frames)
    }

    /// Report a failure on every capture stream of a device, the way a driver would from its own thread.
    pub fn fail_capture(&self, device_index: usize, message: &str) {
        let slots = lock(&self.state)
            .captures
            .iter()
            .filter(|s| s.device_index == device_index)
            .cloned()
            .collect::<Vec<_>>();
        for slot in slots {
            let mut on_error = lock(&slot.on_error);
            (on_error.as_mut())(message.to_string());
        }
    }

    fn check_open(&self) -> Result<(), DeviceError> {
        if lock(&self.state).fail_opens {
            return Err(DeviceError::Virtual("virtual device refused to open"));
        }
        Ok(())
    }

    fn make_stream<C>(&self, slot: &Slot<C>) -> Box<dyn DeviceStream> {
        Box::new(VirtualStream {
            state: self.state.clone(),
            id: slot.id,
            running: slot.running.clone(),
        })
    }
}

impl AudioBackend for VirtualBackend {
    fn input_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        Ok(lock(&self.state)
            .input_names
            .iter()
            .enumerate()
            .map(|(index, name)| DeviceInfo {
                index,
                name: name.clone(),
                channels: 1,
            })
            .collect())
    }

    fn output_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        Ok(vec![DeviceInfo {
            index: 0,
            name: "virtual output".into(),
            channels: 2,
        }])
    }

    fn open_capture(
        &self,
        device_index: usize,
        format: StreamFormat,
        on_block: CaptureCallback,
        on_error: ErrorCallback,
    ) -> Result<Box<dyn DeviceStream>, DeviceError> {
        self.check_open()?;
        let mut state = lock(&self.state);
        if device_index >= state.input_names.len() {
            return Err(DeviceError::NoSuchDevice(device_index));
        }

        state.next_id += 1;
        let slot = Slot {
            id: state.next_id,
            device_index,
            format,
            running: Arc::new(AtomicBool::new(false)),
            callback: Arc::new(Mutex::new(Some(on_block))),
            on_error: Arc::new(Mutex::new(on_error)),
        };
        let stream = self.make_stream(&slot);
        state.captures.push(slot);
        Ok(stream)
    }

    fn open_output(
        &self,
        format: StreamFormat,
        fill: FillCallback,
        on_error: ErrorCallback,
    ) -> Result<Box<dyn DeviceStream>, DeviceError> {
        self.check_open()?;
        let mut state = lock(&self.state);
        state.next_id += 1;
        let slot = Slot {
            id: state.next_id,
            device_index: 0,
            format,
            running: Arc::new(AtomicBool::new(false)),
            callback: Arc::new(Mutex::new(Some(fill))),
            on_error: Arc::new(Mutex::new(on_error)),
        };
        let stream = self.make_stream(&slot);
        state.outputs.push(slot);
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    fn counting_capture(count: &Arc<AtomicUsize>) -> CaptureCallback {
        let count = count.clone();
        Box::new(move |block: &[i16]| {
            count.fetch_add(block.len(), Ordering::Relaxed);
        })
    }

    fn no_errors() -> ErrorCallback {
        Box::new(|_: String| {})
    }

    #[test]
    fn test_capture_only_while_started() {
        let backend = VirtualBackend::new(["mic"]);
        let count = Arc::new(AtomicUsize::new(0));
        let mut stream = backend
            .open_capture(0, StreamFormat::CAPTURE, counting_capture(&count), no_errors())
            .unwrap();

        assert_eq!(backend.push_capture(0, &[1, 2, 3]), 0);
        stream.start().unwrap();
        assert_eq!(backend.push_capture(0, &[1, 2, 3]), 1);
        stream.pause().unwrap();
        assert_eq!(backend.push_capture(0, &[1, 2, 3]), 0);
        assert_eq!(count.load(Ordering::Relaxed), 3);

        drop(stream);
        assert_eq!(backend.open_captures(0), 0);
    }

    #[test]
    fn test_drop_releases_callback() {
        let backend = VirtualBackend::new(["mic"]);
        let count = Arc::new(AtomicUsize::new(0));
        let stream = backend
            .open_capture(0, StreamFormat::CAPTURE, counting_capture(&count), no_errors())
            .unwrap();
        assert_eq!(Arc::strong_count(&count), 2);
        drop(stream);
        assert_eq!(Arc::strong_count(&count), 1);
    }

    #[test]
    fn test_bad_index_and_refusal() {
        let backend = VirtualBackend::new(["mic"]);
        let count = Arc::new(AtomicUsize::new(0));
        assert!(matches!(
            backend.open_capture(3, StreamFormat::CAPTURE, counting_capture(&count), no_errors()),
            Err(DeviceError::NoSuchDevice(3))
        ));

        backend.set_fail_opens(true);
        assert!(backend
            .open_output(StreamFormat::stereo(44100), Box::new(|_: &mut [f32]| 0), no_errors())
            .is_err());
        assert_eq!(backend.open_outputs(), 0);
    }

    #[test]
    fn test_pull_output() {
        let backend = VirtualBackend::new(Vec::<String>::new());
        let mut stream = backend
            .open_output(
                StreamFormat::stereo(22050),
                Box::new(|buf: &mut [f32]| {
                    buf.fill(0.5);
                    buf.len() / 2
                }),
                no_errors(),
            )
            .unwrap();
        assert_eq!(backend.pull_first_output(4), None);

        stream.start().unwrap();
        let id = backend.running_outputs()[0];
        assert_eq!(backend.output_format(id), Some(StreamFormat::stereo(22050)));
        let pulled = backend.pull_output(id, 4).unwrap();
        assert_eq!(pulled.frames, 4);
        assert_eq!(pulled.samples, vec![0.5; 8]);
    }
}
