//! Live monitoring: microphone in, binaural out.
//!
//! Capture and output are separate devices with separate clocks, so a ring sits between them.  The capture callback
//! renders each block as it arrives and writes it to the ring; the output callback plays whatever is in the ring and
//! pads with silence when it runs dry.  The ring is the only thing the two callbacks share, and neither ever blocks on
//! it.
use std::sync::Arc;

use audio_synchronization::{create_ring, RingReader, RingWriter};

use crate::catalog::HrirSet;
use crate::config::{OverflowPolicy, SessionOptions, CAPTURE_CHUNK_FRAMES, SR};
use crate::controls::SourceControls;
use crate::devices::{AudioBackend, DeviceStream, StreamFormat};
use crate::error::{Error, Result};
use crate::events::{EventSender, RunId, SessionEvent};
use crate::registry::SourceId;
use crate::renderer::BinauralRenderer;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CaptureState {
    Stopped,
    Starting,
    Monitoring,
}

pub struct CaptureSession {
    source: SourceId,
    backend: Arc<dyn AudioBackend>,
    controls: Arc<SourceControls>,
    hrirs: Option<Arc<HrirSet>>,
    events: EventSender,
    options: SessionOptions,

    state: CaptureState,
    device_index: Option<usize>,
    run: Option<RunId>,

    // Dropped capture first, so that nothing is written to a ring nobody reads.
    capture: Option<Box<dyn DeviceStream>>,
    output: Option<Box<dyn DeviceStream>>,
}

/// Everything the capture callback owns.
struct CaptureWorker {
    source: SourceId,
    renderer: BinauralRenderer,
    ring: RingWriter<f32>,
    events: EventSender,
    input: Vec<f32>,
    output: Vec<f32>,
    overflowing: bool,
}

impl CaptureWorker {
    fn on_block(&mut self, block: &[i16]) {
        for chunk in block.chunks(CAPTURE_CHUNK_FRAMES) {
            let input = &mut self.input[..chunk.len()];
            for (dest, s) in input.iter_mut().zip(chunk.iter()) {
                *dest = *s as f32 / 32768.0;
            }

            let frames = self.renderer.process_block(input, 1, &mut self.output);
            let rendered = &self.output[..frames * 2];

            // Whole frames only, so that the ring never holds half of one.
            let room = self.ring.available() & !1;
            let written = self.ring.write_from_slice(&rendered[..rendered.len().min(room)]);
            if written < rendered.len() {
                if !self.overflowing {
                    rt_debug!(
                        "Output ring for source {} is full; dropping rendered audio",
                        self.source
                    );
                }
                self.overflowing = true;
            } else {
                self.overflowing = false;
            }
        }

        self.events.send(SessionEvent::Level {
            source: self.source,
            level: self.renderer.level(),
        });
    }
}

/// Everything the output callback owns.
struct OutputWorker {
    ring: RingReader<f32>,
    policy: OverflowPolicy,

    /// Under [OverflowPolicy::DropOldest], queued audio past this many samples is discarded before reading.
    high_water: usize,
}

impl OutputWorker {
    fn fill(&mut self, buf: &mut [f32]) -> usize {
        if self.policy == OverflowPolicy::DropOldest {
            let excess = self.ring.available().saturating_sub(self.high_water);
            // Round up to whole frames.
            self.ring.discard((excess + 1) & !1);
        }

        let got = self.ring.read_to_slice(buf);
        buf[got..].fill(0.0);
        got / 2
    }
}

impl CaptureSession {
    pub fn new(
        source: SourceId,
        backend: Arc<dyn AudioBackend>,
        controls: Arc<SourceControls>,
        events: EventSender,
        options: SessionOptions,
    ) -> Self {
        Self {
            source,
            backend,
            controls,
            hrirs: None,
            events,
            options,
            state: CaptureState::Stopped,
            device_index: None,
            run: None,
            capture: None,
            output: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_monitoring(&self) -> bool {
        self.state == CaptureState::Monitoring
    }

    /// The current run, while monitoring.
    pub fn run(&self) -> Option<RunId> {
        self.run
    }

    /// The device of the current or most recent run.
    pub fn device_index(&self) -> Option<usize> {
        self.device_index
    }

    pub fn controls(&self) -> &Arc<SourceControls> {
        &self.controls
    }

    /// Dataset for the next start.  A running session keeps the one it started with.
    pub fn set_hrir_set(&mut self, hrirs: Option<Arc<HrirSet>>) {
        self.hrirs = hrirs;
    }

    /// Open both devices and start monitoring.
    ///
    /// On failure nothing is left open and the session is stopped.
    pub fn start(&mut self, device_index: usize) -> Result<()> {
        if self.state != CaptureState::Stopped {
            return Err(Error::invalid_state("This capture session is already running"));
        }

        crate::logging::ensure_forwarder();
        self.state = CaptureState::Starting;
        self.device_index = Some(device_index);
        let run = RunId::next();

        match self.open_streams(device_index, run) {
            Ok((capture, output)) => {
                self.capture = Some(capture);
                self.output = Some(output);
                self.run = Some(run);
                self.state = CaptureState::Monitoring;
                log::info!(
                    "Source {} is monitoring input device {} ({})",
                    self.source,
                    device_index,
                    run
                );
                Ok(())
            }
            Err(e) => {
                self.state = CaptureState::Stopped;
                log::warn!(
                    "Source {} could not start monitoring device {}: {}",
                    self.source,
                    device_index,
                    e
                );
                Err(e)
            }
        }
    }

    /// Streams are dropped on the way out of here on any error, which closes them.
    fn open_streams(
        &mut self,
        device_index: usize,
        run: RunId,
    ) -> Result<(Box<dyn DeviceStream>, Box<dyn DeviceStream>)> {
        let mut renderer = BinauralRenderer::new(self.controls.clone(), SR);
        if let Some(h) = self.hrirs.as_ref() {
            renderer.load_direction_source(h.clone())?;
        }

        let capacity = self.options.ring_capacity_samples();
        let (reader, writer) = create_ring::<f32>(capacity);

        let mut output_worker = OutputWorker {
            ring: reader,
            policy: self.options.overflow_policy,
            high_water: (capacity / 2) & !1,
        };
        let mut output = self.backend.open_output(
            StreamFormat::stereo(SR),
            Box::new(move |buf: &mut [f32]| output_worker.fill(buf)),
            self.error_callback(run),
        )?;

        let mut capture_worker = CaptureWorker {
            source: self.source,
            renderer,
            ring: writer,
            events: self.events.clone(),
            input: vec![0.0; CAPTURE_CHUNK_FRAMES],
            output: vec![0.0; CAPTURE_CHUNK_FRAMES * 2],
            overflowing: false,
        };
        let mut capture = self.backend.open_capture(
            device_index,
            StreamFormat::CAPTURE,
            Box::new(move |block: &[i16]| capture_worker.on_block(block)),
            self.error_callback(run),
        )?;

        output.start()?;
        capture.start()?;
        Ok((capture, output))
    }

    fn error_callback(&self, run: RunId) -> crate::devices::ErrorCallback {
        let events = self.events.clone();
        let source = self.source;
        Box::new(move |message: String| {
            events.send(SessionEvent::DeviceError {
                source,
                run,
                message,
            });
        })
    }

    /// Stop monitoring.  Both devices are closed, and no callback is running, when this returns.
    ///
    /// Stopping a stopped session does nothing.
    pub fn stop(&mut self) {
        if self.state == CaptureState::Stopped {
            return;
        }

        drop(self.capture.take());
        drop(self.output.take());
        self.state = CaptureState::Stopped;
        self.controls.publish_level(0.0);
        if let Some(run) = self.run.take() {
            self.events.send(SessionEvent::MonitoringStopped {
                source: self.source,
                run,
            });
        }
        log::info!("Source {} stopped monitoring", self.source);
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}
