//! File playback, rendered inside the output device's pull callback.
//!
//! There is no queue: when the device asks for frames, the file is decoded and rendered right there.  The decoder and
//! renderer live in a [PlaybackCore] shared between the session and the callback through an `AtomicRefCell`.  The
//! callback borrows it for every pull.  The session only borrows it while no stream exists, so the two never overlap
//! and a conflicting borrow is a bug rather than something to wait for.
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use atomic_refcell::AtomicRefCell;

use crate::catalog::HrirSet;
use crate::controls::SourceControls;
use crate::devices::{AudioBackend, DeviceStream, StreamFormat};
use crate::error::{Error, Result};
use crate::events::{EventSender, RunId, SessionEvent};
use crate::media::{FrameSource, MediaReader};
use crate::registry::SourceId;
use crate::renderer::BinauralRenderer;

/// Frames decoded per step inside the pull callback.
const DECODE_FRAMES: usize = 1024;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PlaybackState {
    Stopped,
    Loaded,
    Playing,
    Paused,
}

/// What the pull callback owns while a stream exists.
struct PlaybackCore {
    source: SourceId,
    run: RunId,
    reader: Box<dyn FrameSource>,
    renderer: BinauralRenderer,
    events: EventSender,
    scratch: Vec<f32>,

    /// Set by the callback at the end of the file, shared with the session.
    finished: Arc<AtomicBool>,
}

impl PlaybackCore {
    /// Fill `output` (interleaved stereo) and return the frames of real audio.
    fn fill(&mut self, output: &mut [f32]) -> usize {
        if self.finished.load(Ordering::Relaxed) {
            output.fill(0.0);
            return 0;
        }

        let channels = self.reader.channels();
        let wanted = output.len() / 2;
        let mut done = 0;
        let mut ended = false;

        while done < wanted {
            let step = (wanted - done).min(DECODE_FRAMES);
            let input = &mut self.scratch[..step * channels];
            let got = match self.reader.read_frames(input) {
                Ok(n) => n,
                Err(e) => {
                    rt_error!("Decoding failed for source {}: {}", self.source, e);
                    0
                }
            };

            let rendered = self.renderer.process_block(
                &input[..got * channels],
                channels,
                &mut output[done * 2..(done + got) * 2],
            );
            done += rendered;

            if got < step {
                if let Some(e) = self.reader.take_error() {
                    rt_error!(
                        "Decoding failed for source {} after {} frames of this block: {}",
                        self.source,
                        got,
                        e
                    );
                }
                ended = true;
                break;
            }
        }

        output[done * 2..].fill(0.0);
        if ended {
            self.finished.store(true, Ordering::Release);
            rt_debug!("Source {} reached the end of its file", self.source);
            self.events.send(SessionEvent::PlaybackCompleted {
                source: self.source,
                run: self.run,
            });
        }
        done
    }
}

pub struct PlaybackSession {
    source: SourceId,
    backend: Arc<dyn AudioBackend>,
    controls: Arc<SourceControls>,
    hrirs: Option<Arc<HrirSet>>,
    events: EventSender,

    state: PlaybackState,
    path: Option<PathBuf>,
    file_format: Option<(usize, u32)>,
    core: Option<Arc<AtomicRefCell<PlaybackCore>>>,
    finished: Arc<AtomicBool>,
    stream: Option<Box<dyn DeviceStream>>,
    run: Option<RunId>,
}

impl PlaybackSession {
    pub fn new(
        source: SourceId,
        backend: Arc<dyn AudioBackend>,
        controls: Arc<SourceControls>,
        events: EventSender,
    ) -> Self {
        Self {
            source,
            backend,
            controls,
            hrirs: None,
            events,
            state: PlaybackState::Stopped,
            path: None,
            file_format: None,
            core: None,
            finished: Arc::new(AtomicBool::new(false)),
            stream: None,
            run: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    /// The run of the open stream, if there is one.  Completion and device errors from any other run are stale.
    pub fn run(&self) -> Option<RunId> {
        self.run
    }

    /// Whether the current run has played the whole file.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn controls(&self) -> &Arc<SourceControls> {
        &self.controls
    }

    /// The loaded file's channel count and sample rate.
    pub fn file_format(&self) -> Option<(usize, u32)> {
        self.file_format
    }

    /// Dataset for files loaded from now on.
    pub fn set_hrir_set(&mut self, hrirs: Option<Arc<HrirSet>>) {
        self.hrirs = hrirs;
    }

    /// Open a file, stopping whatever was playing.
    ///
    /// Only mono and stereo files are accepted.  On failure the previous file, if any, stays loaded.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let reader = MediaReader::open(path)?;
        let channels = reader.channels();
        if channels != 1 && channels != 2 {
            return Err(Error::unsupported_channels(channels));
        }

        let sample_rate = reader.sample_rate();
        let mut renderer = BinauralRenderer::new(self.controls.clone(), sample_rate);
        if let Some(h) = self.hrirs.as_ref() {
            renderer.load_direction_source(h.clone())?;
        }

        self.teardown();
        log::info!(
            "Source {} loaded {} ({} channels at {} Hz)",
            self.source,
            path.display(),
            channels,
            sample_rate
        );

        self.finished = Arc::new(AtomicBool::new(false));
        self.core = Some(Arc::new(AtomicRefCell::new(PlaybackCore {
            source: self.source,
            run: RunId::next(),
            reader: Box::new(reader),
            renderer,
            events: self.events.clone(),
            scratch: vec![0.0; DECODE_FRAMES * channels],
            finished: self.finished.clone(),
        })));
        self.path = Some(path.to_path_buf());
        self.file_format = Some((channels, sample_rate));
        self.state = PlaybackState::Loaded;
        Ok(())
    }

    /// Start from the beginning, or resume if paused.
    ///
    /// A file which already played to its end starts over, even if the session has not been stopped yet.  On failure
    /// nothing is left open.
    pub fn play(&mut self) -> Result<()> {
        let finished = self.is_finished();
        match self.state {
            PlaybackState::Playing if !finished => return Ok(()),
            PlaybackState::Paused if !finished => {
                if let Some(s) = self.stream.as_mut() {
                    s.start()?;
                    self.state = PlaybackState::Playing;
                    return Ok(());
                }
            }
            _ => {}
        }

        let core = self
            .core
            .clone()
            .ok_or_else(|| Error::invalid_state("No file is loaded"))?;

        if self.stream.is_some() {
            log::debug!("Source {} finished; starting it over", self.source);
            self.teardown();
            self.state = PlaybackState::Stopped;
        }

        let run = RunId::next();
        let sample_rate = {
            let mut c = core.borrow_mut();
            c.reader.rewind()?;
            c.renderer.snap_to_controls();
            c.run = run;
            self.finished.store(false, Ordering::Release);
            c.reader.sample_rate()
        };

        crate::logging::ensure_forwarder();
        let callback_core = core.clone();
        let events = self.events.clone();
        let source = self.source;
        let mut stream = self.backend.open_output(
            StreamFormat::stereo(sample_rate),
            Box::new(move |buf: &mut [f32]| callback_core.borrow_mut().fill(buf)),
            Box::new(move |message: String| {
                events.send(SessionEvent::DeviceError {
                    source,
                    run,
                    message,
                });
            }),
        )?;
        stream.start()?;

        self.stream = Some(stream);
        self.run = Some(run);
        self.state = PlaybackState::Playing;
        log::info!("Source {} is playing ({})", self.source, run);
        Ok(())
    }

    /// Stop pulling, keeping the position.
    pub fn pause(&mut self) -> Result<()> {
        if self.state != PlaybackState::Playing {
            return Ok(());
        }

        if let Some(s) = self.stream.as_mut() {
            s.pause()?;
        }
        self.state = PlaybackState::Paused;
        Ok(())
    }

    /// Stop and go back to the start.  The device is closed when this returns.
    pub fn stop(&mut self) {
        self.teardown();
        if let Some(core) = self.core.as_ref() {
            if let Err(e) = core.borrow_mut().reader.rewind() {
                log::warn!("Source {} could not rewind: {}", self.source, e);
            }
        }
        self.controls.publish_level(0.0);
        self.state = PlaybackState::Stopped;
    }

    fn teardown(&mut self) {
        self.run = None;
        if self.stream.take().is_some() {
            log::debug!("Source {} closed its output stream", self.source);
        }
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
