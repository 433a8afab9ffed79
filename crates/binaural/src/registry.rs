//! The set of configured sources and the sessions behind them.
use std::num::NonZeroU64;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;

use crate::capture::CaptureSession;
use crate::catalog::HrirSet;
use crate::config::SessionOptions;
use crate::controls::SourceControls;
use crate::devices::AudioBackend;
use crate::error::{Error, Result};
use crate::events::{event_channel, EventReceiver, EventSender, RunId, SessionEvent};
use crate::playback::{PlaybackSession, PlaybackState};

/// A process-wide unique source id.
///
/// Ids are never reused, and `Option<SourceId>` is the same size as `SourceId`.
#[derive(Copy, Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct SourceId(NonZeroU64);

impl SourceId {
    pub fn new() -> SourceId {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let got = COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
        // The counter would have to wrap for this to be zero.
        SourceId(NonZeroU64::new(got).unwrap_or(NonZeroU64::MIN))
    }

    pub fn get(&self) -> u64 {
        self.0.get()
    }
}

impl Default for SourceId {
    fn default() -> Self {
        SourceId::new()
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SourceKind {
    File(PathBuf),
    Microphone { device_index: usize },
}

/// A configured input and its stored settings.
#[derive(Debug)]
pub struct Source {
    id: SourceId,
    kind: SourceKind,
    controls: Arc<SourceControls>,
    active: bool,
}

impl Source {
    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    pub fn azimuth(&self) -> f32 {
        self.controls.azimuth()
    }

    pub fn elevation(&self) -> f32 {
        self.controls.elevation()
    }

    pub fn volume(&self) -> f32 {
        self.controls.volume()
    }

    pub fn is_muted(&self) -> bool {
        self.controls.is_muted()
    }

    /// Whether a session is rendering this source right now.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The level of the last block rendered for this source, or 0 if inactive.
    pub fn level(&self) -> f32 {
        self.controls.level()
    }
}

/// Owns every source, at most one file playback and one cached capture session per microphone source.
///
/// Everything here runs on the control thread.  Device callbacks talk back through the event channel, which
/// [SourceRegistry::pump_events] drains.
pub struct SourceRegistry {
    backend: Arc<dyn AudioBackend>,
    options: SessionOptions,
    hrirs: Option<Arc<HrirSet>>,
    events_tx: EventSender,
    events_rx: EventReceiver,

    sources: AHashMap<SourceId, Source>,
    captures: AHashMap<SourceId, CaptureSession>,
    playback: Option<(SourceId, PlaybackSession)>,
}

impl SourceRegistry {
    pub fn new(backend: Arc<dyn AudioBackend>, options: SessionOptions) -> Self {
        let (events_tx, events_rx) = event_channel(options.event_queue_len);
        Self {
            backend,
            options,
            hrirs: None,
            events_tx,
            events_rx,
            sources: AHashMap::new(),
            captures: AHashMap::new(),
            playback: None,
        }
    }

    pub fn backend(&self) -> &Arc<dyn AudioBackend> {
        &self.backend
    }

    /// Use this dataset for every renderer created from now on.  Running sessions keep theirs until restarted.
    pub fn set_hrir_set(&mut self, hrirs: Arc<HrirSet>) {
        log::info!("Sources will render with subject {}", hrirs.subject().name);
        for capture in self.captures.values_mut() {
            capture.set_hrir_set(Some(hrirs.clone()));
        }
        if let Some((_, playback)) = self.playback.as_mut() {
            playback.set_hrir_set(Some(hrirs.clone()));
        }
        self.hrirs = Some(hrirs);
    }

    pub fn hrir_set(&self) -> Option<&Arc<HrirSet>> {
        self.hrirs.as_ref()
    }

    /// Add an inactive source facing forward at full volume.
    pub fn add_source(&mut self, kind: SourceKind) -> SourceId {
        let id = SourceId::new();
        log::debug!("Adding source {} for {:?}", id, kind);
        self.sources.insert(
            id,
            Source {
                id,
                kind,
                controls: Arc::new(SourceControls::new()),
                active: false,
            },
        );
        id
    }

    pub fn source(&self, id: SourceId) -> Option<&Source> {
        self.sources.get(&id)
    }

    /// All sources, oldest first.
    pub fn sources(&self) -> Vec<&Source> {
        let mut ret = self.sources.values().collect::<Vec<_>>();
        ret.sort_unstable_by_key(|s| s.id);
        ret
    }

    fn get(&self, id: SourceId) -> Result<&Source> {
        self.sources.get(&id).ok_or_else(|| Error::unknown_source(id))
    }

    fn set_active(&mut self, id: SourceId, active: bool) {
        if let Some(s) = self.sources.get_mut(&id) {
            s.active = active;
        }
    }

    /// Start rendering a source.
    ///
    /// Starting a file source stops whichever file source was playing, once the new one is running.  If the start
    /// fails, the source stays inactive and whatever was playing keeps playing.
    pub fn start_source(&mut self, id: SourceId) -> Result<()> {
        let source = self.get(id)?;
        let controls = source.controls.clone();
        match source.kind.clone() {
            SourceKind::File(path) => self.start_file(id, path, controls)?,
            SourceKind::Microphone { device_index } => {
                self.start_microphone(id, device_index, controls)?
            }
        }
        self.set_active(id, true);
        Ok(())
    }

    fn start_file(&mut self, id: SourceId, path: PathBuf, controls: Arc<SourceControls>) -> Result<()> {
        if let Some((current, playback)) = self.playback.as_mut() {
            if *current == id {
                return playback.play();
            }
        }

        let mut session = PlaybackSession::new(id, self.backend.clone(), controls, self.events_tx.clone());
        session.set_hrir_set(self.hrirs.clone());
        session.load(&path)?;
        session.play()?;

        if let Some((previous, mut old)) = self.playback.replace((id, session)) {
            log::debug!("Stopping source {} now that source {} is playing", previous, id);
            old.stop();
            self.set_active(previous, false);
        }
        Ok(())
    }

    fn start_microphone(
        &mut self,
        id: SourceId,
        device_index: usize,
        controls: Arc<SourceControls>,
    ) -> Result<()> {
        let session = self.captures.entry(id).or_insert_with(|| {
            CaptureSession::new(
                id,
                self.backend.clone(),
                controls,
                self.events_tx.clone(),
                self.options.clone(),
            )
        });
        if session.is_monitoring() {
            return Ok(());
        }

        session.set_hrir_set(self.hrirs.clone());
        session.start(device_index)
    }

    /// Stop rendering a source.  Its settings are kept.  Stopping an inactive source does nothing.
    pub fn stop_source(&mut self, id: SourceId) -> Result<()> {
        self.get(id)?;
        if let Some(capture) = self.captures.get_mut(&id) {
            capture.stop();
        }
        if let Some((current, playback)) = self.playback.as_mut() {
            if *current == id {
                playback.stop();
            }
        }
        self.set_active(id, false);
        Ok(())
    }

    /// Pause a playing file source, keeping its position.
    pub fn pause_source(&mut self, id: SourceId) -> Result<()> {
        let source = self.get(id)?;
        if !matches!(source.kind, SourceKind::File(_)) {
            return Err(Error::invalid_state("Only file sources can be paused"));
        }

        if let Some((current, playback)) = self.playback.as_mut() {
            if *current == id {
                playback.pause()?;
                self.set_active(id, false);
            }
        }
        Ok(())
    }

    /// Stop a source if needed and forget it, with any session it had.
    pub fn remove_source(&mut self, id: SourceId) -> Result<()> {
        self.stop_source(id)?;
        self.captures.remove(&id);
        if self.playback.as_ref().is_some_and(|(current, _)| *current == id) {
            self.playback = None;
        }
        self.sources.remove(&id);
        log::debug!("Removed source {}", id);
        Ok(())
    }

    /// Set both angles.  Active sources ramp there; inactive ones start there.
    pub fn set_direction(&mut self, id: SourceId, azimuth: f32, elevation: f32) -> Result<()> {
        let controls = &self.get(id)?.controls;
        controls.set_azimuth(azimuth);
        controls.set_elevation(elevation);
        Ok(())
    }

    pub fn set_azimuth(&mut self, id: SourceId, azimuth: f32) -> Result<()> {
        self.get(id)?.controls.set_azimuth(azimuth);
        Ok(())
    }

    pub fn set_elevation(&mut self, id: SourceId, elevation: f32) -> Result<()> {
        self.get(id)?.controls.set_elevation(elevation);
        Ok(())
    }

    pub fn set_volume(&mut self, id: SourceId, volume: f32) -> Result<()> {
        self.get(id)?.controls.set_volume(volume);
        Ok(())
    }

    pub fn set_muted(&mut self, id: SourceId, muted: bool) -> Result<()> {
        self.get(id)?.controls.set_muted(muted);
        Ok(())
    }

    pub fn level(&self, id: SourceId) -> Result<f32> {
        Ok(self.get(id)?.controls.level())
    }

    /// The state of the file session, if this source has one.
    pub fn playback_state(&self, id: SourceId) -> Option<PlaybackState> {
        self.playback
            .as_ref()
            .filter(|(current, _)| *current == id)
            .map(|(_, p)| p.state())
    }

    /// Drain notifications from device callbacks, act on them, and return them.
    ///
    /// Finished files become stopped.  Device failures stop the source.
    pub fn pump_events(&mut self) -> Vec<SessionEvent> {
        let events = self.events_rx.drain();
        for e in events.iter() {
            self.apply(e);
        }
        events
    }

    /// Wait up to `timeout` for one notification, acting on it like [SourceRegistry::pump_events].
    pub fn wait_event(&mut self, timeout: Duration) -> Option<SessionEvent> {
        let event = self.events_rx.recv_timeout(timeout)?;
        self.apply(&event);
        Some(event)
    }

    /// Whether `run` is the one currently rendering `source`.
    fn is_current_run(&self, source: SourceId, run: RunId) -> bool {
        let capture = self.captures.get(&source).and_then(|c| c.run());
        let playback = self
            .playback
            .as_ref()
            .filter(|(current, _)| *current == source)
            .and_then(|(_, p)| p.run());
        capture == Some(run) || playback == Some(run)
    }

    fn apply(&mut self, event: &SessionEvent) {
        if let Some(run) = event.run() {
            if !matches!(event, SessionEvent::MonitoringStopped { .. })
                && !self.is_current_run(event.source(), run)
            {
                log::debug!("Ignoring a stale event from {} of source {}", run, event.source());
                return;
            }
        }

        match event {
            SessionEvent::Level { .. } | SessionEvent::MonitoringStopped { .. } => {}
            SessionEvent::PlaybackCompleted { source, .. } => {
                if let Some((_, playback)) = self.playback.as_mut() {
                    playback.stop();
                    self.set_active(*source, false);
                    log::info!("Source {} finished playing", source);
                }
            }
            SessionEvent::DeviceError { source, message, .. } => {
                log::warn!("Device error on source {}: {}", source, message);
                // The source may already be gone.
                let _ = self.stop_source(*source);
            }
        }
    }
}

impl Drop for SourceRegistry {
    fn drop(&mut self) {
        // Close devices before anything they call into goes away.
        self.playback = None;
        self.captures.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::devices::VirtualBackend;
    use crate::test_support::write_wav;

    fn registry(backend: &VirtualBackend) -> SourceRegistry {
        SourceRegistry::new(Arc::new(backend.clone()), SessionOptions::default())
    }

    #[test]
    fn test_ids_are_unique_and_ordered() {
        let (a, b) = (SourceId::new(), SourceId::new());
        assert_ne!(a, b);
        assert!(a < b);
        assert_eq!(format!("{}", a), format!("#{}", a.get()));
    }

    #[test]
    fn test_defaults_and_unknown_ids() {
        let backend = VirtualBackend::new(["mic"]);
        let mut reg = registry(&backend);
        let id = reg.add_source(SourceKind::Microphone { device_index: 0 });
        let s = reg.source(id).unwrap();
        assert_eq!((s.azimuth(), s.elevation(), s.volume()), (0.0, 0.0, 1.0));
        assert!(!s.is_muted());
        assert!(!s.is_active());

        reg.remove_source(id).unwrap();
        assert!(reg.set_volume(id, 0.5).unwrap_err().is_unknown_source());
        assert!(reg.start_source(id).unwrap_err().is_unknown_source());
    }

    #[test]
    fn test_settings_stick_while_inactive() {
        let backend = VirtualBackend::new(["mic"]);
        let mut reg = registry(&backend);
        let id = reg.add_source(SourceKind::Microphone { device_index: 0 });
        reg.set_direction(id, 45.0, 10.0).unwrap();
        reg.set_volume(id, 2.0).unwrap();
        reg.set_muted(id, true).unwrap();

        let s = reg.source(id).unwrap();
        assert_eq!((s.azimuth(), s.elevation(), s.volume()), (45.0, 10.0, 1.0));
        assert!(s.is_muted());
    }

    #[test]
    fn test_microphone_session_is_cached() {
        let backend = VirtualBackend::new(["mic"]);
        let mut reg = registry(&backend);
        let id = reg.add_source(SourceKind::Microphone { device_index: 0 });

        reg.start_source(id).unwrap();
        assert!(reg.source(id).unwrap().is_active());
        reg.stop_source(id).unwrap();
        assert!(!reg.source(id).unwrap().is_active());
        reg.start_source(id).unwrap();
        assert_eq!(reg.captures.len(), 1);
        assert_eq!(backend.open_captures(0), 1);

        reg.remove_source(id).unwrap();
        assert!(reg.captures.is_empty());
        assert_eq!(backend.open_captures(0), 0);
    }

    #[test]
    fn test_failed_start_stays_inactive() {
        let backend = VirtualBackend::new(["mic"]);
        let mut reg = registry(&backend);
        let id = reg.add_source(SourceKind::Microphone { device_index: 4 });
        assert!(reg.start_source(id).unwrap_err().is_device_open());
        assert!(!reg.source(id).unwrap().is_active());

        let file = reg.add_source(SourceKind::File("/no/such/file.wav".into()));
        assert!(reg.start_source(file).unwrap_err().is_file_not_found());
        assert!(!reg.source(file).unwrap().is_active());
    }

    #[test]
    fn test_one_file_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let a_path = dir.path().join("a.wav");
        let b_path = dir.path().join("b.wav");
        write_wav(&a_path, 1, 44100, &[0.1; 4410]).unwrap();
        write_wav(&b_path, 1, 44100, &[0.2; 4410]).unwrap();

        let backend = VirtualBackend::default();
        let mut reg = registry(&backend);
        let a = reg.add_source(SourceKind::File(a_path));
        let b = reg.add_source(SourceKind::File(b_path));

        reg.start_source(a).unwrap();
        reg.start_source(b).unwrap();
        assert!(!reg.source(a).unwrap().is_active());
        assert!(reg.source(b).unwrap().is_active());
        assert_eq!(backend.open_outputs(), 1);
        assert_eq!(reg.playback_state(a), None);
        assert_eq!(reg.playback_state(b), Some(PlaybackState::Playing));

        let out = backend.pull_first_output(10).unwrap();
        assert_eq!(out.samples[0], 0.2);
    }

    #[test]
    fn test_completion_stops_the_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.wav");
        write_wav(&path, 1, 44100, &[0.1; 100]).unwrap();

        let backend = VirtualBackend::default();
        let mut reg = registry(&backend);
        let id = reg.add_source(SourceKind::File(path));
        reg.start_source(id).unwrap();
        backend.pull_first_output(256).unwrap();

        let events = reg.pump_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::PlaybackCompleted { source, .. } if *source == id)));
        assert!(!reg.source(id).unwrap().is_active());
        assert_eq!(reg.playback_state(id), Some(PlaybackState::Stopped));
        assert_eq!(backend.open_outputs(), 0);

        // And it can be played again from the top.
        reg.start_source(id).unwrap();
        let out = backend.pull_first_output(4).unwrap();
        assert_eq!(out.frames, 4);
    }

    #[test]
    fn test_old_completion_does_not_stop_a_new_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.wav");
        write_wav(&path, 1, 44100, &[0.1; 100]).unwrap();

        let backend = VirtualBackend::default();
        let mut reg = registry(&backend);
        let id = reg.add_source(SourceKind::File(path));
        reg.start_source(id).unwrap();
        backend.pull_first_output(256).unwrap();

        reg.stop_source(id).unwrap();
        reg.start_source(id).unwrap();
        assert_eq!(reg.playback_state(id), Some(PlaybackState::Playing));

        let events = reg.pump_events();
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, SessionEvent::PlaybackCompleted { .. }))
                .count(),
            1
        );
        assert_eq!(reg.playback_state(id), Some(PlaybackState::Playing));
        assert!(reg.source(id).unwrap().is_active());
        assert_eq!(backend.pull_first_output(4).unwrap().frames, 4);
    }

    #[test]
    fn test_restart_before_pumping_the_completion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.wav");
        write_wav(&path, 1, 44100, &[0.1; 100]).unwrap();

        let backend = VirtualBackend::default();
        let mut reg = registry(&backend);
        let id = reg.add_source(SourceKind::File(path));
        reg.start_source(id).unwrap();
        backend.pull_first_output(256).unwrap();

        reg.start_source(id).unwrap();
        let out = backend.pull_first_output(4).unwrap();
        assert_eq!(out.frames, 4);
        assert_eq!(out.samples[0], 0.1);

        // The first run's completion is stale by now.
        reg.pump_events();
        assert_eq!(reg.playback_state(id), Some(PlaybackState::Playing));
        assert!(reg.source(id).unwrap().is_active());
    }

    #[test]
    fn test_failed_file_start_keeps_the_current_file() {
        let dir = tempfile::tempdir().unwrap();
        let a_path = dir.path().join("a.wav");
        let b_path = dir.path().join("b.wav");
        write_wav(&a_path, 1, 44100, &[0.1; 4410]).unwrap();
        write_wav(&b_path, 1, 44100, &[0.2; 4410]).unwrap();

        let backend = VirtualBackend::default();
        let mut reg = registry(&backend);
        let a = reg.add_source(SourceKind::File(a_path));
        let b = reg.add_source(SourceKind::File(b_path));
        reg.start_source(a).unwrap();

        backend.set_fail_opens(true);
        assert!(reg.start_source(b).unwrap_err().is_device_open());
        backend.set_fail_opens(false);

        assert!(reg.source(a).unwrap().is_active());
        assert!(!reg.source(b).unwrap().is_active());
        assert_eq!(reg.playback_state(a), Some(PlaybackState::Playing));
        assert_eq!(reg.playback_state(b), None);
        assert_eq!(backend.open_outputs(), 1);
        assert_eq!(backend.pull_first_output(4).unwrap().samples[0], 0.1);
    }

    #[test]
    fn test_monitoring_stopped_survives_a_small_queue() {
        let backend = VirtualBackend::new(["mic"]);
        let mut reg = SourceRegistry::new(
            Arc::new(backend.clone()),
            SessionOptions {
                event_queue_len: 8,
                ..Default::default()
            },
        );
        let id = reg.add_source(SourceKind::Microphone { device_index: 0 });
        reg.start_source(id).unwrap();
        for _ in 0..20 {
            backend.push_capture(0, &[4096; 128]);
        }
        reg.stop_source(id).unwrap();

        let events = reg.pump_events();
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, SessionEvent::MonitoringStopped { source, .. } if *source == id))
                .count(),
            1
        );
    }

    #[test]
    fn test_old_device_error_does_not_stop_a_new_run() {
        let backend = VirtualBackend::new(["mic"]);
        let mut reg = registry(&backend);
        let id = reg.add_source(SourceKind::Microphone { device_index: 0 });
        reg.start_source(id).unwrap();
        backend.fail_capture(0, "glitch");

        reg.stop_source(id).unwrap();
        reg.start_source(id).unwrap();
        let events = reg.pump_events();
        assert!(events.iter().any(|e| matches!(e, SessionEvent::DeviceError { .. })));
        assert!(reg.source(id).unwrap().is_active());
        assert_eq!(backend.open_captures(0), 1);
    }

    #[test]
    fn test_device_error_stops_the_source() {
        let backend = VirtualBackend::new(["mic"]);
        let mut reg = registry(&backend);
        let id = reg.add_source(SourceKind::Microphone { device_index: 0 });
        reg.start_source(id).unwrap();

        backend.fail_capture(0, "gone");
        let events = reg.pump_events();
        assert!(events.iter().any(|e| matches!(e, SessionEvent::DeviceError { .. })));
        assert!(!reg.source(id).unwrap().is_active());
        assert_eq!(backend.open_captures(0), 0);
    }

    #[test]
    fn test_pause_only_for_files() {
        let backend = VirtualBackend::new(["mic"]);
        let mut reg = registry(&backend);
        let id = reg.add_source(SourceKind::Microphone { device_index: 0 });
        assert!(reg.pause_source(id).unwrap_err().is_invalid_state());
    }
}
