//! Line commands read from stdin while a live session runs.
use std::io::BufRead;
use std::time::Duration;

use anyhow::{bail, Result};
use crossbeam::channel as chan;

use binaural::{SessionEvent, SourceId, SourceRegistry};

/// How long the control loop waits on device events before checking stdin again.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ControlCommand {
    Azimuth(f32),
    Elevation(f32),
    Volume(f32),
    Mute,
    Unmute,
    Quit,
}

impl std::str::FromStr for ControlCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            bail!("Empty command");
        };
        let mut number = || -> Result<f32> {
            let Some(word) = words.next() else {
                bail!("{verb} needs a number");
            };
            Ok(word.parse::<f32>()?)
        };

        let cmd = match verb {
            "az" => ControlCommand::Azimuth(number()?),
            "el" => ControlCommand::Elevation(number()?),
            "vol" => ControlCommand::Volume(number()?),
            "mute" => ControlCommand::Mute,
            "unmute" => ControlCommand::Unmute,
            "quit" | "q" => ControlCommand::Quit,
            other => bail!("Unknown command {other}; try az, el, vol, mute, unmute or quit"),
        };
        Ok(cmd)
    }
}

/// Apply a command.  Returns false on quit.
pub fn apply(registry: &mut SourceRegistry, id: SourceId, cmd: ControlCommand) -> Result<bool> {
    match cmd {
        ControlCommand::Azimuth(a) => registry.set_azimuth(id, a)?,
        ControlCommand::Elevation(e) => registry.set_elevation(id, e)?,
        ControlCommand::Volume(v) => registry.set_volume(id, v)?,
        ControlCommand::Mute => registry.set_muted(id, true)?,
        ControlCommand::Unmute => registry.set_muted(id, false)?,
        ControlCommand::Quit => return Ok(false),
    }
    Ok(true)
}

/// Read stdin lines on a background thread.  The channel disconnects at end of input.
fn spawn_stdin_reader() -> chan::Receiver<String> {
    let (tx, rx) = chan::unbounded();
    let spawned = std::thread::Builder::new()
        .name("binaural stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        log::warn!("Unable to read commands from stdin: {e}");
    }
    rx
}

/// Take commands for one source until the user quits or the source stops on its own.
pub fn run_interactive(registry: &mut SourceRegistry, id: SourceId) -> Result<()> {
    eprintln!("Commands: az <deg>, el <deg>, vol <0..1>, mute, unmute, quit");
    let lines = spawn_stdin_reader();

    loop {
        let first = registry.wait_event(POLL_INTERVAL);
        for event in first.into_iter().chain(registry.pump_events()) {
            match event {
                SessionEvent::PlaybackCompleted { source, .. } if source == id => {
                    // A stale completion leaves the source active.
                    if !registry.source(id).is_some_and(|s| s.is_active()) {
                        eprintln!("Playback finished");
                        return Ok(());
                    }
                }
                SessionEvent::DeviceError { message, .. } => bail!("Device error: {message}"),
                SessionEvent::Level { .. }
                | SessionEvent::MonitoringStopped { .. }
                | SessionEvent::PlaybackCompleted { .. } => {}
            }
        }

        match lines.try_recv() {
            Ok(line) if line.trim().is_empty() => {}
            Ok(line) => match line.parse::<ControlCommand>() {
                Ok(cmd) => {
                    if !apply(registry, id, cmd)? {
                        return Ok(());
                    }
                    if let Some(s) = registry.source(id) {
                        eprintln!(
                            "az {:.1} el {:.1} vol {:.2}{} level {:.2}",
                            s.azimuth(),
                            s.elevation(),
                            s.volume(),
                            if s.is_muted() { " (muted)" } else { "" },
                            s.level()
                        );
                    }
                }
                Err(e) => eprintln!("{e}"),
            },
            Err(chan::TryRecvError::Empty) => {}
            // Stdin closed; keep going until the source ends or the process is killed.
            Err(chan::TryRecvError::Disconnected) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("az -30".parse::<ControlCommand>().unwrap(), ControlCommand::Azimuth(-30.0));
        assert_eq!("el 12.5".parse::<ControlCommand>().unwrap(), ControlCommand::Elevation(12.5));
        assert_eq!("  vol 0.5 ".parse::<ControlCommand>().unwrap(), ControlCommand::Volume(0.5));
        assert_eq!("mute".parse::<ControlCommand>().unwrap(), ControlCommand::Mute);
        assert_eq!("unmute".parse::<ControlCommand>().unwrap(), ControlCommand::Unmute);
        assert_eq!("q".parse::<ControlCommand>().unwrap(), ControlCommand::Quit);
    }

    #[test]
    fn test_parse_errors() {
        assert!("".parse::<ControlCommand>().is_err());
        assert!("az".parse::<ControlCommand>().is_err());
        assert!("az left".parse::<ControlCommand>().is_err());
        assert!("spin 3".parse::<ControlCommand>().is_err());
    }
}
