mod devices;
mod monitor;
mod play;
mod render;
mod subjects;

use std::sync::Arc;

use anyhow::Result;

use binaural::{AudioBackend, SourceId, SourceKind, SourceRegistry};

use crate::cli_args::{self, CliArgs, DirectionArgs};
use crate::config::CliConfig;

/// Figure out what command to run, then run it.
pub fn dispatch_command(args: &CliArgs) -> Result<()> {
    let config = CliConfig::load(args.config.as_deref())?;
    match &args.command {
        cli_args::Command::Subjects => subjects::subjects(args, &config),
        cli_args::Command::Devices => devices::devices(),
        cli_args::Command::Monitor(m) => monitor::monitor(args, &config, m),
        cli_args::Command::Play(p) => play::play(args, &config, p),
        cli_args::Command::Render(r) => render::render(args, &config, r),
    }
}

/// A registry with the requested subject loaded and one configured, not yet started, source.
fn registry_with_source(
    args: &CliArgs,
    config: &CliConfig,
    backend: Arc<dyn AudioBackend>,
    kind: SourceKind,
    direction: &DirectionArgs,
) -> Result<(SourceRegistry, SourceId)> {
    let mut registry = SourceRegistry::new(backend, config.session.clone());

    match direction.subject.as_deref().or(config.subject.as_deref()) {
        Some(subject) => {
            let mut catalog = config.open_catalog(args.catalog.as_deref())?;
            registry.set_hrir_set(catalog.load(subject)?);
        }
        None => log::warn!("No subject given; audio will not be spatialized"),
    }

    let id = registry.add_source(kind);
    registry.set_direction(id, direction.azimuth, direction.elevation)?;
    registry.set_volume(id, direction.volume)?;
    Ok((registry, id))
}
