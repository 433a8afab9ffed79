use std::sync::Arc;

use anyhow::Result;

use binaural::{CpalBackend, SourceKind};

use crate::cli_args::{CliArgs, PlayArgs};
use crate::config::CliConfig;

pub fn play(args: &CliArgs, config: &CliConfig, play_args: &PlayArgs) -> Result<()> {
    let (mut registry, id) = super::registry_with_source(
        args,
        config,
        Arc::new(CpalBackend::new()),
        SourceKind::File(play_args.file.clone()),
        &play_args.direction,
    )?;

    registry.start_source(id)?;
    crate::control::run_interactive(&mut registry, id)?;
    registry.stop_source(id)?;
    Ok(())
}
