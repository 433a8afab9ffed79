use std::sync::Arc;

use anyhow::Result;

use binaural::{CpalBackend, SourceKind};

use crate::cli_args::{CliArgs, MonitorArgs};
use crate::config::CliConfig;

pub fn monitor(args: &CliArgs, config: &CliConfig, monitor_args: &MonitorArgs) -> Result<()> {
    let kind = SourceKind::Microphone {
        device_index: monitor_args.device,
    };
    let (mut registry, id) = super::registry_with_source(
        args,
        config,
        Arc::new(CpalBackend::new()),
        kind,
        &monitor_args.direction,
    )?;

    registry.start_source(id)?;
    crate::control::run_interactive(&mut registry, id)?;
    registry.stop_source(id)?;
    Ok(())
}
