//! Definition of the Clap command line.
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "binaural", about = "Render files and microphones binaurally through HRIR datasets")]
pub struct CliArgs {
    /// YAML file with session options and catalog settings.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding `subject*` directories.  Searched for when not given.
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the subjects in the catalog.
    Subjects,

    /// List audio devices.
    Devices,

    /// Render a microphone live to the default output.
    Monitor(MonitorArgs),

    /// Render a file live to the default output.
    Play(PlayArgs),

    /// Render a file to a stereo WAV without touching audio hardware.
    Render(RenderArgs),
}

#[derive(Debug, Args)]
pub struct DirectionArgs {
    /// Subject to render with.  Without one, audio passes through unspatialized.
    #[arg(long)]
    pub subject: Option<String>,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub azimuth: f32,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub elevation: f32,

    #[arg(long, default_value_t = 1.0)]
    pub volume: f32,
}

#[derive(Debug, Args)]
pub struct MonitorArgs {
    /// Index from `devices`.
    #[arg(long, default_value_t = 0)]
    pub device: usize,

    #[command(flatten)]
    pub direction: DirectionArgs,
}

#[derive(Debug, Args)]
pub struct PlayArgs {
    pub file: PathBuf,

    #[command(flatten)]
    pub direction: DirectionArgs,
}

#[derive(Debug, Args)]
pub struct RenderArgs {
    pub input: PathBuf,
    pub output: PathBuf,

    #[command(flatten)]
    pub direction: DirectionArgs,
}
