//! Command line front end for the binaural renderer.
//!
//! Live commands (`monitor`, `play`) read `az`, `el`, `vol`, `mute`, `unmute` and `quit` from stdin.  `render` runs
//! the same playback path against a virtual device and writes what it pulls to a WAV file.
mod cli_args;
mod commands;
mod config;
mod control;

fn main() -> anyhow::Result<()> {
    use clap::Parser;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = cli_args::CliArgs::parse();
    commands::dispatch_command(&args)
}
