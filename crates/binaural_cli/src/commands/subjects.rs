use anyhow::Result;

use crate::cli_args::CliArgs;
use crate::config::CliConfig;

pub fn subjects(args: &CliArgs, config: &CliConfig) -> Result<()> {
    let catalog = config.open_catalog(args.catalog.as_deref())?;
    println!("{}", catalog.root().display());
    for s in catalog.subjects() {
        println!("  {s}");
    }
    Ok(())
}
