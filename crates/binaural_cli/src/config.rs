use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use binaural::{HrtfCatalog, SessionOptions};

/// The contents of a `--config` file.  Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub catalog: Option<PathBuf>,
    pub subject: Option<String>,

    #[serde(flatten)]
    pub session: SessionOptions,
}

impl CliConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Default::default());
        };

        let file = std::fs::File::open(path)
            .with_context(|| format!("Unable to open config file {}", path.display()))?;
        serde_yaml::from_reader(file).with_context(|| format!("Unable to parse {}", path.display()))
    }

    /// The catalog named on the command line, else in the config, else found by searching.
    pub fn open_catalog(&self, from_cli: Option<&Path>) -> Result<HrtfCatalog> {
        match from_cli.or(self.catalog.as_deref()) {
            Some(root) => Ok(HrtfCatalog::open(root)?),
            None => HrtfCatalog::locate().context("No HRTF catalog found; pass --catalog"),
        }
    }
}
