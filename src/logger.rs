use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Mutex,
};

use burn::train::ApplicationLoggerInstaller;
use tracing_subscriber::{
    filter::EnvFilter, fmt, layer::SubscriberExt, registry, util::SubscriberInitExt,
};

use crate::error::Result;

const LOG_FILE: &str = "experiment.log";

/// Installs the global subscriber receiving the `log` records of the crate and of burn.
///
/// Records go to stderr and, when an artifact directory is given, are appended
/// to `<artifact_dir>/experiment.log`. The level comes from `RUST_LOG` and
/// defaults to `info`.
pub fn install(artifact_dir: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = match artifact_dir {
        Some(directory) => {
            std::fs::create_dir_all(directory)?;
            let file = File::options()
                .create(true)
                .append(true)
                .open(directory.join(LOG_FILE))?;

            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let installed = registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();

    // Learners install their logger again at every run.
    if let Err(err) = installed {
        log::debug!("Logger already installed: {err}");
    }

    Ok(())
}

/// Lets a learner [install] the logger of an artifact directory.
#[derive(new, Clone, Debug)]
pub struct ExperimentLogger {
    artifact_dir: PathBuf,
}

impl ApplicationLoggerInstaller for ExperimentLogger {
    fn install(&self) -> Result<(), String> {
        install(Some(&self.artifact_dir)).map_err(|err| err.to_string())
    }
}
