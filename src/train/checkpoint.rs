use std::path::Path;

use crate::error::{PixelCnnError, Result};

const RECORD_EXTENSION: &str = "mpk";
/// Records written by the learner's file checkpointer for every kept epoch.
const RECORDS: [&str; 3] = ["model", "optim", "scheduler"];

/// The most recent epoch with a complete checkpoint in `directory`.
pub fn latest_checkpoint(directory: &Path) -> Result<usize> {
    let no_checkpoint = || PixelCnnError::NoCheckpoint(directory.to_path_buf());

    let entries = match std::fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Err(no_checkpoint()),
        Err(err) => return Err(err.into()),
    };

    let mut latest = None;
    for entry in entries {
        let name = entry?.file_name();
        let Some(epoch) = name.to_str().and_then(model_epoch) else {
            continue;
        };

        let complete = RECORDS
            .iter()
            .all(|record| directory.join(file_name(record, epoch)).is_file());
        if !complete {
            log::warn!("Ignoring the incomplete checkpoint of epoch {epoch}");
            continue;
        }

        latest = latest.max(Some(epoch));
    }

    latest.ok_or_else(no_checkpoint)
}

/// The shuffling seed of the training split.
///
/// A resumed run does not replay the item order of the epochs it already trained on.
pub fn train_seed(seed: u64, checkpoint: Option<usize>) -> u64 {
    seed.wrapping_add(checkpoint.unwrap_or(0) as u64)
}

fn model_epoch(name: &str) -> Option<usize> {
    name.strip_prefix("model-")?
        .strip_suffix(RECORD_EXTENSION)?
        .strip_suffix('.')?
        .parse()
        .ok()
}

fn file_name(record: &str, epoch: usize) -> String {
    format!("{record}-{epoch}.{RECORD_EXTENSION}")
}
