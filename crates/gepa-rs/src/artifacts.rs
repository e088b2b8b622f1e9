//! On-disk run artifacts.
//!
//! When a run directory is configured, two things land in it: a
//! `generated_best_outputs_valset/task_{i}/` directory per validation
//! instance holding one JSON file per candidate currently tied for that
//! instance's best score, and a final `result.json` serializing the result
//! snapshot. Nothing else about the on-disk layout is promised.
//!
//! Artifact writes are best-effort: the engine logs a warning and keeps
//! running if the filesystem misbehaves.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::result::GepaResult;

const BEST_OUTPUTS_DIR: &str = "generated_best_outputs_valset";

fn task_dir(run_dir: &Path, instance: usize) -> PathBuf {
    run_dir.join(BEST_OUTPUTS_DIR).join(format!("task_{instance}"))
}

/// Rewrites the best-outputs directory for one validation instance so it
/// holds exactly one `candidate_{k}.json` per current front member.
pub(crate) fn persist_instance_best_outputs<O: Serialize>(
    run_dir: &Path,
    instance: usize,
    entries: &[(usize, O)],
) -> io::Result<()> {
    let dir = task_dir(run_dir, instance);
    if dir.exists() {
        fs::remove_dir_all(&dir)?;
    }
    fs::create_dir_all(&dir)?;

    for (candidate_idx, output) in entries {
        let path = dir.join(format!("candidate_{candidate_idx}.json"));
        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(file, output).map_err(io::Error::other)?;
    }
    Ok(())
}

/// Serializes the final result snapshot to `run_dir/result.json`.
pub(crate) fn persist_result<O: Clone + Serialize>(
    run_dir: &Path,
    result: &GepaResult<O>,
) -> io::Result<()> {
    fs::create_dir_all(run_dir)?;
    let file = fs::File::create(run_dir.join("result.json"))?;
    serde_json::to_writer_pretty(file, result).map_err(io::Error::other)?;
    Ok(())
}
