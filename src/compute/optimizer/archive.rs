//! Result archive: save and load optimization results as JSON.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::schema::OptimizationResult;

/// Archive I/O errors.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Timestamped default file name, `alignment_<unix seconds>.json`.
pub fn default_file_name() -> String {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("alignment_{seconds}.json")
}

/// Write `result` as pretty JSON to `path`.
pub fn save_result<P: AsRef<Path>>(result: &OptimizationResult, path: P) -> Result<(), ArchiveError> {
    let json = serde_json::to_string_pretty(result)?;
    fs::write(path, json)?;
    Ok(())
}

/// Write `result` into `dir` under the default file name, creating the directory.
pub fn save_result_in<P: AsRef<Path>>(result: &OptimizationResult, dir: P) -> Result<PathBuf, ArchiveError> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let path = dir.join(default_file_name());
    save_result(result, &path)?;
    Ok(path)
}

/// Read a result previously written by [`save_result`].
pub fn load_result<P: AsRef<Path>>(path: P) -> Result<OptimizationResult, ArchiveError> {
    let json = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::optimizer::{EvalError, Optimizer};
    use crate::schema::{OptimizerConfig, Pose, Tunables};
    use tempfile::TempDir;

    fn run_small() -> OptimizationResult {
        let config = OptimizerConfig {
            generations: 3,
            tunables: Tunables {
                population_size: 6,
                ..Default::default()
            },
            random_seed: Some(1),
            ..Default::default()
        };
        let evaluator = |pose: &Pose| -> Result<f64, EvalError> { Ok(1.0 / (1.0 + (pose.b.y - 10.0).powi(2))) };
        Optimizer::new(config, evaluator).run()
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let result = run_small();

        let path = save_result_in(&result, temp_dir.path().join("runs")).unwrap();
        assert!(path.exists());
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("alignment_"));

        let loaded = load_result(&path).unwrap();
        assert_eq!(loaded.best_fitness, result.best_fitness);
        assert_eq!(loaded.best_pose, result.best_pose);
        assert_eq!(loaded.history.records.len(), 3);
        assert_eq!(loaded.stop_reason, result.stop_reason);
    }

    #[test]
    fn test_load_errors() {
        let temp_dir = TempDir::new().unwrap();
        assert!(matches!(
            load_result(temp_dir.path().join("missing.json")),
            Err(ArchiveError::Io(_))
        ));

        let bad = temp_dir.path().join("bad.json");
        fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(load_result(&bad), Err(ArchiveError::Json(_))));
    }
}
