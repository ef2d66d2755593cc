use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::pipeline::{PipelineState, StepResult};

pub const PROCESS_STATUS_FILE: &str = "process-status.json";

/// Blob store with one directory per process id under `root`.
#[derive(Debug, Clone)]
pub struct ProcessStorage {
    root: PathBuf,
}

impl ProcessStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of `name` inside the process directory. Both parts are validated.
    pub fn path_for(&self, process_id: &str, name: &str) -> Result<PathBuf, StorageError> {
        validate_segment(process_id)?;
        validate_segment(name)?;
        Ok(self.root.join(process_id).join(name))
    }

    pub fn upload_text(
        &self,
        process_id: &str,
        name: &str,
        content: &str,
    ) -> Result<PathBuf, StorageError> {
        self.upload_bytes(process_id, name, content.as_bytes())
    }

    /// Writes (or replaces) a blob. Readers never observe a partial file.
    pub fn upload_bytes(
        &self,
        process_id: &str,
        name: &str,
        content: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let path = self.path_for(process_id, name)?;
        let dir = self.root.join(process_id);
        std::fs::create_dir_all(&dir).map_err(|e| StorageError::CreateDirectory {
            path: dir.clone(),
            source: e,
        })?;

        let tmp_path = dir.join(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()));
        let write_err = |e: std::io::Error| StorageError::WriteBlob {
            path: path.clone(),
            source: e,
        };

        let mut file = std::fs::File::create(&tmp_path).map_err(write_err)?;
        file.write_all(content).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        drop(file);

        if let Err(e) = std::fs::rename(&tmp_path, &path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(write_err(e));
        }

        log::debug!("Stored {} ({} bytes)", path.display(), content.len());
        Ok(path)
    }

    pub fn download(&self, process_id: &str, name: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(process_id, name)?;
        std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(path.clone())
            } else {
                StorageError::ReadBlob {
                    path: path.clone(),
                    source: e,
                }
            }
        })
    }

    pub fn download_text(&self, process_id: &str, name: &str) -> Result<String, StorageError> {
        let bytes = self.download(process_id, name)?;
        String::from_utf8(bytes).map_err(|e| StorageError::ReadBlob {
            path: self.root.join(process_id).join(name),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })
    }

    pub fn exists(&self, process_id: &str, name: &str) -> bool {
        self.path_for(process_id, name)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// Writes `<pid>/process-status.json`.
    pub fn save_pipeline_state(&self, state: &PipelineState) -> Result<PathBuf, StorageError> {
        let json = to_pretty_json(PROCESS_STATUS_FILE, state)?;
        self.upload_text(&state.process_id, PROCESS_STATUS_FILE, &json)
    }

    pub fn load_pipeline_state(&self, process_id: &str) -> Result<PipelineState, StorageError> {
        let text = self.download_text(process_id, PROCESS_STATUS_FILE)?;
        serde_json::from_str(&text).map_err(|e| StorageError::Serialize {
            name: PROCESS_STATUS_FILE.to_string(),
            source: e,
        })
    }

    /// Writes `<pid>/<step>-result.json`.
    pub fn save_step_result(&self, result: &StepResult) -> Result<PathBuf, StorageError> {
        let name = step_result_file_name(&result.step_name);
        let json = to_pretty_json(&name, result)?;
        self.upload_text(&result.process_id, &name, &json)
    }

    pub fn load_step_result(&self, process_id: &str, step: &str) -> Result<StepResult, StorageError> {
        let name = step_result_file_name(step);
        let text = self.download_text(process_id, &name)?;
        serde_json::from_str(&text).map_err(|e| StorageError::Serialize { name, source: e })
    }
}

pub fn step_result_file_name(step: &str) -> String {
    format!("{}-result.json", step)
}

fn to_pretty_json<T: serde::Serialize>(name: &str, value: &T) -> Result<String, StorageError> {
    serde_json::to_string_pretty(value).map_err(|e| StorageError::Serialize {
        name: name.to_string(),
        source: e,
    })
}

fn validate_segment(name: &str) -> Result<(), StorageError> {
    let reason = if name.is_empty() {
        Some("empty")
    } else if name == "." || name == ".." || name.contains("..") {
        Some("contains '..'")
    } else if name.contains('/') || name.contains('\\') {
        Some("contains a path separator")
    } else if name.contains('\0') {
        Some("contains a NUL byte")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StorageError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn storage() -> (TempDir, ProcessStorage) {
        let dir = TempDir::new().unwrap();
        let storage = ProcessStorage::new(dir.path());
        (dir, storage)
    }

    #[test]
    fn test_upload_and_download() {
        let (_dir, storage) = storage();
        let path = storage.upload_text("p1", "notes.txt", "hello").unwrap();
        assert!(path.ends_with("p1/notes.txt"));
        assert!(storage.exists("p1", "notes.txt"));
        assert_eq!(storage.download_text("p1", "notes.txt").unwrap(), "hello");

        storage.upload_text("p1", "notes.txt", "replaced").unwrap();
        assert_eq!(storage.download_text("p1", "notes.txt").unwrap(), "replaced");
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let (dir, storage) = storage();
        storage.upload_bytes("p1", "a.bin", &[1, 2, 3]).unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("p1"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("a.bin")]);
    }

    #[test]
    fn test_download_missing() {
        let (_dir, storage) = storage();
        let err = storage.download("p1", "missing.json").unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(!storage.exists("p1", "missing.json"));
    }

    #[test]
    fn test_rejects_traversal() {
        let (_dir, storage) = storage();
        for bad in ["../escape", "a/b", "..", ""] {
            let err = storage.upload_text("p1", bad, "x").unwrap_err();
            assert!(matches!(err, StorageError::InvalidName { .. }), "{}", bad);
        }
        assert!(storage.upload_text("..", "ok.json", "x").is_err());
    }

    #[test]
    fn test_pipeline_state_round_trip() {
        let (_dir, storage) = storage();
        let state = PipelineState::new("p7", vec!["extract".into(), "save".into()]);
        let path = storage.save_pipeline_state(&state).unwrap();
        assert!(path.ends_with("p7/process-status.json"));

        let loaded = storage.load_pipeline_state("p7").unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_step_result_file_name() {
        let (_dir, storage) = storage();
        let result = StepResult::success("p8", "map", json!({"ok": true}));
        let path = storage.save_step_result(&result).unwrap();
        assert!(path.ends_with("p8/map-result.json"));

        let loaded = storage.load_step_result("p8", "map").unwrap();
        assert_eq!(loaded.result["ok"], true);
    }
}
