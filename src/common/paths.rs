use std::fs;
use std::path::PathBuf;
use directories::ProjectDirs;
use crate::common::config::StorageConfig;
use crate::common::error::{KioskError, Result};

/// On-disk layout of the kiosk's data.
#[derive(Debug, Clone)]
pub struct DataLayout {
    pub data_dir: PathBuf,
    pub faces_dir: PathBuf,
    pub index_dir: PathBuf,
    pub employees_json: PathBuf,
    pub logs_dir: PathBuf,
}

impl DataLayout {
    /// Explicit config paths win. Otherwise everything hangs off `./dev_data`
    /// in dev mode, or the platform data directory.
    pub fn resolve(storage: &StorageConfig, dev: bool) -> Result<Self> {
        let data_dir = match &storage.data_dir {
            Some(dir) => dir.clone(),
            None if dev => PathBuf::from("./dev_data"),
            None => ProjectDirs::from("org", "alcogate", "alcogate")
                .map(|dirs| dirs.data_dir().to_path_buf())
                .ok_or_else(|| KioskError::Config("Cannot determine data directory".to_string()))?,
        };

        Ok(Self {
            faces_dir: storage.faces_dir.clone().unwrap_or_else(|| data_dir.join("faces")),
            index_dir: storage.index_dir.clone().unwrap_or_else(|| data_dir.join("index")),
            employees_json: storage
                .employees_json
                .clone()
                .unwrap_or_else(|| data_dir.join("employees.json")),
            logs_dir: storage.logs_dir.clone().unwrap_or_else(|| data_dir.join("logs")),
            data_dir,
        })
    }

    /// Everything under one root; used by tests and `--dev`.
    pub fn under(root: impl Into<PathBuf>) -> Self {
        let data_dir = root.into();
        Self {
            faces_dir: data_dir.join("faces"),
            index_dir: data_dir.join("index"),
            employees_json: data_dir.join("employees.json"),
            logs_dir: data_dir.join("logs"),
            data_dir,
        }
    }

    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        fs::create_dir_all(&self.faces_dir)?;
        fs::create_dir_all(&self.index_dir)?;
        fs::create_dir_all(&self.logs_dir)?;
        if let Some(parent) = self.employees_json.parent() {
            fs::create_dir_all(parent)?;
        }
        if !self.employees_json.exists() {
            fs::write(&self.employees_json, "{\n  \"employees\": []\n}\n")?;
            tracing::info!("Created empty registry at {}", self.employees_json.display());
        }
        Ok(())
    }

    pub fn measurement_log(&self) -> PathBuf {
        self.logs_dir.join("measurements.csv")
    }

    pub fn event_log(&self) -> PathBuf {
        self.logs_dir.join("events.csv")
    }

    pub fn employee_faces_dir(&self, employee_id: &str) -> PathBuf {
        self.faces_dir.join(employee_id)
    }
}
