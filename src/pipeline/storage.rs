use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// JSON artifacts under a fixed data directory. Last writer wins per file name.
#[derive(Debug)]
pub struct ArtifactStore {
    data_dir: PathBuf,
    seq: AtomicU64,
}

impl ArtifactStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        Ok(Self {
            data_dir,
            seq: AtomicU64::new(0),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    fn temp_path(&self, name: &str) -> PathBuf {
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        self.data_dir.join(format!(".{name}.{}.{n}.tmp", std::process::id()))
    }

    /// Write pretty JSON via a temp file and rename, so readers never see a
    /// half-written document.
    pub fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let target = self.path_for(name);
        let tmp = self.temp_path(name);

        let body = serde_json::to_vec_pretty(value)?;
        fs::write(&tmp, body)?;
        if let Err(e) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(target)
    }

    /// Read an artifact; `Ok(None)` when it does not exist yet.
    pub fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&content)?))
    }

    /// Same as [`write_json`](Self::write_json) on tokio's file API, for
    /// callers that hold an async lock across the write.
    pub async fn write_json_async<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let target = self.path_for(name);
        let tmp = self.temp_path(name);

        let body = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(&tmp, body).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(target)
    }

    pub async fn read_json_async<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match tokio::fs::read(self.path_for(name)).await {
            Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
