//! Folder-backed transport for local development.
//!
//! Input: every visible file in a directory is one encoded envelope; files
//! whose name starts with `.` are ignored. Deleting a delivery removes its
//! file. Output: each published envelope becomes a new `<uuid>.json` file,
//! written to a hidden temp name first and renamed into place so readers never
//! see a partial file.

use async_trait::async_trait;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::{parse_ref, BlobStore, Delivery, InputSource, OutputSink};
use crate::envelope::{codec, Envelope};
use crate::types::{DeliveryHandle, Error, Result};

/// Directory acting as both queue and topic.
#[derive(Debug, Clone)]
pub struct FolderTransport {
    dir: PathBuf,
}

impl FolderTransport {
    /// Use an existing directory as an input source.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(Self { dir }),
            Ok(_) => Err(Error::config(format!("{} is not a directory", dir.display()))),
            Err(e) => Err(Error::config(format!("cannot open input folder {}: {}", dir.display(), e))),
        }
    }

    /// Use a directory as an output target, creating it if needed.
    pub async fn create(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Visible regular files, sorted by name.
    async fn list(&self) -> Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if is_hidden(&entry.path()) {
                continue;
            }
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    async fn read(&self, path: PathBuf) -> Result<Option<Delivery>> {
        match fs::read(&path).await {
            Ok(payload) => {
                let handle = DeliveryHandle::from_string(path.to_string_lossy().into_owned())
                    .map_err(Error::internal)?;
                Ok(Some(Delivery::new(handle, payload)))
            }
            // Deleted by a concurrent consumer between listing and reading.
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(true, |n| n.starts_with('.'))
}

#[async_trait]
impl InputSource for FolderTransport {
    async fn fetch_one(&self) -> Result<Option<Delivery>> {
        for path in self.list().await? {
            if let Some(delivery) = self.read(path).await? {
                return Ok(Some(delivery));
            }
        }
        Ok(None)
    }

    async fn fetch_many(&self, max: usize) -> Result<Vec<Delivery>> {
        let mut deliveries = Vec::new();
        for path in self.list().await? {
            if deliveries.len() >= max {
                break;
            }
            if let Some(delivery) = self.read(path).await? {
                deliveries.push(delivery);
            }
        }
        Ok(deliveries)
    }

    async fn delete(&self, handles: &[DeliveryHandle]) -> Result<()> {
        for handle in handles {
            match fs::remove_file(handle.as_str()).await {
                Ok(()) => tracing::debug!(file = handle.as_str(), "folder_delivery_deleted"),
                Err(e) if e.kind() == IoErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn approximate_size(&self) -> Result<usize> {
        Ok(self.list().await?.len())
    }
}

#[async_trait]
impl OutputSink for FolderTransport {
    async fn publish(&self, envelope: &Envelope) -> Result<()> {
        let bytes = codec::encode(envelope)?;
        let name = format!("{}.json", uuid::Uuid::new_v4());
        let tmp = self.dir.join(format!(".{}.tmp", name));
        let target = self.dir.join(&name);

        let write = async {
            fs::write(&tmp, &bytes).await?;
            fs::rename(&tmp, &target).await
        };
        write.await.map_err(|e| {
            Error::publish(format!("cannot write {}: {}", target.display(), e))
        })?;
        tracing::debug!(file = %target.display(), "folder_envelope_published");
        Ok(())
    }
}

/// Blob store keeping each payload in its own file.
#[derive(Debug, Clone)]
pub struct FolderBlobStore {
    dir: PathBuf,
}

impl FolderBlobStore {
    pub async fn create(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }
}

#[async_trait]
impl BlobStore for FolderBlobStore {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>> {
        let path = match parse_ref(reference) {
            Ok(("folder", path)) => path,
            _ => {
                return Err(Error::payload_unavailable(format!(
                    "{:?} is not a folder blob reference",
                    reference
                )))
            }
        };
        fs::read(path)
            .await
            .map_err(|e| Error::payload_unavailable(format!("cannot read {}: {}", path, e)))
    }

    async fn store(&self, bytes: &[u8]) -> Result<String> {
        let path = self.dir.join(uuid::Uuid::new_v4().to_string());
        fs::write(&path, bytes)
            .await
            .map_err(|e| Error::publish(format!("cannot store blob {}: {}", path.display(), e)))?;
        Ok(format!("folder://{}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::MIME_TEXT;

    #[tokio::test]
    async fn test_open_missing_dir_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = FolderTransport::open(tmp.path().join("nope")).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_hidden_files_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(".DS_Store"), b"junk").unwrap();
        std::fs::write(tmp.path().join(".half.json.tmp"), b"{").unwrap();
        let transport = FolderTransport::open(tmp.path()).await.unwrap();

        assert_eq!(transport.approximate_size().await.unwrap(), 0);
        assert!(transport.fetch_one().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_many_respects_max_and_order() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["c.json", "a.json", "b.json"] {
            std::fs::write(tmp.path().join(name), name.as_bytes()).unwrap();
        }
        let transport = FolderTransport::open(tmp.path()).await.unwrap();

        let batch = transport.fetch_many(2).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].payload, b"a.json");
        assert_eq!(batch[1].payload, b"b.json");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("one.json"), b"x").unwrap();
        let transport = FolderTransport::open(tmp.path()).await.unwrap();

        let delivery = transport.fetch_one().await.unwrap().unwrap();
        transport.delete(&[delivery.handle.clone()]).await.unwrap();
        transport.delete(&[delivery.handle]).await.unwrap();
        assert_eq!(transport.approximate_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_publish_creates_one_visible_file() {
        let tmp = tempfile::tempdir().unwrap();
        let transport = FolderTransport::create(tmp.path().join("out")).await.unwrap();

        transport
            .publish(&Envelope::raw_content(MIME_TEXT, "hello"))
            .await
            .unwrap();

        let names: Vec<String> = std::fs::read_dir(transport.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".json"));
        assert!(!names[0].starts_with('.'));

        let delivery = transport.fetch_one().await.unwrap().unwrap();
        let env = codec::decode(&delivery.payload).unwrap();
        assert_eq!(env.body, "hello");
    }

    #[tokio::test]
    async fn test_blob_store_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FolderBlobStore::create(tmp.path()).await.unwrap();

        let reference = store.store(b"large payload").await.unwrap();
        assert!(reference.starts_with("folder://"));
        assert_eq!(store.fetch(&reference).await.unwrap(), b"large payload");

        let err = store.fetch("folder:///definitely/missing").await.unwrap_err();
        assert_eq!(err.kind(), crate::types::ErrorKind::PayloadUnavailableError);
    }
}
