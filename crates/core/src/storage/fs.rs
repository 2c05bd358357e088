use std::io::{self, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use tempfile::NamedTempFile;
use tokio::fs::{self, File};
use tokio::io::AsyncSeekExt;
use tracing::debug;

use super::{ArchiveReader, ArchiveStorage, StorageError};

/// Archive files under a base directory, one file per resource path.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStorage;

impl FsStorage {
  fn locate(resource: &str, base: &str) -> Result<PathBuf, StorageError> {
    let resource = resource.split('?').next().unwrap_or_default();
    let relative = Path::new(resource.trim_start_matches('/'));
    let safe = relative
      .components()
      .all(|c| matches!(c, Component::Normal(_)));
    if resource.trim_start_matches('/').is_empty() || !safe {
      return Err(StorageError::InvalidLocation(resource.to_string()));
    }
    Ok(Path::new(base).join(relative))
  }
}

impl ArchiveStorage for FsStorage {
  async fn get(&self, resource: &str, base: &str, offset: u64) -> Result<ArchiveReader, StorageError> {
    let path = Self::locate(resource, base)?;
    let mut file = match File::open(&path).await {
      Ok(f) => f,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        return Err(StorageError::NotFound(resource.to_string()));
      }
      Err(e) => return Err(e.into()),
    };
    let len = file.metadata().await?.len();
    if offset > len {
      return Err(StorageError::RangeNotSatisfiable {
        resource: resource.to_string(),
        offset,
      });
    }
    file.seek(SeekFrom::Start(offset)).await?;
    debug!(event = "archive_read", path = %path.display(), offset, len);
    Ok(ArchiveReader::File(file))
  }

  async fn put(&self, resource: &str, base: &str, data: Bytes) -> Result<(), StorageError> {
    let path = Self::locate(resource, base)?;
    let parent = path
      .parent()
      .map(Path::to_path_buf)
      .unwrap_or_else(|| PathBuf::from(base));
    fs::create_dir_all(&parent).await?;

    let len = data.len();
    let target = path.clone();
    // a uniquely named sibling is renamed over the target, so readers never
    // see a partial archive
    tokio::task::spawn_blocking(move || -> io::Result<()> {
      let mut tmp = NamedTempFile::new_in(&parent)?;
      tmp.write_all(&data)?;
      tmp.persist(&target).map_err(|e| e.error)?;
      Ok(())
    })
    .await
    .map_err(io::Error::other)??;
    debug!(event = "archive_written", path = %path.display(), bytes = len);
    Ok(())
  }
}
