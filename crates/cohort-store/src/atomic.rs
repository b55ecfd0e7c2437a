use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{StoreError, StoreResult};

/// Write `data` to a synced temp file in the directory that will hold `path`.
fn stage(path: &Path, data: &[u8]) -> StoreResult<NamedTempFile> {
    let dir = path.parent().ok_or_else(|| StoreError::InvalidKey {
        key: path.display().to_string(),
        reason: "path has no parent directory".into(),
    })?;
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

/// Replace `path` with `data` so readers see either the old or the new
/// contents, never a partial write.
pub(crate) fn persist(path: &Path, data: &[u8]) -> StoreResult<()> {
    stage(path, data)?
        .persist(path)
        .map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

/// Create `path` with `data`, failing with an
/// [`AlreadyExists`](std::io::ErrorKind::AlreadyExists) I/O error if it is
/// already there. The existence check and the rename are a single step.
pub(crate) fn persist_new(path: &Path, data: &[u8]) -> StoreResult<()> {
    stage(path, data)?
        .persist_noclobber(path)
        .map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

/// [`persist`] or [`persist_new`] on the blocking pool.
pub(crate) async fn persist_async(path: &Path, data: Vec<u8>, overwrite: bool) -> StoreResult<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        if overwrite {
            persist(&path, &data)
        } else {
            persist_new(&path, &data)
        }
    })
    .await
    .map_err(|e| StoreError::Backend(format!("write task failed: {e}")))?
}
