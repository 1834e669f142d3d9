use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

/// Read a JSON state file, falling back to its `.tmp` sibling when the main
/// file is corrupted, and to `Default` when neither is readable.
pub(crate) async fn read_json_with_tmp_fallback<T: DeserializeOwned + Default>(path: &Path) -> T {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice::<T>(&bytes) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, path = %path.display(), "failed to parse state file, trying tmp fallback");
                let tmp = tmp_path(path);
                match tokio::fs::read(&tmp).await {
                    Ok(tmp_bytes) => serde_json::from_slice::<T>(&tmp_bytes).unwrap_or_default(),
                    Err(_) => T::default(),
                }
            }
        },
        Err(_) => T::default(),
    }
}

/// Serialize `value` and write it to `path` via a temp file and rename.
pub(crate) async fn write_json_atomic<T: Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), std::io::Error> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    write_atomic(path, &bytes).await
}

/// Write raw bytes to `path` via a temp file and rename.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

fn tmp_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
