//! Atomic file writes: write to a `.tmp` sibling, fsync, then rename over
//! the target. A crash at any point before the rename leaves the prior
//! valid file (or no file) in place — never a half-written one.

use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let tmp_path = tmp_path_for(path);
    {
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
    }
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_atomic_creates_parent_dirs_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("file.json");
        write_atomic(&target, b"{\"a\":1}").await.unwrap();
        let contents = tokio::fs::read(&target).await.unwrap();
        assert_eq!(contents, b"{\"a\":1}");
    }

    #[tokio::test]
    async fn write_atomic_leaves_no_tmp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("file.json");
        write_atomic(&target, b"{}").await.unwrap();
        assert!(!tmp_path_for(&target).exists());
    }

    #[tokio::test]
    async fn write_atomic_overwrites_existing_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("file.json");
        write_atomic(&target, b"{\"v\":1}").await.unwrap();
        write_atomic(&target, b"{\"v\":2}").await.unwrap();
        let contents = tokio::fs::read_to_string(&target).await.unwrap();
        assert_eq!(contents, "{\"v\":2}");
    }
}
