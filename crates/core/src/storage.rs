use crate::error::IngestError;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const UPLOAD_DIR: &str = "documents";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Path relative to the storage root, with `/` separators.
    pub relative_path: String,
    pub checksum: String,
    pub size_bytes: u64,
}

/// Raw uploaded bytes on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, relative_path: &str) -> PathBuf {
        self.root.join(relative_path)
    }

    /// Writes `bytes` under `documents/`, never overwriting an existing file.
    pub async fn save(&self, file_name: &str, bytes: &[u8]) -> Result<StoredFile, IngestError> {
        let clean_name = sanitize_file_name(file_name)?;
        let directory = self.root.join(UPLOAD_DIR);
        fs::create_dir_all(&directory).await?;

        let mut stored_name = clean_name.clone();
        loop {
            let target = directory.join(&stored_name);
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&target)
                .await
            {
                Ok(mut file) => {
                    file.write_all(bytes).await?;
                    file.flush().await?;
                    break;
                }
                Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                    stored_name = with_random_suffix(&clean_name);
                }
                Err(error) => return Err(error.into()),
            }
        }

        Ok(StoredFile {
            relative_path: format!("{UPLOAD_DIR}/{stored_name}"),
            checksum: digest_bytes(bytes),
            size_bytes: bytes.len() as u64,
        })
    }

    /// Returns whether a file was removed.
    pub async fn delete(&self, relative_path: &str) -> Result<bool, IngestError> {
        match fs::remove_file(self.resolve(relative_path)).await {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error.into()),
        }
    }
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Keeps the final path component and replaces anything outside
/// `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_file_name(file_name: &str) -> Result<String, IngestError> {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let unsafe_characters = Regex::new(r"[^A-Za-z0-9._-]+")?;
    let cleaned = unsafe_characters.replace_all(base, "_");
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        return Err(IngestError::MissingFileName(file_name.to_string()));
    }
    Ok(cleaned.to_string())
}

fn with_random_suffix(file_name: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    let suffix = &suffix[..8];
    match file_name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => format!("{stem}_{suffix}.{extension}"),
        _ => format!("{file_name}_{suffix}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(
            sanitize_file_name("C:\\Users\\me\\Q3 report (final).pdf").unwrap(),
            "Q3_report_final_.pdf"
        );
        assert_eq!(sanitize_file_name(".hidden.txt").unwrap(), "hidden.txt");
        assert!(sanitize_file_name("dir/").is_err());
    }

    #[test]
    fn checksum_is_reproducible() {
        assert_eq!(digest_bytes(b"abc"), digest_bytes(b"abc"));
        assert_eq!(
            digest_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn saving_twice_keeps_both_files() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let storage = FileStorage::new(dir.path());

        let first = storage.save("notes.txt", b"first").await?;
        let second = storage.save("notes.txt", b"second").await?;

        assert_eq!(first.relative_path, "documents/notes.txt");
        assert_ne!(first.relative_path, second.relative_path);
        assert!(second.relative_path.starts_with("documents/notes_"));
        assert!(second.relative_path.ends_with(".txt"));
        assert_eq!(std::fs::read(storage.resolve(&first.relative_path))?, b"first");
        assert_eq!(std::fs::read(storage.resolve(&second.relative_path))?, b"second");
        assert_eq!(second.size_bytes, 6);
        Ok(())
    }

    #[tokio::test]
    async fn delete_reports_missing_files() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let storage = FileStorage::new(dir.path());
        let stored = storage.save("a.txt", b"a").await?;

        assert!(storage.delete(&stored.relative_path).await?);
        assert!(!storage.delete(&stored.relative_path).await?);
        Ok(())
    }
}
