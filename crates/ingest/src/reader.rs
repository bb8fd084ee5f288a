use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;
use walkdir::WalkDir;

/// Reads already-extracted document text from disk.
///
/// PDF/HTML text extraction happens upstream; only plain text and
/// markdown files are accepted here.
pub struct FileReader;

const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md"];

impl FileReader {
    pub fn is_supported(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext))
    }

    pub async fn read_file(path: &Path) -> Result<String> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        if !Self::is_supported(path) {
            anyhow::bail!("Unsupported file format: {}", extension);
        }

        fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read file: {:?}", path))
    }

    /// Read every supported file below `dir`, in path order.
    pub async fn read_directory(dir: &Path) -> Result<Vec<(String, String)>> {
        let mut paths = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to walk directory: {:?}", dir))?;
            if entry.file_type().is_file() && Self::is_supported(entry.path()) {
                paths.push(entry.into_path());
            }
        }

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let content = Self::read_file(&path).await?;
            files.push((path.to_string_lossy().to_string(), content));
        }

        Ok(files)
    }
}
