//! Document loader: PDFs in the source directory → [`RawDocument`]s.
//!
//! Files are selected with `include_globs` (case-insensitive, `*.pdf` by
//! default), in sorted order. A file that cannot be read or parsed is a
//! [`RagError::Load`]: it is logged, reported in [`LoadOutcome::failures`],
//! and the rest of the batch continues.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use folio_core::models::{DocumentSet, RawDocument};
use folio_core::normalize::LanguageDetector;
use folio_core::RagError;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::config::DocumentsConfig;
use crate::extract::extract_pdf_text;
use crate::language::WhatlangDetector;

/// Characters of text sampled for language detection.
const DETECTION_SAMPLE_CHARS: usize = 2000;

/// A candidate file in the source directory.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Path relative to the source directory, `/`-separated.
    pub source_name: String,
}

#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub documents: DocumentSet,
    pub failures: Vec<RagError>,
}

impl LoadOutcome {
    /// Names of the documents that loaded, sorted.
    pub fn source_names(&self) -> Vec<String> {
        self.documents
            .iter()
            .map(|d| d.source_name.clone())
            .collect()
    }
}

/// Load every PDF under `config.dir`.
pub fn load_directory(config: &DocumentsConfig) -> Result<LoadOutcome> {
    DocumentLoader::from_config(config)?.load()
}

pub struct DocumentLoader {
    dir: PathBuf,
    recursive: bool,
    include: GlobSet,
    detector: Option<WhatlangDetector>,
    fallback_language: Option<String>,
}

impl DocumentLoader {
    pub fn from_config(config: &DocumentsConfig) -> Result<Self> {
        Ok(Self {
            dir: config.dir.clone(),
            recursive: config.recursive,
            include: build_globset(&config.include_globs)?,
            detector: config.detect_language.then(WhatlangDetector::reliable_only),
            fallback_language: config.fallback_language.clone(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Matching files, sorted by source name.
    pub fn scan(&self) -> Result<Vec<SourceFile>> {
        if !self.dir.is_dir() {
            bail!("Document directory does not exist: {}", self.dir.display());
        }

        let mut walker = WalkDir::new(&self.dir).min_depth(1);
        if !self.recursive {
            walker = walker.max_depth(1);
        }

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(&self.dir).unwrap_or(path);
            let source_name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if !self.include.is_match(&source_name) {
                continue;
            }
            files.push(SourceFile {
                path: path.to_path_buf(),
                source_name,
            });
        }

        files.sort_by(|a, b| a.source_name.cmp(&b.source_name));
        Ok(files)
    }

    /// Load every matching file. Only a missing directory is fatal.
    pub fn load(&self) -> Result<LoadOutcome> {
        let mut outcome = LoadOutcome::default();
        for file in self.scan()? {
            match self.load_file(&file) {
                Ok(doc) => {
                    if doc.full_text.trim().is_empty() {
                        tracing::warn!(source = %doc.source_name, "no extractable text");
                    }
                    if let Err(e) = outcome.documents.insert(doc) {
                        tracing::warn!(source = %file.source_name, error = %e, "skipped document");
                        outcome.failures.push(e);
                    }
                }
                Err(e) => {
                    tracing::warn!(source = %file.source_name, error = %e, "failed to load document");
                    outcome.failures.push(e);
                }
            }
        }
        tracing::info!(
            dir = %self.dir.display(),
            loaded = outcome.documents.len(),
            failed = outcome.failures.len(),
            "loaded documents"
        );
        Ok(outcome)
    }

    pub fn load_file(&self, file: &SourceFile) -> Result<RawDocument, RagError> {
        let load_error = |message: String| RagError::Load {
            source_name: file.source_name.clone(),
            message,
        };
        let bytes = std::fs::read(&file.path).map_err(|e| load_error(e.to_string()))?;
        let text = extract_pdf_text(&bytes).map_err(|e| load_error(e.to_string()))?;
        let language = self.detect_language(&text);
        tracing::debug!(
            source = %file.source_name,
            chars = text.chars().count(),
            language = language.as_deref().unwrap_or("-"),
            "extracted text"
        );
        RawDocument::new(file.source_name.clone(), text, language)
    }

    fn detect_language(&self, text: &str) -> Option<String> {
        let detector = self.detector.as_ref()?;
        let sample: String = text.chars().take(DETECTION_SAMPLE_CHARS).collect();
        detector
            .detect(&sample)
            .or_else(|| self.fallback_language.clone())
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(GlobBuilder::new(pattern).case_insensitive(true).build()?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn loader(dir: &Path, recursive: bool) -> DocumentLoader {
        DocumentLoader::from_config(&DocumentsConfig {
            dir: dir.to_path_buf(),
            recursive,
            ..DocumentsConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_scan_ignores_non_pdf_and_sorts() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b.pdf"), b"%PDF-1.4").unwrap();
        std::fs::write(tmp.path().join("A.PDF"), b"%PDF-1.4").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"hello").unwrap();
        let names: Vec<String> = loader(tmp.path(), false)
            .scan()
            .unwrap()
            .into_iter()
            .map(|f| f.source_name)
            .collect();
        assert_eq!(names, vec!["A.PDF", "b.pdf"]);
    }

    #[test]
    fn test_recursive_flag() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("top.pdf"), b"%PDF-1.4").unwrap();
        std::fs::write(tmp.path().join("sub").join("deep.pdf"), b"%PDF-1.4").unwrap();

        assert_eq!(loader(tmp.path(), false).scan().unwrap().len(), 1);
        let names: Vec<String> = loader(tmp.path(), true)
            .scan()
            .unwrap()
            .into_iter()
            .map(|f| f.source_name)
            .collect();
        assert_eq!(names, vec!["sub/deep.pdf", "top.pdf"]);
    }

    #[test]
    fn test_missing_dir_is_error() {
        let tmp = TempDir::new().unwrap();
        assert!(loader(&tmp.path().join("nope"), false).load().is_err());
    }

    #[test]
    fn test_empty_dir_loads_nothing() {
        let tmp = TempDir::new().unwrap();
        let outcome = loader(tmp.path(), false).load().unwrap();
        assert!(outcome.documents.is_empty());
        assert!(outcome.failures.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_load_failure() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("broken.pdf"), b"this is not a pdf").unwrap();
        let outcome = loader(tmp.path(), false).load().unwrap();
        assert!(outcome.documents.is_empty());
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(
            &outcome.failures[0],
            RagError::Load { source_name, .. } if source_name == "broken.pdf"
        ));
    }
}
