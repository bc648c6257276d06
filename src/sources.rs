//! `folio sources`: the PDFs the loader would pick up, and whether each loads.

use anyhow::Result;

use crate::config::Config;
use crate::loader::DocumentLoader;

/// Per-file status line.
#[derive(Debug, PartialEq)]
pub struct SourceStatus {
    pub source_name: String,
    pub status: String,
    pub language: Option<String>,
    pub chars: usize,
}

/// Try to load every matching file without indexing anything.
pub fn scan_sources(config: &Config) -> Result<Vec<SourceStatus>> {
    let loader = DocumentLoader::from_config(&config.documents)?;
    let mut statuses = Vec::new();
    for file in loader.scan()? {
        let status = match loader.load_file(&file) {
            Ok(doc) if doc.full_text.trim().is_empty() => SourceStatus {
                source_name: file.source_name,
                status: "EMPTY".to_string(),
                language: doc.language,
                chars: 0,
            },
            Ok(doc) => SourceStatus {
                source_name: file.source_name,
                status: "OK".to_string(),
                chars: doc.full_text.chars().count(),
                language: doc.language,
            },
            Err(e) => SourceStatus {
                source_name: file.source_name,
                status: format!("FAILED ({})", e),
                language: None,
                chars: 0,
            },
        };
        statuses.push(status);
    }
    Ok(statuses)
}

pub fn list_sources(config: &Config) -> Result<()> {
    let statuses = scan_sources(config)?;
    if statuses.is_empty() {
        println!(
            "No PDF files found in {}",
            config.documents.dir.display()
        );
        return Ok(());
    }

    println!("{:<40} {:<6} {:>9} STATUS", "SOURCE", "LANG", "CHARS");
    for s in &statuses {
        println!(
            "{:<40} {:<6} {:>9} {}",
            s.source_name,
            s.language.as_deref().unwrap_or("-"),
            s.chars,
            s.status
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_scan_reports_failures() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("broken.pdf"), b"not a pdf at all").unwrap();
        let mut config = Config::default();
        config.documents.dir = tmp.path().to_path_buf();

        let statuses = scan_sources(&config).unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].source_name, "broken.pdf");
        assert!(statuses[0].status.starts_with("FAILED"));
    }

    #[test]
    fn test_missing_dir_is_an_error() {
        let mut config = Config::default();
        config.documents.dir = "/nonexistent/folio/docs".into();
        assert!(scan_sources(&config).is_err());
    }
}
