//! Ingestion pipeline orchestration.
//!
//! Walks the configured source directories and runs every supported file
//! through extract → chunk → embed → upsert. Files are processed by a
//! bounded worker pool; a failing file is logged and counted, never fatal.
//! Re-ingesting a file replaces its records, so repeated runs over the same
//! inputs converge on the same record set.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use walkdir::WalkDir;

use crate::chunk;
use crate::config::{path_suffix, Settings};
use crate::embedding::Embedder;
use crate::extract;
use crate::models::{IngestReport, SourceDocument};
use crate::progress::{IngestEvent, NoProgress, ProgressReporter};
use crate::store::VectorIndex;

/// Every ingestible file under `dirs`, sorted by path.
///
/// Keeps regular files with a supported suffix whose name does not start
/// with `.`. Missing directories are skipped with a warning.
pub fn iter_source_files(dirs: &[PathBuf], settings: &Settings) -> Vec<SourceDocument> {
    let mut docs = Vec::new();
    for dir in dirs {
        if !dir.is_dir() {
            tracing::warn!(dir = %dir.display(), "source directory not found, skipping");
            continue;
        }
        for entry in WalkDir::new(dir).follow_links(true) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            if !settings.is_supported(&path_suffix(entry.path())) {
                continue;
            }
            docs.push(SourceDocument::new(entry.path(), dir));
        }
    }
    docs.sort_by(|a, b| a.path.cmp(&b.path));
    docs
}

/// What happened to a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Stored { chunks: usize },
    Skipped,
    Failed,
}

/// Drives ingestion over shared embedder and index services.
#[derive(Clone)]
pub struct Ingestor {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    settings: Arc<Settings>,
    progress: Arc<dyn ProgressReporter>,
    key_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl Ingestor {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            embedder,
            index,
            settings,
            progress: Arc::new(NoProgress),
            key_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Ingest every supported file under `dirs`.
    pub async fn ingest(&self, dirs: &[PathBuf]) -> IngestReport {
        for dir in dirs {
            self.progress.report(IngestEvent::Discovering {
                dir: dir.display().to_string(),
            });
        }

        let docs = iter_source_files(dirs, &self.settings);
        let mut report = IngestReport {
            scanned: docs.len(),
            ..Default::default()
        };

        if docs.is_empty() {
            let names: Vec<String> = dirs.iter().map(|d| d.display().to_string()).collect();
            tracing::warn!(
                "no supported files found; add documents to one of: {}",
                names.join(", ")
            );
            return report;
        }

        let total = docs.len() as u64;
        let permits = Arc::new(Semaphore::new(self.settings.ingest_concurrency.max(1)));
        let mut workers = JoinSet::new();

        for doc in docs {
            let this = self.clone();
            let permits = Arc::clone(&permits);
            workers.spawn(async move {
                let key = doc.source_key();
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => this.ingest_document(&doc).await,
                    Err(_) => FileOutcome::Failed,
                };
                (key, outcome)
            });
        }

        let mut done = 0u64;
        while let Some(joined) = workers.join_next().await {
            done += 1;
            let source = match joined {
                Ok((key, outcome)) => {
                    match outcome {
                        FileOutcome::Stored { chunks } => {
                            report.files += 1;
                            report.chunks += chunks;
                        }
                        FileOutcome::Skipped => report.skipped += 1,
                        FileOutcome::Failed => report.failed += 1,
                    }
                    key
                }
                Err(e) => {
                    tracing::warn!(error = %e, "ingest worker panicked");
                    report.failed += 1;
                    String::new()
                }
            };
            self.progress.report(IngestEvent::Ingesting {
                n: done,
                total,
                source,
            });
        }

        self.progress.report(IngestEvent::Finished {
            files: report.files as u64,
            chunks: report.chunks as u64,
        });
        tracing::info!(
            files = report.files,
            chunks = report.chunks,
            scanned = report.scanned,
            skipped = report.skipped,
            failed = report.failed,
            "ingestion complete"
        );
        report
    }

    /// Extract, chunk, embed and store one document.
    pub async fn ingest_document(&self, doc: &SourceDocument) -> FileOutcome {
        let key = doc.source_key();
        let path = doc.path.clone();
        let settings = Arc::clone(&self.settings);

        let extracted =
            tokio::task::spawn_blocking(move || extract::extract_file(&path, &settings)).await;
        let text = match extracted {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                tracing::warn!(source = %key, error = %e, "extraction failed");
                return FileOutcome::Failed;
            }
            Err(e) => {
                tracing::warn!(source = %key, error = %e, "extraction task aborted");
                return FileOutcome::Failed;
            }
        };

        if text.trim().is_empty() {
            tracing::warn!(source = %key, "no readable text (maybe scan/OCR needed)");
            return FileOutcome::Skipped;
        }

        let chunks = chunk::split(&text, self.settings.chunk_size, self.settings.chunk_overlap);
        if chunks.is_empty() {
            tracing::warn!(source = %key, "no chunks produced");
            return FileOutcome::Skipped;
        }

        let embeddings = match self.embedder.embed(&chunks).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(source = %key, error = %e, "embedding failed");
                return FileOutcome::Failed;
            }
        };

        let lock = self.key_lock(&key).await;
        let _guard = lock.lock().await;
        match self.index.upsert_source(&key, &chunks, &embeddings).await {
            Ok(n) => {
                tracing::info!(source = %key, chunks = n, "stored");
                FileOutcome::Stored { chunks: n }
            }
            Err(e) => {
                tracing::warn!(source = %key, error = %e, "upsert failed");
                FileOutcome::Failed
            }
        }
    }

    async fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        Arc::clone(locks.entry(key.to_string()).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::store::MemoryIndex;

    fn settings() -> Settings {
        Settings {
            chunk_size: 40,
            chunk_overlap: 5,
            ..Settings::default()
        }
    }

    #[test]
    fn iter_source_files_filters_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        let texts = tmp.path().join("texts");
        std::fs::create_dir_all(texts.join("sub")).unwrap();
        std::fs::write(texts.join("b.txt"), "b").unwrap();
        std::fs::write(texts.join("sub/a.MD"), "a").unwrap();
        std::fs::write(texts.join(".hidden.txt"), "h").unwrap();
        std::fs::write(texts.join("image.png"), "x").unwrap();

        let docs = iter_source_files(
            &[texts.clone(), tmp.path().join("missing")],
            &settings(),
        );
        let keys: Vec<String> = docs.iter().map(|d| d.source_key()).collect();
        assert_eq!(keys, vec!["texts/b.txt", "texts/sub/a.MD"]);
    }

    #[tokio::test]
    async fn blank_and_failing_files_are_counted() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("data");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("blank.txt"), "   \n\t").unwrap();
        std::fs::write(dir.join("broken.pdf"), b"not a pdf").unwrap();
        std::fs::write(dir.join("good.md"), "Brand is a promise kept over time.").unwrap();

        let index = Arc::new(MemoryIndex::new());
        let ingestor = Ingestor::new(
            Arc::new(HashEmbedder::default()),
            index.clone(),
            Arc::new(settings()),
        );
        let report = ingestor.ingest(&[dir]).await;

        assert_eq!(report.scanned, 3);
        assert_eq!(report.files, 1);
        assert_eq!(report.chunks, 1);
        assert_eq!(report.skipped + report.failed, 2);
        assert_eq!(index.ids().await.unwrap(), vec!["data/good.md#0"]);
    }

    #[tokio::test]
    async fn empty_directory_yields_zero_report() {
        let tmp = tempfile::tempdir().unwrap();
        let ingestor = Ingestor::new(
            Arc::new(HashEmbedder::default()),
            Arc::new(MemoryIndex::new()),
            Arc::new(settings()),
        );
        let report = ingestor.ingest(&[tmp.path().to_path_buf()]).await;
        assert_eq!(report, IngestReport::default());
    }
}
