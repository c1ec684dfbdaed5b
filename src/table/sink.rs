//! Incremental persistence: rewrite the whole table after every document.
//!
//! The in-memory [`OutputTable`] is the source of truth. Each commit renders
//! all of it and atomically replaces the file, so a crash loses at most the
//! document in flight and a failed write is repaired by the next successful
//! commit.

use crate::error::TableError;
use crate::table::io::{save_table, TableFormat};
use crate::table::OutputTable;
use std::path::{Path, PathBuf};
use tracing::info;

/// The persisted output table.
#[derive(Debug, Clone)]
pub struct TableSink {
    path: PathBuf,
    format: TableFormat,
}

impl TableSink {
    /// Sink writing to `path`. Fails when the extension is not `.xlsx`/`.csv`.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, TableError> {
        let path = path.into();
        let format = TableFormat::from_path(&path)?;
        Ok(Self { path, format })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> TableFormat {
        self.format
    }

    /// File name of the output, for download headers.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "results".to_string())
    }

    /// Replace the persisted table with `table`.
    pub async fn commit(&self, table: &OutputTable) -> Result<(), TableError> {
        save_table(&self.path, table).await
    }

    /// Current file contents, or `None` when nothing was persisted yet.
    pub async fn read_bytes(&self) -> Result<Option<Vec<u8>>, TableError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TableError::Read {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    /// Delete the persisted table. A missing file is not an error.
    pub async fn clear(&self) -> Result<(), TableError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!("Removed {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TableError::Write {
                path: self.path.clone(),
                source: e,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Cell;
    use crate::schema::SchemaVariant;
    use crate::table::Row;

    #[test]
    fn rejects_unknown_extension() {
        assert!(matches!(
            TableSink::new("results.txt"),
            Err(TableError::UnsupportedFormat { .. })
        ));
    }

    #[tokio::test]
    async fn commit_rewrites_whole_table() {
        let dir = tempfile::tempdir().unwrap();
        let sink = TableSink::new(dir.path().join("out.csv")).unwrap();
        let mut table = OutputTable::new(SchemaVariant::InvoiceSummary);

        table.extend([Row::from_cells(vec![Cell::Text("a.pdf".into())])]);
        sink.commit(&table).await.unwrap();
        table.extend([Row::from_cells(vec![Cell::Text("b.pdf".into())])]);
        sink.commit(&table).await.unwrap();

        let text = String::from_utf8(sink.read_bytes().await.unwrap().unwrap()).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().nth(1).unwrap().starts_with("a.pdf,"));
        assert_eq!(sink.file_name(), "out.csv");
    }

    #[tokio::test]
    async fn failed_write_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not a directory").unwrap();
        let sink = TableSink::new(blocker.join("out.xlsx")).unwrap();
        let table = OutputTable::new(SchemaVariant::ContainerLines);
        assert!(matches!(
            sink.commit(&table).await,
            Err(TableError::Write { .. })
        ));
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let sink = TableSink::new(dir.path().join("out.xlsx")).unwrap();
        sink.commit(&OutputTable::new(SchemaVariant::ContainerLines))
            .await
            .unwrap();
        assert!(sink.read_bytes().await.unwrap().is_some());
        sink.clear().await.unwrap();
        sink.clear().await.unwrap();
        assert!(sink.read_bytes().await.unwrap().is_none());
    }
}
