//! Spreadsheet I/O: read and write the output table as `.xlsx` or `.csv`.
//!
//! The format is chosen from the file extension. Both directions go through
//! whole-file byte buffers so the sink can write atomically (temp file +
//! rename) and the service can stream the same bytes as a download.

use crate::error::TableError;
use crate::record::Cell;
use crate::schema::SchemaVariant;
use crate::table::OutputTable;
use calamine::{open_workbook_from_rs, Data, Reader, Xlsx};
use rust_xlsxwriter::{Format, Workbook};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// Name of the single worksheet written to `.xlsx` outputs.
pub const SHEET_NAME: &str = "Results";

/// On-disk table format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Xlsx,
    Csv,
}

impl TableFormat {
    /// Format implied by the extension of `path`.
    pub fn from_path(path: &Path) -> Result<Self, TableError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("xlsx") => Ok(TableFormat::Xlsx),
            Some("csv") => Ok(TableFormat::Csv),
            _ => Err(TableError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            TableFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            TableFormat::Csv => "text/csv; charset=utf-8",
        }
    }
}

/// Load a previously persisted table.
///
/// Returns `Ok(None)` when the file does not exist. A table whose header
/// lacks the variant's identifier column is reported as corrupt: it was
/// written for the other schema variant.
pub fn load_table(path: &Path, variant: SchemaVariant) -> Result<Option<OutputTable>, TableError> {
    let format = TableFormat::from_path(path)?;
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(TableError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    let (headers, rows) = match format {
        TableFormat::Xlsx => read_xlsx(bytes),
        TableFormat::Csv => read_csv(&bytes),
    }
    .map_err(|detail| TableError::Corrupt {
        path: path.to_path_buf(),
        detail,
    })?;

    if headers.is_empty() && rows.is_empty() {
        return Ok(Some(OutputTable::new(variant)));
    }
    if !OutputTable::has_id_column(variant, &headers) {
        return Err(TableError::Corrupt {
            path: path.to_path_buf(),
            detail: format!(
                "no '{}' column; the table was not written for the {} layout",
                variant.id_column(),
                variant
            ),
        });
    }

    debug!("Read {} data rows from {}", rows.len(), path.display());
    Ok(Some(OutputTable::reconcile(variant, &headers, rows)))
}

type RawTable = (Vec<String>, Vec<Vec<Cell>>);

fn read_xlsx(bytes: Vec<u8>) -> Result<RawTable, String> {
    let mut workbook: Xlsx<_> =
        open_workbook_from_rs(Cursor::new(bytes)).map_err(|e| format!("{e}"))?;
    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range.map_err(|e| format!("{e}"))?,
        None => return Ok((Vec::new(), Vec::new())),
    };

    let mut rows = range.rows();
    let headers = match rows.next() {
        Some(header) => header.iter().map(|c| c.to_string().trim().to_string()).collect(),
        None => return Ok((Vec::new(), Vec::new())),
    };
    let data = rows
        .map(|row| row.iter().map(cell_from_xlsx).collect())
        .collect();
    Ok((headers, data))
}

fn cell_from_xlsx(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Null,
        Data::String(s) => Cell::Text(s.clone()),
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Error(_) => Cell::Null,
        other => Cell::Text(other.to_string()),
    }
}

fn read_csv(bytes: &[u8]) -> Result<RawTable, String> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|e| e.to_string())?
        .iter()
        .map(str::to_string)
        .collect();

    let mut data = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| e.to_string())?;
        data.push(
            record
                .iter()
                .map(|s| Cell::Text(s.to_string()))
                .collect(),
        );
    }
    Ok((headers, data))
}

/// Render the whole table to file bytes.
pub fn render_table(table: &OutputTable, format: TableFormat) -> Result<Vec<u8>, TableError> {
    match format {
        TableFormat::Xlsx => render_xlsx(table),
        TableFormat::Csv => render_csv(table),
    }
}

fn render_xlsx(table: &OutputTable) -> Result<Vec<u8>, TableError> {
    let encode = |e: rust_xlsxwriter::XlsxError| TableError::Encode(e.to_string());

    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME).map_err(encode)?;

    for (col, column) in table.columns().iter().enumerate() {
        sheet
            .write_string_with_format(0, col as u16, column.name, &header_format)
            .map_err(encode)?;
    }
    for (r, row) in table.rows().iter().enumerate() {
        let excel_row = (r + 1) as u32;
        for (col, cell) in row.cells().iter().enumerate() {
            match cell {
                Cell::Null => {}
                Cell::Text(s) => {
                    sheet
                        .write_string(excel_row, col as u16, s.as_str())
                        .map_err(encode)?;
                }
                Cell::Number(n) => {
                    sheet
                        .write_number(excel_row, col as u16, *n)
                        .map_err(encode)?;
                }
            }
        }
    }
    sheet.set_freeze_panes(1, 0).map_err(encode)?;

    workbook.save_to_buffer().map_err(encode)
}

fn render_csv(table: &OutputTable) -> Result<Vec<u8>, TableError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(table.columns().iter().map(|c| c.name))
        .map_err(|e| TableError::Encode(e.to_string()))?;
    for row in table.rows() {
        writer
            .write_record(row.cells().iter().map(|c| c.to_string()))
            .map_err(|e| TableError::Encode(e.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| TableError::Encode(e.to_string()))
}

/// Atomically replace `path` with the rendered table (temp file + rename).
pub async fn save_table(path: &Path, table: &OutputTable) -> Result<(), TableError> {
    let format = TableFormat::from_path(path)?;
    let bytes = render_table(table, format)?;
    let write_err = |e| TableError::Write {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);
    tokio::fs::write(&tmp_path, &bytes).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    debug!(
        "Wrote {} rows ({} bytes) to {}",
        table.len(),
        bytes.len(),
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Row;

    fn sample(variant: SchemaVariant) -> OutputTable {
        let mut table = OutputTable::new(variant);
        let mut cells = vec![Cell::Null; variant.width()];
        cells[0] = Cell::Text("X.pdf".into());
        cells[2] = Cell::Text("202057121".into());
        cells[variant.width() - 1] = Cell::Number(1341.5);
        table.extend([Row::from_cells(cells)]);
        table
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(
            TableFormat::from_path(Path::new("out/Results.XLSX")).unwrap(),
            TableFormat::Xlsx
        );
        assert_eq!(
            TableFormat::from_path(Path::new("r.csv")).unwrap(),
            TableFormat::Csv
        );
        assert!(TableFormat::from_path(Path::new("r.json")).is_err());
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.xlsx");
        assert!(load_table(&path, SchemaVariant::ContainerLines)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn xlsx_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.xlsx");
        let table = sample(SchemaVariant::ContainerLines);
        save_table(&path, &table).await.unwrap();

        let loaded = load_table(&path, SchemaVariant::ContainerLines)
            .unwrap()
            .unwrap();
        assert_eq!(loaded, table);
        assert!(!dir.path().join("nested/out.xlsx.tmp").exists());
    }

    #[tokio::test]
    async fn csv_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let table = sample(SchemaVariant::InvoiceSummary);
        save_table(&path, &table).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("filename,invoice_number,invoice_date,"));
        let loaded = load_table(&path, SchemaVariant::InvoiceSummary)
            .unwrap()
            .unwrap();
        assert_eq!(loaded, table);
    }

    #[test]
    fn garbage_xlsx_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.xlsx");
        std::fs::write(&path, b"this is not a zip archive").unwrap();
        assert!(matches!(
            load_table(&path, SchemaVariant::ContainerLines),
            Err(TableError::Corrupt { .. })
        ));
    }

    #[test]
    fn other_variant_table_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.csv");
        std::fs::write(&path, "filename,invoice_number\ninv.pdf,1\n").unwrap();
        assert!(matches!(
            load_table(&path, SchemaVariant::ContainerLines),
            Err(TableError::Corrupt { .. })
        ));
    }
}
