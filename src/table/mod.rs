//! The in-memory output table.
//!
//! An [`OutputTable`] is a fixed column schema (its [`SchemaVariant`]) plus
//! the ordered rows produced so far. Every [`Row`] has exactly one cell per
//! column: rows coming from the normaliser are full-width by construction,
//! and rows loaded from disk are reconciled against the schema on the way in
//! ([`OutputTable::reconcile`]), so an old file with fewer columns gains the
//! missing ones as nulls and the column order never drifts between rewrites.

pub mod io;
pub mod resume;
pub mod sink;

use crate::record::Cell;
use crate::schema::{Column, SchemaVariant};
use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::debug;

/// One flattened output row, in schema column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    cells: Vec<Cell>,
}

impl Row {
    pub fn from_cells(cells: Vec<Cell>) -> Self {
        Self { cells }
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Cell at column `index`; out-of-range reads as null.
    pub fn get(&self, index: usize) -> &Cell {
        static NULL: Cell = Cell::Null;
        self.cells.get(index).unwrap_or(&NULL)
    }

    /// Source-document identifier of this row under `variant`.
    pub fn document_id(&self, variant: SchemaVariant) -> Option<&str> {
        self.get(variant.id_index()).as_text()
    }

    fn fit_to(&mut self, width: usize) {
        self.cells.resize(width, Cell::Null);
    }
}

/// Column schema + ordered rows.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTable {
    variant: SchemaVariant,
    rows: Vec<Row>,
}

impl OutputTable {
    /// Empty table for `variant`.
    pub fn new(variant: SchemaVariant) -> Self {
        Self {
            variant,
            rows: Vec::new(),
        }
    }

    pub fn variant(&self) -> SchemaVariant {
        self.variant
    }

    pub fn columns(&self) -> &'static [Column] {
        self.variant.columns()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append rows, padding or cutting each to the schema width.
    pub fn extend(&mut self, rows: impl IntoIterator<Item = Row>) {
        let width = self.variant.width();
        self.rows.extend(rows.into_iter().map(|mut row| {
            row.fit_to(width);
            row
        }));
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Whether the table has a header for the identifier column of `variant`.
    pub fn has_id_column(variant: SchemaVariant, headers: &[String]) -> bool {
        headers.iter().any(|h| h.trim() == variant.id_column())
    }

    /// Build a table from rows read back from disk.
    ///
    /// Columns are matched by header name. Schema columns missing from
    /// `headers` are filled with null for every row; headers the schema does
    /// not know are dropped. Cells are coerced to their column kind and
    /// fully blank rows are skipped.
    pub fn reconcile(variant: SchemaVariant, headers: &[String], raw_rows: Vec<Vec<Cell>>) -> Self {
        let positions: Vec<Option<usize>> = variant
            .columns()
            .iter()
            .map(|column| headers.iter().position(|h| h.trim() == column.name))
            .collect();

        let missing: Vec<&str> = variant
            .columns()
            .iter()
            .zip(&positions)
            .filter(|(_, pos)| pos.is_none())
            .map(|(c, _)| c.name)
            .collect();
        if !missing.is_empty() {
            debug!("Loaded table lacks columns {:?}; filled with null", missing);
        }

        let rows = raw_rows
            .into_iter()
            .filter(|raw| raw.iter().any(|c| !c.is_null()))
            .map(|mut raw| {
                let cells = variant
                    .columns()
                    .iter()
                    .zip(&positions)
                    .map(|(column, pos)| {
                        pos.and_then(|i| raw.get_mut(i).map(std::mem::take))
                            .unwrap_or_default()
                            .coerce(column.kind)
                    })
                    .collect();
                Row::from_cells(cells)
            })
            .collect();

        Self { variant, rows }
    }

    /// Serialisable views of the rows in `range`, keyed by column name.
    pub fn views(&self, range: std::ops::Range<usize>) -> Vec<RowView<'_>> {
        let end = range.end.min(self.rows.len());
        let start = range.start.min(end);
        self.rows[start..end]
            .iter()
            .map(|row| RowView {
                columns: self.columns(),
                row,
            })
            .collect()
    }
}

/// A row serialised as a JSON object in column order.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    columns: &'static [Column],
    row: &'a Row,
}

impl Serialize for RowView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (i, column) in self.columns.iter().enumerate() {
            map.serialize_entry(column.name, self.row.get(i))?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Cell {
        Cell::Text(s.into())
    }

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn reconcile_fills_missing_columns_with_null() {
        let v = SchemaVariant::ContainerLines;
        let table = OutputTable::reconcile(
            v,
            &headers(&["file_name", "invoice_number"]),
            vec![
                vec![text("a.pdf"), text("1")],
                vec![text("b.pdf"), text("2")],
            ],
        );
        assert_eq!(table.len(), 2);
        for row in table.rows() {
            assert_eq!(row.cells().len(), v.width());
            assert!(row.get(8).is_null(), "total_amount should be null");
        }
        assert_eq!(table.rows()[1].document_id(v), Some("b.pdf"));
    }

    #[test]
    fn reconcile_reorders_drops_extras_and_coerces() {
        let v = SchemaVariant::InvoiceSummary;
        let table = OutputTable::reconcile(
            v,
            &headers(&["total_payable_amount", "legacy_notes", " filename "]),
            vec![
                vec![text("650.00"), text("ignore me"), text("inv.pdf")],
                vec![Cell::Null, Cell::Null, Cell::Null],
            ],
        );
        assert_eq!(table.len(), 1);
        let row = &table.rows()[0];
        assert_eq!(row.get(0), &text("inv.pdf"));
        assert_eq!(row.get(8), &Cell::Number(650.0));
        assert!(row.cells().iter().all(|c| c.as_text() != Some("ignore me")));
    }

    #[test]
    fn id_column_detection() {
        assert!(OutputTable::has_id_column(
            SchemaVariant::ContainerLines,
            &headers(&["file_name"])
        ));
        assert!(!OutputTable::has_id_column(
            SchemaVariant::InvoiceSummary,
            &headers(&["file_name"])
        ));
    }

    #[test]
    fn extend_pads_short_rows() {
        let mut table = OutputTable::new(SchemaVariant::ContainerLines);
        table.extend([Row::from_cells(vec![text("a.pdf")])]);
        assert_eq!(table.rows()[0].cells().len(), 9);
    }

    #[test]
    fn row_view_serialises_in_column_order() {
        let mut table = OutputTable::new(SchemaVariant::InvoiceSummary);
        table.extend([Row::from_cells(vec![text("inv.pdf"), text("7000123")])]);
        let json = serde_json::to_string(&table.views(0..1)).unwrap();
        assert!(json.starts_with(r#"[{"filename":"inv.pdf","invoice_number":"7000123","invoice_date":null"#));
        assert!(table.views(5..9).is_empty());
    }
}
