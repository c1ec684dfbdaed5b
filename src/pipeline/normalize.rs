//! Row normaliser: one [`Record`] → one or more full-width [`Row`]s.
//!
//! Expansion is driven by the variant's multiplicity column:
//!
//! ```text
//! container_numbers: ["BMOU1441213", "MSKU9876543"]     → 2 rows
//! gross_weights:     [7678.28]                          → 7678.28, null
//! total_amount:      1341.00                            → copied to both
//! ```
//!
//! * an absent or empty multiplicity list counts as `[null]`, so every
//!   processed document leaves at least one row;
//! * a scalar where a list was expected is a one-element list;
//! * parallel lists shorter than the multiplicity list are right-padded with
//!   `null`; surplus elements are never read.
//!
//! The function is total over any [`Record`]: there is no error path.

use crate::record::{Cell, Record};
use crate::schema::{ColumnRole, SchemaVariant};
use crate::table::Row;
use tracing::debug;

/// Expand `record` into rows for `variant`, tagged with `document_id`.
pub fn normalize(record: &Record, document_id: &str, variant: SchemaVariant) -> Vec<Row> {
    let columns = variant.columns();

    let line_items: Vec<Cell> = match variant.multiplicity() {
        Some((_, column)) => {
            let items = record.field(column.source).into_list();
            if items.is_empty() {
                vec![Cell::Null]
            } else {
                items
            }
        }
        None => vec![Cell::Null],
    };
    let row_count = line_items.len();

    // Column-major: each column becomes exactly `row_count` cells.
    let mut by_column: Vec<Vec<Cell>> = Vec::with_capacity(columns.len());
    for column in columns {
        let cells = match column.role {
            ColumnRole::DocumentId => vec![Cell::Text(document_id.to_string()); row_count],
            ColumnRole::Scalar => {
                let value = record.field(column.source).into_scalar().coerce(column.kind);
                vec![value; row_count]
            }
            ColumnRole::Multiplicity => line_items
                .iter()
                .map(|c| c.clone().coerce(column.kind))
                .collect(),
            ColumnRole::Parallel => {
                let mut values = record.field(column.source).into_list();
                if values.len() > row_count {
                    debug!(
                        "{}: {} has {} values for {} line items; surplus ignored",
                        document_id,
                        column.source,
                        values.len(),
                        row_count
                    );
                }
                values.resize(row_count.max(values.len()), Cell::Null);
                values
                    .into_iter()
                    .take(row_count)
                    .map(|c| c.coerce(column.kind))
                    .collect()
            }
        };
        by_column.push(cells);
    }

    (0..row_count)
        .map(|i| {
            Row::from_cells(
                by_column
                    .iter_mut()
                    .map(|cells| std::mem::take(&mut cells[i]))
                    .collect(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Field;

    fn text(s: &str) -> Cell {
        Cell::Text(s.into())
    }

    fn column(rows: &[Row], variant: SchemaVariant, name: &str) -> Vec<Cell> {
        let idx = variant.column_names().position(|c| c == name).unwrap();
        rows.iter().map(|r| r.cells()[idx].clone()).collect()
    }

    #[test]
    fn two_containers_one_weight() {
        let v = SchemaVariant::ContainerLines;
        let record = Record::empty()
            .with(
                "container_numbers",
                Field::Many(vec![text("BMOU1441213"), text("MSKU9876543")]),
            )
            .with("gross_weights", Field::Many(vec![Cell::Number(7678.28)]))
            .with("total_amount", Field::One(Cell::Number(1341.0)));

        let rows = normalize(&record, "X.pdf", v);
        assert_eq!(rows.len(), 2);
        assert_eq!(
            column(&rows, v, "container_number"),
            [text("BMOU1441213"), text("MSKU9876543")]
        );
        assert_eq!(
            column(&rows, v, "gross_weight"),
            [Cell::Number(7678.28), Cell::Null]
        );
        assert_eq!(
            column(&rows, v, "total_amount"),
            [Cell::Number(1341.0), Cell::Number(1341.0)]
        );
        assert_eq!(column(&rows, v, "file_name"), [text("X.pdf"), text("X.pdf")]);
    }

    #[test]
    fn empty_record_yields_one_null_row() {
        for v in [SchemaVariant::ContainerLines, SchemaVariant::InvoiceSummary] {
            let rows = normalize(&Record::empty(), "empty.pdf", v);
            assert_eq!(rows.len(), 1);
            let cells = rows[0].cells();
            assert_eq!(cells.len(), v.width());
            for (i, cell) in cells.iter().enumerate() {
                if i == v.id_index() {
                    assert_eq!(cell, &text("empty.pdf"));
                } else {
                    assert!(cell.is_null(), "{v}: column {i} should be null");
                }
            }
        }
    }

    #[test]
    fn empty_multiplicity_list_is_one_row() {
        let v = SchemaVariant::ContainerLines;
        let record = Record::empty()
            .with("container_numbers", Field::Many(vec![]))
            .with("gross_weights", Field::Many(vec![Cell::Number(1.0)]))
            .with("invoice_number", Field::One(text("202057121")));
        let rows = normalize(&record, "a.pdf", v);
        assert_eq!(rows.len(), 1);
        assert_eq!(column(&rows, v, "container_number"), [Cell::Null]);
        assert_eq!(column(&rows, v, "gross_weight"), [Cell::Number(1.0)]);
        assert_eq!(column(&rows, v, "invoice_number"), [text("202057121")]);
    }

    #[test]
    fn scalar_multiplicity_is_coerced_to_list() {
        let v = SchemaVariant::ContainerLines;
        let record = Record::empty()
            .with("container_numbers", Field::One(text("MSKU2804235")))
            .with("gross_weights", Field::One(Cell::Number(5432.1)));
        let rows = normalize(&record, "a.pdf", v);
        assert_eq!(rows.len(), 1);
        assert_eq!(column(&rows, v, "container_number"), [text("MSKU2804235")]);
        assert_eq!(column(&rows, v, "gross_weight"), [Cell::Number(5432.1)]);
    }

    #[test]
    fn surplus_parallel_values_are_ignored() {
        let v = SchemaVariant::ContainerLines;
        let record = Record::empty()
            .with("container_numbers", Field::Many(vec![text("A")]))
            .with(
                "gross_weights",
                Field::Many(vec![Cell::Number(1.0), Cell::Number(2.0)]),
            );
        let rows = normalize(&record, "a.pdf", v);
        assert_eq!(rows.len(), 1);
        assert_eq!(column(&rows, v, "gross_weight"), [Cell::Number(1.0)]);
    }

    #[test]
    fn n_containers_m_weights_property() {
        let v = SchemaVariant::ContainerLines;
        for n in 1..6usize {
            for m in 0..n {
                let containers = (0..n).map(|i| text(&format!("C{i}"))).collect();
                let weights = (0..m).map(|i| Cell::Number(i as f64)).collect();
                let record = Record::empty()
                    .with("container_numbers", Field::Many(containers))
                    .with("gross_weights", Field::Many(weights));
                let rows = normalize(&record, "p.pdf", v);
                assert_eq!(rows.len(), n);
                let w = column(&rows, v, "gross_weight");
                assert!(w[m..].iter().all(Cell::is_null));
                assert!(w[..m].iter().all(|c| !c.is_null()));
            }
        }
    }

    #[test]
    fn invoice_summary_is_one_row_per_document() {
        let v = SchemaVariant::InvoiceSummary;
        let record = Record::empty()
            .with("invoice_number", Field::One(Cell::Number(7_000_123.0)))
            .with(
                "container_number",
                Field::Many(vec![text("MSKU1234567"), text("MRKU7654321")]),
            )
            .with("total_payable_amount", Field::One(text("12,289.10")));
        let rows = normalize(&record, "inv.pdf", v);
        assert_eq!(rows.len(), 1);
        assert_eq!(column(&rows, v, "filename"), [text("inv.pdf")]);
        assert_eq!(column(&rows, v, "invoice_number"), [text("7000123")]);
        assert_eq!(
            column(&rows, v, "container_number"),
            [text("MSKU1234567, MRKU7654321")]
        );
        assert_eq!(
            column(&rows, v, "total_payable_amount"),
            [Cell::Number(12289.1)]
        );
    }
}
