//! Output column schemas and the model response contract.
//!
//! Two document families are supported, each with a fixed column order:
//!
//! | Variant | Rows | Identifier | Identity policy |
//! |---------|------|------------|-----------------|
//! | [`SchemaVariant::ContainerLines`] | one per container | `file_name` | per document |
//! | [`SchemaVariant::InvoiceSummary`] | one per document  | `filename`  | per line item |
//!
//! Every column knows which response field feeds it and what role it plays
//! during row expansion, so the normaliser, the table loader and the JSON
//! schema sent to the model are all driven by the same table below.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

/// Value type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Text,
    Number,
}

/// How a column is populated from a [`crate::record::Record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    /// The source document identifier (file name). Not requested from the model.
    DocumentId,
    /// Copied verbatim into every row produced from the record.
    Scalar,
    /// The list whose length decides how many rows a record expands into.
    Multiplicity,
    /// A list read index-aligned with the multiplicity list.
    Parallel,
}

/// One output column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    /// Header written to the output table.
    pub name: &'static str,
    /// Key in the model response that feeds this column.
    pub source: &'static str,
    pub kind: CellKind,
    pub role: ColumnRole,
}

const fn col(name: &'static str, source: &'static str, kind: CellKind, role: ColumnRole) -> Column {
    Column {
        name,
        source,
        kind,
        role,
    }
}

use CellKind::{Number, Text};
use ColumnRole::{DocumentId, Multiplicity, Parallel, Scalar};

const CONTAINER_LINES: &[Column] = &[
    col("file_name", "file_name", Text, DocumentId),
    col("invoice_date", "invoice_date", Text, Scalar),
    col("invoice_number", "invoice_number", Text, Scalar),
    col("bl_number", "bl_number", Text, Scalar),
    col("port_of_loading", "port_of_loading", Text, Scalar),
    col("cy_cfs_destination", "cy_cfs_destination", Text, Scalar),
    col("container_number", "container_numbers", Text, Multiplicity),
    col("gross_weight", "gross_weights", Number, Parallel),
    col("total_amount", "total_amount", Number, Scalar),
];

const INVOICE_SUMMARY: &[Column] = &[
    col("filename", "filename", Text, DocumentId),
    col("invoice_number", "invoice_number", Text, Scalar),
    col("invoice_date", "invoice_date", Text, Scalar),
    col("place_of_receipt", "place_of_receipt", Text, Scalar),
    col("place_of_delivery", "place_of_delivery", Text, Scalar),
    col("bl_number", "bl_number", Text, Scalar),
    col("container_number", "container_number", Text, Scalar),
    col("pcd", "pcd", Text, Scalar),
    col("total_payable_amount", "total_payable_amount", Number, Scalar),
];

/// How previously persisted rows mark a document as done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityPolicy {
    /// Any row carrying the identifier marks the whole document as done,
    /// however many rows it produced.
    PerDocument,
    /// Each row is one document; the identifier column marks completion and
    /// is expected to be unique.
    PerLineItem,
}

/// The output table layout in effect for a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaVariant {
    /// Variant A: one row per container, weights aligned by index (default).
    #[default]
    ContainerLines,
    /// Variant B: one row per invoice, a single container column.
    InvoiceSummary,
}

impl SchemaVariant {
    /// Columns in output order.
    pub fn columns(self) -> &'static [Column] {
        match self {
            SchemaVariant::ContainerLines => CONTAINER_LINES,
            SchemaVariant::InvoiceSummary => INVOICE_SUMMARY,
        }
    }

    pub fn column_names(self) -> impl Iterator<Item = &'static str> {
        self.columns().iter().map(|c| c.name)
    }

    pub fn width(self) -> usize {
        self.columns().len()
    }

    /// Position of the document identifier column.
    pub fn id_index(self) -> usize {
        self.columns()
            .iter()
            .position(|c| c.role == ColumnRole::DocumentId)
            .unwrap_or(0)
    }

    pub fn id_column(self) -> &'static str {
        self.columns()[self.id_index()].name
    }

    /// The multiplicity column, if this variant expands records into several rows.
    pub fn multiplicity(self) -> Option<(usize, &'static Column)> {
        self.columns()
            .iter()
            .enumerate()
            .find(|(_, c)| c.role == ColumnRole::Multiplicity)
    }

    /// Identity policy bound to this variant. Never mixed within one table.
    pub fn identity_policy(self) -> IdentityPolicy {
        match self {
            SchemaVariant::ContainerLines => IdentityPolicy::PerDocument,
            SchemaVariant::InvoiceSummary => IdentityPolicy::PerLineItem,
        }
    }

    /// JSON schema for the model response (Gemini `responseSchema` dialect).
    ///
    /// Every property is nullable: absence is an expected answer, and the
    /// schema must never push the model into inventing a value.
    pub fn response_schema(self) -> Value {
        let mut properties = Map::new();
        let mut order = Vec::new();
        for column in self.columns() {
            let item_type = match column.kind {
                CellKind::Text => "STRING",
                CellKind::Number => "NUMBER",
            };
            let property = match column.role {
                ColumnRole::DocumentId => continue,
                ColumnRole::Scalar => json!({ "type": item_type, "nullable": true }),
                ColumnRole::Multiplicity | ColumnRole::Parallel => json!({
                    "type": "ARRAY",
                    "items": { "type": item_type },
                    "nullable": true,
                }),
            };
            properties.insert(column.source.to_string(), property);
            order.push(Value::String(column.source.to_string()));
        }
        json!({
            "type": "OBJECT",
            "properties": properties,
            "propertyOrdering": order,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SchemaVariant::ContainerLines => "container-lines",
            SchemaVariant::InvoiceSummary => "invoice-summary",
        }
    }
}

impl fmt::Display for SchemaVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "container-lines" | "a" => Ok(SchemaVariant::ContainerLines),
            "invoice-summary" | "b" => Ok(SchemaVariant::InvoiceSummary),
            other => Err(format!(
                "unknown schema variant '{other}' (expected container-lines or invoice-summary)"
            )),
        }
    }
}
