//! Typed view of one extraction result.
//!
//! The model answers with loosely shaped JSON: any field may be `null`,
//! missing, a scalar where a list was asked for, or a list where a scalar was
//! asked for. Instead of probing `serde_json::Value` at every use site, the
//! response is parsed once into a [`Record`] whose fields are a tagged union
//! ([`Field::Absent`] / [`Field::One`] / [`Field::Many`]). The row normaliser
//! then pattern-matches exhaustively over those tags.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::schema::CellKind;

/// A single table cell.
///
/// Serialises as JSON `null`, a string, or a number.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    /// Missing value. Written as an empty cell.
    #[default]
    Null,
    Number(f64),
    Text(String),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Text content, if this is a text cell.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Convert the cell to the column's declared kind.
    ///
    /// Blank text becomes `Null`. Text in a number column is parsed when it is
    /// a plain decimal (thousands commas are dropped); anything else is kept
    /// verbatim. Numbers in a text column are
    /// rendered without a trailing `.0`.
    pub fn coerce(self, kind: CellKind) -> Cell {
        match (self, kind) {
            (Cell::Text(s), _) if s.trim().is_empty() => Cell::Null,
            (Cell::Text(s), CellKind::Number) => match parse_number(&s) {
                Some(n) => Cell::Number(n),
                None => Cell::Text(s),
            },
            (Cell::Number(n), CellKind::Text) => Cell::Text(format_number(n)),
            (other, _) => other,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Text(s) => f.write_str(s),
            Cell::Number(n) => f.write_str(&format_number(*n)),
        }
    }
}

fn parse_number(s: &str) -> Option<f64> {
    let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// One field of a [`Record`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Field {
    /// Missing from the response, or explicitly `null`.
    #[default]
    Absent,
    /// A single scalar value.
    One(Cell),
    /// A list of values (possibly empty, elements possibly null).
    Many(Vec<Cell>),
}

impl Field {
    /// Interpret the field as a list: absent → empty, scalar → one element.
    pub fn into_list(self) -> Vec<Cell> {
        match self {
            Field::Absent => Vec::new(),
            Field::One(cell) => vec![cell],
            Field::Many(cells) => cells,
        }
    }

    /// Interpret the field as a single cell.
    ///
    /// A one-element list is unwrapped; a longer list is joined with `", "`.
    pub fn into_scalar(self) -> Cell {
        match self {
            Field::Absent => Cell::Null,
            Field::One(cell) => cell,
            Field::Many(mut cells) => {
                cells.retain(|c| !c.is_null());
                match cells.len() {
                    0 => Cell::Null,
                    1 => cells.remove(0),
                    _ => Cell::Text(
                        cells
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join(", "),
                    ),
                }
            }
        }
    }
}

/// Why a response could not be turned into a [`Record`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("response is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("field '{field}' has an unexpected shape ({found})")]
    UnexpectedShape { field: String, found: &'static str },
}

/// The schema-validated result of one extraction call.
///
/// Immutable once built. Unknown keys are kept (they are simply never read
/// by the normaliser) so a debug dump shows exactly what the model said.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: BTreeMap<String, Field>,
}

impl Record {
    /// A record with no fields at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse the model's JSON text.
    pub fn parse(text: &str) -> Result<Self, RecordError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| RecordError::InvalidJson(e.to_string()))?;
        Self::from_json(value)
    }

    /// Build a record from a JSON object.
    pub fn from_json(value: Value) -> Result<Self, RecordError> {
        let Value::Object(map) = value else {
            return Err(RecordError::NotAnObject(json_kind(&value)));
        };

        let mut fields = BTreeMap::new();
        for (key, value) in map {
            let field = match value {
                Value::Array(items) => Field::Many(
                    items
                        .into_iter()
                        .map(|item| scalar_cell(&key, item))
                        .collect::<Result<_, _>>()?,
                ),
                other => match scalar_cell(&key, other)? {
                    Cell::Null => Field::Absent,
                    cell => Field::One(cell),
                },
            };
            fields.insert(key, field);
        }
        Ok(Self { fields })
    }

    /// Builder-style setter, used by callers constructing records by hand.
    pub fn with(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    /// Field by name; missing keys read as [`Field::Absent`].
    pub fn field(&self, name: &str) -> Field {
        self.fields.get(name).cloned().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.values().all(|f| matches!(f, Field::Absent))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

fn scalar_cell(field: &str, value: Value) -> Result<Cell, RecordError> {
    match value {
        Value::Null => Ok(Cell::Null),
        Value::String(s) => Ok(Cell::Text(s)),
        Value::Number(n) => Ok(n.as_f64().map(Cell::Number).unwrap_or(Cell::Null)),
        Value::Bool(b) => Ok(Cell::Text(b.to_string())),
        other => Err(RecordError::UnexpectedShape {
            field: field.to_string(),
            found: json_kind(&other),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
