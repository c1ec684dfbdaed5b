//! Resume: which documents are already in the output table?
//!
//! The persisted table is the only batch state. At startup it is loaded,
//! the set of identifiers it contains is derived once, and the discovered
//! documents are filtered down to the ones not yet present. A document that
//! failed on an earlier run contributed no rows, so it is simply pending
//! again.
//!
//! An unreadable or foreign table never aborts the batch: it is logged and
//! treated as empty. The next commit then overwrites it.

use crate::pipeline::document::DocumentRef;
use crate::schema::{IdentityPolicy, SchemaVariant};
use crate::table::io::load_table;
use crate::table::OutputTable;
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

/// Load the table persisted at `path`, degrading to an empty table.
pub fn load_existing(path: &Path, variant: SchemaVariant) -> OutputTable {
    match load_table(path, variant) {
        Ok(Some(table)) => {
            info!(
                "Loaded {} existing rows from {}",
                table.len(),
                path.display()
            );
            table
        }
        Ok(None) => {
            info!("No existing output at {}. Starting fresh.", path.display());
            OutputTable::new(variant)
        }
        Err(e) => {
            warn!("{}. Starting with an empty table.", e);
            OutputTable::new(variant)
        }
    }
}

/// Identifiers of documents already reflected in a table.
///
/// A snapshot taken once per run; it is never updated as documents
/// complete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessedSet {
    ids: HashSet<String>,
}

impl ProcessedSet {
    /// Derive the set from `table` under its variant's identity policy.
    ///
    /// Identifiers are compared verbatim. Rows without an identifier are
    /// ignored.
    pub fn from_table(table: &OutputTable) -> Self {
        let variant = table.variant();
        let mut ids = HashSet::new();
        let mut duplicates = 0usize;
        for id in table.rows().iter().filter_map(|r| r.document_id(variant)) {
            if !ids.insert(id.to_string()) {
                duplicates += 1;
            }
        }

        if duplicates > 0 && variant.identity_policy() == IdentityPolicy::PerLineItem {
            warn!(
                "{} rows repeat an existing '{}' value; each document is expected once",
                duplicates,
                variant.id_column()
            );
        }
        Self { ids }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Outcome of [`resume`].
#[derive(Debug, Clone)]
pub struct ResumePlan {
    pub processed: ProcessedSet,
    /// Documents still to do, in discovery order.
    pub pending: Vec<DocumentRef>,
    /// Documents discovered in the source directory.
    pub total: usize,
    /// Discovered documents already present in the table.
    pub already_processed: usize,
}

/// Split `documents` into done and pending according to `existing`.
pub fn resume(existing: &OutputTable, documents: &[DocumentRef]) -> ResumePlan {
    let processed = ProcessedSet::from_table(existing);
    let pending: Vec<DocumentRef> = documents
        .iter()
        .filter(|d| !processed.contains(&d.id))
        .cloned()
        .collect();
    ResumePlan {
        total: documents.len(),
        already_processed: documents.len() - pending.len(),
        processed,
        pending,
    }
}
