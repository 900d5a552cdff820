use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("row selector is empty")]
    EmptyRowSelector,
    #[error("at least one column selector is required")]
    NoColumns,
    #[error("column selector #{0} is empty")]
    EmptyColumn(usize),
    #[error("column selector {0:?} appears more than once")]
    DuplicateColumn(String),
}

/// How to find the repeating rows of a page and the named fields inside
/// each row.
///
/// The first column selector doubles as the page readiness signal: the
/// extractor waits for it before querying rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorSet {
    pub row_selector: String,
    pub column_selectors: Vec<String>,
}

impl SelectorSet {
    pub fn new(
        row_selector: impl Into<String>,
        column_selectors: Vec<String>,
    ) -> Result<Self, SelectorError> {
        let set = Self {
            row_selector: row_selector.into(),
            column_selectors,
        };
        set.validate()?;
        Ok(set)
    }

    /// Re-checks the invariants; needed for values that came in through serde.
    pub fn validate(&self) -> Result<(), SelectorError> {
        if self.row_selector.trim().is_empty() {
            return Err(SelectorError::EmptyRowSelector);
        }
        if self.column_selectors.is_empty() {
            return Err(SelectorError::NoColumns);
        }

        let mut seen = HashSet::with_capacity(self.column_selectors.len());
        for (idx, column) in self.column_selectors.iter().enumerate() {
            if column.trim().is_empty() {
                return Err(SelectorError::EmptyColumn(idx));
            }
            if !seen.insert(column.as_str()) {
                return Err(SelectorError::DuplicateColumn(column.clone()));
            }
        }
        Ok(())
    }

    pub fn ready_selector(&self) -> &str {
        &self.column_selectors[0]
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.column_selectors.iter().map(String::as_str)
    }
}
