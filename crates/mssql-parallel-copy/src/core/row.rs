//! Row representation passed from a partition reader to a bulk writer.

use tiberius::{ColumnData, TokenRow};

/// One source row.
///
/// Values are kept in the TDS wire representation they were read in, so a
/// SQL Server to SQL Server copy never converts types.
#[derive(Debug, Clone, PartialEq)]
pub struct RowData {
    values: Vec<ColumnData<'static>>,
}

impl RowData {
    pub fn new(values: Vec<ColumnData<'static>>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[ColumnData<'static>] {
        &self.values
    }

    /// Convert into a row for a TDS bulk-load request.
    pub fn into_token_row(self) -> TokenRow<'static> {
        let mut row = TokenRow::new();
        for value in self.values {
            row.push(value);
        }
        row
    }
}

impl From<tiberius::Row> for RowData {
    fn from(row: tiberius::Row) -> Self {
        Self::new(row.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    #[test]
    fn test_into_token_row_keeps_column_count() {
        let row = RowData::new(vec![
            ColumnData::I64(Some(42)),
            ColumnData::String(Some(Cow::Borrowed("abc"))),
            ColumnData::I32(None),
        ]);
        assert_eq!(row.values().len(), 3);
        let token_row = row.into_token_row();
        assert_eq!(token_row.len(), 3);
    }
}
