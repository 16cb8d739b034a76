use std::collections::HashSet;
use std::io::Read;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::domain::SourceName;
use crate::error::KiraError;
use crate::fs_util::{open_text, write_bytes_atomic};
use crate::normalize::column_name;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnAliases {
    #[serde(default = "default_symbol_columns")]
    pub symbol: Vec<String>,
    #[serde(default = "default_primary_id_columns")]
    pub primary_id: Vec<String>,
    #[serde(default = "default_xref_id_columns")]
    pub xref_id: Vec<String>,
}

impl Default for ColumnAliases {
    fn default() -> Self {
        Self {
            symbol: default_symbol_columns(),
            primary_id: default_primary_id_columns(),
            xref_id: default_xref_id_columns(),
        }
    }
}

pub fn default_symbol_columns() -> Vec<String> {
    [
        "symbol",
        "gene",
        "gene_symbol",
        "hgnc_symbol",
        "approved_symbol",
        "gene_name",
        "name",
    ]
    .map(String::from)
    .to_vec()
}

pub fn default_primary_id_columns() -> Vec<String> {
    ["hgnc_id", "primary_id", "stable_id"]
        .map(String::from)
        .to_vec()
}

pub fn default_xref_id_columns() -> Vec<String> {
    [
        "ensembl_gene_id",
        "ensembl_id",
        "ensembl",
        "xref_id",
        "gene_id",
    ]
    .map(String::from)
    .to_vec()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub symbol: String,
    pub primary_id: Option<String>,
    pub xref_id: Option<String>,
    pub attributes: Vec<Option<String>>,
}

impl SourceRecord {
    pub fn attribute(&self, index: usize) -> Option<&str> {
        self.attributes.get(index).and_then(|v| v.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTable {
    pub name: SourceName,
    pub attribute_names: Vec<String>,
    pub records: Vec<SourceRecord>,
}

impl SourceTable {
    pub fn new(name: SourceName, attribute_names: Vec<String>) -> Self {
        Self {
            name,
            attribute_names,
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attribute_names.iter().position(|attr| attr == name)
    }

    pub fn push(
        &mut self,
        symbol: &str,
        primary_id: Option<&str>,
        xref_id: Option<&str>,
        attributes: &[(&str, &str)],
    ) {
        let mut values = vec![None; self.attribute_names.len()];
        for (name, value) in attributes {
            if let Some(index) = self.attribute_index(name) {
                values[index] = cell(value);
            }
        }
        self.records.push(SourceRecord {
            symbol: symbol.trim().to_string(),
            primary_id: primary_id.and_then(cell),
            xref_id: xref_id.and_then(cell),
            attributes: values,
        });
    }

    pub fn load(
        name: SourceName,
        path: &Utf8Path,
        delimiter: u8,
        aliases: &ColumnAliases,
    ) -> Result<Self, KiraError> {
        let reader = open_text(path)?;
        Self::from_reader(name, reader, delimiter, aliases).map_err(|err| match err {
            KiraError::TableParse { message, .. } => KiraError::TableParse {
                path: path.to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn from_reader<R: Read>(
        name: SourceName,
        reader: R,
        delimiter: u8,
        aliases: &ColumnAliases,
    ) -> Result<Self, KiraError> {
        let mut csv = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .has_headers(true)
            .from_reader(reader);
        let header: Vec<String> = csv
            .headers()
            .map_err(|err| parse_error(&name, err))?
            .iter()
            .map(column_name)
            .collect();

        let symbol_col = find_column(&header, &aliases.symbol).ok_or_else(|| {
            KiraError::SchemaMismatch {
                source_name: name.to_string(),
                field: "symbol".to_string(),
                header: header.join(","),
            }
        })?;
        let primary_col = find_column(&header, &aliases.primary_id);
        let xref_col = find_column(&header, &aliases.xref_id);

        let reserved = [Some(symbol_col), primary_col, xref_col];
        let mut seen = HashSet::new();
        let mut attribute_cols = Vec::new();
        let mut attribute_names = Vec::new();
        for (index, column) in header.iter().enumerate() {
            if reserved.contains(&Some(index)) || column.is_empty() {
                continue;
            }
            if !seen.insert(column.clone()) {
                tracing::warn!(source = %name, %column, "duplicate attribute column ignored");
                continue;
            }
            attribute_cols.push(index);
            attribute_names.push(column.clone());
        }

        let mut table = SourceTable::new(name, attribute_names);
        for row in csv.records() {
            let row = row.map_err(|err| parse_error(&table.name, err))?;
            let field = |index: Option<usize>| index.and_then(|i| row.get(i)).and_then(cell);
            let symbol = field(Some(symbol_col));
            let primary_id = field(primary_col);
            let xref_id = field(xref_col);
            if symbol.is_none() && primary_id.is_none() && xref_id.is_none() {
                continue;
            }
            let attributes = attribute_cols.iter().map(|&i| field(Some(i))).collect();
            table.records.push(SourceRecord {
                symbol: symbol.unwrap_or_default(),
                primary_id,
                xref_id,
                attributes,
            });
        }
        tracing::debug!(
            source = %table.name,
            rows = table.records.len(),
            attributes = table.attribute_names.len(),
            "source table ingested"
        );
        Ok(table)
    }
}

fn find_column(header: &[String], candidates: &[String]) -> Option<usize> {
    candidates.iter().find_map(|candidate| {
        let wanted = column_name(candidate);
        header.iter().position(|column| *column == wanted)
    })
}

fn parse_error(name: &SourceName, err: csv::Error) -> KiraError {
    KiraError::TableParse {
        path: name.to_string(),
        message: err.to_string(),
    }
}

pub fn cell(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("NA") {
        return None;
    }
    Some(trimmed.to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl Table {
    pub fn with_rows(row_count: usize) -> Self {
        Self {
            columns: Vec::new(),
            rows: vec![Vec::new(); row_count],
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Option<String>>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)?.as_deref()
    }

    pub fn column_values(&self, column: &str) -> Option<Vec<Option<&str>>> {
        let index = self.column_index(column)?;
        Some(self.rows.iter().map(|row| row[index].as_deref()).collect())
    }

    pub fn set_column(&mut self, name: &str, values: Vec<Option<String>>) -> Result<(), KiraError> {
        if values.len() != self.rows.len() {
            return Err(KiraError::InvalidConfig(format!(
                "column {name} has {} values for {} rows",
                values.len(),
                self.rows.len()
            )));
        }
        self.put_column(name, values);
        Ok(())
    }

    // Pads with nulls or truncates to the row count.
    pub(crate) fn put_column(&mut self, name: &str, mut values: Vec<Option<String>>) {
        values.resize(self.rows.len(), None);
        match self.column_index(name) {
            Some(index) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[index] = value;
                }
            }
            None => {
                self.columns.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
    }

    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: indices
                .iter()
                .filter_map(|&i| self.rows.get(i).cloned())
                .collect(),
        }
    }

    pub fn to_delimited(&self, delimiter: u8) -> Result<Vec<u8>, KiraError> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_writer(Vec::new());
        writer
            .write_record(&self.columns)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        for row in &self.rows {
            writer
                .write_record(row.iter().map(|v| v.as_deref().unwrap_or("")))
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        writer
            .into_inner()
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }

    pub fn write_tsv(&self, path: &Utf8Path) -> Result<(), KiraError> {
        let bytes = self.to_delimited(b'\t')?;
        write_bytes_atomic(path, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn name(value: &str) -> SourceName {
        value.parse().unwrap()
    }

    #[test]
    fn resolves_identifier_columns_from_aliases() {
        let input = "Gene Symbol\tHGNC ID\tEnsembl\tKinase Group\tFamily\n\
                     MAPK1\tHGNC:6871\tENSG00000100030\tCMGC\tMAPK\n\
                     \t\t\t\t\n\
                     CDK2\tNA\t\tCMGC\tCDK\n";
        let table = SourceTable::from_reader(
            name("manning"),
            input.as_bytes(),
            b'\t',
            &ColumnAliases::default(),
        )
        .unwrap();
        assert_eq!(table.attribute_names, vec!["kinase_group", "family"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.records[0].primary_id.as_deref(), Some("HGNC:6871"));
        assert_eq!(table.records[0].xref_id.as_deref(), Some("ENSG00000100030"));
        assert_eq!(table.records[1].primary_id, None);
        assert_eq!(table.records[1].attribute(1), Some("CDK"));
    }

    #[test]
    fn candidate_order_beats_header_order() {
        let input = "name,symbol\nfoo,TP53\n";
        let table = SourceTable::from_reader(
            name("census"),
            input.as_bytes(),
            b',',
            &ColumnAliases::default(),
        )
        .unwrap();
        assert_eq!(table.records[0].symbol, "TP53");
        assert_eq!(table.attribute_names, vec!["name"]);
    }

    #[test]
    fn missing_symbol_column_is_schema_mismatch() {
        let input = "id\tgroup\nX\tY\n";
        let err = SourceTable::from_reader(
            name("broken"),
            input.as_bytes(),
            b'\t',
            &ColumnAliases::default(),
        )
        .unwrap_err();
        assert_matches!(err, KiraError::SchemaMismatch { field, .. } if field == "symbol");
    }

    #[test]
    fn table_columns_align_with_rows() {
        let mut table = Table::with_rows(2);
        table
            .set_column("symbol", vec![Some("A".to_string()), Some("B".to_string())])
            .unwrap();
        table.set_column("group_x", vec![None, Some("G".to_string())]).unwrap();
        assert_eq!(table.value(1, "group_x"), Some("G"));
        assert_eq!(table.value(0, "group_x"), None);
        assert!(table.set_column("bad", vec![None]).is_err());

        let tsv = String::from_utf8(table.to_delimited(b'\t').unwrap()).unwrap();
        assert_eq!(tsv, "symbol\tgroup_x\nA\t\nB\tG\n");

        let picked = table.select_rows(&[1]);
        assert_eq!(picked.row_count(), 1);
        assert_eq!(picked.value(0, "symbol"), Some("B"));
    }
}
