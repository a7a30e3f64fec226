//! CSV loading for the command-line entry point.
//!
//! A [`Dataset`] is a header row plus a dense numeric table. Every cell must
//! parse as a finite `f64`; categorical encodings are left to the caller.

use csv::ReaderBuilder;
use ndarray::{Array1, Array2};
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("failed to open csv '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: csv::Error,
    },
    #[error("failed reading csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("csv has no headers")]
    NoHeaders,
    #[error("csv has no rows")]
    NoRows,
    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),
    #[error("empty field at row {row}, column '{column}'")]
    EmptyField { row: usize, column: String },
    #[error("non-numeric value '{value}' at row {row}, column '{column}'")]
    NonNumeric {
        row: usize,
        column: String,
        value: String,
    },
    #[error("non-finite value at row {row}, column '{column}'")]
    NonFinite { row: usize, column: String },
    #[error("unknown column '{0}'")]
    UnknownColumn(String),
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub headers: Vec<String>,
    /// (rows, headers.len())
    pub values: Array2<f64>,
}

impl Dataset {
    pub fn from_path(path: &Path) -> Result<Self, DataError> {
        let rdr = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|source| DataError::Open {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_csv(rdr)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, DataError> {
        let rdr = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        Self::from_csv(rdr)
    }

    fn from_csv<R: Read>(mut rdr: csv::Reader<R>) -> Result<Self, DataError> {
        let headers = rdr
            .headers()?
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>();
        if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
            return Err(DataError::NoHeaders);
        }
        let mut seen = HashSet::new();
        for h in &headers {
            if !seen.insert(h.as_str()) {
                return Err(DataError::DuplicateColumn(h.clone()));
            }
        }

        let mut flat = Vec::<f64>::new();
        let mut rows = 0usize;
        for rec in rdr.records() {
            let record = rec?;
            rows += 1;
            for (raw, column) in record.iter().zip(&headers) {
                if raw.is_empty() {
                    return Err(DataError::EmptyField {
                        row: rows,
                        column: column.clone(),
                    });
                }
                let value = raw.parse::<f64>().map_err(|_| DataError::NonNumeric {
                    row: rows,
                    column: column.clone(),
                    value: raw.to_string(),
                })?;
                if !value.is_finite() {
                    return Err(DataError::NonFinite {
                        row: rows,
                        column: column.clone(),
                    });
                }
                flat.push(value);
            }
        }
        if rows == 0 {
            return Err(DataError::NoRows);
        }

        let values = Array2::from_shape_vec((rows, headers.len()), flat)
            .map_err(|_| DataError::NoRows)?;
        log::debug!("loaded csv with {} rows and columns {:?}", rows, headers);
        Ok(Self { headers, values })
    }

    pub fn num_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn column_index(&self, name: &str) -> Result<usize, DataError> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| DataError::UnknownColumn(name.to_string()))
    }

    pub fn column(&self, name: &str) -> Result<Array1<f64>, DataError> {
        let idx = self.column_index(name)?;
        Ok(self.values.column(idx).to_owned())
    }

    /// Columns in the requested order, as an (rows, names.len()) matrix.
    pub fn columns<S: AsRef<str>>(&self, names: &[S]) -> Result<Array2<f64>, DataError> {
        let idx = names
            .iter()
            .map(|n| self.column_index(n.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.values.select(ndarray::Axis(1), &idx))
    }
}

/// Split a comma-separated column list, dropping blanks.
pub fn parse_column_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
