//! Delimited-text matrices in, match tables out.
//!
//! Input files carry a header row of column names followed by one row per
//! observation. Files ending in `.csv` are comma separated, everything else
//! is read as tab separated.

use csv::{ByteRecord, ReaderBuilder, Trim};
use ndarray::{Array2, ShapeError};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tcor::Match;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: csv::Error,
    },
    #[error("'{0}' has no header row of column names.")]
    MissingHeader(String),
    #[error("'{path}' line {line}: expected {expected} fields, found {found}.")]
    RaggedRow {
        path: String,
        line: u64,
        expected: usize,
        found: usize,
    },
    #[error("'{path}' line {line}, column '{column}': '{value}' is not a number.")]
    NotNumeric {
        path: String,
        line: u64,
        column: String,
        value: String,
    },
    #[error("'{0}' contains no observations.")]
    NoRows(String),
    #[error("Failed to assemble matrix: {0}")]
    Shape(#[from] ShapeError),
}

/// A numeric matrix and the names of its columns.
#[derive(Debug)]
pub struct Table {
    pub names: Vec<String>,
    pub values: Array2<f64>,
}

fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => b',',
        _ => b'\t',
    }
}

pub fn load_table(path: &Path) -> Result<Table, TableError> {
    let display = path.display().to_string();
    let read_error = |source| TableError::Read {
        path: path.display().to_string(),
        source,
    };

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter_for(path))
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)
        .map_err(read_error)?;

    let names: Vec<String> = reader
        .headers()
        .map_err(read_error)?
        .iter()
        .map(str::to_string)
        .collect();
    if names.is_empty() || names.iter().all(String::is_empty) {
        return Err(TableError::MissingHeader(display));
    }

    let mut values = Vec::new();
    let mut rows = 0usize;
    let mut record = ByteRecord::new();
    while reader.read_byte_record(&mut record).map_err(read_error)? {
        let line = record
            .position()
            .map_or(rows as u64 + 2, |position| position.line());
        if record.len() != names.len() {
            return Err(TableError::RaggedRow {
                path: display,
                line,
                expected: names.len(),
                found: record.len(),
            });
        }
        for (field, column) in record.iter().zip(&names) {
            let value = lexical_core::parse::<f64>(field).map_err(|_| TableError::NotNumeric {
                path: display.clone(),
                line,
                column: column.clone(),
                value: String::from_utf8_lossy(field).into_owned(),
            })?;
            values.push(value);
        }
        rows += 1;
    }
    if rows == 0 {
        return Err(TableError::NoRows(display));
    }

    let values = Array2::from_shape_vec((rows, names.len()), values)?;
    Ok(Table { names, values })
}

/// Writes `i  j  name_i  name_j  value` rows under a header line.
pub fn write_matches<W: Write>(
    out: W,
    matches: &[Match],
    row_names: &[String],
    column_names: &[String],
) -> io::Result<()> {
    let mut out = BufWriter::new(out);
    writeln!(out, "i\tj\tname_i\tname_j\tvalue")?;
    let mut buffer = ryu::Buffer::new();
    for found in matches {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}",
            found.i,
            found.j,
            row_names[found.i],
            column_names[found.j],
            buffer.format(found.value)
        )?;
    }
    out.flush()
}
