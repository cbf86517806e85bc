//! Persists tabular results as `.npy` arrays or tab-separated text.
//!
//! Both writers go through a temporary file in the destination directory
//! that only gets renamed into place once everything was written, so a
//! failed export never leaves a partial artifact behind.

use std::path::{Path, PathBuf};

use ndarray::Array2;
use ndarray_npy::WriteNpyExt;
use tempfile::NamedTempFile;

use crate::error::Error;

/// A 2D table of floats with named columns
#[derive(Clone, Debug, PartialEq)]
pub struct Records {
    columns: Vec<String>,
    values: Array2<f64>,
}

impl Records {
    /// Builds a table from rows that must each hold one value per column.
    pub(crate) fn from_rows(columns: &[&str], rows: Vec<Vec<f64>>) -> Result<Self, Error> {
        let n_cols = columns.len();
        let n_rows = rows.len();
        let mut values = Array2::zeros((n_rows, n_cols));
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != n_cols {
                return Err(Error::internal("a record row doesn't match the column count"));
            }
            for (j, v) in row.into_iter().enumerate() {
                values[[i, j]] = v;
            }
        }
        Ok(Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            values,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// shape `(n_rows, n_columns)`
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// the values of the named column
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let j = self.columns.iter().position(|c| c == name)?;
        Some(self.values.column(j).to_vec())
    }
}

/// The on-disk format of an exported table
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// a single `(n_rows, n_columns)` float64 array (the column names are
    /// not stored)
    Npy,
    /// tab-separated text with a header line
    Txt,
}

impl ExportFormat {
    /// infers the format from the file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "npy" => Some(ExportFormat::Npy),
            "txt" | "tsv" => Some(ExportFormat::Txt),
            _ => None,
        }
    }
}

fn temporary_sibling(path: &Path) -> Result<NamedTempFile, Error> {
    let parent: PathBuf = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tempfile::Builder::new()
        .prefix(".meshpower-")
        .suffix(".partial")
        .tempfile_in(&parent)
        .map_err(|e| Error::io(&parent, e))
}

fn persist(tmp: NamedTempFile, path: &Path) -> Result<(), Error> {
    tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
    Ok(())
}

/// Writes the values of `records` as a float64 `.npy` array
pub fn write_npy(path: impl AsRef<Path>, records: &Records) -> Result<(), Error> {
    let path = path.as_ref();
    let mut tmp = temporary_sibling(path)?;
    records.values.write_npy(tmp.as_file_mut())?;
    tmp.as_file_mut().sync_all().map_err(|e| Error::io(path, e))?;
    persist(tmp, path)
}

/// Writes `records` as tab-separated text with a header.
///
/// Floats are written in their shortest representation that round-trips,
/// so parsing the file recovers the exact values.
pub fn write_txt(path: impl AsRef<Path>, records: &Records) -> Result<(), Error> {
    let path = path.as_ref();
    let mut tmp = temporary_sibling(path)?;
    {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(tmp.as_file_mut());
        writer.write_record(&records.columns)?;
        for row in records.values.rows() {
            writer.write_record(row.iter().map(|v| v.to_string()))?;
        }
        writer.flush().map_err(|e| Error::io(path, e))?;
    }
    tmp.as_file_mut().sync_all().map_err(|e| Error::io(path, e))?;
    persist(tmp, path)
}

/// Dispatches to [`write_npy`] or [`write_txt`]
pub fn write_records(path: impl AsRef<Path>, format: ExportFormat, records: &Records) -> Result<(), Error> {
    match format {
        ExportFormat::Npy => write_npy(path, records),
        ExportFormat::Txt => write_txt(path, records),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Records {
        Records::from_rows(
            &["k", "value"],
            vec![vec![0.1, 1.0 / 3.0], vec![0.2, -2.5e-17], vec![0.3, 0.0]],
        )
        .unwrap()
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = Records::from_rows(&["k", "value"], vec![vec![0.1, 1.0], vec![0.2]]).unwrap_err();
        assert!(err.to_string().contains("column count"), "{err}");
        assert!(Records::from_rows(&["k"], vec![]).unwrap().values().is_empty());
    }

    #[test]
    fn columns() {
        let r = sample();
        assert_eq!(r.columns(), &["k".to_string(), "value".to_string()]);
        assert_eq!(r.column("k"), Some(vec![0.1, 0.2, 0.3]));
        assert!(r.column("nope").is_none());
    }

    #[test]
    fn txt_round_trips_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        write_txt(&path, &sample()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("k\tvalue"));
        let parsed: Vec<Vec<f64>> = lines
            .map(|l| l.split('\t').map(|v| v.parse().unwrap()).collect())
            .collect();
        assert_eq!(parsed[0][1], 1.0 / 3.0);
        assert_eq!(parsed[1][1], -2.5e-17);
        // no leftover temporary files
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn npy_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.npy");
        write_records(&path, ExportFormat::Npy, &sample()).unwrap();
        let back: Array2<f64> = ndarray_npy::read_npy(&path).unwrap();
        assert_eq!(&back, sample().values());
    }

    #[test]
    fn missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.npy");
        assert!(write_npy(&path, &sample()).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(ExportFormat::from_path(Path::new("a/b.npy")), Some(ExportFormat::Npy));
        assert_eq!(ExportFormat::from_path(Path::new("b.txt")), Some(ExportFormat::Txt));
        assert_eq!(ExportFormat::from_path(Path::new("b")), None);
    }
}
