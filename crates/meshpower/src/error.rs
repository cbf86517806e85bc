// The error type follows the same layering as the rest of the crate: the
// internal crate reports `&'static str` messages and we wrap them here.
//
// Callers only ever see the opaque `Error`. Right now the only structured
// queries we expose are the predicates that distinguish the fatal categories
// (geometry and collective failures), which is what tests and the distributed
// driver actually care about. We can expose more if a use-case shows up.
//
// Note that per-bin numerical problems (empty bins, near-zero denominators)
// are NOT errors. They get recorded in `BinStatus`.

use std::path::PathBuf;

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
}

/// The underlying internal error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
enum ErrorKind {
    /// two operands of a cross-spectrum (or correlator) have different
    /// geometry
    #[error("geometry mismatch in {what}: {left} vs {right}")]
    GeometryMismatch {
        what: &'static str,
        left: String,
        right: String,
    },
    /// two binned spectra that don't share the same binning were combined
    #[error("binning mismatch: {0}")]
    BinningMismatch(String),
    /// a problematic bin edge sequence
    #[error("problem with {who}: {what}")]
    BinEdge { who: String, what: String },
    /// an invalid configuration value
    #[error("invalid configuration value for `{field}`: {what}")]
    Config { field: &'static str, what: String },
    /// a PointSet was constructed from inconsistent (or non-finite) data
    #[error("malformed catalog: {0}")]
    CatalogShape(String),
    /// a worker failed while (or before) participating in a collective
    #[error("collective operation failed on rank {rank}: {what}")]
    CollectiveFailure { rank: usize, what: String },
    /// wraps the stringly errors from `meshpower_nostd_internal`
    #[error("{0}")]
    Internal(&'static str),
    #[error("I/O error for {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write npy array: {0}")]
    Npy(#[from] ndarray_npy::WriteNpyError),
    #[error("failed to write text table: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
}

// define constructor methods for Error
impl Error {
    pub(crate) fn geometry_mismatch(
        what: &'static str,
        left: impl core::fmt::Display,
        right: impl core::fmt::Display,
    ) -> Self {
        Error {
            kind: ErrorKind::GeometryMismatch {
                what,
                left: left.to_string(),
                right: right.to_string(),
            },
        }
    }

    pub(crate) fn binning_mismatch(what: impl Into<String>) -> Self {
        Error {
            kind: ErrorKind::BinningMismatch(what.into()),
        }
    }

    pub(crate) fn bin_edge(who: impl Into<String>, what: impl Into<String>) -> Self {
        Error {
            kind: ErrorKind::BinEdge {
                who: who.into(),
                what: what.into(),
            },
        }
    }

    pub(crate) fn config(field: &'static str, what: impl Into<String>) -> Self {
        Error {
            kind: ErrorKind::Config {
                field,
                what: what.into(),
            },
        }
    }

    /// produce an error indicating that an integer lies outside the acceptable
    /// range of values
    pub(crate) fn integer_range(field: &'static str, actual: i64, min_val: i64, max_val: i64) -> Self {
        Self::config(
            field,
            format!("has a value of {actual}. The value should be no less than {min_val} and not exceed {max_val}"),
        )
    }

    pub(crate) fn catalog_shape(what: impl Into<String>) -> Self {
        Error {
            kind: ErrorKind::CatalogShape(what.into()),
        }
    }

    pub(crate) fn collective_failure(rank: usize, what: impl Into<String>) -> Self {
        Error {
            kind: ErrorKind::CollectiveFailure {
                rank,
                what: what.into(),
            },
        }
    }

    pub(crate) fn internal(message: &'static str) -> Self {
        Error {
            kind: ErrorKind::Internal(message),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error {
            kind: ErrorKind::Io {
                path: path.into(),
                source,
            },
        }
    }

    /// Whether this error stems from a failed collective operation
    pub fn is_collective_failure(&self) -> bool {
        matches!(self.kind, ErrorKind::CollectiveFailure { .. })
    }

    /// Whether this error stems from operands with differing geometry
    pub fn is_geometry_mismatch(&self) -> bool {
        matches!(self.kind, ErrorKind::GeometryMismatch { .. })
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.kind.source()
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        self.kind.fmt(f)
    }
}

impl From<ndarray_npy::WriteNpyError> for Error {
    fn from(err: ndarray_npy::WriteNpyError) -> Self {
        Error {
            kind: ErrorKind::Npy(err),
        }
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error {
            kind: ErrorKind::Csv(err),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            kind: ErrorKind::Json(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates() {
        let err = Error::geometry_mismatch("nmesh", 32, 64);
        assert!(err.is_geometry_mismatch());
        assert!(!err.is_collective_failure());
        assert_eq!(err.to_string(), "geometry mismatch in nmesh: 32 vs 64");

        let err = Error::collective_failure(3, "peer departed");
        assert!(err.is_collective_failure());
        assert!(!err.is_geometry_mismatch());
    }

    #[test]
    fn integer_range_message() {
        let err = Error::integer_range("nmesh", 1, 2, 4096);
        assert!(err.to_string().contains("nmesh"));
        assert!(err.to_string().contains("no less than 2"));
    }
}
