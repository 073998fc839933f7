//! Error types for the soil-moisture pipeline.
//!
//! Configuration bugs (unsupported formats, broken field maps) abort the
//! whole run; data-availability failures are scoped to the offending point
//! by the driver and reported in the run summary.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A mandatory input file is absent. Fatal for the point it belongs to,
    /// not for the run as a whole.
    #[error("missing input file: {}", .path.display())]
    MissingInput { path: PathBuf },

    /// A declared file format that the pipeline does not implement.
    #[error("file format \"{format}\" is not supported")]
    UnsupportedFormat { format: String },

    /// An expected column is absent after field remapping. This is a
    /// field-map configuration error, never a data error.
    #[error("column \"{}\" not found in {} (check the field mapping)", .column, .path.display())]
    Schema { column: String, path: PathBuf },

    /// A mandatory model parameter is absent from the joined profile row.
    #[error("model parameter \"{name}\" is missing for point \"{tag}\"")]
    MissingParameter { name: String, tag: String },

    /// Settings file could not be read or parsed.
    #[error("settings error: {0}")]
    Settings(String),

    /// A timestamp that neither the declared format nor the fallback
    /// formats could parse.
    #[error("unparseable timestamp \"{}\" in {}", .value, .path.display())]
    TimeParse { value: String, path: PathBuf },

    /// Figure rendering error (plotters backend).
    #[error("figure rendering failed: {0}")]
    Figure(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV parse/serialize error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON (static profile artifact) error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error indicates a broken run configuration rather than
    /// missing data. Configuration errors abort the run for every point.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedFormat { .. } | Error::Schema { .. } | Error::Settings(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_flagged() {
        let err = Error::UnsupportedFormat { format: "netcdf".to_string() };
        assert!(err.is_configuration());

        let err = Error::Schema {
            column: "values_k1".to_string(),
            path: PathBuf::from("rain.csv"),
        };
        assert!(err.is_configuration());
    }

    #[test]
    fn test_data_errors_are_not_configuration() {
        let err = Error::MissingInput { path: PathBuf::from("rain_alpha.csv") };
        assert!(!err.is_configuration());

        let err = Error::MissingParameter {
            name: "w_max".to_string(),
            tag: "alpha".to_string(),
        };
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_display_names_the_offending_column() {
        let err = Error::Schema {
            column: "rain".to_string(),
            path: PathBuf::from("data/rain_alpha.csv"),
        };
        let msg = err.to_string();
        assert!(msg.contains("rain"), "message should name the column: {msg}");
        assert!(msg.contains("field mapping"), "message should point at configuration: {msg}");
    }
}
