use serde::ser::{Serialize, SerializeStruct, Serializer};
use thiserror::Error;

/// Result type for dvhcat operations
pub type Result<T> = std::result::Result<T, DvhcatError>;

/// Error types for dvhcat operations
///
/// Every variant is scoped to the smallest unit it can fail: a file, a study,
/// a dose grid set or a single ROI. Callers decide how far a failure spreads.
#[derive(Error, Debug)]
pub enum DvhcatError {
    /// Malformed or non-RT file; the file is skipped
    #[error("Parse error: {0}")]
    Parse(String),

    /// Plan/Dose/Structure cannot be uniquely resolved for a study
    #[error("Association error: {0}")]
    Association(String),

    /// Dose grids are not summable; dose metrics become unavailable
    #[error("Grid mismatch: {0}")]
    GridMismatch(String),

    /// Single-ROI geometry failure
    #[error("Geometry error: {0}")]
    Geometry(String),

    /// An allocation or size limit was hit; a cheaper path may be retried
    #[error("Resource exhaustion: {0}")]
    ResourceExhaustion(String),

    /// Cooperative cancellation was requested
    #[error("Cancelled")]
    Cancelled,

    /// Invalid ROI map edit or lookup
    #[error("ROI map error: {0}")]
    RoiMap(String),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// DICOM reading error
    #[error("DICOM error: {0}")]
    Dicom(String),

    /// Invalid tag value
    #[error("Invalid tag value: {0}")]
    InvalidValue(String),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DvhcatError {
    /// Short name of the error kind, used in reports
    pub fn kind(&self) -> &'static str {
        match self {
            DvhcatError::Parse(_) => "ParseError",
            DvhcatError::Association(_) => "AssociationError",
            DvhcatError::GridMismatch(_) => "GridMismatchError",
            DvhcatError::Geometry(_) => "GeometryError",
            DvhcatError::ResourceExhaustion(_) => "ResourceExhaustionError",
            DvhcatError::Cancelled => "Cancelled",
            DvhcatError::RoiMap(_) => "RoiMapError",
            DvhcatError::Config(_) => "ConfigError",
            DvhcatError::Dicom(_) => "DicomError",
            DvhcatError::InvalidValue(_) => "InvalidValue",
            DvhcatError::Json(_) => "JsonError",
            DvhcatError::Io(_) => "IoError",
        }
    }

    /// Whether the error was caused by cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DvhcatError::Cancelled)
    }
}

/// Serialized as `{"kind": ..., "message": ...}` in JSON reports
impl Serialize for DvhcatError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("DvhcatError", 2)?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

// Convert dicom-object errors
impl From<dicom_object::ReadError> for DvhcatError {
    fn from(e: dicom_object::ReadError) -> Self {
        DvhcatError::Dicom(format!("{}", e))
    }
}

impl From<dicom_core::value::ConvertValueError> for DvhcatError {
    fn from(e: dicom_core::value::ConvertValueError) -> Self {
        DvhcatError::InvalidValue(format!("{}", e))
    }
}
