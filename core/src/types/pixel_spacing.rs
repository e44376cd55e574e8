use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Extracts every decimal number from a free-form string
///
/// Accepts DICOM multi-value strings ("2.5\\2.5"), whitespace or comma
/// separated lists and exponential notation. Returns an empty vector when
/// nothing numeric is present.
pub fn parse_decimals(s: &str) -> Vec<f64> {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    let re = REGEX.get_or_init(|| {
        Regex::new(r"[-+]?\d*\.?\d+(?:[eE][-+]?\d+)?").expect("Failed to compile regex")
    });

    re.find_iter(s)
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .collect()
}

/// Dose grid pixel spacing in millimeters (row, column)
///
/// `row` is the distance between adjacent rows (along y), `col` the distance
/// between adjacent columns (along x).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelSpacing {
    pub row: f64,
    pub col: f64,
}

impl PixelSpacing {
    /// Creates a new PixelSpacing
    pub fn new(row: f64, col: f64) -> Self {
        Self { row, col }
    }

    /// Parses pixel spacing from string
    ///
    /// # Errors
    ///
    /// Returns an error if fewer than two values are present or a value is
    /// not strictly positive
    pub fn parse(s: &str) -> Result<Self, String> {
        let values = parse_decimals(s);
        if values.len() < 2 {
            return Err(format!("Failed to parse PixelSpacing from '{}'", s));
        }
        Self::from_values(&values)
    }

    /// Builds spacing from already-decoded values
    pub fn from_values(values: &[f64]) -> Result<Self, String> {
        match values {
            [row, col, ..] if *row > 0.0 && *col > 0.0 => Ok(Self::new(*row, *col)),
            [_, _, ..] => Err(format!("PixelSpacing must be positive, got {:?}", values)),
            _ => Err(format!("PixelSpacing needs two values, got {:?}", values)),
        }
    }

    /// Area of one pixel in mm²
    pub fn pixel_area(&self) -> f64 {
        self.row * self.col
    }

    /// Compares two spacings within an absolute tolerance
    pub fn approx_eq(&self, other: &PixelSpacing, tolerance: f64) -> bool {
        (self.row - other.row).abs() <= tolerance && (self.col - other.col).abs() <= tolerance
    }
}

impl fmt::Display for PixelSpacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x {} mm", self.row, self.col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backslash_separator() {
        let ps = PixelSpacing::parse("2.5\\3.0").unwrap();
        assert_eq!(ps.row, 2.5);
        assert_eq!(ps.col, 3.0);
        assert_eq!(ps.pixel_area(), 7.5);
    }

    #[test]
    fn test_parse_exponential_notation() {
        let ps = PixelSpacing::parse("2.5e0 2.5E+0").unwrap();
        assert_eq!(ps.row, 2.5);
        assert_eq!(ps.col, 2.5);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(PixelSpacing::parse("invalid").is_err());
        assert!(PixelSpacing::parse("").is_err());
        assert!(PixelSpacing::parse("2.5").is_err());
        assert!(PixelSpacing::parse("0\\2.5").is_err());
    }

    #[test]
    fn test_parse_decimals_signed_list() {
        assert_eq!(parse_decimals("-250.5\\-10\\+3e1"), vec![-250.5, -10.0, 30.0]);
        assert!(parse_decimals("none").is_empty());
    }

    #[test]
    fn test_approx_eq() {
        let a = PixelSpacing::new(2.5, 2.5);
        assert!(a.approx_eq(&PixelSpacing::new(2.5004, 2.5), 1e-3));
        assert!(!a.approx_eq(&PixelSpacing::new(2.6, 2.5), 1e-3));
    }
}
