use serde::{Deserialize, Serialize};
use std::fmt;

/// SOP Class UIDs of the RT objects this crate understands
pub const RT_PLAN_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.481.5";
pub const RT_ION_PLAN_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.481.8";
pub const RT_DOSE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.481.2";
pub const RT_STRUCTURE_SET_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.481.3";

/// Role of a discovered file after sniffing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRole {
    Plan,
    Dose,
    Structure,
    /// Anything else; ignored by association
    Other,
}

impl FileRole {
    /// Classifies a file from its Modality value
    pub fn from_modality(modality: &str) -> Self {
        match modality.trim().to_uppercase().as_str() {
            "RTPLAN" => FileRole::Plan,
            "RTDOSE" => FileRole::Dose,
            "RTSTRUCT" => FileRole::Structure,
            _ => FileRole::Other,
        }
    }

    /// Classifies a file from its SOP Class UID
    pub fn from_sop_class(uid: &str) -> Self {
        match uid.trim_end_matches('\0').trim() {
            RT_PLAN_STORAGE | RT_ION_PLAN_STORAGE => FileRole::Plan,
            RT_DOSE_STORAGE => FileRole::Dose,
            RT_STRUCTURE_SET_STORAGE => FileRole::Structure,
            _ => FileRole::Other,
        }
    }

    /// Returns simple name for display
    pub fn simple_name(&self) -> &'static str {
        match self {
            FileRole::Plan => "plan",
            FileRole::Dose => "dose",
            FileRole::Structure => "structure",
            FileRole::Other => "other",
        }
    }
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.simple_name())
    }
}

/// RT ROI interpreted type
///
/// Values outside the common set are kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RoiType {
    #[default]
    None,
    Ptv,
    Ctv,
    Gtv,
    Organ,
    External,
    Avoidance,
    Other(String),
}

impl RoiType {
    /// Parses an interpreted type, case-insensitive
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Self {
        let upper = s.trim().to_uppercase();
        match upper.as_str() {
            "" | "NONE" => RoiType::None,
            "PTV" => RoiType::Ptv,
            "CTV" => RoiType::Ctv,
            "GTV" => RoiType::Gtv,
            "ORGAN" | "OAR" => RoiType::Organ,
            "EXTERNAL" => RoiType::External,
            "AVOIDANCE" => RoiType::Avoidance,
            _ => RoiType::Other(upper),
        }
    }

    /// Returns whether this ROI is a planning target
    pub fn is_target(&self) -> bool {
        matches!(self, RoiType::Ptv)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, RoiType::None)
    }

    /// Returns the DICOM spelling of the type
    pub fn as_str(&self) -> &str {
        match self {
            RoiType::None => "NONE",
            RoiType::Ptv => "PTV",
            RoiType::Ctv => "CTV",
            RoiType::Gtv => "GTV",
            RoiType::Organ => "ORGAN",
            RoiType::External => "EXTERNAL",
            RoiType::Avoidance => "AVOIDANCE",
            RoiType::Other(s) => s,
        }
    }
}

impl From<String> for RoiType {
    fn from(s: String) -> Self {
        RoiType::from_str(&s)
    }
}

impl From<RoiType> for String {
    fn from(t: RoiType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for RoiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// DoseSummationType of an RT Dose object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DoseSummationType {
    Plan,
    Brachy,
    MultiPlan,
    Fraction,
    Beam,
    Other(String),
}

impl DoseSummationType {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Self {
        let upper = s.trim().to_uppercase();
        match upper.as_str() {
            "PLAN" => DoseSummationType::Plan,
            "BRACHY" => DoseSummationType::Brachy,
            "MULTI_PLAN" => DoseSummationType::MultiPlan,
            "FRACTION" => DoseSummationType::Fraction,
            "BEAM" => DoseSummationType::Beam,
            _ => DoseSummationType::Other(upper),
        }
    }

    /// Whether a dose of this type covers a whole plan
    ///
    /// Whole-plan doses are preferred over partial (fraction/beam) doses
    /// when several dose files reference the same plan.
    pub fn is_whole_plan(&self) -> bool {
        matches!(self, DoseSummationType::Plan | DoseSummationType::Brachy)
    }
}

/// Rotation direction of a gantry, collimator or couch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationDirection {
    Clockwise,
    CounterClockwise,
    None,
}

impl RotationDirection {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "CW" => RotationDirection::Clockwise,
            "CC" => RotationDirection::CounterClockwise,
            _ => RotationDirection::None,
        }
    }

    pub fn code(&self) -> Option<&'static str> {
        match self {
            RotationDirection::Clockwise => Some("CW"),
            RotationDirection::CounterClockwise => Some("CC"),
            RotationDirection::None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("RTPLAN", FileRole::Plan)]
    #[case("rtdose", FileRole::Dose)]
    #[case(" RTSTRUCT ", FileRole::Structure)]
    #[case("CT", FileRole::Other)]
    #[case("", FileRole::Other)]
    fn test_file_role_from_modality(#[case] modality: &str, #[case] expected: FileRole) {
        assert_eq!(FileRole::from_modality(modality), expected);
    }

    #[test]
    fn test_file_role_from_sop_class() {
        assert_eq!(FileRole::from_sop_class(RT_ION_PLAN_STORAGE), FileRole::Plan);
        assert_eq!(
            FileRole::from_sop_class("1.2.840.10008.5.1.4.1.1.481.2\0"),
            FileRole::Dose
        );
        assert_eq!(FileRole::from_sop_class("1.2.3"), FileRole::Other);
    }

    #[rstest]
    #[case("PTV", RoiType::Ptv)]
    #[case("organ", RoiType::Organ)]
    #[case("", RoiType::None)]
    #[case("marker", RoiType::Other("MARKER".to_string()))]
    fn test_roi_type_parse(#[case] input: &str, #[case] expected: RoiType) {
        assert_eq!(RoiType::from_str(input), expected);
    }

    #[test]
    fn test_roi_type_serde_as_string() {
        let json = serde_json::to_string(&RoiType::Ptv).unwrap();
        assert_eq!(json, "\"PTV\"");
        let back: RoiType = serde_json::from_str("\"bolus\"").unwrap();
        assert_eq!(back, RoiType::Other("BOLUS".to_string()));
    }

    #[test]
    fn test_dose_summation_type() {
        assert!(DoseSummationType::from_str("PLAN").is_whole_plan());
        assert!(DoseSummationType::from_str("brachy").is_whole_plan());
        assert!(!DoseSummationType::from_str("BEAM").is_whole_plan());
    }

    #[test]
    fn test_rotation_direction_codes() {
        assert_eq!(RotationDirection::from_str("CW").code(), Some("CW"));
        assert_eq!(RotationDirection::from_str("NONE").code(), None);
    }
}
