use crate::types::parse_decimals;
use dicom_core::Tag;
use dicom_object::InMemDicomObject;

// Identification Tags
pub const MODALITY: Tag = Tag(0x0008, 0x0060);
pub const SOP_CLASS_UID: Tag = Tag(0x0008, 0x0016);
pub const SOP_INSTANCE_UID: Tag = Tag(0x0008, 0x0018);
pub const STUDY_INSTANCE_UID: Tag = Tag(0x0020, 0x000D);
pub const SERIES_INSTANCE_UID: Tag = Tag(0x0020, 0x000E);
pub const STUDY_DATE: Tag = Tag(0x0008, 0x0020);
pub const STUDY_TIME: Tag = Tag(0x0008, 0x0030);
pub const INSTANCE_CREATION_DATE: Tag = Tag(0x0008, 0x0012);
pub const INSTANCE_CREATION_TIME: Tag = Tag(0x0008, 0x0013);
pub const REFERENCED_SOP_INSTANCE_UID: Tag = Tag(0x0008, 0x1155);

// Patient Tags
pub const PATIENT_NAME: Tag = Tag(0x0010, 0x0010);
pub const PATIENT_ID: Tag = Tag(0x0010, 0x0020);
pub const PATIENT_BIRTH_DATE: Tag = Tag(0x0010, 0x0030);
pub const PATIENT_SEX: Tag = Tag(0x0010, 0x0040);
pub const PATIENT_POSITION: Tag = Tag(0x0018, 0x5100);

// Physician Tags
pub const REFERRING_PHYSICIAN_NAME: Tag = Tag(0x0008, 0x0090);
pub const PHYSICIANS_OF_RECORD: Tag = Tag(0x0008, 0x1048);

// Device/Manufacturer Tags
pub const MANUFACTURER: Tag = Tag(0x0008, 0x0070);
pub const MANUFACTURER_MODEL_NAME: Tag = Tag(0x0008, 0x1090);
pub const SOFTWARE_VERSIONS: Tag = Tag(0x0018, 0x1020);

// RT Plan Tags
pub const RT_PLAN_LABEL: Tag = Tag(0x300A, 0x0002);
pub const RT_PLAN_NAME: Tag = Tag(0x300A, 0x0003);
pub const RT_PLAN_DATE: Tag = Tag(0x300A, 0x0006);
pub const RT_PLAN_TIME: Tag = Tag(0x300A, 0x0007);
pub const DOSE_REFERENCE_SEQUENCE: Tag = Tag(0x300A, 0x0010);
pub const DOSE_REFERENCE_NUMBER: Tag = Tag(0x300A, 0x0012);
pub const DOSE_REFERENCE_STRUCTURE_TYPE: Tag = Tag(0x300A, 0x0014);
pub const TARGET_PRESCRIPTION_DOSE: Tag = Tag(0x300A, 0x0026);
pub const FRACTION_GROUP_SEQUENCE: Tag = Tag(0x300A, 0x0070);
pub const FRACTION_GROUP_NUMBER: Tag = Tag(0x300A, 0x0071);
pub const NUMBER_OF_FRACTIONS_PLANNED: Tag = Tag(0x300A, 0x0078);
pub const NUMBER_OF_BEAMS: Tag = Tag(0x300A, 0x0080);
pub const BEAM_DOSE: Tag = Tag(0x300A, 0x0084);
pub const BEAM_METERSET: Tag = Tag(0x300A, 0x0086);
pub const NUMBER_OF_BRACHY_APPLICATION_SETUPS: Tag = Tag(0x300A, 0x00A0);
pub const BEAM_SEQUENCE: Tag = Tag(0x300A, 0x00B0);
pub const TREATMENT_MACHINE_NAME: Tag = Tag(0x300A, 0x00B2);
pub const BEAM_LIMITING_DEVICE_SEQUENCE: Tag = Tag(0x300A, 0x00B6);
pub const RT_BEAM_LIMITING_DEVICE_TYPE: Tag = Tag(0x300A, 0x00B8);
pub const LEAF_POSITION_BOUNDARIES: Tag = Tag(0x300A, 0x00BE);
pub const BEAM_NUMBER: Tag = Tag(0x300A, 0x00C0);
pub const BEAM_NAME: Tag = Tag(0x300A, 0x00C2);
pub const BEAM_DESCRIPTION: Tag = Tag(0x300A, 0x00C3);
pub const BEAM_TYPE: Tag = Tag(0x300A, 0x00C4);
pub const RADIATION_TYPE: Tag = Tag(0x300A, 0x00C6);
pub const FINAL_CUMULATIVE_METERSET_WEIGHT: Tag = Tag(0x300A, 0x010E);
pub const NUMBER_OF_CONTROL_POINTS: Tag = Tag(0x300A, 0x0110);
pub const CONTROL_POINT_SEQUENCE: Tag = Tag(0x300A, 0x0111);
pub const NOMINAL_BEAM_ENERGY: Tag = Tag(0x300A, 0x0114);
pub const BEAM_LIMITING_DEVICE_POSITION_SEQUENCE: Tag = Tag(0x300A, 0x011A);
pub const LEAF_JAW_POSITIONS: Tag = Tag(0x300A, 0x011C);
pub const GANTRY_ANGLE: Tag = Tag(0x300A, 0x011E);
pub const GANTRY_ROTATION_DIRECTION: Tag = Tag(0x300A, 0x011F);
pub const BEAM_LIMITING_DEVICE_ANGLE: Tag = Tag(0x300A, 0x0120);
pub const BEAM_LIMITING_DEVICE_ROTATION_DIRECTION: Tag = Tag(0x300A, 0x0121);
pub const PATIENT_SUPPORT_ANGLE: Tag = Tag(0x300A, 0x0122);
pub const PATIENT_SUPPORT_ROTATION_DIRECTION: Tag = Tag(0x300A, 0x0123);
pub const ISOCENTER_POSITION: Tag = Tag(0x300A, 0x012C);
pub const SOURCE_TO_SURFACE_DISTANCE: Tag = Tag(0x300A, 0x0130);
pub const CUMULATIVE_METERSET_WEIGHT: Tag = Tag(0x300A, 0x0134);
pub const PATIENT_SETUP_SEQUENCE: Tag = Tag(0x300A, 0x0180);
pub const BRACHY_TREATMENT_TYPE: Tag = Tag(0x300A, 0x0202);
pub const APPLICATION_SETUP_SEQUENCE: Tag = Tag(0x300A, 0x0230);
pub const CHANNEL_SEQUENCE: Tag = Tag(0x300A, 0x0280);
pub const CHANNEL_TOTAL_TIME: Tag = Tag(0x300A, 0x0286);
pub const ION_BEAM_SEQUENCE: Tag = Tag(0x300A, 0x03A2);
pub const ION_CONTROL_POINT_SEQUENCE: Tag = Tag(0x300A, 0x03A8);
pub const REFERENCED_RT_PLAN_SEQUENCE: Tag = Tag(0x300C, 0x0002);
pub const REFERENCED_BEAM_SEQUENCE: Tag = Tag(0x300C, 0x0004);
pub const REFERENCED_BEAM_NUMBER: Tag = Tag(0x300C, 0x0006);
pub const REFERENCED_DOSE_REFERENCE_NUMBER: Tag = Tag(0x300C, 0x0051);
pub const REFERENCED_STRUCTURE_SET_SEQUENCE: Tag = Tag(0x300C, 0x0060);

// RT Dose Tags
pub const ROWS: Tag = Tag(0x0028, 0x0010);
pub const COLUMNS: Tag = Tag(0x0028, 0x0011);
pub const NUMBER_OF_FRAMES: Tag = Tag(0x0028, 0x0008);
pub const PIXEL_SPACING: Tag = Tag(0x0028, 0x0030);
pub const BITS_ALLOCATED: Tag = Tag(0x0028, 0x0100);
pub const IMAGE_POSITION_PATIENT: Tag = Tag(0x0020, 0x0032);
pub const IMAGE_ORIENTATION_PATIENT: Tag = Tag(0x0020, 0x0037);
pub const DOSE_UNITS: Tag = Tag(0x3004, 0x0002);
pub const DOSE_SUMMATION_TYPE: Tag = Tag(0x3004, 0x000A);
pub const GRID_FRAME_OFFSET_VECTOR: Tag = Tag(0x3004, 0x000C);
pub const DOSE_GRID_SCALING: Tag = Tag(0x3004, 0x000E);
pub const TISSUE_HETEROGENEITY_CORRECTION: Tag = Tag(0x3004, 0x0014);
pub const PIXEL_DATA: Tag = Tag(0x7FE0, 0x0010);

// RT Structure Set Tags
pub const STRUCTURE_SET_LABEL: Tag = Tag(0x3006, 0x0002);
pub const STRUCTURE_SET_DATE: Tag = Tag(0x3006, 0x0008);
pub const STRUCTURE_SET_TIME: Tag = Tag(0x3006, 0x0009);
pub const STRUCTURE_SET_ROI_SEQUENCE: Tag = Tag(0x3006, 0x0020);
pub const ROI_NUMBER: Tag = Tag(0x3006, 0x0022);
pub const ROI_NAME: Tag = Tag(0x3006, 0x0026);
pub const ROI_CONTOUR_SEQUENCE: Tag = Tag(0x3006, 0x0039);
pub const CONTOUR_SEQUENCE: Tag = Tag(0x3006, 0x0040);
pub const CONTOUR_GEOMETRIC_TYPE: Tag = Tag(0x3006, 0x0042);
pub const CONTOUR_DATA: Tag = Tag(0x3006, 0x0050);
pub const RT_ROI_OBSERVATIONS_SEQUENCE: Tag = Tag(0x3006, 0x0080);
pub const REFERENCED_ROI_NUMBER: Tag = Tag(0x3006, 0x0084);
pub const RT_ROI_INTERPRETED_TYPE: Tag = Tag(0x3006, 0x00A4);

/// Helper to get string value from DICOM tag
///
/// Returns `None` if the tag is not present, cannot be converted to string
/// or is blank after trimming
pub fn get_string_value(dcm: &InMemDicomObject, tag: Tag) -> Option<String> {
    dcm.element(tag)
        .ok()
        .and_then(|elem| elem.to_str().ok())
        .map(|s| s.trim().trim_end_matches('\0').trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Helper to get integer value from DICOM tag
///
/// Returns `None` if the tag is not present or cannot be converted to i32
pub fn get_int_value(dcm: &InMemDicomObject, tag: Tag) -> Option<i32> {
    dcm.element(tag)
        .ok()
        .and_then(|elem| elem.to_int::<i32>().ok())
}

/// Helper to get u16 value from DICOM tag
pub fn get_u16_value(dcm: &InMemDicomObject, tag: Tag) -> Option<u16> {
    dcm.element(tag)
        .ok()
        .and_then(|elem| elem.to_int::<u16>().ok())
}

/// Helper to get a single decimal value from DICOM tag
///
/// Falls back to parsing the string form, so that decimal strings with
/// stray padding still resolve
pub fn get_float_value(dcm: &InMemDicomObject, tag: Tag) -> Option<f64> {
    let elem = dcm.element(tag).ok()?;
    elem.to_float64()
        .ok()
        .or_else(|| {
            elem.to_str()
                .ok()
                .and_then(|s| parse_decimals(&s).first().copied())
        })
        .filter(|v| v.is_finite())
}

/// Helper to get a multi-valued decimal from DICOM tag
///
/// Returns `None` if the tag is not present or holds no numbers
pub fn get_multi_float_value(dcm: &InMemDicomObject, tag: Tag) -> Option<Vec<f64>> {
    let elem = dcm.element(tag).ok()?;
    let values = match elem.to_multi_float64() {
        Ok(values) => values,
        Err(_) => elem.to_str().ok().map(|s| parse_decimals(&s))?,
    };
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

/// Returns the items of a sequence, or an empty slice when absent
pub fn get_items(dcm: &InMemDicomObject, tag: Tag) -> &[InMemDicomObject] {
    dcm.element(tag)
        .ok()
        .and_then(|elem| elem.items())
        .unwrap_or(&[])
}

/// Returns the first item of a sequence
pub fn first_item(dcm: &InMemDicomObject, tag: Tag) -> Option<&InMemDicomObject> {
    get_items(dcm, tag).first()
}

/// Joins a DICOM date and time into `YYYYMMDDHHMMSS`-style text
///
/// Fractional seconds are dropped. Returns `None` without a date.
pub fn get_date_time(dcm: &InMemDicomObject, date_tag: Tag, time_tag: Tag) -> Option<String> {
    let date = get_string_value(dcm, date_tag)?;
    let time = get_string_value(dcm, time_tag)
        .map(|t| t.split('.').next().unwrap_or("").to_string())
        .unwrap_or_default();
    Some(format!("{}{}", date, time))
}
