use crate::error::{DvhcatError, Result};
use crate::roi_map::{clean_physician_name, DEFAULT_PHYSICIAN};
use crate::types::{Point3, RotationDirection};
use dicom_object::{open_file, InMemDicomObject};
use std::path::{Path, PathBuf};

use super::tags::*;

/// One fraction group of a plan with its prescription
#[derive(Debug, Clone, PartialEq)]
pub struct RxRecord {
    pub fx_grp_number: i32,
    pub fx_count: i32,
    pub beam_count: usize,
    /// Prescription dose of the fraction group, Gy
    pub rx_dose: Option<f64>,
    pub normalization_method: Option<String>,
    pub normalization_object: Option<String>,
    /// `(beam number, beam dose Gy, beam meterset MU)` per referenced beam
    pub referenced_beams: Vec<(i32, Option<f64>, Option<f64>)>,
}

impl RxRecord {
    /// Dose per fraction, rounded to two decimals
    pub fn fx_dose(&self) -> Option<f64> {
        let rx = self.rx_dose?;
        if self.fx_count <= 0 {
            return None;
        }
        Some((rx / self.fx_count as f64 * 100.0).round() / 100.0)
    }
}

/// Jaw or MLC positions of one control point
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DevicePositions {
    /// X jaw pair `[x1, x2]`
    pub jaw_x: Option<[f64; 2]>,
    /// Y jaw pair `[y1, y2]`
    pub jaw_y: Option<[f64; 2]>,
    /// MLC bank A then bank B, as stored
    pub mlc: Option<Vec<f64>>,
}

/// One control point, with omitted values inherited from earlier points
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ControlPoint {
    pub cumulative_weight: f64,
    pub gantry_angle: Option<f64>,
    pub gantry_direction: Option<RotationDirection>,
    pub collimator_angle: Option<f64>,
    pub collimator_direction: Option<RotationDirection>,
    pub couch_angle: Option<f64>,
    pub couch_direction: Option<RotationDirection>,
    pub energy: Option<f64>,
    pub isocenter: Option<Point3>,
    pub ssd: Option<f64>,
    pub devices: DevicePositions,
}

/// Treatment beam with its control points
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BeamRecord {
    pub beam_number: i32,
    pub beam_name: Option<String>,
    pub beam_description: Option<String>,
    pub treatment_machine: Option<String>,
    pub beam_type: Option<String>,
    pub radiation_type: Option<String>,
    pub final_cumulative_weight: f64,
    pub control_points: Vec<ControlPoint>,
    /// MLC leaf boundaries along y, mm
    pub leaf_boundaries: Vec<f64>,
    pub fx_grp_number: Option<i32>,
    /// Beam dose per fraction, Gy
    pub beam_dose: Option<f64>,
    /// Beam meterset per fraction, MU
    pub beam_mu: Option<f64>,
}

impl BeamRecord {
    /// Monitor units delivered from control point `i` to `i + 1`
    ///
    /// The last control point delivers nothing.
    pub fn control_point_mu(&self) -> Vec<f64> {
        let mu = self.beam_mu.unwrap_or(0.0);
        let final_weight = if self.final_cumulative_weight > 0.0 {
            self.final_cumulative_weight
        } else {
            self.control_points
                .last()
                .map(|cp| cp.cumulative_weight)
                .unwrap_or(1.0)
        };
        if final_weight <= 0.0 {
            return vec![0.0; self.control_points.len()];
        }

        let mut segments: Vec<f64> = self
            .control_points
            .windows(2)
            .map(|w| (w[1].cumulative_weight - w[0].cumulative_weight).max(0.0) / final_weight * mu)
            .collect();
        if !self.control_points.is_empty() {
            segments.push(0.0);
        }
        segments
    }

    /// Nominal energies of all control points
    pub fn energies(&self) -> Vec<f64> {
        self.control_points.iter().filter_map(|cp| cp.energy).collect()
    }
}

/// RT Plan content needed for import
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlanRecord {
    pub file_path: PathBuf,
    pub sop_instance_uid: String,
    pub study_instance_uid: String,
    pub series_instance_uid: Option<String>,
    pub patient_id: String,
    pub patient_name: Option<String>,
    pub birth_date: Option<String>,
    pub patient_sex: Option<String>,
    pub study_date: Option<String>,
    /// Normalized physician, `DEFAULT` when none is recorded
    pub physician: String,
    pub tx_site: Option<String>,
    pub plan_name: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub software_version: Option<String>,
    pub patient_orientation: Option<String>,
    pub plan_time_stamp: Option<String>,
    pub referenced_structure_uid: Option<String>,
    pub fraction_groups: Vec<RxRecord>,
    pub beams: Vec<BeamRecord>,
    pub is_ion: bool,
    pub brachy_type: Option<String>,
    /// Sum of channel total times, seconds
    pub brachy_time: Option<f64>,
}

impl PlanRecord {
    /// Creates a plan record from a DICOM file path
    pub fn from_file(path: PathBuf) -> Result<Self> {
        let dcm = open_file(&path)?;
        Self::from_dicom(path, &dcm)
    }

    /// Creates a plan record from an already-opened DICOM object
    ///
    /// # Errors
    ///
    /// Returns `Parse` when a required identifier is missing
    pub fn from_dicom(path: PathBuf, dcm: &InMemDicomObject) -> Result<Self> {
        let sop_instance_uid = required(dcm, SOP_INSTANCE_UID, "SOPInstanceUID", &path)?;
        let study_instance_uid = required(dcm, STUDY_INSTANCE_UID, "StudyInstanceUID", &path)?;
        let patient_id = required(dcm, PATIENT_ID, "PatientID", &path)?;

        let (beams, is_ion) = extract_beams(dcm);
        let mut fraction_groups = extract_fraction_groups(dcm);
        let mut beams = beams;
        attach_referenced_beams(&mut beams, &fraction_groups);
        for rx in fraction_groups.iter_mut() {
            if rx.beam_count == 0 {
                rx.beam_count = rx.referenced_beams.len();
            }
        }

        let application_setups = get_items(dcm, APPLICATION_SETUP_SEQUENCE);
        let brachy_time = if application_setups.is_empty() {
            None
        } else {
            let total: f64 = application_setups
                .iter()
                .flat_map(|setup| get_items(setup, CHANNEL_SEQUENCE))
                .filter_map(|channel| get_float_value(channel, CHANNEL_TOTAL_TIME))
                .sum();
            Some(total)
        };

        Ok(Self {
            file_path: path,
            sop_instance_uid,
            study_instance_uid,
            series_instance_uid: get_string_value(dcm, SERIES_INSTANCE_UID),
            patient_id,
            patient_name: get_string_value(dcm, PATIENT_NAME),
            birth_date: get_string_value(dcm, PATIENT_BIRTH_DATE),
            patient_sex: get_string_value(dcm, PATIENT_SEX),
            study_date: get_string_value(dcm, STUDY_DATE),
            physician: extract_physician(dcm),
            tx_site: get_string_value(dcm, RT_PLAN_LABEL),
            plan_name: get_string_value(dcm, RT_PLAN_NAME)
                .or_else(|| get_string_value(dcm, RT_PLAN_LABEL)),
            manufacturer: get_string_value(dcm, MANUFACTURER),
            model: get_string_value(dcm, MANUFACTURER_MODEL_NAME),
            software_version: get_string_value(dcm, SOFTWARE_VERSIONS),
            patient_orientation: first_item(dcm, PATIENT_SETUP_SEQUENCE)
                .and_then(|setup| get_string_value(setup, PATIENT_POSITION)),
            plan_time_stamp: get_date_time(dcm, RT_PLAN_DATE, RT_PLAN_TIME),
            referenced_structure_uid: first_item(dcm, REFERENCED_STRUCTURE_SET_SEQUENCE)
                .and_then(|item| get_string_value(item, REFERENCED_SOP_INSTANCE_UID)),
            fraction_groups,
            beams,
            is_ion,
            brachy_type: get_string_value(dcm, BRACHY_TREATMENT_TYPE),
            brachy_time,
        })
    }

    /// Total prescription dose over all fraction groups, Gy
    pub fn rx_dose(&self) -> Option<f64> {
        let doses: Vec<f64> = self
            .fraction_groups
            .iter()
            .filter_map(|rx| rx.rx_dose)
            .collect();
        if doses.is_empty() {
            None
        } else {
            Some(doses.iter().sum())
        }
    }

    /// Total planned fractions over all fraction groups
    pub fn fx_count(&self) -> i32 {
        self.fraction_groups.iter().map(|rx| rx.fx_count).sum()
    }

    pub fn is_brachy(&self) -> bool {
        self.brachy_type.is_some() || self.brachy_time.is_some()
    }
}

fn required(dcm: &InMemDicomObject, tag: dicom_core::Tag, name: &str, path: &Path) -> Result<String> {
    get_string_value(dcm, tag).ok_or_else(|| {
        DvhcatError::Parse(format!("{}: missing {}", path.display(), name))
    })
}

/// Resolves the plan physician
///
/// Fallback chain: PhysiciansOfRecord → ReferringPhysicianName → `DEFAULT`.
fn extract_physician(dcm: &InMemDicomObject) -> String {
    get_string_value(dcm, PHYSICIANS_OF_RECORD)
        .map(|s| s.split('\\').next().unwrap_or("").to_string())
        .filter(|s| !s.trim().is_empty())
        .or_else(|| get_string_value(dcm, REFERRING_PHYSICIAN_NAME))
        .map(|name| clean_physician_name(&name))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_PHYSICIAN.to_string())
}

fn extract_fraction_groups(dcm: &InMemDicomObject) -> Vec<RxRecord> {
    let dose_references = get_items(dcm, DOSE_REFERENCE_SEQUENCE);

    get_items(dcm, FRACTION_GROUP_SEQUENCE)
        .iter()
        .enumerate()
        .map(|(i, group)| {
            let fx_grp_number = get_int_value(group, FRACTION_GROUP_NUMBER).unwrap_or(i as i32 + 1);
            let fx_count = get_int_value(group, NUMBER_OF_FRACTIONS_PLANNED).unwrap_or(0);
            let referenced_beams: Vec<(i32, Option<f64>, Option<f64>)> =
                get_items(group, REFERENCED_BEAM_SEQUENCE)
                    .iter()
                    .filter_map(|beam| {
                        let number = get_int_value(beam, REFERENCED_BEAM_NUMBER)?;
                        Some((
                            number,
                            get_float_value(beam, BEAM_DOSE),
                            get_float_value(beam, BEAM_METERSET),
                        ))
                    })
                    .collect();

            // Dose reference item matched by number, else the first carrying a dose
            let matched = dose_references
                .iter()
                .find(|item| {
                    get_int_value(item, DOSE_REFERENCE_NUMBER) == Some(fx_grp_number)
                        && get_float_value(item, TARGET_PRESCRIPTION_DOSE).is_some()
                })
                .or_else(|| {
                    dose_references
                        .iter()
                        .find(|item| get_float_value(item, TARGET_PRESCRIPTION_DOSE).is_some())
                });

            let rx_dose = matched
                .and_then(|item| get_float_value(item, TARGET_PRESCRIPTION_DOSE))
                .or_else(|| {
                    let beam_total: f64 = referenced_beams.iter().filter_map(|(_, d, _)| *d).sum();
                    if beam_total > 0.0 && fx_count > 0 {
                        Some(beam_total * fx_count as f64)
                    } else {
                        None
                    }
                });

            let normalization_method =
                matched.and_then(|item| get_string_value(item, DOSE_REFERENCE_STRUCTURE_TYPE));
            let normalization_object = match normalization_method.as_deref() {
                Some("COORDINATES") | Some("POINT") => Some("COORDINATE".to_string()),
                Some(_) => matched
                    .and_then(|item| get_int_value(item, REFERENCED_ROI_NUMBER))
                    .map(|n| format!("ROI {}", n)),
                None => None,
            };

            RxRecord {
                fx_grp_number,
                fx_count,
                beam_count: get_int_value(group, NUMBER_OF_BEAMS)
                    .map(|n| n.max(0) as usize)
                    .unwrap_or(0),
                rx_dose,
                normalization_method,
                normalization_object,
                referenced_beams,
            }
        })
        .collect()
}

fn extract_beams(dcm: &InMemDicomObject) -> (Vec<BeamRecord>, bool) {
    let (items, cp_tag, is_ion) = if !get_items(dcm, ION_BEAM_SEQUENCE).is_empty() {
        (get_items(dcm, ION_BEAM_SEQUENCE), ION_CONTROL_POINT_SEQUENCE, true)
    } else {
        (get_items(dcm, BEAM_SEQUENCE), CONTROL_POINT_SEQUENCE, false)
    };

    let beams = items
        .iter()
        .enumerate()
        .map(|(i, beam)| {
            let leaf_boundaries = get_items(beam, BEAM_LIMITING_DEVICE_SEQUENCE)
                .iter()
                .find_map(|device| get_multi_float_value(device, LEAF_POSITION_BOUNDARIES))
                .unwrap_or_default();

            BeamRecord {
                beam_number: get_int_value(beam, BEAM_NUMBER).unwrap_or(i as i32 + 1),
                beam_name: get_string_value(beam, BEAM_NAME),
                beam_description: get_string_value(beam, BEAM_DESCRIPTION),
                treatment_machine: get_string_value(beam, TREATMENT_MACHINE_NAME),
                beam_type: get_string_value(beam, BEAM_TYPE),
                radiation_type: get_string_value(beam, RADIATION_TYPE),
                final_cumulative_weight: get_float_value(beam, FINAL_CUMULATIVE_METERSET_WEIGHT)
                    .unwrap_or(0.0),
                control_points: extract_control_points(get_items(beam, cp_tag)),
                leaf_boundaries,
                ..Default::default()
            }
        })
        .collect();

    (beams, is_ion)
}

/// Reads control points, inheriting values that later points omit
fn extract_control_points(items: &[InMemDicomObject]) -> Vec<ControlPoint> {
    let mut points: Vec<ControlPoint> = Vec::with_capacity(items.len());

    for item in items {
        let prev = points.last().cloned().unwrap_or_default();
        let mut devices = prev.devices.clone();
        for device in get_items(item, BEAM_LIMITING_DEVICE_POSITION_SEQUENCE) {
            let kind = get_string_value(device, RT_BEAM_LIMITING_DEVICE_TYPE).unwrap_or_default();
            let Some(positions) = get_multi_float_value(device, LEAF_JAW_POSITIONS) else {
                continue;
            };
            match kind.to_uppercase().as_str() {
                "X" | "ASYMX" if positions.len() >= 2 => {
                    devices.jaw_x = Some([positions[0], positions[1]])
                }
                "Y" | "ASYMY" if positions.len() >= 2 => {
                    devices.jaw_y = Some([positions[0], positions[1]])
                }
                "MLCX" => devices.mlc = Some(positions),
                _ => {}
            }
        }

        let direction = |tag| get_string_value(item, tag).map(|s| RotationDirection::from_str(&s));
        points.push(ControlPoint {
            cumulative_weight: get_float_value(item, CUMULATIVE_METERSET_WEIGHT)
                .unwrap_or(prev.cumulative_weight),
            gantry_angle: get_float_value(item, GANTRY_ANGLE).or(prev.gantry_angle),
            gantry_direction: direction(GANTRY_ROTATION_DIRECTION).or(prev.gantry_direction),
            collimator_angle: get_float_value(item, BEAM_LIMITING_DEVICE_ANGLE)
                .or(prev.collimator_angle),
            collimator_direction: direction(BEAM_LIMITING_DEVICE_ROTATION_DIRECTION)
                .or(prev.collimator_direction),
            couch_angle: get_float_value(item, PATIENT_SUPPORT_ANGLE).or(prev.couch_angle),
            couch_direction: direction(PATIENT_SUPPORT_ROTATION_DIRECTION)
                .or(prev.couch_direction),
            energy: get_float_value(item, NOMINAL_BEAM_ENERGY).or(prev.energy),
            isocenter: get_multi_float_value(item, ISOCENTER_POSITION)
                .and_then(|v| Point3::from_slice(&v))
                .or(prev.isocenter),
            ssd: get_float_value(item, SOURCE_TO_SURFACE_DISTANCE),
            devices,
        });
    }

    points
}

/// Copies per-fraction beam dose and meterset onto the beams
fn attach_referenced_beams(beams: &mut [BeamRecord], fraction_groups: &[RxRecord]) {
    for rx in fraction_groups {
        for (number, dose, mu) in &rx.referenced_beams {
            if let Some(beam) = beams.iter_mut().find(|b| b.beam_number == *number) {
                beam.fx_grp_number = Some(rx.fx_grp_number);
                beam.beam_dose = *dose;
                beam.beam_mu = *mu;
            }
        }
    }
}
