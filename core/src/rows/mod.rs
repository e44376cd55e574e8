//! Normalized output rows
//!
//! Four tables joined by `(mrn, study_instance_uid)`: one [`PlanRow`] per
//! study, one [`RxRow`] per fraction group, one [`BeamRow`] per beam and one
//! [`DvhRow`] per ROI. Lengths are in cm except the centroid (mm), doses in
//! Gy and angles in degrees. `None` serializes as `null`.

mod assemble;
mod sink;

pub use assemble::{assemble_beam_rows, assemble_dvh_row, assemble_plan_row, assemble_rx_rows, DvhInputs};
pub use sink::{read_json_lines, DuplicatePolicy, JsonLinesSink, MemorySink, RowSink, RowStore};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRow {
    pub mrn: String,
    pub study_instance_uid: String,
    pub birth_date: Option<String>,
    /// Whole years at the simulation study date
    pub age: Option<i32>,
    pub patient_sex: Option<String>,
    pub sim_study_date: Option<String>,
    pub physician: String,
    pub tx_site: Option<String>,
    pub rx_dose: Option<f64>,
    pub fxs: i32,
    pub patient_orientation: Option<String>,
    pub plan_time_stamp: Option<String>,
    pub struct_time_stamp: Option<String>,
    pub dose_time_stamp: Option<String>,
    pub tps_manufacturer: Option<String>,
    pub tps_software_name: Option<String>,
    pub tps_software_version: Option<String>,
    pub tx_modality: Option<String>,
    /// Brachy channel time as `HH:MM:SS`
    pub tx_time: Option<String>,
    /// MU over all beams and fractions
    pub total_mu: Option<f64>,
    pub dose_grid_res: Option<String>,
    pub heterogeneity_correction: Option<String>,
    pub complexity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RxRow {
    pub mrn: String,
    pub study_instance_uid: String,
    pub plan_name: Option<String>,
    pub fx_grp_name: String,
    pub fx_grp_number: i32,
    pub fx_grp_count: usize,
    pub fx_dose: Option<f64>,
    pub fxs: i32,
    pub rx_dose: Option<f64>,
    pub normalization_method: Option<String>,
    pub normalization_object: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamRow {
    pub mrn: String,
    pub study_instance_uid: String,
    pub beam_number: i32,
    pub beam_name: Option<String>,
    pub fx_grp_number: Option<i32>,
    pub fx_count: Option<i32>,
    pub fx_grp_beam_count: Option<usize>,
    pub beam_dose: Option<f64>,
    pub beam_mu: f64,
    pub radiation_type: Option<String>,
    pub beam_energy_min: Option<f64>,
    pub beam_energy_max: Option<f64>,
    pub beam_type: Option<String>,
    pub control_point_count: usize,
    pub gantry_start: Option<f64>,
    pub gantry_end: Option<f64>,
    pub gantry_rot_dir: Option<String>,
    pub gantry_range: Option<f64>,
    pub gantry_min: Option<f64>,
    pub gantry_max: Option<f64>,
    pub collimator_start: Option<f64>,
    pub collimator_end: Option<f64>,
    pub collimator_rot_dir: Option<String>,
    pub collimator_range: Option<f64>,
    pub collimator_min: Option<f64>,
    pub collimator_max: Option<f64>,
    pub couch_start: Option<f64>,
    pub couch_end: Option<f64>,
    pub couch_rot_dir: Option<String>,
    pub couch_range: Option<f64>,
    pub couch_min: Option<f64>,
    pub couch_max: Option<f64>,
    /// mm, `x,y,z`
    pub isocenter: Option<String>,
    /// cm, mean over control points
    pub ssd: Option<f64>,
    pub treatment_machine: Option<String>,
    pub beam_mu_per_deg: Option<f64>,
    pub beam_mu_per_cp: Option<f64>,
    pub tx_modality: Option<String>,
    pub complexity: Option<f64>,
    pub complexity_min: Option<f64>,
    pub complexity_mean: Option<f64>,
    pub complexity_median: Option<f64>,
    pub complexity_max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DvhRow {
    pub mrn: String,
    pub study_instance_uid: String,
    pub institutional_roi: String,
    pub physician_roi: String,
    pub roi_name: String,
    pub roi_type: String,
    /// cm³
    pub volume: Option<f64>,
    pub min_dose: Option<f64>,
    pub mean_dose: Option<f64>,
    pub max_dose: Option<f64>,
    /// Cumulative cm³ per dose bin
    pub dvh_string: Option<String>,
    pub dist_to_ptv_min: Option<f64>,
    pub dist_to_ptv_25: Option<f64>,
    pub dist_to_ptv_median: Option<f64>,
    pub dist_to_ptv_mean: Option<f64>,
    pub dist_to_ptv_75: Option<f64>,
    pub dist_to_ptv_max: Option<f64>,
    pub dth_string: Option<String>,
    /// Lower edge of the first DTH bin, cm
    pub dth_bin_start: Option<f64>,
    pub ovh_min: Option<f64>,
    pub ovh_25: Option<f64>,
    pub ovh_median: Option<f64>,
    pub ovh_mean: Option<f64>,
    pub ovh_75: Option<f64>,
    pub ovh_max: Option<f64>,
    /// cm²
    pub surface_area: Option<f64>,
    /// cm³
    pub ptv_overlap: Option<f64>,
    /// mm, `x,y,z`
    pub centroid: Option<String>,
    pub dist_to_ptv_centroids: Option<f64>,
    pub spread_x: Option<f64>,
    pub spread_y: Option<f64>,
    pub spread_z: Option<f64>,
    pub cross_section_max: Option<f64>,
    pub cross_section_median: Option<f64>,
    pub centroid_dist_to_iso_min: Option<f64>,
    pub centroid_dist_to_iso_max: Option<f64>,
}

/// All rows of one imported study
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyRows {
    pub plan: PlanRow,
    pub rxs: Vec<RxRow>,
    pub beams: Vec<BeamRow>,
    pub dvhs: Vec<DvhRow>,
}
