use crate::complexity::PlanComplexity;
use crate::dvh::DvhRecord;
use crate::extraction::{BeamRecord, ControlPoint, DoseRecord, PlanRecord, StructureSetRecord};
use crate::geometry::{DistanceMetrics, RoiMetrics};
use crate::roi_map::{RoiMapping, UNCATEGORIZED};
use crate::types::{Point3, RoiType, RotationDirection};
use chrono::{Datelike, NaiveDate};
use std::collections::BTreeSet;

use super::{BeamRow, DvhRow, PlanRow, RxRow};

/// Builds the Plans row of a summation domain
///
/// Metadata comes from the first plan; prescription dose, fractions and MU
/// are totals over every plan of the domain.
pub fn assemble_plan_row(
    plans: &[PlanRecord],
    structure: &StructureSetRecord,
    doses: &[DoseRecord],
    complexity: Option<f64>,
) -> Option<PlanRow> {
    let first = plans.first()?;
    let dose = doses.first();

    let rx_doses: Vec<f64> = plans.iter().filter_map(|p| p.rx_dose()).collect();
    let total_mu: Vec<f64> = plans.iter().filter_map(total_mu).collect();
    let brachy_time: Vec<f64> = plans.iter().filter_map(|p| p.brachy_time).collect();

    let modalities: BTreeSet<String> = plans.iter().flat_map(plan_modalities).collect();

    Some(PlanRow {
        mrn: first.patient_id.clone(),
        study_instance_uid: first.study_instance_uid.clone(),
        birth_date: first.birth_date.clone(),
        age: age_at(first.birth_date.as_deref(), first.study_date.as_deref()),
        patient_sex: first.patient_sex.clone(),
        sim_study_date: first.study_date.clone(),
        physician: first.physician.clone(),
        tx_site: first.tx_site.clone(),
        rx_dose: (!rx_doses.is_empty()).then(|| rx_doses.iter().sum()),
        fxs: plans.iter().map(|p| p.fx_count()).sum(),
        patient_orientation: first.patient_orientation.clone(),
        plan_time_stamp: first.plan_time_stamp.clone(),
        struct_time_stamp: structure.time_stamp.clone(),
        dose_time_stamp: dose.and_then(|d| d.time_stamp.clone()),
        tps_manufacturer: first.manufacturer.clone(),
        tps_software_name: first.model.clone(),
        tps_software_version: first.software_version.clone(),
        tx_modality: (!modalities.is_empty())
            .then(|| modalities.into_iter().collect::<Vec<_>>().join(",")),
        tx_time: (!brachy_time.is_empty()).then(|| format_duration(brachy_time.iter().sum())),
        total_mu: (!total_mu.is_empty()).then(|| round_to(total_mu.iter().sum(), 1)),
        dose_grid_res: dose.map(|d| d.geometry.resolution_label()),
        heterogeneity_correction: dose.and_then(|d| d.heterogeneity_correction.clone()),
        complexity,
    })
}

/// One Rxs row per fraction group of every plan
pub fn assemble_rx_rows(plans: &[PlanRecord]) -> Vec<RxRow> {
    plans
        .iter()
        .flat_map(|plan| {
            plan.fraction_groups.iter().map(move |rx| RxRow {
                mrn: plan.patient_id.clone(),
                study_instance_uid: plan.study_instance_uid.clone(),
                plan_name: plan.plan_name.clone(),
                fx_grp_name: format!("FxGrp {}", rx.fx_grp_number),
                fx_grp_number: rx.fx_grp_number,
                fx_grp_count: plan.fraction_groups.len(),
                fx_dose: rx.fx_dose(),
                fxs: rx.fx_count,
                rx_dose: rx.rx_dose,
                normalization_method: rx.normalization_method.clone(),
                normalization_object: rx.normalization_object.clone(),
            })
        })
        .collect()
}

/// One Beams row per beam delivering MU
///
/// `complexity` holds the scores of each plan, in the order of `plans`.
pub fn assemble_beam_rows(plans: &[PlanRecord], complexity: &[PlanComplexity]) -> Vec<BeamRow> {
    let mut rows = Vec::new();
    for (i, plan) in plans.iter().enumerate() {
        let scores = complexity.get(i);
        for beam in &plan.beams {
            let Some(beam_mu) = beam.beam_mu.filter(|mu| *mu > 0.0) else {
                continue;
            };
            let rx = plan
                .fraction_groups
                .iter()
                .find(|rx| Some(rx.fx_grp_number) == beam.fx_grp_number);
            let cps = &beam.control_points;
            let energies = beam.energies();
            let gantry = AngleSummary::new(cps, |cp| cp.gantry_angle, |cp| cp.gantry_direction);
            let collimator =
                AngleSummary::new(cps, |cp| cp.collimator_angle, |cp| cp.collimator_direction);
            let couch = AngleSummary::new(cps, |cp| cp.couch_angle, |cp| cp.couch_direction);
            let ssds: Vec<f64> = cps.iter().filter_map(|cp| cp.ssd).collect();
            let beam_complexity = scores.and_then(|s| s.beam(beam.beam_number));
            let stats = beam_complexity.and_then(|c| c.stats);

            rows.push(BeamRow {
                mrn: plan.patient_id.clone(),
                study_instance_uid: plan.study_instance_uid.clone(),
                beam_number: beam.beam_number,
                beam_name: Some(beam_label(beam)),
                fx_grp_number: beam.fx_grp_number,
                fx_count: rx.map(|rx| rx.fx_count),
                fx_grp_beam_count: rx.map(|rx| rx.beam_count),
                beam_dose: beam.beam_dose,
                beam_mu,
                radiation_type: beam.radiation_type.clone(),
                beam_energy_min: energies.iter().copied().reduce(f64::min),
                beam_energy_max: energies.iter().copied().reduce(f64::max),
                beam_type: beam.beam_type.clone(),
                control_point_count: cps.len(),
                gantry_start: gantry.start,
                gantry_end: gantry.end,
                gantry_rot_dir: gantry.rot_dir.clone(),
                gantry_range: gantry.range,
                gantry_min: gantry.min,
                gantry_max: gantry.max,
                collimator_start: collimator.start,
                collimator_end: collimator.end,
                collimator_rot_dir: collimator.rot_dir,
                collimator_range: collimator.range,
                collimator_min: collimator.min,
                collimator_max: collimator.max,
                couch_start: couch.start,
                couch_end: couch.end,
                couch_rot_dir: couch.rot_dir,
                couch_range: couch.range,
                couch_min: couch.min,
                couch_max: couch.max,
                isocenter: cps.first().and_then(|cp| cp.isocenter).map(|p| p.to_string()),
                ssd: (!ssds.is_empty()).then(|| round_to(ssds.iter().sum::<f64>() / ssds.len() as f64 / 10.0, 2)),
                treatment_machine: beam.treatment_machine.clone(),
                beam_mu_per_deg: gantry
                    .range
                    .filter(|r| *r > 0.0)
                    .map(|r| round_to(beam_mu / r, 2)),
                beam_mu_per_cp: (!cps.is_empty()).then(|| round_to(beam_mu / cps.len() as f64, 2)),
                tx_modality: beam_modality(plan, beam),
                complexity: beam_complexity.map(|c| c.complexity),
                complexity_min: stats.map(|s| s.min),
                complexity_mean: stats.map(|s| s.mean),
                complexity_median: stats.map(|s| s.median),
                complexity_max: stats.map(|s| s.max),
            });
        }
    }
    rows
}

/// Everything known about one ROI when its DVHs row is built
#[derive(Debug, Clone, Default)]
pub struct DvhInputs<'a> {
    pub mrn: &'a str,
    pub study_instance_uid: &'a str,
    pub roi_name: &'a str,
    /// Structure set type, used unless the map overrides it
    pub structure_type: RoiType,
    /// `None` keeps the ROI uncategorized
    pub mapping: Option<&'a RoiMapping>,
    pub metrics: Option<&'a RoiMetrics>,
    pub dvh: Option<&'a DvhRecord>,
    pub dth: Option<&'a DistanceMetrics>,
    pub ovh: Option<&'a DistanceMetrics>,
    /// cm³
    pub ptv_overlap: Option<f64>,
    /// mm
    pub ptv_centroid: Option<Point3>,
    /// Beam isocenters of the study, mm
    pub isocenters: &'a [Point3],
}

pub fn assemble_dvh_row(inputs: &DvhInputs<'_>) -> DvhRow {
    let roi_type = inputs
        .mapping
        .and_then(|m| m.roi_type.clone())
        .unwrap_or_else(|| inputs.structure_type.clone());
    let metrics = inputs.metrics;
    let centroid = metrics.map(|m| m.centroid);
    let iso_distances: Vec<f64> = match centroid {
        Some(c) => inputs.isocenters.iter().map(|iso| c.distance(iso) / 10.0).collect(),
        None => Vec::new(),
    };
    let dth = inputs.dth;
    let ovh = inputs.ovh;

    DvhRow {
        mrn: inputs.mrn.to_string(),
        study_instance_uid: inputs.study_instance_uid.to_string(),
        institutional_roi: inputs
            .mapping
            .map(|m| m.institutional_roi.clone())
            .unwrap_or_else(|| UNCATEGORIZED.to_string()),
        physician_roi: inputs
            .mapping
            .map(|m| m.physician_roi.clone())
            .unwrap_or_else(|| UNCATEGORIZED.to_string()),
        roi_name: inputs.roi_name.to_string(),
        roi_type: roi_type.as_str().to_string(),
        volume: metrics.map(|m| m.volume).or(inputs.dvh.map(|d| d.volume)),
        min_dose: inputs.dvh.map(|d| d.min_dose),
        mean_dose: inputs.dvh.map(|d| d.mean_dose),
        max_dose: inputs.dvh.map(|d| d.max_dose),
        dvh_string: inputs.dvh.map(|d| d.to_csv()),
        dist_to_ptv_min: dth.map(|d| d.stats.min),
        dist_to_ptv_25: dth.map(|d| d.stats.p25),
        dist_to_ptv_median: dth.map(|d| d.stats.median),
        dist_to_ptv_mean: dth.map(|d| d.stats.mean),
        dist_to_ptv_75: dth.map(|d| d.stats.p75),
        dist_to_ptv_max: dth.map(|d| d.stats.max),
        dth_string: dth.map(|d| d.histogram.to_csv()),
        dth_bin_start: dth.map(|d| d.histogram.start),
        ovh_min: ovh.map(|d| d.stats.min),
        ovh_25: ovh.map(|d| d.stats.p25),
        ovh_median: ovh.map(|d| d.stats.median),
        ovh_mean: ovh.map(|d| d.stats.mean),
        ovh_75: ovh.map(|d| d.stats.p75),
        ovh_max: ovh.map(|d| d.stats.max),
        surface_area: metrics.map(|m| m.surface_area),
        ptv_overlap: inputs.ptv_overlap,
        centroid: centroid.map(|c| c.to_string()),
        dist_to_ptv_centroids: centroid
            .zip(inputs.ptv_centroid)
            .map(|(c, ptv)| c.distance(&ptv) / 10.0),
        spread_x: metrics.map(|m| m.spread[0]),
        spread_y: metrics.map(|m| m.spread[1]),
        spread_z: metrics.map(|m| m.spread[2]),
        cross_section_max: metrics.map(|m| m.cross_section_max),
        cross_section_median: metrics.map(|m| m.cross_section_median),
        centroid_dist_to_iso_min: iso_distances.iter().copied().reduce(f64::min),
        centroid_dist_to_iso_max: iso_distances.iter().copied().reduce(f64::max),
    }
}

/// Start, end, travel and extent of one axis over the control points
#[derive(Debug, Clone, Default, PartialEq)]
struct AngleSummary {
    start: Option<f64>,
    end: Option<f64>,
    rot_dir: Option<String>,
    range: Option<f64>,
    min: Option<f64>,
    max: Option<f64>,
}

impl AngleSummary {
    fn new(
        cps: &[ControlPoint],
        angle: impl Fn(&ControlPoint) -> Option<f64>,
        direction: impl Fn(&ControlPoint) -> Option<RotationDirection>,
    ) -> Self {
        let angles: Vec<f64> = cps.iter().filter_map(&angle).map(signed_angle).collect();
        if angles.is_empty() {
            return Self::default();
        }
        let travel: f64 = angles.windows(2).map(|w| (w[1] - w[0]).abs()).sum();

        Self {
            start: angles.first().copied(),
            end: angles.last().copied(),
            rot_dir: rotation_label(cps.iter().filter_map(direction)),
            range: Some(round_to(travel, 1)),
            min: angles.iter().copied().reduce(f64::min),
            max: angles.iter().copied().reduce(f64::max),
        }
    }
}

/// Maps `(180, 360)` onto `(-180, 0)`
fn signed_angle(angle: f64) -> f64 {
    if angle > 180.0 {
        angle - 360.0
    } else {
        angle
    }
}

/// `CW`, `CC`, or `CW/CC`/`CC/CW` when the direction changes, led by the first
fn rotation_label(directions: impl Iterator<Item = RotationDirection>) -> Option<String> {
    let codes: Vec<&str> = directions.filter_map(|d| d.code()).collect();
    let first = *codes.first()?;
    if codes.iter().all(|c| *c == first) {
        Some(first.to_string())
    } else if first == "CW" {
        Some("CW/CC".to_string())
    } else {
        Some("CC/CW".to_string())
    }
}

fn beam_label(beam: &BeamRecord) -> String {
    beam.beam_description
        .clone()
        .or_else(|| beam.beam_name.clone())
        .unwrap_or_else(|| beam.beam_number.to_string())
}

/// `Photon 3D`, `Electron Arc` and so on; brachy plans report their type
fn beam_modality(plan: &PlanRecord, beam: &BeamRecord) -> Option<String> {
    if plan.is_brachy() {
        return plan.brachy_type.clone();
    }
    let radiation = beam.radiation_type.as_deref()?;
    let mut chars = radiation.chars();
    let title: String = match chars.next() {
        Some(c) => c.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => return None,
    };
    let is_arc = beam
        .control_points
        .iter()
        .any(|cp| cp.gantry_direction.and_then(|d| d.code()).is_some());
    Some(format!("{} {}", title, if is_arc { "Arc" } else { "3D" }))
}

fn plan_modalities(plan: &PlanRecord) -> Vec<String> {
    if plan.is_brachy() {
        return plan.brachy_type.clone().into_iter().collect();
    }
    plan.beams
        .iter()
        .filter_map(|beam| beam_modality(plan, beam))
        .collect()
}

/// Σ beam MU × fractions of the beam's fraction group
fn total_mu(plan: &PlanRecord) -> Option<f64> {
    let mut total = None;
    for beam in &plan.beams {
        let Some(mu) = beam.beam_mu else {
            continue;
        };
        let fxs = plan
            .fraction_groups
            .iter()
            .find(|rx| Some(rx.fx_grp_number) == beam.fx_grp_number)
            .map(|rx| rx.fx_count)
            .unwrap_or(0);
        *total.get_or_insert(0.0) += mu * fxs as f64;
    }
    total
}

/// Whole years between birth and simulation, `None` if either is unknown
fn age_at(birth_date: Option<&str>, study_date: Option<&str>) -> Option<i32> {
    let parse = |s: &str| NaiveDate::parse_from_str(s.trim(), "%Y%m%d").ok();
    let birth = parse(birth_date?)?;
    let study = parse(study_date?)?;
    let mut years = study.year() - birth.year();
    if (study.month(), study.day()) < (birth.month(), birth.day()) {
        years -= 1;
    }
    (years >= 0).then_some(years)
}

fn format_duration(seconds: f64) -> String {
    let total = seconds.round().max(0.0) as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, total / 60 % 60, total % 60)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
