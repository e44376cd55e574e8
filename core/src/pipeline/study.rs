use crate::association::StudyGroup;
use crate::cancel::CancellationToken;
use crate::complexity::{plan_complexity, ControlPointScorer, PlanComplexity};
use crate::dose::{sum_doses, DoseGrid};
use crate::dvh::{calculate_dvh, DvhRecord};
use crate::error::{DvhcatError, Result};
use crate::extraction::{DoseRecord, PlanRecord, RoiRecord, StructureSetRecord};
use crate::geometry::{
    distance_to_target, overlap_volume_histogram, DistanceMetrics, RoiContour, RoiMetrics, TargetReference,
};
use crate::roi_map::{Resolution, RoiNameMap};
use crate::rows::{
    assemble_beam_rows, assemble_dvh_row, assemble_plan_row, assemble_rx_rows, DvhInputs, DvhRow, StudyRows,
};
use crate::types::{ImportConfig, Point3};
use log::{debug, info, warn};
use rayon::prelude::*;

use super::report::{NameReview, StudyWarning};

/// Parsed records of one study group
#[derive(Debug, Clone)]
pub struct StudyRecords {
    /// Sorted by SOP Instance UID
    pub plans: Vec<PlanRecord>,
    pub doses: Vec<DoseRecord>,
    pub structure: StructureSetRecord,
}

impl StudyRecords {
    /// Reads every file of an associated study group
    ///
    /// Plans take the group's study identity, which differs from their
    /// StudyInstanceUID when a study was split into several domains. Dose
    /// headers are read here; their pixels are read while summing.
    ///
    /// # Errors
    ///
    /// Returns the first read or parse failure; the study is then skipped
    pub fn load(group: &StudyGroup) -> Result<Self> {
        let mut plans = Vec::with_capacity(group.plans.len());
        let mut doses = Vec::with_capacity(group.plans.len());
        for pair in &group.plans {
            let mut plan = PlanRecord::from_file(pair.plan.path.clone()).map_err(|e| parse_error(&pair.plan.path, e))?;
            plan.study_instance_uid = group.study_instance_uid.clone();
            plans.push(plan);
            doses.push(DoseRecord::from_file(pair.dose.path.clone()).map_err(|e| parse_error(&pair.dose.path, e))?);
        }
        let structure = StructureSetRecord::from_file(group.structure.path.clone())
            .map_err(|e| parse_error(&group.structure.path, e))?;
        Ok(Self::new(plans, doses, structure))
    }

    pub fn new(mut plans: Vec<PlanRecord>, doses: Vec<DoseRecord>, structure: StructureSetRecord) -> Self {
        plans.sort_by(|a, b| a.sop_instance_uid.cmp(&b.sop_instance_uid));
        Self {
            plans,
            doses,
            structure,
        }
    }
}

fn parse_error(path: &std::path::Path, e: DvhcatError) -> DvhcatError {
    match e {
        DvhcatError::Dicom(msg) | DvhcatError::InvalidValue(msg) => {
            DvhcatError::Parse(format!("{}: {}", path.display(), msg))
        }
        other => other,
    }
}

/// Rows and findings of one processed study
#[derive(Debug)]
pub struct StudyResult {
    pub rows: StudyRows,
    pub warnings: Vec<StudyWarning>,
    pub reviews: Vec<NameReview>,
    pub dose_available: bool,
}

/// Shared, read-only inputs of every ROI of a study
struct StudyContext<'a> {
    config: &'a ImportConfig,
    map: &'a RoiNameMap,
    physician: &'a str,
    mrn: &'a str,
    study_instance_uid: &'a str,
    grid: Option<&'a DoseGrid>,
    target: Option<&'a TargetReference>,
    ptv_centroid: Option<Point3>,
    isocenters: &'a [Point3],
    cancel: &'a CancellationToken,
}

struct RoiOutput {
    row: DvhRow,
    warnings: Vec<StudyWarning>,
    review: Option<NameReview>,
}

/// Keeps recoverable errors as warnings; cancellation always propagates
fn recover<T>(result: Result<T>, roi: Option<&str>, warnings: &mut Vec<StudyWarning>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(DvhcatError::Cancelled) => Err(DvhcatError::Cancelled),
        Err(e) => {
            match roi {
                Some(name) => warn!("{}: {}", name, e),
                None => warn!("{}", e),
            }
            warnings.push(match roi {
                Some(name) => StudyWarning::roi(name, e),
                None => StudyWarning::study(e),
            });
            Ok(None)
        }
    }
}

/// Computes every row of one study
///
/// Dose grids that cannot be summed leave the dose-derived fields empty and
/// are recorded as a study warning. Geometry failures of one ROI empty that
/// ROI's geometry fields only. Unmapped ROI names come back as review items.
pub fn process_study(
    records: &StudyRecords,
    config: &ImportConfig,
    map: &RoiNameMap,
    scorer: &dyn ControlPointScorer,
    cancel: &CancellationToken,
) -> Result<StudyResult> {
    let first = records
        .plans
        .first()
        .ok_or_else(|| DvhcatError::Association("study has no plan".to_string()))?;
    cancel.check()?;
    let mut warnings = Vec::new();

    let summed = recover(sum_doses(&records.doses, config, cancel), None, &mut warnings)?;
    if let Some(summed) = &summed {
        debug!(
            "Summed {} dose grids ({:?}) for study {}",
            summed.members, summed.path, first.study_instance_uid
        );
    }
    let grid = summed.as_ref().map(|s| &s.grid);

    let structure = &records.structure;
    let mut contours: Vec<(&RoiRecord, Option<RoiContour>)> = Vec::new();
    for roi in &structure.rois {
        if !roi.has_contours() {
            warn!("{}: no planar contours, skipping", roi.name);
            continue;
        }
        let contour = recover(roi.contour(structure.slice_spacing), Some(roi.name.as_str()), &mut warnings)?;
        contours.push((roi, contour));
    }

    let targets: Vec<RoiContour> = contours
        .iter()
        .filter(|(roi, _)| roi.roi_type.is_target())
        .filter_map(|(_, contour)| contour.clone())
        .collect();
    let target = TargetReference::new(targets);
    let ptv_centroid = match &target {
        Some(t) => recover(t.centroid(config.ovh_resolution_mm, cancel), None, &mut warnings)?.flatten(),
        None => None,
    };

    let mut isocenters: Vec<Point3> = Vec::new();
    for point in records
        .plans
        .iter()
        .flat_map(|p| p.beams.iter())
        .filter_map(|b| b.control_points.first().and_then(|cp| cp.isocenter))
    {
        if !isocenters.iter().any(|known| known.distance(&point) < 1e-6) {
            isocenters.push(point);
        }
    }

    let context = StudyContext {
        config,
        map,
        physician: &first.physician,
        mrn: &first.patient_id,
        study_instance_uid: &first.study_instance_uid,
        grid,
        target: target.as_ref(),
        ptv_centroid,
        isocenters: &isocenters,
        cancel,
    };
    let outputs: Vec<RoiOutput> = contours
        .par_iter()
        .map(|(roi, contour)| process_roi(&context, roi, contour.as_ref()))
        .collect::<Result<Vec<_>>>()?;

    let complexity: Vec<PlanComplexity> = records
        .plans
        .iter()
        .map(|plan| plan_complexity(plan, scorer, config.complexity_scale))
        .collect();
    let plan = assemble_plan_row(
        &records.plans,
        structure,
        &records.doses,
        PlanComplexity::combined(&complexity),
    )
    .ok_or_else(|| DvhcatError::Association("study has no plan".to_string()))?;

    let mut dvhs = Vec::with_capacity(outputs.len());
    let mut reviews = Vec::new();
    for output in outputs {
        dvhs.push(output.row);
        warnings.extend(output.warnings);
        reviews.extend(output.review);
    }
    info!(
        "Study {}: {} ROIs, {} warnings, {} names to review",
        first.study_instance_uid,
        dvhs.len(),
        warnings.len(),
        reviews.len()
    );

    Ok(StudyResult {
        rows: StudyRows {
            plan,
            rxs: assemble_rx_rows(&records.plans),
            beams: assemble_beam_rows(&records.plans, &complexity),
            dvhs,
        },
        warnings,
        reviews,
        dose_available: grid.is_some(),
    })
}

fn process_roi(ctx: &StudyContext<'_>, roi: &RoiRecord, contour: Option<&RoiContour>) -> Result<RoiOutput> {
    ctx.cancel.check()?;
    let mut warnings = Vec::new();
    let name = Some(roi.name.as_str());

    let mut metrics: Option<RoiMetrics> = None;
    let mut dvh: Option<DvhRecord> = None;
    let mut dth: Option<DistanceMetrics> = None;
    let mut ovh: Option<DistanceMetrics> = None;
    let mut ptv_overlap = None;

    if let Some(contour) = contour {
        metrics = recover(contour.metrics(ctx.config.overlap_resolution_mm, ctx.cancel), name, &mut warnings)?;

        if let Some(grid) = ctx.grid {
            if let Some(calc) = recover(calculate_dvh(contour, grid, ctx.config, ctx.cancel), name, &mut warnings)? {
                for message in calc.warnings {
                    warnings.push(StudyWarning::roi(&roi.name, DvhcatError::ResourceExhaustion(message)));
                }
                dvh = Some(calc.dvh);
            }
        }

        if let Some(target) = ctx.target.filter(|_| !roi.roi_type.is_target()) {
            dth = recover(distance_to_target(contour, target, ctx.config, ctx.cancel), name, &mut warnings)?.flatten();
            ovh = recover(
                overlap_volume_histogram(contour, target, ctx.config, ctx.cancel),
                name,
                &mut warnings,
            )?
            .flatten();
            ptv_overlap = recover(
                target.overlap_volume_mm3(contour, ctx.config.overlap_resolution_mm, ctx.cancel),
                name,
                &mut warnings,
            )?
            .map(|mm3| mm3 / 1000.0);
        }
    }

    let resolution = ctx.map.resolve(
        ctx.physician,
        &roi.name,
        ctx.config.similarity_threshold,
        ctx.config.max_suggestions,
    );
    let review = match &resolution {
        Resolution::Mapped(_) => None,
        Resolution::Uncategorized { suggestions } => Some(NameReview {
            patient_id: ctx.mrn.to_string(),
            study_instance_uid: ctx.study_instance_uid.to_string(),
            physician: ctx.physician.to_string(),
            roi_name: roi.name.clone(),
            suggestions: suggestions.clone(),
        }),
    };

    let row = assemble_dvh_row(&DvhInputs {
        mrn: ctx.mrn,
        study_instance_uid: ctx.study_instance_uid,
        roi_name: &roi.name,
        structure_type: roi.roi_type.clone(),
        mapping: resolution.mapping(),
        metrics: metrics.as_ref(),
        dvh: dvh.as_ref(),
        dth: dth.as_ref(),
        ovh: ovh.as_ref(),
        ptv_overlap,
        ptv_centroid: ctx.ptv_centroid,
        isocenters: ctx.isocenters,
    });
    Ok(RoiOutput { row, warnings, review })
}
