use crate::error::DvhcatError;
use crate::types::FileRole;
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};

use super::candidate::CandidateFile;

/// One plan of a study with the dose selected for it
#[derive(Debug, Clone)]
pub struct PlanDose {
    pub plan: CandidateFile,
    pub dose: CandidateFile,
}

/// Files of one summation domain, resolved to a single importable combination
///
/// All plans share study and series; their doses are summed before any
/// dose metric is computed. A study holding several independent plan series
/// yields one group per series.
#[derive(Debug, Clone)]
pub struct StudyGroup {
    pub patient_id: String,
    /// Study identity the rows are stored under: the StudyInstanceUID for
    /// the first domain of a study, `<uid>_<n>` for the n-th after it
    pub study_instance_uid: String,
    /// Sorted by plan SOP Instance UID
    pub plans: Vec<PlanDose>,
    pub structure: CandidateFile,
}

/// A study that could not be associated
#[derive(Debug)]
pub struct AssociationFailure {
    pub patient_id: Option<String>,
    pub study_instance_uid: String,
    pub error: DvhcatError,
}

/// Ordered study groups ready for import, plus the studies left out
#[derive(Debug, Default)]
pub struct Manifest {
    /// Sorted by (patient id, study uid)
    pub groups: Vec<StudyGroup>,
    pub failures: Vec<AssociationFailure>,
    /// Files whose role is [`FileRole::Other`]
    pub ignored: Vec<CandidateFile>,
}

/// Groups sniffed files into study groups
///
/// Duplicate files of one SOP instance collapse to the preferred one (see
/// [`CandidateFile::is_preferred_to`]). Each plan series of a study is a
/// summation domain that must resolve to one dose per plan and one structure
/// set; a domain that does not is reported as a failure and the others
/// continue.
pub fn associate(candidates: Vec<CandidateFile>) -> Manifest {
    let mut manifest = Manifest::default();

    let mut unique: BTreeMap<(FileRole, String), CandidateFile> = BTreeMap::new();
    for candidate in candidates {
        if candidate.role == FileRole::Other {
            debug!("Ignoring {}", candidate.path.display());
            manifest.ignored.push(candidate);
            continue;
        }
        let key = (candidate.role, candidate.sop_instance_uid.clone());
        match unique.get(&key) {
            Some(existing) if !candidate.is_preferred_to(existing) => {
                debug!(
                    "Keeping {} over duplicate {}",
                    existing.path.display(),
                    candidate.path.display()
                );
            }
            _ => {
                unique.insert(key, candidate);
            }
        }
    }

    let mut studies: BTreeMap<String, Vec<CandidateFile>> = BTreeMap::new();
    for candidate in unique.into_values() {
        studies
            .entry(candidate.study_instance_uid.clone())
            .or_default()
            .push(candidate);
    }

    for (study_uid, files) in studies {
        for resolved in resolve_study(&study_uid, files) {
            match resolved {
                Ok(group) => manifest.groups.push(group),
                Err(failure) => {
                    warn!("Study {}: {}", failure.study_instance_uid, failure.error);
                    manifest.failures.push(failure);
                }
            }
        }
    }

    manifest.groups.sort_by(|a, b| {
        (&a.patient_id, &a.study_instance_uid).cmp(&(&b.patient_id, &b.study_instance_uid))
    });
    info!(
        "Associated {} studies, {} failed, {} files ignored",
        manifest.groups.len(),
        manifest.failures.len(),
        manifest.ignored.len()
    );
    manifest
}

type DomainResult = std::result::Result<StudyGroup, AssociationFailure>;

/// Resolves every summation domain of one study
///
/// Plans are grouped by series; each series is a domain of its own and is
/// resolved, or fails, independently of the others.
fn resolve_study(study_uid: &str, files: Vec<CandidateFile>) -> Vec<DomainResult> {
    let patients: BTreeSet<&str> = files.iter().map(|f| f.patient_id.as_str()).collect();
    let patient_id = patients.iter().next().map(|p| p.to_string());
    let fail = |study: &str, msg: String| AssociationFailure {
        patient_id: patient_id.clone(),
        study_instance_uid: study.to_string(),
        error: DvhcatError::Association(msg),
    };
    if patients.len() > 1 {
        return vec![Err(fail(
            study_uid,
            format!(
                "patient IDs disagree: {}",
                patients.into_iter().collect::<Vec<_>>().join(", ")
            ),
        ))];
    }

    let mut plans = Vec::new();
    let mut doses = Vec::new();
    let mut structures = Vec::new();
    for file in files {
        match file.role {
            FileRole::Plan => plans.push(file),
            FileRole::Dose => doses.push(file),
            FileRole::Structure => structures.push(file),
            FileRole::Other => {}
        }
    }

    if plans.is_empty() {
        return vec![Err(fail(study_uid, "no RT Plan".to_string()))];
    }
    if structures.is_empty() {
        return vec![Err(fail(study_uid, "no RT Structure Set".to_string()))];
    }

    let plan_uids: BTreeSet<&String> = plans.iter().map(|p| &p.sop_instance_uid).collect();
    for dose in &doses {
        if let Some(uid) = &dose.referenced_plan_uid {
            if !plan_uids.contains(uid) {
                debug!("{} references unknown plan {}", dose.path.display(), uid);
            }
        }
    }
    let single_plan = plans.len() == 1;

    let mut domains: BTreeMap<Option<String>, Vec<CandidateFile>> = BTreeMap::new();
    for plan in plans {
        domains.entry(plan.series_instance_uid.clone()).or_default().push(plan);
    }
    if domains.len() > 1 {
        info!("Study {}: {} independent plan series, importing each on its own", study_uid, domains.len());
    }

    domains
        .into_values()
        .enumerate()
        .map(|(i, mut domain)| {
            let study = match i {
                0 => study_uid.to_string(),
                n => format!("{}_{}", study_uid, n + 1),
            };
            domain.sort_by(|a, b| a.sop_instance_uid.cmp(&b.sop_instance_uid));
            resolve_domain(study.clone(), domain, &doses, &structures, single_plan)
                .map_err(|msg| fail(&study, msg))
        })
        .collect()
}

fn resolve_domain(
    study_instance_uid: String,
    plans: Vec<CandidateFile>,
    doses: &[CandidateFile],
    structures: &[CandidateFile],
    single_plan: bool,
) -> std::result::Result<StudyGroup, String> {
    let mut members = Vec::with_capacity(plans.len());
    for plan in &plans {
        let candidates: Vec<&CandidateFile> = doses
            .iter()
            .filter(|d| match &d.referenced_plan_uid {
                Some(uid) => *uid == plan.sop_instance_uid,
                None => single_plan,
            })
            .collect();
        let dose = select_dose(&candidates).map_err(|msg| format!("plan {}: {}", plan.sop_instance_uid, msg))?;
        members.push(PlanDose {
            plan: plan.clone(),
            dose: dose.clone(),
        });
    }

    let referenced: BTreeSet<&String> = plans
        .iter()
        .filter_map(|p| p.referenced_structure_uid.as_ref())
        .collect();
    let structure = structures
        .iter()
        .filter(|s| referenced.contains(&s.sop_instance_uid))
        .min()
        .or_else(|| structures.iter().min())
        .cloned()
        .ok_or_else(|| "no RT Structure Set".to_string())?;

    Ok(StudyGroup {
        patient_id: plans[0].patient_id.clone(),
        study_instance_uid,
        plans: members,
        structure,
    })
}

/// Picks the dose of one plan
///
/// Whole-plan doses win; among several the preferred file is used. Partial
/// doses are only accepted as the single candidate.
fn select_dose<'a>(candidates: &[&'a CandidateFile]) -> std::result::Result<&'a CandidateFile, String> {
    if let Some(whole) = candidates.iter().copied().filter(|d| d.is_whole_plan_dose()).min() {
        return Ok(whole);
    }
    match candidates {
        [] => Err("no RT Dose".to_string()),
        [single] => Ok(*single),
        _ => Err(format!("{} partial doses and no whole-plan dose", candidates.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::candidate::fixtures::candidate;
    use crate::types::DoseSummationType;

    fn plan(path: &str, sop: &str, series: &str) -> CandidateFile {
        let mut c = candidate(path, FileRole::Plan, "9.9", series, sop, 100);
        c.referenced_structure_uid = Some("2.2".to_string());
        c
    }

    fn dose(path: &str, sop: &str, plan_uid: Option<&str>, modified: i64) -> CandidateFile {
        let mut c = candidate(path, FileRole::Dose, "9.9", "9.9.2", sop, modified);
        c.referenced_plan_uid = plan_uid.map(str::to_string);
        c
    }

    fn structure(path: &str, sop: &str, modified: i64) -> CandidateFile {
        candidate(path, FileRole::Structure, "9.9", "9.9.3", sop, modified)
    }

    #[test]
    fn test_single_study() {
        let manifest = associate(vec![
            plan("rp.dcm", "1.1", "9.9.1"),
            dose("rd.dcm", "3.1", Some("1.1"), 100),
            structure("rs.dcm", "2.2", 100),
            candidate("ct.dcm", FileRole::Other, "9.9", "9.9.4", "4.4", 100),
        ]);
        assert_eq!(manifest.groups.len(), 1);
        assert_eq!(manifest.ignored.len(), 1);
        let group = &manifest.groups[0];
        assert_eq!(group.plans.len(), 1);
        assert_eq!(group.plans[0].dose.sop_instance_uid, "3.1");
        assert_eq!(group.structure.sop_instance_uid, "2.2");
    }

    #[test]
    fn test_duplicate_sop_keeps_newest_file() {
        let manifest = associate(vec![
            plan("rp.dcm", "1.1", "9.9.1"),
            dose("rd_old.dcm", "3.1", Some("1.1"), 100),
            dose("rd_new.dcm", "3.1", Some("1.1"), 200),
            structure("rs.dcm", "2.2", 100),
        ]);
        assert_eq!(manifest.groups[0].plans[0].dose.path.to_str(), Some("rd_new.dcm"));
    }

    #[test]
    fn test_sibling_plans_form_one_domain() {
        let manifest = associate(vec![
            plan("rp2.dcm", "1.2", "9.9.1"),
            plan("rp1.dcm", "1.1", "9.9.1"),
            dose("rd1.dcm", "3.1", Some("1.1"), 100),
            dose("rd2.dcm", "3.2", Some("1.2"), 100),
            structure("rs.dcm", "2.2", 100),
        ]);
        let group = &manifest.groups[0];
        let sops: Vec<&str> = group.plans.iter().map(|p| p.plan.sop_instance_uid.as_str()).collect();
        assert_eq!(sops, vec!["1.1", "1.2"]);
        assert_eq!(group.plans[1].dose.sop_instance_uid, "3.2");
    }

    #[test]
    fn test_independent_series_split_into_studies() {
        let manifest = associate(vec![
            plan("rp1.dcm", "1.1", "9.9.1"),
            plan("rp2.dcm", "1.2", "9.9.5"),
            dose("rd1.dcm", "3.1", Some("1.1"), 100),
            dose("rd2.dcm", "3.2", Some("1.2"), 100),
            structure("rs.dcm", "2.2", 100),
        ]);
        assert_eq!(manifest.groups.len(), 2);
        assert!(manifest.failures.is_empty());

        let first = &manifest.groups[0];
        assert_eq!(first.study_instance_uid, "9.9");
        assert_eq!(first.plans[0].plan.sop_instance_uid, "1.1");
        assert_eq!(first.plans[0].dose.sop_instance_uid, "3.1");
        let second = &manifest.groups[1];
        assert_eq!(second.study_instance_uid, "9.9_2");
        assert_eq!(second.plans[0].plan.sop_instance_uid, "1.2");
        assert_eq!(second.plans[0].dose.sop_instance_uid, "3.2");
        assert_eq!(second.structure.sop_instance_uid, "2.2");
    }

    #[test]
    fn test_series_without_dose_fails_alone() {
        let manifest = associate(vec![
            plan("rp1.dcm", "1.1", "9.9.1"),
            plan("rp2.dcm", "1.2", "9.9.5"),
            dose("rd1.dcm", "3.1", Some("1.1"), 100),
            dose("rd_loose.dcm", "3.9", None, 100),
            structure("rs.dcm", "2.2", 100),
        ]);
        assert_eq!(manifest.groups.len(), 1);
        assert_eq!(manifest.groups[0].study_instance_uid, "9.9");
        assert_eq!(manifest.failures.len(), 1);
        assert_eq!(manifest.failures[0].study_instance_uid, "9.9_2");
        assert!(matches!(manifest.failures[0].error, DvhcatError::Association(_)));
    }

    #[test]
    fn test_missing_structure_fails_only_that_study() {
        let mut other_plan = plan("rp_b.dcm", "5.1", "8.8.1");
        other_plan.study_instance_uid = "8.8".to_string();
        let mut other_dose = dose("rd_b.dcm", "5.3", Some("5.1"), 100);
        other_dose.study_instance_uid = "8.8".to_string();

        let manifest = associate(vec![
            plan("rp.dcm", "1.1", "9.9.1"),
            dose("rd.dcm", "3.1", Some("1.1"), 100),
            structure("rs.dcm", "2.2", 100),
            other_plan,
            other_dose,
        ]);
        assert_eq!(manifest.groups.len(), 1);
        assert_eq!(manifest.failures.len(), 1);
        assert_eq!(manifest.failures[0].study_instance_uid, "8.8");
        assert_eq!(manifest.failures[0].error.kind(), "AssociationError");
    }

    #[test]
    fn test_dose_selection_rules() {
        let mut beam_a = dose("a.dcm", "3.1", Some("1.1"), 100);
        beam_a.summation_type = Some(DoseSummationType::Beam);
        let mut beam_b = dose("b.dcm", "3.2", Some("1.1"), 100);
        beam_b.summation_type = Some(DoseSummationType::Beam);
        let whole = dose("c.dcm", "3.3", None, 50);

        assert_eq!(select_dose(&[&beam_a]).unwrap().sop_instance_uid, "3.1");
        assert!(select_dose(&[&beam_a, &beam_b]).is_err());
        assert_eq!(select_dose(&[&beam_a, &whole]).unwrap().sop_instance_uid, "3.3");
        assert!(select_dose(&[]).is_err());
    }

    #[test]
    fn test_structure_falls_back_to_latest() {
        let mut p = plan("rp.dcm", "1.1", "9.9.1");
        p.referenced_structure_uid = Some("2.9".to_string());
        let manifest = associate(vec![
            p,
            dose("rd.dcm", "3.1", None, 100),
            structure("rs_old.dcm", "2.1", 100),
            structure("rs_new.dcm", "2.2", 300),
        ]);
        assert_eq!(manifest.groups[0].structure.sop_instance_uid, "2.2");
    }

    #[test]
    fn test_patient_mismatch_is_association_error() {
        let mut s = structure("rs.dcm", "2.2", 100);
        s.patient_id = "MRN999".to_string();
        let manifest = associate(vec![plan("rp.dcm", "1.1", "9.9.1"), dose("rd.dcm", "3.1", None, 100), s]);
        assert!(manifest.groups.is_empty());
        assert_eq!(manifest.failures[0].patient_id.as_deref(), Some("MRN001"));
    }
}
