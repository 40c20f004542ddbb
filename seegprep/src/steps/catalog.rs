//! The fixed preprocessing chain.

use super::action::{ActionStep, ArgValue, PathRef, StepAction};
use super::Step;
use crate::config::PipelineConfig;
use crate::store::ArtifactId;

/// Convert both DICOM series to volumes.
pub const CONVERT: &str = "convert";
/// Alias the converted MR as the full head image.
pub const ALIAS_HEAD_IMAGE: &str = "alias_head_image";
/// Denoise the head image.
pub const DENOISE: &str = "denoise";
/// Estimate the nonuniformity field.
pub const ESTIMATE_NONUNIFORMITY: &str = "estimate_nonuniformity";
/// Apply the nonuniformity field.
pub const APPLY_NONUNIFORMITY: &str = "apply_nonuniformity";
/// Normalize intensities against the model.
pub const NORMALIZE_INTENSITY: &str = "normalize_intensity";
/// Rigidly register the CT onto the converted MR.
///
/// Reads the MR as converted, not the corrected or normalized one, so it
/// does not depend on any intensity step and is not re-run when those are.
pub const REGISTER_CT_TO_MR: &str = "register_ct_to_mr";
/// Register the MR to the model and remove scaling.
pub const REGISTER_MR_TO_MODEL: &str = "register_mr_to_model";
/// Resample MR and CT into oriented space.
pub const WARP_TO_ORIENTED: &str = "warp_to_oriented";
/// Extract and apply the brain mask.
pub const EXTRACT_BRAIN: &str = "extract_brain";

/// Step names in execution order.
pub const STEP_ORDER: [&str; 10] = [
    CONVERT,
    ALIAS_HEAD_IMAGE,
    DENOISE,
    ESTIMATE_NONUNIFORMITY,
    APPLY_NONUNIFORMITY,
    NORMALIZE_INTENSITY,
    REGISTER_CT_TO_MR,
    REGISTER_MR_TO_MODEL,
    WARP_TO_ORIENTED,
    EXTRACT_BRAIN,
];

/// Builds the ten preprocessing steps for `config`, in execution order.
#[must_use]
pub fn preprocessing_steps(config: &PipelineConfig) -> Vec<Box<dyn Step>> {
    let store = config.store();
    let settings = config.settings();
    let tools = &settings.tools;
    let models = &settings.models;
    let registration = &settings.registration;
    let path = |id: ArtifactId| store.path(id);

    let model = || ArgValue::path(&models.scan);
    let model_mask = || ArgValue::path(&models.mask);

    let convert = |series: std::path::PathBuf, id: ArtifactId| {
        StepAction::tool(&tools.dicom_to_volume)
            .bind("dicom_files", ArgValue::DicomSeries(series))
            .bind("out_dir", ArgValue::DirOf(path(id)))
            .bind("name", ArgValue::StemOf(path(id)))
            .writes(path(id))
    };

    let resample = |input: ArtifactId, output: ArtifactId| {
        StepAction::tool(&tools.resample)
            .bind("input", ArgValue::path(path(input)))
            .bind("transform", ArgValue::path(path(ArtifactId::MrToOrientedNoScale)))
            .bind("model", model())
            .bind("output", ArgValue::path(path(output)))
            .writes(path(output))
    };

    let mr_to_tal = &registration.mr_to_tal;
    let registration_record = serde_json::json!({
        "model": models.scan,
        "noscale": mr_to_tal.noscale,
        "type": mr_to_tal.registration_type,
        "objective": mr_to_tal.objective,
    });

    vec![
        Box::new(
            ActionStep::new(CONVERT)
                .output(path(ArtifactId::PreImplantMr))
                .output(path(ArtifactId::PostImplantCt))
                .action(convert(config.mr_series_dir(), ArtifactId::PreImplantMr))
                .action(convert(config.ct_series_dir(), ArtifactId::PostImplantCt)),
        ),
        Box::new(
            ActionStep::new(ALIAS_HEAD_IMAGE)
                .input(path(ArtifactId::PreImplantMr))
                .output(path(ArtifactId::FullHeadImage))
                .action(StepAction::Copy {
                    from: PathRef::Artifact(path(ArtifactId::PreImplantMr)),
                    to: path(ArtifactId::FullHeadImage),
                }),
        ),
        Box::new(
            ActionStep::new(DENOISE)
                .input(path(ArtifactId::FullHeadImage))
                .output(path(ArtifactId::Denoised))
                .action(
                    StepAction::tool(&tools.denoise)
                        .bind("input", ArgValue::path(path(ArtifactId::FullHeadImage)))
                        .bind("output", ArgValue::path(path(ArtifactId::Denoised)))
                        .writes(path(ArtifactId::Denoised)),
                ),
        ),
        Box::new(
            ActionStep::new(ESTIMATE_NONUNIFORMITY)
                .input(path(ArtifactId::Denoised))
                .output(path(ArtifactId::NonuniformityField))
                .action(
                    StepAction::tool(&tools.estimate_nonuniformity)
                        .bind("input", ArgValue::path(path(ArtifactId::Denoised)))
                        .bind("model", model())
                        .bind("model_mask", model_mask())
                        .bind("output", ArgValue::path(path(ArtifactId::NonuniformityField)))
                        .writes(path(ArtifactId::NonuniformityField)),
                ),
        ),
        Box::new(
            ActionStep::new(APPLY_NONUNIFORMITY)
                .input(path(ArtifactId::Denoised))
                .input(path(ArtifactId::NonuniformityField))
                .output(path(ArtifactId::NonuniformityCorrected))
                .action(
                    StepAction::tool(&tools.apply_nonuniformity)
                        .bind("input", ArgValue::path(path(ArtifactId::Denoised)))
                        .bind("field", ArgValue::path(path(ArtifactId::NonuniformityField)))
                        .bind("output", ArgValue::path(path(ArtifactId::NonuniformityCorrected)))
                        .writes(path(ArtifactId::NonuniformityCorrected)),
                ),
        ),
        Box::new(
            ActionStep::new(NORMALIZE_INTENSITY)
                .input(path(ArtifactId::NonuniformityCorrected))
                .output(path(ArtifactId::IntensityNormalized))
                .action(
                    StepAction::tool(&tools.normalize_intensity)
                        .bind("input", ArgValue::path(path(ArtifactId::NonuniformityCorrected)))
                        .bind("model", model())
                        .bind("model_mask", model_mask())
                        .bind("output", ArgValue::path(path(ArtifactId::IntensityNormalized)))
                        .writes(path(ArtifactId::IntensityNormalized)),
                ),
        ),
        Box::new(
            ActionStep::new(REGISTER_CT_TO_MR)
                .input(path(ArtifactId::PreImplantMr))
                .input(path(ArtifactId::PostImplantCt))
                .output(path(ArtifactId::CtInMrSpace))
                .action(
                    StepAction::tool(&tools.rigid_registration)
                        .bind("fixed", ArgValue::path(path(ArtifactId::PreImplantMr)))
                        .bind("moving", ArgValue::path(path(ArtifactId::PostImplantCt)))
                        .bind("out_dir", ArgValue::Scratch)
                        .bind("parameters", ArgValue::path(&registration.ct_to_mr_parameters))
                        .writes_scratch(&registration.rigid_result_file),
                )
                .action(StepAction::Copy {
                    from: PathRef::Scratch(registration.rigid_result_file.clone()),
                    to: path(ArtifactId::CtInMrSpace),
                }),
        ),
        Box::new(
            ActionStep::new(REGISTER_MR_TO_MODEL)
                .input(path(ArtifactId::IntensityNormalized))
                .output(path(ArtifactId::MrToTalTransform))
                .output(path(ArtifactId::MrToOrientedNoScale))
                .output(path(ArtifactId::MrToOrientedUnscale))
                .output(path(ArtifactId::TalRegistrationParameters))
                .output(path(ArtifactId::TalRegistrationLog))
                .action(StepAction::WriteJson {
                    path: path(ArtifactId::TalRegistrationParameters),
                    value: registration_record,
                })
                .action(
                    StepAction::tool(&tools.linear_registration)
                        .bind("noscale", ArgValue::flag("-noscale", mr_to_tal.noscale))
                        .bind("registration_type", ArgValue::text(&mr_to_tal.registration_type))
                        .bind("objective", ArgValue::text(&mr_to_tal.objective))
                        .bind("input", ArgValue::path(path(ArtifactId::IntensityNormalized)))
                        .bind("model", model())
                        .bind("model_mask", model_mask())
                        .bind("output", ArgValue::path(path(ArtifactId::MrToTalTransform)))
                        .writes(path(ArtifactId::MrToTalTransform))
                        .stdout_to(path(ArtifactId::TalRegistrationLog)),
                )
                .action(
                    StepAction::tool(&tools.remove_scale)
                        .bind("input", ArgValue::path(path(ArtifactId::MrToTalTransform)))
                        .bind("output", ArgValue::path(path(ArtifactId::MrToOrientedNoScale)))
                        .bind("unscale", ArgValue::path(path(ArtifactId::MrToOrientedUnscale)))
                        .writes(path(ArtifactId::MrToOrientedNoScale))
                        .writes(path(ArtifactId::MrToOrientedUnscale)),
                ),
        ),
        Box::new(
            ActionStep::new(WARP_TO_ORIENTED)
                .input(path(ArtifactId::IntensityNormalized))
                .input(path(ArtifactId::CtInMrSpace))
                .input(path(ArtifactId::MrToOrientedNoScale))
                .output(path(ArtifactId::MrOriented))
                .output(path(ArtifactId::CtOriented))
                .action(resample(ArtifactId::IntensityNormalized, ArtifactId::MrOriented))
                .action(resample(ArtifactId::CtInMrSpace, ArtifactId::CtOriented)),
        ),
        Box::new(
            ActionStep::new(EXTRACT_BRAIN)
                .input(path(ArtifactId::MrOriented))
                .output(path(ArtifactId::BrainMask))
                .output(path(ArtifactId::BrainOriented))
                .action(
                    StepAction::tool(&tools.brain_extraction)
                        .bind("library", ArgValue::path(&models.beast_library))
                        .bind("input", ArgValue::path(path(ArtifactId::MrOriented)))
                        .bind("model", model())
                        .bind("model_mask", model_mask())
                        .bind("output", ArgValue::path(path(ArtifactId::BrainMask)))
                        .writes(path(ArtifactId::BrainMask)),
                )
                .action(
                    StepAction::tool(&tools.apply_mask)
                        .bind("input", ArgValue::path(path(ArtifactId::MrOriented)))
                        .bind("mask", ArgValue::path(path(ArtifactId::BrainMask)))
                        .bind("output", ArgValue::path(path(ArtifactId::BrainOriented)))
                        .writes(path(ArtifactId::BrainOriented)),
                ),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn config() -> PipelineConfig {
        PipelineConfig::new("/in", "MR001", "CT001", "P01", "/out").unwrap()
    }

    #[test]
    fn test_steps_follow_fixed_order() {
        let steps = preprocessing_steps(&config());
        let names: Vec<_> = steps.iter().map(|s| s.name()).collect();
        assert_eq!(names, STEP_ORDER.to_vec());
    }

    #[test]
    fn test_every_catalog_artifact_is_produced_once() {
        let store = config().store();
        let steps = preprocessing_steps(&config());

        let mut produced = HashSet::new();
        for step in &steps {
            for output in step.declared_outputs() {
                assert!(produced.insert(output.clone()), "{} declared twice", output.display());
            }
        }

        let catalog: HashSet<PathBuf> = ArtifactId::ALL.iter().map(|id| store.path(*id)).collect();
        assert_eq!(produced, catalog);
    }

    #[test]
    fn test_inputs_come_from_earlier_steps() {
        let steps = preprocessing_steps(&config());
        let mut available = HashSet::new();
        for step in &steps {
            for input in step.declared_inputs() {
                assert!(available.contains(input), "{} reads {}", step.name(), input.display());
            }
            available.extend(step.declared_outputs().iter().cloned());
        }
    }

    #[test]
    fn test_rigid_registration_reads_converted_scans() {
        let store = config().store();
        let steps = preprocessing_steps(&config());
        let rigid = steps.iter().find(|s| s.name() == REGISTER_CT_TO_MR).unwrap();

        assert_eq!(
            rigid.declared_inputs(),
            &[store.path(ArtifactId::PreImplantMr), store.path(ArtifactId::PostImplantCt)]
        );
    }
}
