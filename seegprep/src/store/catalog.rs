//! The fixed set of artifacts one subject's run can produce.

use super::naming::{JSON_SUFFIX, LOG_SUFFIX, TRANSFORM_SUFFIX, VOLUME_SUFFIX};
use crate::core::{ArtifactKind, Modality};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one artifact of a subject's run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactId {
    /// Pre-implant MR converted from DICOM.
    PreImplantMr,
    /// Post-implant CT converted from DICOM.
    PostImplantCt,
    /// Canonical full head MR image.
    FullHeadImage,
    /// Denoised head image.
    Denoised,
    /// Estimated nonuniformity (bias) field.
    NonuniformityField,
    /// Bias-field corrected head image.
    NonuniformityCorrected,
    /// Intensity normalized head image.
    IntensityNormalized,
    /// Post-implant CT rigidly registered onto the pre-implant MR.
    CtInMrSpace,
    /// Linear registration of the MR to the stereotactic model.
    MrToTalTransform,
    /// Scale-removed variant of the MR-to-model registration.
    MrToOrientedNoScale,
    /// The scale component removed from the MR-to-model registration.
    MrToOrientedUnscale,
    /// Parameters used for the MR-to-model registration.
    TalRegistrationParameters,
    /// Output log of the MR-to-model registration.
    TalRegistrationLog,
    /// MR head image in oriented space.
    MrOriented,
    /// CT head image in oriented space.
    CtOriented,
    /// Brain mask of the oriented MR.
    BrainMask,
    /// Brain-only MR image in oriented space.
    BrainOriented,
}

impl ArtifactId {
    /// Every artifact, in production order.
    pub const ALL: [Self; 17] = [
        Self::PreImplantMr,
        Self::PostImplantCt,
        Self::FullHeadImage,
        Self::Denoised,
        Self::NonuniformityField,
        Self::NonuniformityCorrected,
        Self::IntensityNormalized,
        Self::CtInMrSpace,
        Self::MrToTalTransform,
        Self::MrToOrientedNoScale,
        Self::MrToOrientedUnscale,
        Self::TalRegistrationParameters,
        Self::TalRegistrationLog,
        Self::MrOriented,
        Self::CtOriented,
        Self::BrainMask,
        Self::BrainOriented,
    ];

    /// Semantic stem of the artifact, without modality.
    #[must_use]
    pub const fn stem(self) -> &'static str {
        match self {
            Self::PreImplantMr => "pre_imp_mr",
            Self::PostImplantCt => "post_imp_ct",
            Self::FullHeadImage => "full_head_image",
            Self::Denoised => "full_head_image_denoised",
            Self::NonuniformityField => "full_head_image_field_nonuniformity_correction",
            Self::NonuniformityCorrected => "full_head_image_nonuniformity_corrected",
            Self::IntensityNormalized => "full_head_image_intensity_normalized",
            Self::CtInMrSpace => "full_head_image_mr_space",
            Self::MrToTalTransform => "mr_to_tal_transform",
            Self::MrToOrientedNoScale => "mr_to_oriented_transform_no_scale",
            Self::MrToOrientedUnscale => "mr_to_oriented_transform_unscale",
            Self::TalRegistrationParameters => "tal_par",
            Self::TalRegistrationLog => "tal_log",
            Self::MrOriented | Self::CtOriented => "full_head_image_oriented_space",
            Self::BrainMask => "full_head_image_oriented_space_mask",
            Self::BrainOriented => "brain_image_oriented_space",
        }
    }

    /// Modality of the artifact, when it is tied to one.
    #[must_use]
    pub const fn modality(self) -> Option<Modality> {
        match self {
            Self::PostImplantCt | Self::CtInMrSpace | Self::CtOriented => Some(Modality::Ct),
            Self::MrToTalTransform | Self::MrToOrientedNoScale | Self::MrToOrientedUnscale => None,
            _ => Some(Modality::T1w),
        }
    }

    /// What the artifact file holds.
    #[must_use]
    pub const fn kind(self) -> ArtifactKind {
        match self {
            Self::MrToTalTransform | Self::MrToOrientedNoScale | Self::MrToOrientedUnscale => {
                ArtifactKind::Transform
            }
            Self::TalRegistrationParameters | Self::TalRegistrationLog => ArtifactKind::Auxiliary,
            _ => ArtifactKind::Scan,
        }
    }

    /// File suffix of the artifact.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::TalRegistrationParameters => JSON_SUFFIX,
            Self::TalRegistrationLog => LOG_SUFFIX,
            Self::MrToTalTransform | Self::MrToOrientedNoScale | Self::MrToOrientedUnscale => {
                TRANSFORM_SUFFIX
            }
            _ => VOLUME_SUFFIX,
        }
    }

    /// Label used in the artifact's file name: the stem, then the modality tag.
    #[must_use]
    pub fn label(self) -> String {
        match self.modality() {
            Some(modality) => format!("{}_{}", self.stem(), modality.tag()),
            None => self.stem().to_string(),
        }
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}
