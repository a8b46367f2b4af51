//! Confidence calibration.
//!
//! Reconciles the model's self-reported confidence with the strength of the
//! retrieval evidence. The coefficients are a tunable parameter set, not
//! derived constants; they should be fitted offline against a labelled
//! query set.
//!
//! # Formula
//!
//! ```text
//! top_norm  = clamp((top_similarity − floor) / (1 − floor), 0, 1)
//! coverage  = min(qualifying, saturation) / saturation
//! evidence  = top_weight × top_norm + (1 − top_weight) × coverage          ∈ [0, 1]
//!
//! blended   = model_weight × self_reported + (1 − model_weight) × 100 × evidence
//! ceiling   = ceiling_base + (100 − ceiling_base) × evidence
//! final     = round(clamp(min(blended, ceiling), 0, 100))
//! ```
//!
//! `qualifying` counts chunks at or above the similarity floor. Every term
//! is non-decreasing in `top_similarity` and `qualifying`, so better
//! evidence never lowers the final score, and weak or absent evidence caps
//! it at `ceiling_base` whatever the model claims.

use serde::{Deserialize, Serialize};

use crate::models::ScoredChunk;

/// Tunable calibration coefficients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationParams {
    /// Weight of the model's self-report in the blend, `[0, 1]`.
    pub model_weight: f64,
    /// Weight of the top similarity within the evidence score, `[0, 1]`.
    pub top_weight: f64,
    /// Number of qualifying chunks at which coverage saturates (`>= 1`).
    pub saturation_count: usize,
    /// Confidence ceiling when there is no evidence at all, `[0, 100]`.
    pub evidence_ceiling_base: f64,
    /// Similarity floor used by retrieval, `[-1, 1)`.
    pub similarity_floor: f64,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            model_weight: 0.6,
            top_weight: 0.7,
            saturation_count: 3,
            evidence_ceiling_base: 40.0,
            similarity_floor: 0.3,
        }
    }
}

/// Deterministic blend of self-reported confidence and retrieval evidence.
#[derive(Debug, Clone)]
pub struct Calibrator {
    params: CalibrationParams,
}

impl Calibrator {
    pub fn new(params: CalibrationParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &CalibrationParams {
        &self.params
    }

    /// Evidence strength in `[0, 1]` from the retrieved chunks.
    pub fn evidence(&self, chunks: &[ScoredChunk]) -> f64 {
        let p = &self.params;
        let floor = p.similarity_floor.clamp(-1.0, 1.0);

        let qualifying: Vec<f64> = chunks
            .iter()
            .map(|c| f64::from(c.score))
            .filter(|s| s.is_finite() && *s >= floor)
            .collect();

        let Some(top) = qualifying.iter().copied().reduce(f64::max) else {
            return 0.0;
        };

        let span = 1.0 - floor;
        let top_norm = if span <= f64::EPSILON {
            1.0
        } else {
            ((top - floor) / span).clamp(0.0, 1.0)
        };

        let saturation = p.saturation_count.max(1);
        let coverage = qualifying.len().min(saturation) as f64 / saturation as f64;

        let w = p.top_weight.clamp(0.0, 1.0);
        (w * top_norm + (1.0 - w) * coverage).clamp(0.0, 1.0)
    }

    /// Final confidence in `[0, 100]`.
    ///
    /// `self_reported` may be any integer; it is clamped first.
    pub fn calibrate(&self, self_reported: i64, chunks: &[ScoredChunk]) -> u8 {
        let p = &self.params;
        let model = self_reported.clamp(0, 100) as f64;
        let evidence = self.evidence(chunks);

        let mw = p.model_weight.clamp(0.0, 1.0);
        let blended = mw * model + (1.0 - mw) * 100.0 * evidence;

        let base = p.evidence_ceiling_base.clamp(0.0, 100.0);
        let ceiling = base + (100.0 - base) * evidence;

        blended.min(ceiling).clamp(0.0, 100.0).round() as u8
    }
}

impl Default for Calibrator {
    fn default() -> Self {
        Self::new(CalibrationParams::default())
    }
}
