//! Cumulative relaxation of matching constraints.
//!
//! The decoder is re-invoked with a growing [`MaskSet`] (FRC, then FOW, then bearing,
//! then path length) until its result is accepted against the buffer. The step that
//! first succeeds names the cause; a single isolated attempt tells a lone attribute apart
//! from a conjunction.

use serde::Serialize;
use tracing::debug;

use crate::decoder::{DecodeFailure, DecodedPath, Decoder, MaskAttribute, MaskSet};
use crate::error::CollaboratorError;
use crate::geometry::Buffer;
use crate::graph::RoadNetwork;
use crate::location::LineReference;

/// What a decode must achieve to count as fixed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Acceptance {
    /// The trimmed decoded geometry lies within the buffer
    WholePath,
    /// The link carrying the LRP at this index lies within the buffer
    Placement(usize),
}

/// Result of one decoder invocation under a mask
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Accepted(DecodedPath),
    /// Decoded, but not what the acceptance check wanted
    Rejected(DecodedPath),
    Failed(DecodeFailure),
}

impl AttemptOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AttemptOutcome::Accepted(_))
    }

    pub fn path(&self) -> Option<&DecodedPath> {
        match self {
            AttemptOutcome::Accepted(path) | AttemptOutcome::Rejected(path) => Some(path),
            AttemptOutcome::Failed(_) => None,
        }
    }
}

/// One recorded decoder invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MaskingStep {
    pub mask: MaskSet,
    pub decoded: bool,
    pub accepted: bool,
}

impl MaskingStep {
    pub fn new(mask: MaskSet, outcome: &AttemptOutcome) -> Self {
        MaskingStep {
            mask,
            decoded: outcome.path().is_some(),
            accepted: outcome.is_accepted(),
        }
    }
}

/// Conclusion of a masking search
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Relaxing these attributes fixes the decode
    Cause(MaskSet),
    /// Fully relaxed, the decoder still prefers a route outside the buffer
    RoutePreference,
    /// Fully relaxed, the decoder still fails
    Exhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnosis {
    pub verdict: Verdict,
    /// Cumulative steps in the order they were run
    pub steps: Vec<MaskingStep>,
    /// Isolated attempt with only the attribute that made the search succeed
    pub confirmation: Option<MaskingStep>,
    /// Outcome of the last cumulative step
    pub final_outcome: AttemptOutcome,
}

/// Drives a decoder through relaxation steps against a single buffer
pub struct MaskingSearch<'a, D: ?Sized> {
    decoder: &'a D,
    network: &'a RoadNetwork,
    buffer: &'a Buffer,
}

impl<'a, D: Decoder + ?Sized> MaskingSearch<'a, D> {
    pub fn new(decoder: &'a D, network: &'a RoadNetwork, buffer: &'a Buffer) -> Self {
        MaskingSearch {
            decoder,
            network,
            buffer,
        }
    }

    /// Decode once under `mask` and apply the acceptance check
    pub fn attempt(
        &self,
        reference: &LineReference,
        mask: MaskSet,
        acceptance: Acceptance,
    ) -> Result<AttemptOutcome, CollaboratorError> {
        match self.decoder.decode(reference, self.network, mask) {
            Ok(path) => {
                if self.accepts(reference, &path, acceptance)? {
                    Ok(AttemptOutcome::Accepted(path))
                } else {
                    Ok(AttemptOutcome::Rejected(path))
                }
            }
            Err(failure) if failure.is_expected() => Ok(AttemptOutcome::Failed(failure)),
            Err(failure) => Err(CollaboratorError::Decoder(failure.to_string())),
        }
    }

    fn accepts(
        &self,
        reference: &LineReference,
        path: &DecodedPath,
        acceptance: Acceptance,
    ) -> Result<bool, CollaboratorError> {
        path.validate(reference.len(), self.network)?;
        match acceptance {
            Acceptance::WholePath => {
                let geometry = path
                    .geometry(self.network)
                    .ok_or_else(|| CollaboratorError::Decoder("decoded path has no geometry".to_string()))?;
                Ok(self.buffer.covers_line(&geometry))
            }
            Acceptance::Placement(index) => {
                let placement = path.placements.get(index).ok_or(CollaboratorError::PlacementCount {
                    placements: path.placements.len(),
                    lrps: reference.len(),
                })?;
                let link = self
                    .network
                    .link_by_id(placement.link_id)
                    .ok_or(CollaboratorError::UnknownLink(placement.link_id))?;
                Ok(self.buffer.covers_line(&link.geometry))
            }
        }
    }

    /// Relax attributes in priority order until the acceptance check passes
    pub fn diagnose(&self, reference: &LineReference, acceptance: Acceptance) -> Result<Diagnosis, CollaboratorError> {
        let mut steps = Vec::with_capacity(MaskAttribute::PRIORITY.len());
        let mut mask = MaskSet::EMPTY;
        let mut last = None;

        for attribute in MaskAttribute::PRIORITY {
            mask = mask.with(attribute);
            let outcome = self.attempt(reference, mask, acceptance)?;
            let step = MaskingStep::new(mask, &outcome);
            debug!(step = steps.len() + 1, %mask, decoded = step.decoded, accepted = step.accepted, "masking step");
            steps.push(step);

            if !outcome.is_accepted() {
                last = Some(outcome);
                continue;
            }

            if steps.len() == 1 {
                return Ok(Diagnosis {
                    verdict: Verdict::Cause(mask),
                    steps,
                    confirmation: None,
                    final_outcome: outcome,
                });
            }

            let isolated = MaskSet::only(attribute);
            let attempt = self.attempt(reference, isolated, acceptance)?;
            let confirmation = MaskingStep::new(isolated, &attempt);
            debug!(%isolated, accepted = confirmation.accepted, "confirmation attempt");
            let cause = if confirmation.accepted { isolated } else { mask };
            return Ok(Diagnosis {
                verdict: Verdict::Cause(cause),
                steps,
                confirmation: Some(confirmation),
                final_outcome: outcome,
            });
        }

        let (verdict, final_outcome) = match last {
            Some(outcome @ AttemptOutcome::Rejected(_)) => (Verdict::RoutePreference, outcome),
            Some(outcome) => (Verdict::Exhausted, outcome),
            None => (
                Verdict::Exhausted,
                AttemptOutcome::Failed(DecodeFailure::Internal("no masking steps ran".to_string())),
            ),
        };
        Ok(Diagnosis {
            verdict,
            steps,
            confirmation: None,
            final_outcome,
        })
    }
}
