use std::sync::Arc;

use async_trait::async_trait;

use super::{Detector, DetectorInput, Requirement};
use crate::config::TyposquatConfig;
use crate::error::SourceError;
use crate::model::{Evidence, Finding, FindingKind, Severity};
use crate::similarity::{Neighbor, SimilarityIndex};

pub struct TyposquatDetector {
    index: Arc<SimilarityIndex>,
    config: TyposquatConfig,
}

impl TyposquatDetector {
    pub fn new(index: Arc<SimilarityIndex>, config: TyposquatConfig) -> Self {
        Self { index, config }
    }

    /// The nearest popular name within the length-scaled threshold, if any.
    /// Pure: no I/O, usable without a runtime.
    pub fn closest_match(&self, name: &str) -> Option<Neighbor> {
        if self.index.contains(name) || self.config.is_allowed(name) {
            return None;
        }
        let threshold = self.config.threshold_for(name.chars().count());
        self.index
            .nearest_neighbors(name)
            .into_iter()
            .find(|n| n.distance <= threshold)
    }
}

/// Closer names are more deceptive.
pub(crate) fn severity_for_distance(distance: usize) -> Severity {
    if distance <= 1 {
        Severity::High
    } else {
        Severity::Medium
    }
}

#[async_trait]
impl Detector for TyposquatDetector {
    fn name(&self) -> &'static str {
        "typosquat"
    }

    fn description(&self) -> &'static str {
        "Name deceptively similar to a popular package"
    }

    fn requirement(&self) -> Requirement {
        Requirement::None
    }

    async fn evaluate(&self, input: &DetectorInput) -> Result<Vec<Finding>, SourceError> {
        let package = &input.package;
        let Some(neighbor) = self.closest_match(&package.name) else {
            return Ok(Vec::new());
        };

        let finding = Finding::new(
            package,
            self.name(),
            FindingKind::Typosquat,
            severity_for_distance(neighbor.distance),
            format!(
                "'{}' resembles popular package '{}' (distance {})",
                package.name, neighbor.candidate, neighbor.distance
            ),
        )
        .with_evidence(Evidence::SimilarName {
            candidate: neighbor.candidate,
            distance: neighbor.distance,
        });

        Ok(vec![finding])
    }
}
