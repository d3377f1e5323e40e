use async_trait::async_trait;

use super::{Detector, DetectorInput, Requirement};
use crate::error::SourceError;
use crate::model::{Evidence, Finding, FindingKind, Severity};

/// Compares the locally recorded digest against the registry's published one.
pub struct IntegrityDetector;

#[async_trait]
impl Detector for IntegrityDetector {
    fn name(&self) -> &'static str {
        "integrity"
    }

    fn description(&self) -> &'static str {
        "Local artifact digest against the registry-published digest"
    }

    fn requirement(&self) -> Requirement {
        Requirement::Metadata
    }

    async fn evaluate(&self, input: &DetectorInput) -> Result<Vec<Finding>, SourceError> {
        let Some(metadata) = input.metadata.as_deref() else {
            return Ok(Vec::new());
        };
        let package = &input.package;
        let published = metadata.published_digests.first().map(ToString::to_string);

        let Some(local) = input.artifact.as_deref().and_then(|a| a.digest.as_ref()) else {
            let finding = Finding::new(
                package,
                self.name(),
                FindingKind::IntegrityMismatch,
                Severity::Medium,
                "unverifiable: no local integrity digest to compare with the registry",
            )
            .with_evidence(Evidence::Digest {
                expected: published,
                actual: None,
            });
            return Ok(vec![finding]);
        };

        let Some(expected) = metadata.digest_for(local.algorithm) else {
            let finding = Finding::new(
                package,
                self.name(),
                FindingKind::IntegrityMismatch,
                Severity::Medium,
                format!(
                    "unverifiable: registry publishes no {} digest for this version",
                    local.algorithm
                ),
            )
            .with_evidence(Evidence::Digest {
                expected: published,
                actual: Some(local.to_string()),
            });
            return Ok(vec![finding]);
        };

        if local.matches(expected) {
            return Ok(Vec::new());
        }

        tracing::warn!(
            package = %package,
            expected = %expected,
            actual = %local,
            "Integrity mismatch"
        );

        let finding = Finding::new(
            package,
            self.name(),
            FindingKind::IntegrityMismatch,
            Severity::Critical,
            format!(
                "local {} digest does not match the registry-published digest",
                local.algorithm
            ),
        )
        .with_evidence(Evidence::Digest {
            expected: Some(expected.to_string()),
            actual: Some(local.to_string()),
        });

        Ok(vec![finding])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Digest, DigestAlgorithm, LocalArtifact, PackageMetadata, PackageRef};
    use chrono::Utc;

    fn input(local: Option<&str>, published: &[&str]) -> DetectorInput {
        let metadata = PackageMetadata {
            published_digests: published.iter().filter_map(|d| Digest::parse(d)).collect(),
            ..Default::default()
        };
        let artifact = LocalArtifact {
            digest: local.and_then(Digest::parse),
            ..Default::default()
        };
        DetectorInput::new(
            PackageRef::new("left-pad", "1.3.0", "https://registry.npmjs.org"),
            Utc::now(),
        )
        .with_metadata(metadata)
        .with_artifact(artifact)
    }

    #[tokio::test]
    async fn test_mismatch_is_one_critical() {
        let abc = format!("sha256:{}", "ab".repeat(32));
        let def = format!("sha256:{}", "de".repeat(32));
        let findings = IntegrityDetector.evaluate(&input(Some(&abc), &[&def])).await.unwrap();

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::IntegrityMismatch);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert!(matches!(
            &findings[0].evidence,
            Some(Evidence::Digest { expected: Some(e), actual: Some(a) }) if e.contains("dede") && a.contains("abab")
        ));
    }

    #[tokio::test]
    async fn test_identical_digests_yield_nothing() {
        let abc = format!("sha256:{}", "ab".repeat(32));
        let findings = IntegrityDetector.evaluate(&input(Some(&abc), &[&abc])).await.unwrap();
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn test_same_hash_in_different_encodings_matches() {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine as _;

        let raw = [42u8; 64];
        let sri = format!("sha512-{}", STANDARD.encode(raw));
        let hexed = format!("sha512:{}", hex::encode(raw));
        let findings = IntegrityDetector.evaluate(&input(Some(&sri), &[&hexed])).await.unwrap();
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn test_missing_local_digest_is_unverifiable() {
        let def = format!("sha256:{}", "de".repeat(32));
        let findings = IntegrityDetector.evaluate(&input(None, &[&def])).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Medium);
        assert!(findings[0].description.starts_with("unverifiable"));
    }

    #[tokio::test]
    async fn test_missing_artifact_is_unverifiable() {
        let mut input = input(None, &[]);
        input.artifact = None;
        let findings = IntegrityDetector.evaluate(&input).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Medium);
    }

    #[tokio::test]
    async fn test_algorithm_not_published_is_unverifiable() {
        let sha1 = "0123456789abcdef0123456789abcdef01234567";
        let local = Digest::new(DigestAlgorithm::Sha512, "AAAA").to_string();
        let findings = IntegrityDetector.evaluate(&input(Some(&local), &[sha1])).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Medium);
        assert!(findings[0].description.contains("sha512"));
    }
}
