//! Ordered set of enrolled identity labels.
//!
//! Fixed at startup and never mutated while serving. A label's position in
//! the set (its registration order) is the deterministic tie-break when two
//! identities receive the same probability.

use crate::error::{ConfigError, ProviderError};
use crate::types::{ProbabilityDistribution, NO_FACE_IDENTITY, UNKNOWN_IDENTITY};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    labels: Vec<String>,
}

impl LabelSet {
    /// Validate and freeze a label list: non-empty, no blanks, no duplicates,
    /// and no label equal to a sentinel identity.
    pub fn new<I, S>(labels: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        if labels.is_empty() {
            return Err(ConfigError::EmptyLabelSet);
        }
        for (i, label) in labels.iter().enumerate() {
            if label.trim().is_empty() {
                return Err(ConfigError::BlankLabel(i));
            }
            if label == UNKNOWN_IDENTITY || label == NO_FACE_IDENTITY {
                return Err(ConfigError::ReservedLabel(label.clone()));
            }
            if labels[..i].contains(label) {
                return Err(ConfigError::DuplicateLabel(label.clone()));
            }
        }
        Ok(Self { labels })
    }

    /// Load labels from a text artifact, one per line in class-index order.
    /// Blank lines and lines starting with `#` are skipped.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub(crate) fn parse(text: &str) -> Result<Self, ConfigError> {
        Self::new(
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#')),
        )
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Always false for a validated set; provided for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn position(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    /// Pair raw classifier scores (indexed by class) with their labels.
    pub fn distribution(&self, scores: &[f32]) -> Result<ProbabilityDistribution, ProviderError> {
        if scores.len() != self.labels.len() {
            return Err(ProviderError::DomainSize {
                expected: self.labels.len(),
                actual: scores.len(),
            });
        }
        ProbabilityDistribution::new(self.labels.iter().cloned().zip(scores.iter().copied()))
    }

    /// Check that `dist` covers exactly this label set and reorder it into
    /// registration order.
    pub fn align(&self, dist: &ProbabilityDistribution) -> Result<ProbabilityDistribution, ProviderError> {
        if dist.len() != self.labels.len() {
            return Err(ProviderError::DomainSize {
                expected: self.labels.len(),
                actual: dist.len(),
            });
        }
        if let Some((unknown, _)) = dist.entries().iter().find(|(l, _)| self.position(l).is_none()) {
            return Err(ProviderError::UnknownLabel(unknown.clone()));
        }
        // Same size, no unknowns, no duplicates (checked by the distribution) => same domain.
        ProbabilityDistribution::new(self.labels.iter().map(|label| {
            let p = dist.get(label).unwrap_or_default();
            (label.clone(), p)
        }))
    }
}
