//! Reconciliation of provider results.
//!
//! The reconciler identifies the primary provider's result, checks that it is
//! usable as the authoritative base, and hands the rest to the merge strategy
//! registered for the request's protocol version.
//!
//! # Strategies
//!
//! | Strategy | Description |
//! |----------|-------------|
//! | [`PrimaryEnrichedStrategy`] | Primary bundle as base, unseen supplementary entries appended |
//! | [`PrimaryOnlyStrategy`] | Primary bundle unchanged, other providers only compared |
//!
//! Comparison-only providers never contribute entries under either strategy;
//! they produce a [`ComparisonReport`] against the primary instead.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::error::ReconciliationError;
use crate::types::{Bundle, ProtocolVersion, Provider, entry_key};

use super::executor::ProviderResult;

/// Entry-level agreement between a comparison provider and the primary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    /// Comparison provider name.
    pub provider: String,
    /// Entry keys present in both bundles.
    pub matched: Vec<String>,
    /// Entry keys only the primary returned.
    pub missing: Vec<String>,
    /// Entry keys only the comparison provider returned.
    pub extra: Vec<String>,
}

impl ComparisonReport {
    /// Compares a provider's bundle against the primary bundle.
    pub fn compare(provider: impl Into<String>, primary: &Bundle, other: &Bundle) -> Self {
        let primary_keys = keys(primary);
        let other_keys = keys(other);
        let other_set: HashSet<&str> = other_keys.iter().map(String::as_str).collect();
        let primary_set: HashSet<&str> = primary_keys.iter().map(String::as_str).collect();

        let (matched, missing): (Vec<String>, Vec<String>) = primary_keys
            .iter()
            .cloned()
            .partition(|k| other_set.contains(k.as_str()));
        let extra = other_keys
            .iter()
            .filter(|k| !primary_set.contains(k.as_str()))
            .cloned()
            .collect();

        Self {
            provider: provider.into(),
            matched,
            missing,
            extra,
        }
    }

    /// Returns true if both bundles hold the same keyed entries.
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }
}

fn keys(bundle: &Bundle) -> Vec<String> {
    let mut seen = HashSet::new();
    bundle
        .entries()
        .iter()
        .filter_map(entry_key)
        .filter(|k| seen.insert(k.clone()))
        .collect()
}

/// The single canonical answer to a request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciledResult {
    /// Merged bundle.
    pub bundle: Bundle,
    /// Primary provider name.
    pub primary: String,
    /// Providers whose results were merged, primary first.
    pub contributors: Vec<String>,
    /// Reports for comparison-only providers.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub comparisons: Vec<ComparisonReport>,
}

/// A merge policy for one protocol version.
pub trait ReconciliationStrategy: Send + Sync {
    /// Strategy name for logs and errors.
    fn name(&self) -> &'static str;

    /// Merges supplementary results into the primary result.
    fn reconcile(
        &self,
        primary: ProviderResult,
        supplementary: Vec<ProviderResult>,
    ) -> Result<ReconciledResult, ReconciliationError>;
}

/// Primary bundle as base, enriched with entries the primary did not return.
///
/// Supplementary entries are appended in provider order when their key
/// (`Type/id`, else `fullUrl`) is unseen. Entries without a key are always
/// appended. Each contributing provider's provenance tag is added to the
/// merged bundle; `meta.source` stays the primary's.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrimaryEnrichedStrategy;

impl ReconciliationStrategy for PrimaryEnrichedStrategy {
    fn name(&self) -> &'static str {
        "primary-enriched"
    }

    fn reconcile(
        &self,
        primary: ProviderResult,
        supplementary: Vec<ProviderResult>,
    ) -> Result<ReconciledResult, ReconciliationError> {
        let ProviderResult {
            provider: primary_name,
            bundle: mut merged,
            ..
        } = primary;

        // Comparisons see the primary's own answer, before any enrichment.
        let (compared, contributing): (Vec<ProviderResult>, Vec<ProviderResult>) =
            supplementary.into_iter().partition(|r| r.comparison_only);
        let comparisons = compared
            .iter()
            .map(|r| ComparisonReport::compare(&r.provider, &merged, &r.bundle))
            .collect();

        let mut seen_keys: HashSet<String> = merged.entries().iter().filter_map(entry_key).collect();
        let mut contributors = vec![primary_name.clone()];

        for result in contributing {
            let mut added = 0usize;
            for entry in result.bundle.entries() {
                let is_new = match entry_key(entry) {
                    Some(key) => seen_keys.insert(key),
                    None => true,
                };
                if is_new {
                    merged.push_entry(entry.clone());
                    added += 1;
                }
            }

            debug!(provider = %result.provider, added, "Merged supplementary entries");
            result.provenance.add_tag(&mut merged);
            contributors.push(result.provider);
        }

        merged.refresh_total();

        Ok(ReconciledResult {
            bundle: merged,
            primary: primary_name,
            contributors,
            comparisons,
        })
    }
}

/// Returns the primary bundle unchanged; every other provider is compared.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrimaryOnlyStrategy;

impl ReconciliationStrategy for PrimaryOnlyStrategy {
    fn name(&self) -> &'static str {
        "primary-only"
    }

    fn reconcile(
        &self,
        primary: ProviderResult,
        supplementary: Vec<ProviderResult>,
    ) -> Result<ReconciledResult, ReconciliationError> {
        let comparisons = supplementary
            .iter()
            .map(|r| ComparisonReport::compare(&r.provider, &primary.bundle, &r.bundle))
            .collect();

        Ok(ReconciledResult {
            contributors: vec![primary.provider.clone()],
            primary: primary.provider,
            bundle: primary.bundle,
            comparisons,
        })
    }
}

/// Dispatches reconciliation to the strategy of a protocol version.
#[derive(Clone)]
pub struct Reconciler {
    strategies: HashMap<ProtocolVersion, Arc<dyn ReconciliationStrategy>>,
}

impl Default for Reconciler {
    /// Registers [`PrimaryEnrichedStrategy`] for every protocol version.
    fn default() -> Self {
        Self::empty()
            .with_strategy(ProtocolVersion::Stu3, Arc::new(PrimaryEnrichedStrategy))
            .with_strategy(ProtocolVersion::R4, Arc::new(PrimaryEnrichedStrategy))
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let strategies: HashMap<_, _> = self
            .strategies
            .iter()
            .map(|(version, s)| (version.to_string(), s.name()))
            .collect();
        f.debug_struct("Reconciler")
            .field("strategies", &strategies)
            .finish()
    }
}

impl Reconciler {
    /// Creates a reconciler with no strategies.
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// Registers the strategy for a protocol version.
    pub fn with_strategy(
        mut self,
        protocol_version: ProtocolVersion,
        strategy: Arc<dyn ReconciliationStrategy>,
    ) -> Self {
        self.strategies.insert(protocol_version, strategy);
        self
    }

    /// Reconciles successful results against the primary provider.
    ///
    /// Fails when the primary produced no result, more than one result, or a
    /// result without its provenance tag, and when another provider's result
    /// carries the primary's tag. Another provider is never promoted to base.
    pub fn reconcile(
        &self,
        protocol_version: ProtocolVersion,
        results: Vec<ProviderResult>,
        primary: &Provider,
    ) -> Result<ReconciledResult, ReconciliationError> {
        let strategy = self
            .strategies
            .get(&protocol_version)
            .ok_or(ReconciliationError::UnsupportedProtocol { protocol_version })?;

        let (mut primaries, supplementary): (Vec<_>, Vec<_>) = results
            .into_iter()
            .partition(|r| r.provider == primary.name);

        let primary_result = match primaries.len() {
            0 => {
                return Err(ReconciliationError::PrimaryResultMissing {
                    primary: primary.name.clone(),
                });
            }
            1 => primaries.remove(0),
            count => {
                return Err(ReconciliationError::AmbiguousPrimary {
                    primary: primary.name.clone(),
                    count,
                });
            }
        };

        let provenance = primary.provenance();
        if !provenance.is_stamped_on(&primary_result.bundle) {
            return Err(ReconciliationError::PrimaryProvenanceMissing {
                primary: primary.name.clone(),
            });
        }

        let sharing: Vec<String> = supplementary
            .iter()
            .filter(|r| provenance.is_stamped_on(&r.bundle))
            .map(|r| r.provider.clone())
            .collect();
        if !sharing.is_empty() {
            return Err(ReconciliationError::PrimaryProvenanceShared {
                primary: primary.name.clone(),
                providers: sharing,
            });
        }

        debug!(
            strategy = strategy.name(),
            primary = %primary.name,
            supplementary = supplementary.len(),
            "Reconciling provider results"
        );

        strategy.reconcile(primary_result, supplementary)
    }
}
