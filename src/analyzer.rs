//! Analysis driver and result model.
//!
//! Sequences one analysis pass (loader, root registry, marker
//! locator, path search, chain builder) and folds every outcome,
//! including failures, into a flat serializable report. Analysis is a
//! single logical operation meant for a caller-chosen background
//! thread; it is internally single threaded and run at most once per
//! captured dump.

use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chain::{ReferenceChain, ReferenceTraceElement};
use crate::error::Result;
use crate::exclusions::ExcludedRefs;
use crate::marker;
use crate::roots::RootRegistry;
use crate::search::{SearchStats, ShortestPathFinder};
use crate::snapshot::Snapshot;
use crate::timeout::DEFAULT_BUDGET_SECONDS;

/// What to analyze: the marker record identifying the suspect object.
///
/// Field names default to the watcher's bookkeeping record layout and
/// can be overridden for other marker shapes.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub marker_class: String,
    pub key: String,
    pub key_field: String,
    pub ref_field: String,
    pub referent_field: String,
}

impl AnalysisRequest {
    pub fn new(marker_class: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            marker_class: marker_class.into(),
            key: key.into(),
            key_field: "mKey".to_string(),
            ref_field: "mActivityRef".to_string(),
            referent_field: "referent".to_string(),
        }
    }

    pub fn key_field(mut self, name: impl Into<String>) -> Self {
        self.key_field = name.into();
        self
    }

    pub fn ref_field(mut self, name: impl Into<String>) -> Self {
        self.ref_field = name.into();
        self
    }

    pub fn referent_field(mut self, name: impl Into<String>) -> Self {
        self.referent_field = name.into();
        self
    }
}

/// Successful analysis outcomes. Target already collected, target
/// unreachable, and reachable-only-through-exclusions are all
/// successes, never errors.
#[derive(Debug)]
pub enum AnalysisResult {
    NoLeak,
    LeakDetected {
        /// True when the only path found runs entirely through
        /// excluded references.
        excluded_leak: bool,
        class_name: String,
        chain: ReferenceChain,
    },
}

/// Result of one analysis pass plus timing and instrumentation.
#[derive(Debug)]
pub struct AnalysisOutcome {
    pub result: Result<AnalysisResult>,
    pub duration: Duration,
    pub stats: Option<SearchStats>,
}

impl AnalysisOutcome {
    /// Flat JSON projection of the outcome.
    pub fn report(&self) -> AnalysisReport {
        let duration_ms = self.duration.as_millis() as u64;
        match &self.result {
            Ok(AnalysisResult::NoLeak) => AnalysisReport {
                leak_found: false,
                excluded_leak: false,
                class_name: None,
                failure: None,
                analysis_duration_ms: duration_ms,
                reference_chain: Vec::new(),
            },
            Ok(AnalysisResult::LeakDetected {
                excluded_leak,
                class_name,
                chain,
            }) => AnalysisReport {
                leak_found: true,
                excluded_leak: *excluded_leak,
                class_name: Some(class_name.clone()),
                failure: None,
                analysis_duration_ms: duration_ms,
                reference_chain: chain.elements.clone(),
            },
            Err(error) => AnalysisReport {
                leak_found: false,
                excluded_leak: false,
                class_name: None,
                failure: Some(format!("{}: {}", error.code(), error)),
                analysis_duration_ms: duration_ms,
                reference_chain: Vec::new(),
            },
        }
    }
}

/// Serializable analysis report. The `failure` field starts with a
/// stable error code so callers can distinguish "couldn't verify"
/// (`marker_not_found`) from hard failures.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub leak_found: bool,
    pub excluded_leak: bool,
    pub class_name: Option<String>,
    pub failure: Option<String>,
    pub analysis_duration_ms: u64,
    pub reference_chain: Vec<ReferenceTraceElement>,
}

/// One-shot leak analyzer over an already loaded snapshot.
pub struct HeapAnalyzer {
    exclusions: ExcludedRefs,
    budget: Duration,
}

impl HeapAnalyzer {
    pub fn new(exclusions: ExcludedRefs) -> Self {
        Self {
            exclusions,
            budget: Duration::from_secs(DEFAULT_BUDGET_SECONDS),
        }
    }

    /// Cap the wall-clock budget; exceeding it fails the analysis with
    /// a timeout rather than running unbounded.
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn analyze(&self, snapshot: &Snapshot, request: &AnalysisRequest) -> AnalysisOutcome {
        let start = Instant::now();
        let mut stats = None;
        let result = self.run(snapshot, request, &mut stats);
        let duration = start.elapsed();
        if let Err(error) = &result {
            warn!(code = error.code(), %error, "analysis failed");
        }
        AnalysisOutcome {
            result,
            duration,
            stats,
        }
    }

    fn run(
        &self,
        snapshot: &Snapshot,
        request: &AnalysisRequest,
        stats: &mut Option<SearchStats>,
    ) -> Result<AnalysisResult> {
        let registry = RootRegistry::build(snapshot);
        let hit = marker::locate(snapshot, request)?;

        let target = match hit.target {
            // Watched object already collected: definitely no leak.
            None => return Ok(AnalysisResult::NoLeak),
            Some(target) => target,
        };
        debug!(target, key = %request.key, "searching for reference path");

        let finder = ShortestPathFinder::new(snapshot, &registry, &self.exclusions, self.budget);
        let outcome = finder.find_path(target)?;
        *stats = Some(outcome.stats);

        match outcome.path {
            None => Ok(AnalysisResult::NoLeak),
            Some(found) => {
                let class_name = snapshot.class_name_of(target);
                let chain = ReferenceChain::build(snapshot, &found);
                info!(
                    class = %class_name,
                    hops = chain.hops(),
                    excluded = found.excluding,
                    "leak detected"
                );
                Ok(AnalysisResult::LeakDetected {
                    excluded_leak: found.excluding,
                    class_name,
                    chain,
                })
            }
        }
    }
}

/// Convenience entry point: map the dump file, run one analysis pass,
/// and fold any error (load failures included) into the outcome.
pub fn analyze_dump<P: AsRef<Path>>(
    path: P,
    request: &AnalysisRequest,
    exclusions: ExcludedRefs,
) -> AnalysisOutcome {
    let start = Instant::now();
    match Snapshot::from_file(path) {
        Ok(snapshot) => {
            let analyzer = HeapAnalyzer::new(exclusions);
            let mut outcome = analyzer.analyze(&snapshot, request);
            outcome.duration = start.elapsed();
            outcome
        }
        Err(error) => AnalysisOutcome {
            result: Err(error),
            duration: start.elapsed(),
            stats: None,
        },
    }
}
