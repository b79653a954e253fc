//! Revenant: heap-snapshot leak analysis.
//!
//! Takes a captured HPROF heap dump and answers one question: is the
//! object a watcher flagged as suspect still strongly reachable from a
//! GC root, and if so, through which chain of references?
//!
//! The pipeline is a sequence of read-only passes over an immutable
//! snapshot:
//!
//! 1. [`snapshot`] parses the dump into a dense object graph.
//! 2. [`roots`] deduplicates GC roots and attributes stack locals to
//!    their owning threads.
//! 3. [`marker`] finds the watcher's bookkeeping record by key and
//!    dereferences its weak reference.
//! 4. [`search`] runs an exclusion-aware dual-frontier BFS from the
//!    roots to the suspect.
//! 5. [`chain`] renders the found path as a serializable reference
//!    chain.
//!
//! [`analyzer`] drives the passes and folds every outcome, including
//! failures, into a flat report.
//!
//! ```no_run
//! use revenant::{analyze_dump, AnalysisRequest, ExcludedRefs};
//!
//! let request = AnalysisRequest::new("com.example.watcher.KeyedWeakReference", "retained-1");
//! let exclusions = ExcludedRefs::builder()
//!     .instance_field("android.view.inputmethod.InputMethodManager", "mServedView", "IMM pins the last served view")
//!     .build();
//! let outcome = analyze_dump("dump.hprof", &request, exclusions);
//! println!("{}", serde_json::to_string_pretty(&outcome.report()).unwrap());
//! ```

pub mod analyzer;
pub mod chain;
pub mod error;
pub mod exclusions;
pub mod hprof;
pub mod logging;
pub mod marker;
pub mod roots;
pub mod search;
pub mod snapshot;
pub mod timeout;

pub use analyzer::{
    analyze_dump, AnalysisOutcome, AnalysisReport, AnalysisRequest, AnalysisResult, HeapAnalyzer,
};
pub use chain::{Holder, ReferenceChain, ReferenceTraceElement};
pub use error::{AnalyzerError, Result};
pub use exclusions::{ExcludedRefs, ExcludedRefsBuilder, Exclusion};
pub use search::{ReferenceKind, SearchStats};
pub use snapshot::Snapshot;
