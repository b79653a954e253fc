//! Marker-record location.
//!
//! At the moment an object was suspected dead, the watcher left a
//! bookkeeping record in the heap holding a lookup key and a weak
//! reference to the suspect. This module finds the record matching the
//! caller's key and dereferences the weak reference's referent slot.

use tracing::{debug, info};

use crate::analyzer::AnalysisRequest;
use crate::error::{AnalyzerError, Result};
use crate::snapshot::{NodeIndex, Snapshot};

/// Outcome of locating the marker: the record itself plus the watched
/// object, which is `None` when it was already collected.
#[derive(Debug, Clone, Copy)]
pub struct MarkerHit {
    pub marker: NodeIndex,
    pub target: Option<NodeIndex>,
}

/// Scan instances of the marker class for one whose key field equals
/// the requested key, then follow its weak reference.
///
/// The key may legitimately have vanished (record list GC'd or dump
/// truncated between capture and analysis); that is reported as
/// `MarkerNotFound` so callers can tell "couldn't verify" apart from
/// "definitely safe".
pub fn locate(snapshot: &Snapshot, request: &AnalysisRequest) -> Result<MarkerHit> {
    let class = snapshot.find_class(&request.marker_class).ok_or_else(|| {
        AnalyzerError::MarkerNotFound(format!(
            "marker class '{}' not present in dump",
            request.marker_class
        ))
    })?;

    let instances = snapshot.instances_of(class.id);
    debug!(
        class = %class.name,
        candidates = instances.len(),
        "scanning marker records"
    );

    for &marker in instances {
        let key = snapshot
            .field_object(marker, &request.key_field)
            .and_then(|id| snapshot.index_of(id))
            .and_then(|idx| snapshot.string_value(idx));
        match key {
            Some(key) if key == request.key => {
                let target = snapshot
                    .field_object(marker, &request.ref_field)
                    .and_then(|id| snapshot.index_of(id))
                    .and_then(|weak| snapshot.field_object(weak, &request.referent_field))
                    .and_then(|id| snapshot.index_of(id));
                if target.is_none() {
                    info!(key = %request.key, "weak referent already collected");
                }
                return Ok(MarkerHit { marker, target });
            }
            _ => continue,
        }
    }

    Err(AnalyzerError::MarkerNotFound(format!(
        "no marker record with key '{}'",
        request.key
    )))
}
