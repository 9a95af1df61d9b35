use std::sync::{Arc, Mutex};

use log::debug;

use super::{GeoPoint, SessionState, controller::SessionCore};

/// Append-only sequence of the samples accepted during one session.
///
/// Points are kept behind an `Arc` so snapshots can share them. Appending while a
/// snapshot still holds the previous vector copies it first, which leaves every
/// published snapshot unchanged.
#[derive(Debug, Default)]
pub struct PathAccumulator {
    points: Arc<Vec<GeoPoint>>,
    discarded: u64,
}

impl PathAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `sample` if the session is tracking and the sample holds a usable
    /// position. Anything else is dropped, never buffered. Returns whether the
    /// path grew.
    pub fn accept(&mut self, state: SessionState, sample: Option<GeoPoint>) -> bool {
        let Some(point) = sample else {
            debug!("Discarding empty position sample");
            self.discarded += 1;
            return false;
        };
        if !state.is_tracking() {
            debug!("Discarding position sample while {:?}", state);
            self.discarded += 1;
            return false;
        }
        if !point.is_valid() {
            debug!(
                "Discarding out of range position sample ({}, {})",
                point.latitude, point.longitude
            );
            self.discarded += 1;
            return false;
        }

        Arc::make_mut(&mut self.points).push(point);
        true
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Shared view of the accepted points.
    pub fn points(&self) -> Arc<Vec<GeoPoint>> {
        Arc::clone(&self.points)
    }

    pub fn discarded_count(&self) -> u64 {
        self.discarded
    }
}

/// Handle a position source delivers samples into. Cloning is cheap and every clone
/// feeds the same session.
#[derive(Clone)]
pub struct PathSink {
    core: Arc<Mutex<SessionCore>>,
}

impl PathSink {
    pub(crate) fn new(core: Arc<Mutex<SessionCore>>) -> Self {
        Self { core }
    }

    /// Offers a sample to the session. Returns whether it was appended to the path.
    pub fn accept(&self, sample: Option<GeoPoint>) -> bool {
        let mut core = SessionCore::lock(&self.core);
        core.accept_sample(sample)
    }
}
