use std::{fs::File, io::BufWriter, path::Path, sync::mpsc::Receiver};

use log::warn;
use serde::{Deserialize, Serialize};
use serde_jsonlines::JsonLinesWriter;

use crate::{
    StrideError,
    session::{GeoPoint, SessionState, Snapshot},
};

/// One line of a snapshot trace. The path is reduced to its length and newest point
/// so the trace grows linearly with the session.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SnapshotRecord {
    pub sequence: u64,
    pub state: SessionState,
    pub total_millis: u64,
    pub path_len: usize,
    pub last_point: Option<GeoPoint>,
}

impl From<&Snapshot> for SnapshotRecord {
    fn from(value: &Snapshot) -> Self {
        Self {
            sequence: value.sequence,
            state: value.state,
            total_millis: value.elapsed.total_millis,
            path_len: value.path.len(),
            last_point: value.path.last().copied(),
        }
    }
}

/// Writes every received snapshot as a JSON line until the channel closes. The trace
/// is an export for offline inspection, nothing reads it back into a session.
pub fn write_snapshots(file: &Path, snapshot_receiver: Receiver<Snapshot>) -> Result<(), StrideError> {
    let trace_file = File::create(file).map_err(|e| StrideError::WriterError { source: e })?;
    let mut trace_writer = JsonLinesWriter::new(BufWriter::new(trace_file));
    for snapshot in &snapshot_receiver {
        if let Err(e) = trace_writer.write(&SnapshotRecord::from(&snapshot)) {
            warn!("Error while writing snapshot to output file: {}", e);
        }
    }
    trace_writer
        .flush()
        .map_err(|e| StrideError::WriterError { source: e })?;
    Ok(())
}
