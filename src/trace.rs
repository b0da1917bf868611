//! Trace Recorder: one complete ("X") event per executed invocation, written
//! as a Chrome trace array when the session closes.

use crate::error::{BuildError, Result};
use crate::store::write_atomic;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub name: String,
    pub ph: String,
    pub pid: u32,
    /// Lane the event is drawn in.
    pub tid: u32,
    /// Start, in microseconds since the session opened.
    pub ts: u64,
    pub dur: u64,
}

pub struct TraceRecorder {
    epoch: Instant,
    events: Mutex<Vec<TraceEvent>>,
    lanes: Mutex<LanePool>,
}

#[derive(Default)]
struct LanePool {
    free: Vec<u32>,
    highest: u32,
}

impl Default for TraceRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            events: Mutex::new(Vec::new()),
            lanes: Mutex::new(LanePool::default()),
        }
    }

    pub fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    /// Borrow a lane for the duration of one invocation. Free lanes are
    /// reused so the number of lanes tracks peak parallelism.
    pub fn lane(&self) -> Lane<'_> {
        let mut pool = self.lanes.lock();
        let id = match pool.free.pop() {
            Some(id) => id,
            None => {
                pool.highest += 1;
                pool.highest
            }
        };
        Lane { id, recorder: self }
    }

    pub fn record(&self, name: impl Into<String>, lane: &Lane<'_>, start_us: u64, end_us: u64) {
        self.events.lock().push(TraceEvent {
            name: name.into(),
            ph: "X".to_string(),
            pid: 0,
            tid: lane.id,
            ts: start_us,
            dur: end_us.saturating_sub(start_us),
        });
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn flush(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string(&*self.events.lock()).map_err(|source| {
            BuildError::Encode {
                path: path.to_path_buf(),
                source,
            }
        })?;
        write_atomic(path, content.as_bytes())?;
        info!("wrote trace {}", path.display());
        Ok(())
    }
}

pub struct Lane<'a> {
    id: u32,
    recorder: &'a TraceRecorder,
}

impl Lane<'_> {
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl Drop for Lane<'_> {
    fn drop(&mut self) {
        self.recorder.lanes.lock().free.push(self.id);
    }
}
