use std::{
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
        mpsc::{self, RecvTimeoutError, Sender},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, error, info};

use crate::{
    StrideError,
    config::SamplingConfig,
    session::{GeoPoint, PathSink},
};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Decides whether position sampling may be turned on.
pub trait PermissionGate: Send + Sync {
    fn is_granted(&self) -> bool;
}

impl<F> PermissionGate for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_granted(&self) -> bool {
        self()
    }
}

pub struct AlwaysGranted;

impl PermissionGate for AlwaysGranted {
    fn is_granted(&self) -> bool {
        true
    }
}

/// Reporting cadence requested from a position source.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplingRequest {
    pub min_interval: Duration,
    pub min_distance_m: f64,
}

impl From<&SamplingConfig> for SamplingRequest {
    fn from(value: &SamplingConfig) -> Self {
        Self {
            min_interval: Duration::from_millis(value.min_interval_ms),
            min_distance_m: value.min_distance_m,
        }
    }
}

/// A provider of position samples.
///
/// After `subscribe` the source delivers samples into the sink on its own schedule,
/// from any thread, until `unsubscribe` is called. A `None` sample stands for a
/// report without a usable position.
pub trait PositionSource: Send {
    fn subscribe(&mut self, request: SamplingRequest, sink: PathSink) -> Result<(), StrideError>;

    fn unsubscribe(&mut self);
}

impl<S: PositionSource + ?Sized> PositionSource for Box<S> {
    fn subscribe(&mut self, request: SamplingRequest, sink: PathSink) -> Result<(), StrideError> {
        (**self).subscribe(request, sink)
    }

    fn unsubscribe(&mut self) {
        (**self).unsubscribe()
    }
}

/// Position source driven by hand: whoever holds a clone pushes samples into the
/// current subscription. Pushes without a subscription are dropped.
#[derive(Clone, Default)]
pub struct ManualPositionSource {
    sink: Arc<Mutex<Option<PathSink>>>,
    last_request: Arc<Mutex<Option<SamplingRequest>>>,
}

impl ManualPositionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_subscribed(&self) -> bool {
        self.sink.lock().map(|sink| sink.is_some()).unwrap_or(false)
    }

    pub fn last_request(&self) -> Option<SamplingRequest> {
        self.last_request.lock().ok().and_then(|request| *request)
    }

    /// Delivers a sample. Returns whether the session appended it to its path.
    pub fn push(&self, sample: Option<GeoPoint>) -> bool {
        let sink = match self.sink.lock() {
            Ok(sink) => sink.clone(),
            Err(_) => return false,
        };
        match sink {
            Some(sink) => sink.accept(sample),
            None => {
                debug!("No subscriber for manual position sample");
                false
            }
        }
    }
}

impl PositionSource for ManualPositionSource {
    fn subscribe(&mut self, request: SamplingRequest, sink: PathSink) -> Result<(), StrideError> {
        let mut current = self.sink.lock().map_err(|_| StrideError::PositionSourceError {
            description: "manual source lock poisoned".to_string(),
        })?;
        *current = Some(sink);
        if let Ok(mut last_request) = self.last_request.lock() {
            *last_request = Some(request);
        }
        Ok(())
    }

    fn unsubscribe(&mut self) {
        if let Ok(mut current) = self.sink.lock() {
            *current = None;
        }
    }
}

/// Replays recorded samples, one JSON value per line, on a background thread.
///
/// A `null` line is replayed as an unavailable sample. Samples closer than the
/// requested minimum distance to the previously delivered one are skipped. After an
/// unsubscribe the replay continues from where it stopped.
pub struct ReplayPositionSource {
    samples: Arc<Vec<Option<GeoPoint>>>,
    cursor: Arc<AtomicUsize>,
    interval_override: Option<Duration>,
    worker: Option<(Sender<()>, JoinHandle<()>)>,
}

impl ReplayPositionSource {
    pub fn from_samples(samples: Vec<Option<GeoPoint>>) -> Self {
        Self {
            samples: Arc::new(samples),
            cursor: Arc::new(AtomicUsize::new(0)),
            interval_override: None,
            worker: None,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, StrideError> {
        if !path.exists() {
            return Err(StrideError::InvalidSampleFile {
                path: format!("{:?}", path),
            });
        }
        let samples = serde_jsonlines::json_lines(path)
            .map_err(|e| StrideError::SampleLoaderError { source: e })?
            .collect::<Result<Vec<Option<GeoPoint>>, std::io::Error>>()
            .map_err(|e| StrideError::SampleLoaderError { source: e })?;
        info!("Loaded {} position samples from {:?}", samples.len(), path);
        Ok(Self::from_samples(samples))
    }

    /// Replays at a fixed pace instead of the interval requested on subscribe.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_override = Some(interval);
        self
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn delivered(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }
}

impl PositionSource for ReplayPositionSource {
    fn subscribe(&mut self, request: SamplingRequest, sink: PathSink) -> Result<(), StrideError> {
        self.unsubscribe();

        let interval = self.interval_override.unwrap_or(request.min_interval);
        let min_distance_m = request.min_distance_m;
        let samples = Arc::clone(&self.samples);
        let cursor = Arc::clone(&self.cursor);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("stride-replay".to_string())
            .spawn(move || {
                let mut last_delivered: Option<GeoPoint> = None;
                loop {
                    let index = cursor.load(Ordering::Acquire);
                    let Some(sample) = samples.get(index) else {
                        info!("Position replay finished after {} samples", index);
                        break;
                    };
                    cursor.store(index + 1, Ordering::Release);

                    let too_close = match (sample, &last_delivered) {
                        (Some(point), Some(previous)) => {
                            distance_m(previous, point) < min_distance_m
                        }
                        _ => false,
                    };
                    if too_close {
                        continue;
                    }
                    if sink.accept(*sample) {
                        last_delivered = *sample;
                    }
                    // dropping the sender on unsubscribe wakes this up right away
                    if !matches!(stop_rx.recv_timeout(interval), Err(RecvTimeoutError::Timeout)) {
                        break;
                    }
                }
            })
            .map_err(|e| StrideError::ThreadSpawnError {
                name: "replay".to_string(),
                source: e,
            })?;

        self.worker = Some((stop_tx, handle));
        Ok(())
    }

    fn unsubscribe(&mut self) {
        if let Some((stop_tx, handle)) = self.worker.take() {
            drop(stop_tx);
            if handle.join().is_err() {
                error!("Position replay thread panicked");
            }
        }
    }
}

impl Drop for ReplayPositionSource {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Great-circle distance between two points, in meters.
pub fn distance_m(from: &GeoPoint, to: &GeoPoint) -> f64 {
    let from_lat = from.latitude.to_radians();
    let to_lat = to.latitude.to_radians();
    let delta_lat = (to.latitude - from.latitude).to_radians();
    let delta_lon = (to.longitude - from.longitude).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + from_lat.cos() * to_lat.cos() * (delta_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}
