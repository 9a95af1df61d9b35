use std::{
    ops::ControlFlow,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc::Sender,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use log::{debug, info, warn};

use super::{
    Clock, ClockReading, Command, ElapsedTime, PathAccumulator, PathSink, SessionState, Snapshot,
    StatusAction, SystemTimeSource, TimeSource, TimerLoop,
};
use crate::{
    StrideError,
    config::{StatusConfig, TrackerConfig},
    observable::{ObservableState, Observer, SubscriptionId},
    sources::{PermissionGate, PositionSource, SamplingRequest},
    status::{StatusPresenter, StatusRenderer, StatusTrigger, StatusView},
};

/// Session fields shared by commands, timer ticks and position samples. Every
/// mutation happens while holding the one mutex around this struct, and publishing
/// from inside it only queues values for observers.
pub(crate) struct SessionCore {
    state: SessionState,
    clock: Clock,
    path: PathAccumulator,
    started_at_ms: Option<u64>,
    sequence: u64,
    boundary_events: u64,
    time: Arc<dyn TimeSource>,
    snapshots: Arc<ObservableState<Snapshot>>,
    status: Option<Sender<StatusView>>,
    status_config: StatusConfig,
}

impl SessionCore {
    pub(crate) fn lock(core: &Mutex<SessionCore>) -> MutexGuard<'_, SessionCore> {
        // every critical section leaves the fields consistent before it can panic
        core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn accept_sample(&mut self, sample: Option<super::GeoPoint>) -> bool {
        if !self.path.accept(self.state, sample) {
            return false;
        }
        self.publish();
        true
    }

    fn tick(&mut self, enabled: &AtomicBool) -> ControlFlow<()> {
        // the flag is cleared under this lock, so a tick that raced a pause stops here
        if !enabled.load(Ordering::Acquire) || !self.state.is_tracking() {
            return ControlFlow::Break(());
        }
        let before = self.clock.total_millis();
        let reading = self.clock.advance(self.time.now_ms());
        let changed = reading.total_millis != before;
        self.report_boundaries(reading);
        if changed {
            self.publish();
        }
        ControlFlow::Continue(())
    }

    fn report_boundaries(&mut self, reading: ClockReading) {
        for second in reading.crossed_seconds {
            self.boundary_events += 1;
            self.show_status(second, StatusTrigger::SecondElapsed);
        }
    }

    fn show_status(&self, whole_seconds: u64, trigger: StatusTrigger) {
        let Some(status) = &self.status else {
            return;
        };
        let view = StatusView::build(&self.status_config, self.state, whole_seconds, trigger);
        if status.send(view).is_err() {
            warn!("Status presenter is gone, dropping status update");
        }
    }

    fn show_transition(&self) {
        let whole_seconds = self.clock.total_millis() / 1000;
        self.show_status(whole_seconds, StatusTrigger::Transition);
    }

    fn snapshot(&mut self) -> Snapshot {
        self.sequence += 1;
        Snapshot {
            sequence: self.sequence,
            state: self.state,
            elapsed: ElapsedTime::from_millis(self.clock.total_millis()),
            path: self.path.points(),
            action: StatusAction::for_state(self.state),
            started_at_ms: self.started_at_ms,
        }
    }

    fn publish(&mut self) -> Snapshot {
        let snapshot = self.snapshot();
        self.snapshots.publish(snapshot.clone());
        snapshot
    }

    /// Undoes the clock and state changes of a start that could not complete.
    fn revert_start(&mut self, from: SessionState, now_ms: u64) {
        self.state = from;
        if from == SessionState::Idle {
            self.clock = Clock::new();
            self.started_at_ms = None;
        } else {
            self.clock.pause(now_ms);
        }
    }

    fn rejected(&self, command: Command) -> StrideError {
        warn!("Rejecting {:?}, the session is {:?}", command, self.state);
        StrideError::InvalidTransition {
            from: self.state,
            command,
        }
    }
}

/// Counts a timer loop as running for as long as its tick callback is alive.
struct RunningTimer(Arc<AtomicUsize>);

impl RunningTimer {
    fn new(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(count))
    }
}

impl Drop for RunningTimer {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Resources a command switches on or off. Held for the whole command, so commands
/// coming from different threads apply one at a time.
struct Lifecycle {
    timer: Option<TimerLoop>,
    /// Loop signalled by the last pause, joined before the next one starts
    retiring: Option<TimerLoop>,
    position_source: Box<dyn PositionSource>,
    sampling: bool,
    status_renderer: Option<StatusRenderer>,
}

/// Runs one tracking session from Idle to Stopped.
///
/// Commands may be issued from any thread; each returns once the clock and sampling
/// changes are in place and the resulting snapshot has been published. A controller
/// is good for a single session: once stopped it rejects every command.
pub struct SessionController {
    core: Arc<Mutex<SessionCore>>,
    snapshots: Arc<ObservableState<Snapshot>>,
    lifecycle: Mutex<Lifecycle>,
    permission_gate: Box<dyn PermissionGate>,
    time: Arc<dyn TimeSource>,
    config: TrackerConfig,
    running_timers: Arc<AtomicUsize>,
}

impl SessionController {
    pub fn new<S, G, P>(
        config: TrackerConfig,
        position_source: S,
        permission_gate: G,
        presenter: P,
    ) -> Result<Self, StrideError>
    where
        S: PositionSource + 'static,
        G: PermissionGate + 'static,
        P: StatusPresenter + 'static,
    {
        Self::with_time_source(
            config,
            position_source,
            permission_gate,
            presenter,
            Arc::new(SystemTimeSource::default()),
        )
    }

    pub fn with_time_source<S, G, P>(
        config: TrackerConfig,
        position_source: S,
        permission_gate: G,
        presenter: P,
        time: Arc<dyn TimeSource>,
    ) -> Result<Self, StrideError>
    where
        S: PositionSource + 'static,
        G: PermissionGate + 'static,
        P: StatusPresenter + 'static,
    {
        config.validate()?;

        let (status_tx, status_renderer) = StatusRenderer::spawn(presenter)?;
        let snapshots = Arc::new(ObservableState::new(Snapshot::default()));
        let core = SessionCore {
            state: SessionState::Idle,
            clock: Clock::new(),
            path: PathAccumulator::new(),
            started_at_ms: None,
            sequence: 0,
            boundary_events: 0,
            time: Arc::clone(&time),
            snapshots: Arc::clone(&snapshots),
            status: Some(status_tx),
            status_config: config.status.clone(),
        };

        Ok(Self {
            core: Arc::new(Mutex::new(core)),
            snapshots,
            lifecycle: Mutex::new(Lifecycle {
                timer: None,
                retiring: None,
                position_source: Box::new(position_source),
                sampling: false,
                status_renderer: Some(status_renderer),
            }),
            permission_gate: Box::new(permission_gate),
            time,
            config,
            running_timers: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Starts the session from Idle or resumes it from Paused. Does nothing while
    /// already tracking.
    pub fn start(&self) -> Result<Snapshot, StrideError> {
        let mut lifecycle = self.lock_lifecycle();
        if let Some(retiring) = lifecycle.retiring.take() {
            retiring.join();
        }

        let from = {
            let mut core = SessionCore::lock(&self.core);
            match core.state {
                SessionState::Stopped => return Err(core.rejected(Command::StartOrResume)),
                SessionState::Tracking => {
                    debug!("Session already tracking, ignoring start");
                    return Ok(self.snapshots.current());
                }
                SessionState::Idle | SessionState::Paused => {}
            }
            let from = core.state;
            let now_ms = self.time.now_ms();
            core.clock.resume(now_ms);
            if from == SessionState::Idle {
                core.started_at_ms = Some(unix_time_ms());
            }
            core.state = SessionState::Tracking;
            from
        };

        self.enable_sampling(&mut lifecycle);
        match self.spawn_timer() {
            Ok(timer) => lifecycle.timer = Some(timer),
            Err(e) => {
                self.disable_sampling(&mut lifecycle);
                let mut core = SessionCore::lock(&self.core);
                core.revert_start(from, self.time.now_ms());
                return Err(e);
            }
        }

        let snapshot = {
            let mut core = SessionCore::lock(&self.core);
            core.show_transition();
            core.publish()
        };
        info!(
            "Session {} at {}ms",
            if from == SessionState::Idle {
                "started"
            } else {
                "resumed"
            },
            snapshot.elapsed.total_millis
        );
        Ok(snapshot)
    }

    /// Pauses a tracking session, freezing its elapsed time. Does nothing in Idle or
    /// Paused.
    pub fn pause(&self) -> Result<Snapshot, StrideError> {
        let mut lifecycle = self.lock_lifecycle();
        {
            let mut core = SessionCore::lock(&self.core);
            match core.state {
                SessionState::Stopped => return Err(core.rejected(Command::Pause)),
                SessionState::Idle | SessionState::Paused => {
                    debug!("Session is {:?}, ignoring pause", core.state);
                    return Ok(self.snapshots.current());
                }
                SessionState::Tracking => {}
            }
            let reading = core.clock.pause(self.time.now_ms());
            core.report_boundaries(reading);
            core.state = SessionState::Paused;
            if let Some(timer) = &lifecycle.timer {
                timer.signal_stop();
            }
        }

        self.disable_sampling(&mut lifecycle);
        lifecycle.retiring = lifecycle.timer.take();

        let snapshot = {
            let mut core = SessionCore::lock(&self.core);
            core.show_transition();
            core.publish()
        };
        info!("Session paused at {}ms", snapshot.elapsed.total_millis);
        Ok(snapshot)
    }

    /// Ends the session. The timer, the sampling subscription and the status
    /// presenter thread are released before this returns.
    pub fn stop(&self) -> Result<Snapshot, StrideError> {
        let mut lifecycle = self.lock_lifecycle();
        {
            let mut core = SessionCore::lock(&self.core);
            if core.state.is_stopped() {
                return Err(core.rejected(Command::Stop));
            }
            if core.clock.is_running() {
                let reading = core.clock.pause(self.time.now_ms());
                core.report_boundaries(reading);
            }
            core.state = SessionState::Stopped;
            if let Some(timer) = &lifecycle.timer {
                timer.signal_stop();
            }
        }

        self.disable_sampling(&mut lifecycle);
        for timer in [lifecycle.timer.take(), lifecycle.retiring.take()]
            .into_iter()
            .flatten()
        {
            timer.join();
        }

        let snapshot = {
            let mut core = SessionCore::lock(&self.core);
            core.show_transition();
            let snapshot = core.publish();
            // closing the channel lets the presenter thread finish
            core.status = None;
            snapshot
        };
        if let Some(renderer) = lifecycle.status_renderer.take() {
            renderer.close();
        }

        info!(
            "Session stopped after {}ms with {} path points",
            snapshot.elapsed.total_millis,
            snapshot.path_len()
        );
        Ok(snapshot)
    }

    pub fn dispatch(&self, command: Command) -> Result<Snapshot, StrideError> {
        match command {
            Command::StartOrResume => self.start(),
            Command::Pause => self.pause(),
            Command::Stop => self.stop(),
        }
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.current()
    }

    pub fn state(&self) -> SessionState {
        SessionCore::lock(&self.core).state
    }

    /// Number of second-boundary events emitted so far.
    pub fn boundary_events(&self) -> u64 {
        SessionCore::lock(&self.core).boundary_events
    }

    pub fn is_sampling(&self) -> bool {
        self.lock_lifecycle().sampling
    }

    pub fn subscribe<O>(&self, observer: O) -> Result<SubscriptionId, StrideError>
    where
        O: Observer<Snapshot> + 'static,
    {
        self.snapshots.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.snapshots.unsubscribe(id)
    }

    /// Sink feeding position samples into this session.
    pub fn path_sink(&self) -> PathSink {
        PathSink::new(Arc::clone(&self.core))
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Timer loop threads that have not exited yet. A loop retired by a pause keeps
    /// counting until its next tick.
    pub fn running_timers(&self) -> usize {
        self.running_timers.load(Ordering::Acquire)
    }

    fn enable_sampling(&self, lifecycle: &mut Lifecycle) {
        if lifecycle.sampling {
            return;
        }
        if !self.permission_gate.is_granted() {
            info!("Position permission not granted, tracking time only");
            return;
        }
        let request = SamplingRequest::from(&self.config.sampling);
        match lifecycle
            .position_source
            .subscribe(request, self.path_sink())
        {
            Ok(()) => {
                lifecycle.sampling = true;
                debug!("Position sampling enabled");
            }
            Err(e) => warn!("Could not enable position sampling, tracking time only: {}", e),
        }
    }

    fn disable_sampling(&self, lifecycle: &mut Lifecycle) {
        if lifecycle.sampling {
            lifecycle.position_source.unsubscribe();
            lifecycle.sampling = false;
            debug!("Position sampling disabled");
        }
    }

    fn spawn_timer(&self) -> Result<TimerLoop, StrideError> {
        let core = Arc::clone(&self.core);
        let running = RunningTimer::new(&self.running_timers);
        TimerLoop::spawn(self.config.tick_interval(), move |enabled| {
            let _running = &running;
            SessionCore::lock(&core).tick(enabled)
        })
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if self.state().is_stopped() {
            return;
        }
        if let Err(e) = self.stop() {
            warn!("Error while stopping dropped session: {}", e);
        }
    }
}

fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
