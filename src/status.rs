use std::{
    panic::{self, AssertUnwindSafe},
    sync::mpsc::{self, Receiver, Sender},
    thread::{self, JoinHandle},
};

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    StrideError,
    config::StatusConfig,
    session::{SessionState, StatusAction},
};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum StatusTrigger {
    /// The session changed state
    Transition,
    /// Elapsed time reached a new whole second
    SecondElapsed,
}

/// Everything a status presenter needs to draw the ongoing-session status. A new
/// value is built for every render, nothing is shared or updated in place.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusView {
    pub channel_id: String,
    pub title: String,
    /// Elapsed time as `HH:MM:SS`
    pub text: String,
    pub action: StatusAction,
    pub state: SessionState,
    pub trigger: StatusTrigger,
}

impl StatusView {
    pub fn build(
        config: &StatusConfig,
        state: SessionState,
        whole_seconds: u64,
        trigger: StatusTrigger,
    ) -> Self {
        Self {
            channel_id: config.channel_id.clone(),
            title: config.title.clone(),
            text: format_elapsed(whole_seconds * 1000, false),
            action: StatusAction::for_state(state),
            state,
            trigger,
        }
    }
}

/// Formats milliseconds as `HH:MM:SS`, or `HH:MM:SS:cc` with hundredths of a second.
pub fn format_elapsed(millis: u64, include_centis: bool) -> String {
    let hours = millis / 3_600_000;
    let minutes = (millis / 60_000) % 60;
    let seconds = (millis / 1000) % 60;
    if include_centis {
        let centis = (millis % 1000) / 10;
        format!("{:02}:{:02}:{:02}:{:02}", hours, minutes, seconds, centis)
    } else {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}

pub trait StatusPresenter: Send {
    fn render(&mut self, view: &StatusView) -> Result<(), StrideError>;
}

impl<P: StatusPresenter + ?Sized> StatusPresenter for Box<P> {
    fn render(&mut self, view: &StatusView) -> Result<(), StrideError> {
        (**self).render(view)
    }
}

impl StatusPresenter for Sender<StatusView> {
    fn render(&mut self, view: &StatusView) -> Result<(), StrideError> {
        self.send(view.clone())
            .map_err(|e| StrideError::PresenterError {
                description: e.to_string(),
            })
    }
}

/// Presents the status through the log, used by the command line.
#[derive(Default)]
pub struct LogStatusPresenter;

impl StatusPresenter for LogStatusPresenter {
    fn render(&mut self, view: &StatusView) -> Result<(), StrideError> {
        info!(
            "[{}] {} {} ({:?}) - action: {}",
            view.channel_id, view.title, view.text, view.state, view.action.label
        );
        Ok(())
    }
}

/// Renders every view received until all senders are gone.
pub fn render_status(mut presenter: impl StatusPresenter, receiver: Receiver<StatusView>) {
    for view in &receiver {
        match panic::catch_unwind(AssertUnwindSafe(|| presenter.render(&view))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Error while rendering session status: {}", e),
            Err(_) => error!("Status presenter panicked while rendering {}", view.text),
        }
    }
}

/// Background thread that owns the status presenter.
pub(crate) struct StatusRenderer {
    handle: JoinHandle<()>,
}

impl StatusRenderer {
    pub(crate) fn spawn<P>(presenter: P) -> Result<(Sender<StatusView>, Self), StrideError>
    where
        P: StatusPresenter + 'static,
    {
        let (status_tx, status_rx) = mpsc::channel::<StatusView>();
        let handle = thread::Builder::new()
            .name("stride-status".to_string())
            .spawn(move || render_status(presenter, status_rx))
            .map_err(|e| StrideError::ThreadSpawnError {
                name: "status".to_string(),
                source: e,
            })?;
        Ok((status_tx, Self { handle }))
    }

    /// Waits for queued views to be rendered. Every sender must be dropped first.
    pub(crate) fn close(self) {
        if self.handle.join().is_err() {
            error!("Status presenter thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ActionLabel, Command};

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(0, false), "00:00:00");
        assert_eq!(format_elapsed(61_000, false), "00:01:01");
        assert_eq!(format_elapsed(3_723_000, false), "01:02:03");
        assert_eq!(format_elapsed(3_723_456, true), "01:02:03:45");
        assert_eq!(format_elapsed(100 * 3_600_000, false), "100:00:00");
    }

    #[test]
    fn test_view_is_built_from_state() {
        let config = StatusConfig::default();
        let view = StatusView::build(&config, SessionState::Tracking, 75, StatusTrigger::SecondElapsed);
        assert_eq!(view.text, "00:01:15");
        assert_eq!(view.title, "Running App");
        assert_eq!(view.action.label, ActionLabel::Pause);
        assert_eq!(view.action.command, Command::Pause);

        let paused = StatusView::build(&config, SessionState::Paused, 75, StatusTrigger::Transition);
        assert_eq!(paused.action.label, ActionLabel::Resume);
        assert_eq!(paused.action.command, Command::StartOrResume);
        // the earlier view is unaffected by building a new one
        assert_eq!(view.action.label, ActionLabel::Pause);
    }

    struct Flaky {
        renders: Sender<String>,
        fail_next: bool,
    }

    impl StatusPresenter for Flaky {
        fn render(&mut self, view: &StatusView) -> Result<(), StrideError> {
            self.fail_next = !self.fail_next;
            if !self.fail_next {
                return Err(StrideError::PresenterError {
                    description: "display unavailable".to_string(),
                });
            }
            self.renders.send(view.text.clone()).unwrap();
            Ok(())
        }
    }

    struct PanicsOnce {
        renders: Sender<String>,
        panicked: bool,
    }

    impl StatusPresenter for PanicsOnce {
        fn render(&mut self, view: &StatusView) -> Result<(), StrideError> {
            if !self.panicked {
                self.panicked = true;
                panic!("presenter blew up on {}", view.text);
            }
            self.renders.send(view.text.clone()).unwrap();
            Ok(())
        }
    }

    #[test]
    fn test_renderer_survives_presenter_panic() {
        let (renders_tx, renders_rx) = mpsc::channel();
        let (status_tx, renderer) = StatusRenderer::spawn(PanicsOnce {
            renders: renders_tx,
            panicked: false,
        })
        .unwrap();

        let config = StatusConfig::default();
        for second in 0..3 {
            status_tx
                .send(StatusView::build(
                    &config,
                    SessionState::Tracking,
                    second,
                    StatusTrigger::SecondElapsed,
                ))
                .unwrap();
        }
        drop(status_tx);
        renderer.close();

        let rendered: Vec<String> = renders_rx.try_iter().collect();
        assert_eq!(rendered, vec!["00:00:01", "00:00:02"]);
    }

    #[test]
    fn test_renderer_keeps_going_after_presenter_errors() {
        let (renders_tx, renders_rx) = mpsc::channel();
        let (status_tx, renderer) = StatusRenderer::spawn(Flaky {
            renders: renders_tx,
            fail_next: false,
        })
        .unwrap();

        let config = StatusConfig::default();
        for second in 0..4 {
            status_tx
                .send(StatusView::build(
                    &config,
                    SessionState::Tracking,
                    second,
                    StatusTrigger::SecondElapsed,
                ))
                .unwrap();
        }
        drop(status_tx);
        renderer.close();

        let rendered: Vec<String> = renders_rx.try_iter().collect();
        assert_eq!(rendered, vec!["00:00:00", "00:00:02"]);
    }
}
