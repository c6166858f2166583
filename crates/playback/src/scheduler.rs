//! Background playback: one worker thread per session advances frames at
//! the source cadence and reports each one back over a channel. The session
//! drains that channel on the owning thread, so frame notifications and
//! teardown always run there.

use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use renderer::RenderBackend;
use timeline::Frame;
use tracing::{debug, info, warn};

use crate::cancel::CancellationReason;
use crate::events::ServiceEvent;
use crate::service::{PlaybackControl, ScriptVideoService};
use crate::ServiceError;

enum LoopMsg {
    FrameAdvanced(Frame),
    Finished { last_frame: Frame, fault: Option<ServiceError> },
}

/// How a playback session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackOutcome {
    /// Last frame rendered by the loop.
    pub last_frame: Frame,
    /// `None` when the stream ran to its end.
    pub reason: CancellationReason,
    pub faulted: bool,
}

/// Handle to a running playback loop.
///
/// Call [`poll`](Self::poll) regularly (or [`wait`](Self::wait)) from the
/// thread that owns the session; frame changes and teardown are applied
/// there. Dropping an unfinished session stops playback and waits for it.
pub struct PlaybackSession<B: RenderBackend + 'static> {
    service: ScriptVideoService<B>,
    rx: Receiver<LoopMsg>,
    worker: Option<thread::JoinHandle<()>>,
    outcome: Option<PlaybackOutcome>,
}

impl<B: RenderBackend + 'static> ScriptVideoService<B> {
    /// Starts playback from the current frame on a background worker.
    pub fn start_video_playback(&self) -> Result<PlaybackSession<B>, ServiceError> {
        let ctx = &self.inner.context;
        if !ctx.has_video() {
            return Err(ServiceError::NoVideo);
        }
        if !ctx.try_begin_playing() {
            return Err(ServiceError::PlaybackActive);
        }
        self.inner.cancel.begin();
        self.inner.events.emit(ServiceEvent::VideoPlaybackStarted);
        info!(from = ctx.frame_number(), "playback started");

        let (tx, rx) = unbounded();
        let worker_service = self.clone();
        let worker = thread::spawn(move || worker_service.play_video(tx));
        Ok(PlaybackSession { service: self.clone(), rx, worker: Some(worker), outcome: None })
    }

    fn cadence(&self) -> Option<Duration> {
        let config = &self.inner.config;
        if !config.hold_frame_rate || config.rate <= 0.0 {
            return None;
        }
        Some(self.inner.context.frame_rate().frame_period().div_f64(config.rate))
    }

    fn play_video(&self, tx: Sender<LoopMsg>) {
        let ctx = &self.inner.context;
        let cadence = self.cadence();
        let last = ctx.seekable_frame_count();
        let mut frame = ctx.frame_number();
        let mut fault = None;

        while frame < last && !self.inner.cancel.is_requested() {
            let started = Instant::now();
            let next = frame + 1;
            if let Err(e) = self.seek_frame_core(next, true, false) {
                fault = Some(e);
                break;
            }
            frame = next;
            let _ = tx.send(LoopMsg::FrameAdvanced(frame));

            if let Some(period) = cadence {
                // no frame dropping: an overrun just starts the next frame late
                let elapsed = started.elapsed();
                if elapsed < period {
                    thread::sleep(period - elapsed);
                }
            }
        }
        let _ = tx.send(LoopMsg::Finished { last_frame: frame, fault });
    }

    /// Post-loop teardown, run on the session's owning thread.
    fn finish_playback(&self, last_frame: Frame, fault: Option<ServiceError>) -> PlaybackOutcome {
        let faulted = fault.is_some();
        if let Some(e) = &fault {
            self.inner.reporter.report("video playback aborted", e);
        }
        // from here on, pause/stop/close requests act immediately
        let reason = self.inner.cancel.finish();
        self.inner.context.set_is_playing(false);
        self.inner.events.emit(ServiceEvent::VideoPlaybackStopped);
        info!(last_frame, ?reason, faulted, "playback stopped");

        match reason {
            CancellationReason::CloseScriptRequested => {
                self.close_script_core();
                self.inner.events.emit(ServiceEvent::ScriptClosed);
            }
            CancellationReason::PauseRequested => {}
            CancellationReason::StopRequested | CancellationReason::None if !faulted && self.inner.context.has_video() => {
                if let Err(e) = self.seek_frame(0) {
                    self.inner.reporter.report("rewind after playback", &e);
                }
            }
            _ => {}
        }
        PlaybackOutcome { last_frame, reason, faulted }
    }
}

impl<B: RenderBackend + 'static> PlaybackSession<B> {
    pub fn control(&self) -> PlaybackControl { self.service.control() }

    pub fn is_finished(&self) -> bool { self.outcome.is_some() }

    pub fn outcome(&self) -> Option<PlaybackOutcome> { self.outcome }

    /// Applies everything the worker has reported so far without blocking.
    /// Returns the outcome once playback has been torn down.
    pub fn poll(&mut self) -> Option<PlaybackOutcome> { self.drain(false) }

    /// Blocks until the loop ends and teardown has run.
    pub fn wait(mut self) -> PlaybackOutcome {
        loop {
            if let Some(outcome) = self.drain(true) {
                return outcome;
            }
        }
    }

    fn drain(&mut self, block: bool) -> Option<PlaybackOutcome> {
        if self.outcome.is_some() {
            return self.outcome;
        }
        loop {
            let msg = if block {
                self.rx.recv().map_err(|_| TryRecvError::Disconnected)
            } else {
                self.rx.try_recv()
            };
            match msg {
                Ok(LoopMsg::FrameAdvanced(frame)) => self.service.on_frame_changed(frame),
                Ok(LoopMsg::Finished { last_frame, fault }) => {
                    self.join_worker();
                    return Some(self.finish(last_frame, fault));
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    warn!("playback worker hung up without finishing");
                    self.join_worker();
                    let last_frame = self.service.context().frame_number();
                    return Some(self.finish(last_frame, Some(ServiceError::WorkerLost)));
                }
            }
        }
    }

    fn finish(&mut self, last_frame: Frame, fault: Option<ServiceError>) -> PlaybackOutcome {
        let outcome = self.service.finish_playback(last_frame, fault);
        self.outcome = Some(outcome);
        outcome
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                debug!("playback worker panicked");
            }
        }
    }
}

impl<B: RenderBackend + 'static> Drop for PlaybackSession<B> {
    fn drop(&mut self) {
        if self.outcome.is_some() {
            return;
        }
        self.service.control().stop();
        while self.drain(true).is_none() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{events, fixture, fixture_with, Call};
    use crate::ServiceConfig;
    use timeline::Project;

    #[test]
    fn natural_end_renders_remaining_frames_then_rewinds() {
        let (svc, log, file) = fixture(10);
        svc.load_script_from_file_source(file.path()).unwrap();
        svc.seek_frame(7).unwrap();
        let rx = svc.subscribe();
        log.clear();

        let outcome = svc.start_video_playback().unwrap().wait();
        assert_eq!(outcome, PlaybackOutcome { last_frame: 9, reason: CancellationReason::None, faulted: false });
        assert_eq!(log.renders(), vec![8, 9, 0]);
        assert!(!svc.context().is_playing());
        assert_eq!(svc.context().frame_number(), 0);

        let evs = events(&rx);
        assert_eq!(evs.first(), Some(&ServiceEvent::VideoPlaybackStarted));
        let stopped = evs.iter().position(|e| *e == ServiceEvent::VideoPlaybackStopped).unwrap();
        let advanced: Vec<_> = evs[..stopped]
            .iter()
            .filter_map(|e| match e {
                ServiceEvent::FrameChanged { current, .. } => Some(*current),
                _ => None,
            })
            .collect();
        assert_eq!(advanced, vec![8, 9]);
        assert!(evs[stopped..].contains(&ServiceEvent::FrameChanged { previous: 9, current: 0 }));
    }

    #[test]
    fn playback_from_last_frame_ends_immediately() {
        let (svc, log, file) = fixture(5);
        svc.load_script_from_file_source(file.path()).unwrap();
        svc.seek_frame(4).unwrap();
        log.clear();
        let outcome = svc.start_video_playback().unwrap().wait();
        assert_eq!(outcome.last_frame, 4);
        assert_eq!(log.renders(), vec![0]);
    }

    #[test]
    fn pause_keeps_last_rendered_frame() {
        let (svc, log, file) = fixture(100);
        svc.load_script_from_file_source(file.path()).unwrap();
        let control = svc.control();
        log.on_render(move |frame| {
            if frame == 5 {
                control.pause();
            }
        });

        let outcome = svc.start_video_playback().unwrap().wait();
        assert_eq!(outcome.reason, CancellationReason::PauseRequested);
        assert_eq!(outcome.last_frame, 5);
        assert_eq!(svc.context().frame_number(), 5);
        assert!(!svc.context().is_playing());
        assert_eq!(*log.renders().last().unwrap(), 5);
    }

    #[test]
    fn stop_rewinds_to_first_frame() {
        let (svc, log, file) = fixture(100);
        svc.load_script_from_file_source(file.path()).unwrap();
        let control = svc.control();
        log.on_render(move |frame| {
            if frame == 3 {
                control.stop();
            }
        });

        let outcome = svc.start_video_playback().unwrap().wait();
        assert_eq!(outcome.reason, CancellationReason::StopRequested);
        assert_eq!(outcome.last_frame, 3);
        assert_eq!(svc.context().frame_number(), 0);
        assert_eq!(log.renders(), vec![0, 1, 2, 3, 0]);
    }

    #[test]
    fn close_during_playback_defers_teardown() {
        let (svc, log, file) = fixture(100);
        svc.load_script_from_file_source(file.path()).unwrap();
        let rx = svc.subscribe();
        let control = svc.control();
        log.on_render(move |frame| {
            if frame == 2 {
                control.close_script();
                control.pause();
            }
        });

        let outcome = svc.start_video_playback().unwrap().wait();
        assert_eq!(outcome.reason, CancellationReason::CloseScriptRequested);
        assert_eq!(svc.context().snapshot(), crate::ContextState::default());
        assert_eq!(log.calls().last(), Some(&Call::Close));
        let evs = events(&rx);
        assert_eq!(evs.last(), Some(&ServiceEvent::ScriptClosed));
        assert!(evs.contains(&ServiceEvent::VideoPlaybackStopped));
    }

    #[test]
    fn render_fault_is_reported_and_stops_in_place() {
        let (svc, log, file) = fixture(100);
        svc.load_script_from_file_source(file.path()).unwrap();
        log.fail_render_at(4);

        let outcome = svc.start_video_playback().unwrap().wait();
        assert!(outcome.faulted);
        assert_eq!(outcome.last_frame, 3);
        assert_eq!(svc.context().frame_number(), 3);
        assert!(!svc.context().is_playing());
        let reports = log.reports();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].starts_with("video playback aborted"));
    }

    #[test]
    fn second_start_and_seek_are_rejected_while_playing() {
        let (svc, log, file) = fixture(100);
        svc.load_script_from_file_source(file.path()).unwrap();
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        log.on_render(move |frame| {
            if frame == 1 {
                let _ = gate_rx.recv_timeout(Duration::from_secs(5));
            }
        });

        let mut session = svc.start_video_playback().unwrap();
        assert!(svc.context().is_playing());
        assert!(matches!(svc.start_video_playback(), Err(ServiceError::PlaybackActive)));
        assert!(matches!(svc.seek_frame(10), Err(ServiceError::PlaybackActive)));
        assert!(session.poll().is_none());

        session.control().pause();
        let _ = gate_tx.send(());
        let outcome = session.wait();
        assert_eq!(outcome.reason, CancellationReason::PauseRequested);
        assert_eq!(outcome.last_frame, 1);
    }

    #[test]
    fn refresh_and_set_project_do_not_render_while_playing() {
        let (svc, log, file) = fixture(100);
        svc.load_script_from_file_source(file.path()).unwrap();
        let control = svc.control();
        log.on_render(move |frame| {
            if frame == 5 {
                control.pause();
            }
        });

        let mut session = svc.start_video_playback().unwrap();
        // loop has exited, teardown not yet drained
        session.worker.take().unwrap().join().unwrap();
        assert!(svc.context().is_playing());
        assert!(matches!(svc.refresh(), Err(ServiceError::PlaybackActive)));
        svc.set_project(Project::new(file.path())).unwrap();

        let outcome = session.wait();
        assert_eq!(outcome.reason, CancellationReason::PauseRequested);
        assert_eq!(log.renders(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(svc.context().frame_number(), 5);
        svc.refresh().unwrap();
        assert_eq!(log.renders().last(), Some(&5));
    }

    #[test]
    fn close_after_loop_exit_is_still_honoured() {
        let (svc, log, file) = fixture(5);
        svc.load_script_from_file_source(file.path()).unwrap();
        let rx = svc.subscribe();

        let mut session = svc.start_video_playback().unwrap();
        session.worker.take().unwrap().join().unwrap();
        assert!(svc.control().close_script());

        let outcome = session.wait();
        assert_eq!(outcome, PlaybackOutcome { last_frame: 4, reason: CancellationReason::CloseScriptRequested, faulted: false });
        assert_eq!(svc.context().snapshot(), crate::ContextState::default());
        assert_eq!(log.calls().last(), Some(&Call::Close));
        assert_eq!(events(&rx).last(), Some(&ServiceEvent::ScriptClosed));

        // with the session torn down, requests are refused and close acts at once
        assert!(!svc.control().close_script());
        assert!(!svc.control().stop());
    }

    #[test]
    fn held_cadence_paces_frames_at_source_rate() {
        let (svc, log, file) = fixture_with(10, ServiceConfig::default());
        svc.load_script_from_file_source(file.path()).unwrap();
        log.clear();

        let started = std::time::Instant::now();
        let outcome = svc.start_video_playback().unwrap().wait();
        let elapsed = started.elapsed();

        assert_eq!(outcome.last_frame, 9);
        assert_eq!(log.renders(), vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 0]);
        // nine frames at 40 ms each
        assert!(elapsed >= Duration::from_millis(320), "{elapsed:?}");
    }

    #[test]
    fn overrunning_frames_are_not_delayed_or_dropped() {
        let (svc, log, file) = fixture_with(6, ServiceConfig::default());
        svc.load_script_from_file_source(file.path()).unwrap();
        log.clear();
        log.on_render(|frame| {
            if frame > 0 {
                thread::sleep(Duration::from_millis(80));
            }
        });

        let started = std::time::Instant::now();
        let outcome = svc.start_video_playback().unwrap().wait();
        let elapsed = started.elapsed();

        assert_eq!(outcome.last_frame, 5);
        assert_eq!(log.renders(), vec![1, 2, 3, 4, 5, 0]);
        // five 80 ms renders; a 40 ms sleep after each would add 200 ms more
        assert!(elapsed >= Duration::from_millis(400), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(540), "{elapsed:?}");
    }

    #[test]
    fn dropping_session_stops_playback() {
        let (svc, _log, file) = fixture(1_000);
        svc.load_script_from_file_source(file.path()).unwrap();
        let session = svc.start_video_playback().unwrap();
        drop(session);
        assert!(!svc.context().is_playing());
        assert_eq!(svc.context().frame_number(), 0);
    }

    #[test]
    fn start_without_video_is_rejected() {
        let (svc, _log, _file) = fixture(10);
        assert!(matches!(svc.start_video_playback(), Err(ServiceError::NoVideo)));
    }

    #[test]
    fn cadence_scales_with_rate() {
        let (svc, _log, _file) = fixture(10);
        assert_eq!(svc.cadence(), None);
        let held = ScriptVideoService::with_config(
            crate::testing::RecordingBackend::new(10, crate::testing::CallLog::default()),
            crate::ServiceConfig { hold_frame_rate: true, rate: 2.0 },
            std::sync::Arc::new(crate::TracingReporter),
        );
        // context defaults to 1 fps until a source is loaded
        assert_eq!(held.cadence(), Some(Duration::from_millis(500)));
    }
}
