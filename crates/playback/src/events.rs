use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use renderer::SurfaceHandle;
use timeline::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceRenderPipeline {
    SourceVideo,
    OutputPreview,
    Both,
}

/// Notifications raised by the service. Surface handles are `None` when the
/// surface was released.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
    ScriptOpened,
    ScriptClosed,
    FrameChanged { previous: Frame, current: Frame },
    NewSourceRenderSurface(Option<SurfaceHandle>),
    NewPreviewRenderSurface(Option<SurfaceHandle>),
    SurfaceRendered(SurfaceRenderPipeline),
    VideoPlaybackStarted,
    VideoPlaybackStopped,
}

/// Fan-out of service events to any number of channel subscribers.
#[derive(Default)]
pub(crate) struct EventBus {
    subscribers: Mutex<Vec<Sender<ServiceEvent>>>,
}

impl EventBus {
    pub(crate) fn subscribe(&self) -> Receiver<ServiceEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub(crate) fn emit(&self, event: ServiceEvent) {
        self.subscribers.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_reaches_live_subscribers_and_prunes_dead_ones() {
        let bus = EventBus::default();
        let a = bus.subscribe();
        drop(bus.subscribe());
        bus.emit(ServiceEvent::ScriptOpened);
        assert_eq!(a.try_recv().unwrap(), ServiceEvent::ScriptOpened);
        assert_eq!(bus.subscribers.lock().len(), 1);
        drop(a);
        bus.emit(ServiceEvent::ScriptClosed);
        assert!(bus.subscribers.lock().is_empty());
    }
}
