use parking_lot::Mutex;

/// Why a running playback loop was asked to stop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CancellationReason {
    #[default]
    None,
    PauseRequested,
    StopRequested,
    CloseScriptRequested,
}

#[derive(Debug, Default)]
struct CancelState {
    active: bool,
    requested: bool,
    reason: CancellationReason,
}

/// Flag plus reason, set from the controlling thread and polled by the
/// playback worker once per frame.
///
/// Requests are only accepted between [`begin`](Self::begin) and
/// [`finish`](Self::finish); both run under the same lock as
/// [`request`](Self::request), so a request is either consumed by the
/// session's teardown or refused.
#[derive(Debug, Default)]
pub struct CancellationContext {
    state: Mutex<CancelState>,
}

impl CancellationContext {
    pub fn new() -> Self { Self::default() }

    pub fn is_active(&self) -> bool { self.state.lock().active }

    pub fn is_requested(&self) -> bool { self.state.lock().requested }

    pub fn reason(&self) -> CancellationReason { self.state.lock().reason }

    /// Opens a session with no pending request.
    pub fn begin(&self) {
        *self.state.lock() = CancelState { active: true, ..CancelState::default() };
    }

    /// Records `reason` for the running session. Returns false when no
    /// session is accepting requests.
    ///
    /// Later requests replace earlier ones, except that a pending close is
    /// never downgraded.
    pub fn request(&self, reason: CancellationReason) -> bool {
        let mut s = self.state.lock();
        if !s.active {
            return false;
        }
        if s.reason != CancellationReason::CloseScriptRequested {
            s.reason = reason;
            s.requested = reason != CancellationReason::None;
        }
        true
    }

    /// Closes the session and returns its pending reason, so each request is
    /// observed exactly once.
    pub fn finish(&self) -> CancellationReason {
        let mut s = self.state.lock();
        let reason = s.reason;
        *s = CancelState::default();
        reason
    }
}
