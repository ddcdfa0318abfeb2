//! What the scheduler needs from a media session

use std::fmt;
use std::sync::Arc;

use crate::error::Result;

/// Size of the scratch buffer each media thread lends to sessions
pub const AUDIO_BUFFER_SIZE: usize = 1 << 13;

/// A session whose streams are pumped by the media scheduler.
///
/// All methods run on the scheduler thread owning the session, except
/// [`on_media_processing_started`](Self::on_media_processing_started) which
/// runs on the caller of `add_session`. Implementations keep their state
/// behind their own locks.
pub trait MediaSession: Send + Sync {
    fn on_media_processing_started(&self) {}

    /// Receive side for wall clock `ts`
    fn read_streams(&self, ts: u64, buffer: &mut [u8]) -> Result<()>;

    /// Send side for wall clock `ts`
    fn write_streams(&self, ts: u64, buffer: &mut [u8]) -> Result<()>;

    fn process_dtmf_events(&self) {}

    /// Drop buffered audio; called before a session is cleared
    fn clear_audio(&self) {}

    fn on_media_processing_terminated(&self) {}

    /// Reset the RTP inactivity timer when processing (re)starts
    fn clear_rtp_timeout(&self) {}
}

/// Identity of a scheduled session
pub(crate) type SessionKey = usize;

pub(crate) fn session_key(session: &Arc<dyn MediaSession>) -> SessionKey {
    Arc::as_ptr(session) as *const () as usize
}

/// Kinds of session set changes a media thread applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedRequestKind {
    Insert,
    Remove,
    Clear,
    SoftRemove,
}

/// A change to a media thread's session set
pub struct SchedRequest {
    pub kind: SchedRequestKind,
    pub session: Arc<dyn MediaSession>,
}

impl SchedRequest {
    pub fn new(kind: SchedRequestKind, session: Arc<dyn MediaSession>) -> Self {
        SchedRequest { kind, session }
    }
}

impl fmt::Debug for SchedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedRequest")
            .field("kind", &self.kind)
            .field("session", &format_args!("{:#x}", session_key(&self.session)))
            .finish()
    }
}
