//! Local media seam.
//!
//! Capture acquisition itself is an external collaborator; this module only
//! defines the handle the negotiation controller attaches to a transport
//! and the toggle surface exposed through the public API.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use webrtc::track::track_local::TrackLocal;

use crate::config::MediaProfile;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("media capture unavailable: {0}")]
    Unavailable(String),

    #[error("media capture refused: {0}")]
    Refused(String),
}

// ============================================================================
// TRACKS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

enum TrackInner {
    /// An RTP track the webrtc transport can attach directly.
    Rtp(std::sync::Arc<dyn TrackLocal + Send + Sync>),
    /// A placeholder without an underlying engine track, used by transports
    /// that do their own wiring (and by tests).
    Detached,
}

/// One local media track, opaque to everything but the matching transport.
pub struct MediaTrack {
    kind: MediaKind,
    inner: TrackInner,
}

impl MediaTrack {
    pub fn rtp(kind: MediaKind, track: std::sync::Arc<dyn TrackLocal + Send + Sync>) -> Self {
        Self {
            kind,
            inner: TrackInner::Rtp(track),
        }
    }

    pub fn detached(kind: MediaKind) -> Self {
        Self {
            kind,
            inner: TrackInner::Detached,
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn as_rtp(&self) -> Option<&std::sync::Arc<dyn TrackLocal + Send + Sync>> {
        match &self.inner {
            TrackInner::Rtp(track) => Some(track),
            TrackInner::Detached => None,
        }
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack").field("kind", &self.kind).finish()
    }
}

// ============================================================================
// LOCAL MEDIA HANDLE
// ============================================================================

type StopHook = Box<dyn FnOnce() + Send>;

/// The acquired local media of one attempt: its tracks plus mute state.
///
/// Toggles only flip kinds this handle actually carries — a role that never
/// sends a kind gets `false` and no mutation.
pub struct LocalMediaHandle {
    tracks: Vec<MediaTrack>,
    audio_enabled: AtomicBool,
    video_enabled: AtomicBool,
    stop_hook: parking_lot::Mutex<Option<StopHook>>,
}

impl LocalMediaHandle {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self::with_stop_hook(tracks, None)
    }

    /// `stop_hook` releases the underlying capture devices; it runs at most
    /// once, on teardown.
    pub fn with_stop_hook(tracks: Vec<MediaTrack>, stop_hook: Option<StopHook>) -> Self {
        let has_audio = tracks.iter().any(|t| t.kind() == MediaKind::Audio);
        let has_video = tracks.iter().any(|t| t.kind() == MediaKind::Video);
        Self {
            tracks,
            audio_enabled: AtomicBool::new(has_audio),
            video_enabled: AtomicBool::new(has_video),
            stop_hook: parking_lot::Mutex::new(stop_hook),
        }
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn has_kind(&self, kind: MediaKind) -> bool {
        self.tracks.iter().any(|t| t.kind() == kind)
    }

    /// Flips the mute state of `kind` and returns the new enabled state;
    /// returns `false` without mutating when this handle never sends `kind`.
    pub fn toggle(&self, kind: MediaKind) -> bool {
        if !self.has_kind(kind) {
            return false;
        }
        let flag = match kind {
            MediaKind::Audio => &self.audio_enabled,
            MediaKind::Video => &self.video_enabled,
        };
        !flag.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn is_enabled(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.has_kind(kind) && self.audio_enabled.load(Ordering::SeqCst),
            MediaKind::Video => self.has_kind(kind) && self.video_enabled.load(Ordering::SeqCst),
        }
    }

    /// Releases capture resources. Safe to call repeatedly.
    pub fn stop(&self) {
        if let Some(hook) = self.stop_hook.lock().take() {
            hook();
        }
    }
}

impl std::fmt::Debug for LocalMediaHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMediaHandle")
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

// ============================================================================
// MEDIA SOURCE
// ============================================================================

/// Acquires local capture for one attempt according to the device profile.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn open(&self, profile: MediaProfile) -> Result<LocalMediaHandle, MediaError>;
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_flips_and_reports_new_state() {
        let handle = LocalMediaHandle::new(vec![
            MediaTrack::detached(MediaKind::Audio),
            MediaTrack::detached(MediaKind::Video),
        ]);
        assert!(handle.is_enabled(MediaKind::Audio));
        assert!(!handle.toggle(MediaKind::Audio));
        assert!(!handle.is_enabled(MediaKind::Audio));
        assert!(handle.toggle(MediaKind::Audio));
        assert!(handle.is_enabled(MediaKind::Audio));
    }

    #[test]
    fn toggle_of_absent_kind_is_a_noop() {
        let handle = LocalMediaHandle::new(vec![MediaTrack::detached(MediaKind::Audio)]);
        assert!(!handle.toggle(MediaKind::Video));
        assert!(!handle.is_enabled(MediaKind::Video));
        // Audio untouched by the failed video toggle.
        assert!(handle.is_enabled(MediaKind::Audio));
    }

    #[test]
    fn stop_hook_runs_once() {
        use std::sync::atomic::AtomicU32;
        use std::sync::Arc;

        let count = Arc::new(AtomicU32::new(0));
        let hook_count = Arc::clone(&count);
        let handle = LocalMediaHandle::with_stop_hook(
            Vec::new(),
            Some(Box::new(move || {
                hook_count.fetch_add(1, Ordering::SeqCst);
            })),
        );
        handle.stop();
        handle.stop();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
