//! Media streams and audio sinks

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::BoxedCause;

/// A live remote media stream delivered by the signaling engine
///
/// The stream is opaque to the controller. Engines put their own stream
/// object in the payload and sinks recover it with [`MediaStream::payload`].
#[derive(Clone)]
pub struct MediaStream {
    id: String,
    payload: Arc<dyn Any + Send + Sync>,
}

impl MediaStream {
    /// Wrap an engine-specific stream object
    pub fn new<T: Any + Send + Sync>(id: impl Into<String>, payload: T) -> Self {
        Self {
            id: id.into(),
            payload: Arc::new(payload),
        }
    }

    /// Stream identifier (the `msid` for WebRTC engines)
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The engine-specific stream object, if it has type `T`
    pub fn payload<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream").field("id", &self.id).finish()
    }
}

impl PartialEq for MediaStream {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// A playback target for call audio
///
/// When a stream arrives the controller calls [`set_source`](AudioSink::set_source)
/// followed by [`play`](AudioSink::play).
pub trait AudioSink: Send + Sync {
    /// Point the sink at a new stream
    fn set_source(&self, stream: MediaStream);

    /// Start (or resume) playback
    fn play(&self) -> Result<(), BoxedCause>;

    /// Whether this sink can actually render audio
    ///
    /// Sinks wrapping a handle that may turn out to be something other than
    /// an audio element override this; a sink that answers `false` is
    /// rejected at attach time.
    fn can_play_audio(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct RtcStream(u32);

    #[test]
    fn test_payload_downcast() {
        let stream = MediaStream::new("msid-1", RtcStream(7));
        assert_eq!(stream.id(), "msid-1");
        assert_eq!(stream.payload::<RtcStream>(), Some(&RtcStream(7)));
        assert!(stream.payload::<String>().is_none());
    }
}
