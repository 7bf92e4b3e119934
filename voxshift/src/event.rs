//! Event system for session and track events

use crate::track::RemoteTrack;
use tokio::sync::mpsc;
use tracing::debug;

/// Events that can occur during a session
#[derive(Debug, Clone)]
pub enum Event {
    /// Another peer's audio started arriving
    TrackReceived {
        /// The track that was received
        track: RemoteTrack,
    },
    /// A remote track ended because its producer went away
    TrackRemoved {
        /// The track that was removed
        track: RemoteTrack,
    },
    /// A local track was published
    LocalTrackPublished {
        /// Producer id assigned by the server
        producer_id: String,
    },
    /// A server push could not be acted on
    SessionError {
        /// Error that occurred
        error: String,
    },
    /// The signaling connection is gone
    Disconnected,
}

impl Event {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::TrackReceived { .. } => "track_received",
            Event::TrackRemoved { .. } => "track_removed",
            Event::LocalTrackPublished { .. } => "local_track_published",
            Event::SessionError { .. } => "session_error",
            Event::Disconnected => "disconnected",
        }
    }

    /// Check if this is a track-related event
    pub fn is_track_event(&self) -> bool {
        matches!(
            self,
            Event::TrackReceived { .. }
                | Event::TrackRemoved { .. }
                | Event::LocalTrackPublished { .. }
        )
    }

    /// Check if this is an error event
    pub fn is_error_event(&self) -> bool {
        matches!(self, Event::SessionError { .. })
    }
}

/// Stream of session events for async iteration
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<Event>,
}

impl EventStream {
    /// Create a new event stream with a receiver
    pub fn new(receiver: mpsc::UnboundedReceiver<Event>) -> Self {
        Self { receiver }
    }

    /// Get the next event from the stream
    pub async fn next(&mut self) -> Option<Event> {
        let event = self.receiver.recv().await;
        if let Some(ref e) = event {
            debug!("Event received: {}", e.event_type());
        }
        event
    }

    /// Try to get the next event without waiting
    pub fn try_next(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }

    /// Stop accepting new events
    pub fn close(&mut self) {
        self.receiver.close();
    }
}
