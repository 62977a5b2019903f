//! Request lifecycle observers
//!
//! A [`Backend`](crate::Backend) notifies registered observers at fixed points
//! of every tracker request. With no observers registered nothing is called.

use crate::types::TrackerAddress;

/// Lifecycle points of a tracker request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestEvent {
    /// The request is about to be sent
    RequestStart,
    /// Sending the request failed
    SendError,
    /// The socket accepted fewer bytes than the request holds
    LengthMismatch,
    /// The tracker did not answer in time
    ReadTimeout,
    /// A response line was received
    RequestFinished,
}

/// Receives request lifecycle notifications
pub trait RequestObserver: Send + Sync {
    /// Called with the event, the command name and the tracker last connected
    fn on_event(&self, event: RequestEvent, command: &str, tracker: Option<&TrackerAddress>);
}

impl<F> RequestObserver for F
where
    F: Fn(RequestEvent, &str, Option<&TrackerAddress>) + Send + Sync,
{
    fn on_event(&self, event: RequestEvent, command: &str, tracker: Option<&TrackerAddress>) {
        self(event, command, tracker)
    }
}
