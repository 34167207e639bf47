//! Event definitions for the panel's event loop.
//!
//! Job state is not delivered through events; it lives in the supervisor and
//! is sampled when the status poller fires. Events only carry user input,
//! terminal changes and shutdown requests.

use crossterm::event::KeyEvent;

/// Represents an event in the panel's main loop.
#[derive(Debug, Clone)]
pub enum Event {
    /// A keyboard event received from the user.
    Key(KeyEvent),
    /// The terminal gained (`true`) or lost (`false`) focus.
    Focus(bool),
    /// The terminal window was resized.
    Resize,
    /// SIGINT or SIGTERM was received.
    Shutdown { signal: &'static str },
}
