//! HTTP notification relay core
//!
//! External processes (build scripts, test runners, long-running jobs) POST
//! a small payload to a local port and the relay forwards it to the host's
//! notification surface through the [`NotificationSink`] capability. The
//! protocol is fire-and-forget: every request is answered with an empty 200
//! and malformed payloads are dropped silently.

pub mod client;
pub mod dispatch;
pub mod lifecycle;
pub mod protocol;
pub mod server;

pub use client::send_notification;
pub use dispatch::{dispatch, LogSink, NotificationSink};
pub use lifecycle::ListenerLifecycle;
pub use protocol::{NotificationRequest, Severity};
