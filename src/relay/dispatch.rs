//! Host notification capability and request dispatch

use super::protocol::{NotificationRequest, Severity};

/// Capability interface to the host's notification surface
///
/// One method per severity kind, plus lifecycle reports that speak about the
/// relay itself (bind failures, restart confirmations) rather than relaying
/// a caller's payload. Injected at construction so the core stays decoupled
/// from any particular host and testable with a stub.
pub trait NotificationSink: Send + Sync {
    fn success(&self, message: &str, description: Option<&str>);
    fn info(&self, message: &str, description: Option<&str>);
    fn warning(&self, message: &str, description: Option<&str>);
    fn error(&self, message: &str, description: Option<&str>);
    fn fatal_error(&self, message: &str, description: Option<&str>);

    /// Listener lifecycle reports (restart confirmations)
    fn report_success(&self, title: &str, description: &str);
    /// Listener lifecycle reports (recoverable problems, e.g. port in use)
    fn report_warning(&self, title: &str, description: &str);
    /// Listener lifecycle reports (unexpected failures)
    fn report_error(&self, title: &str, description: &str);
}

/// Forward a validated request to the matching sink method.
///
/// The match is exhaustive over the closed severity set; unknown kinds never
/// reach this point because validation already dropped them.
pub fn dispatch(sink: &dyn NotificationSink, request: &NotificationRequest) {
    let message = request.message.as_str();
    let description = request.description.as_deref();
    match request.severity {
        Severity::Success => sink.success(message, description),
        Severity::Info => sink.info(message, description),
        Severity::Warning => sink.warning(message, description),
        Severity::Error => sink.error(message, description),
        Severity::FatalError => sink.fatal_error(message, description),
    }
}

/// Sink that surfaces notifications as tracing events
///
/// The headless production sink: each severity kind maps onto the closest
/// tracing level, with fatal errors kept distinguishable from plain errors
/// via a field.
pub struct LogSink;

impl LogSink {
    fn detail(description: Option<&str>) -> &str {
        description.unwrap_or("")
    }
}

impl NotificationSink for LogSink {
    fn success(&self, message: &str, description: Option<&str>) {
        tracing::info!(kind = "success", description = Self::detail(description), "{message}");
    }

    fn info(&self, message: &str, description: Option<&str>) {
        tracing::info!(kind = "info", description = Self::detail(description), "{message}");
    }

    fn warning(&self, message: &str, description: Option<&str>) {
        tracing::warn!(kind = "warning", description = Self::detail(description), "{message}");
    }

    fn error(&self, message: &str, description: Option<&str>) {
        tracing::error!(kind = "error", description = Self::detail(description), "{message}");
    }

    fn fatal_error(&self, message: &str, description: Option<&str>) {
        tracing::error!(kind = "fatalerror", description = Self::detail(description), "{message}");
    }

    fn report_success(&self, title: &str, description: &str) {
        tracing::info!(description, "{title}");
    }

    fn report_warning(&self, title: &str, description: &str) {
        tracing::warn!(description, "{title}");
    }

    fn report_error(&self, title: &str, description: &str) {
        tracing::error!(description, "{title}");
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;
    use crate::relay::protocol::{decode_payload, validate};

    #[test]
    fn test_dispatch_routes_by_severity() {
        let sink = RecordingSink::default();
        let request = NotificationRequest {
            severity: Severity::Error,
            message: "Build failed".to_string(),
            description: Some("see log".to_string()),
        };
        dispatch(&sink, &request);

        assert_eq!(
            sink.notified(),
            vec![(
                "error",
                "Build failed".to_string(),
                Some("see log".to_string())
            )]
        );
    }

    #[test]
    fn test_dispatch_fires_exactly_once_per_request() {
        let sink = RecordingSink::default();
        let params = decode_payload(br#"{"type":"success","message":"Build passed"}"#);
        let request = validate(&params).unwrap();
        dispatch(&sink, &request);

        let notified = sink.notified();
        assert_eq!(notified.len(), 1);
        assert_eq!(notified[0].0, "success");
        assert_eq!(notified[0].1, "Build passed");
    }
}
