//! Mailer trait definition and shared error types.

use lookout_core::AnomalyReport;

/// Errors that can occur while building or delivering a report mail.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("SMTP delivery failed: {0}")]
    Smtp(String),

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Email capability used by job execution.
///
/// Delivery failures never propagate: `send` reports success as a bool and
/// implementations log the cause.
#[async_trait::async_trait]
pub trait ReportMailer: Send + Sync {
    async fn send(&self, to: &str, reports: &[AnomalyReport]) -> bool;

    /// Human-readable name for this channel (e.g., "email").
    fn channel_name(&self) -> &str;
}

/// Mailer that only logs, used when email delivery is disabled.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait::async_trait]
impl ReportMailer for LogMailer {
    async fn send(&self, to: &str, reports: &[AnomalyReport]) -> bool {
        tracing::info!(
            channel = "log",
            to = %to,
            reports = reports.len(),
            job_id = reports.first().map(|r| r.job_id),
            "report mail suppressed (email disabled)"
        );
        true
    }

    fn channel_name(&self) -> &str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_mailer_always_succeeds() {
        let mailer = LogMailer;
        assert!(mailer.send("ops@example.com", &[]).await);
        assert_eq!(mailer.channel_name(), "log");
    }
}
