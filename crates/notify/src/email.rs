//! SMTP email notifier via `lettre` with TLS support.
//!
//! Delivers rendered report mails through an SMTP server. Supports
//! STARTTLS and implicit TLS connections.

use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};
use lookout_core::config::EmailConfig;
use lookout_core::AnomalyReport;

use crate::templating::{RenderedMail, TemplateRenderer};
use crate::traits::{NotifyError, ReportMailer};

/// Sends report mails via SMTP.
#[derive(Debug)]
pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    renderer: TemplateRenderer,
}

/// Parse a comma-separated recipient list.
pub fn parse_recipients(to: &str) -> Result<Vec<Mailbox>, NotifyError> {
    let mailboxes = to
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|addr| {
            addr.parse()
                .map_err(|e: lettre::address::AddressError| NotifyError::Config(e.to_string()))
        })
        .collect::<Result<Vec<Mailbox>, _>>()?;
    if mailboxes.is_empty() {
        return Err(NotifyError::Config(
            "at least one recipient is required".to_string(),
        ));
    }
    Ok(mailboxes)
}

impl EmailNotifier {
    /// Build an `EmailNotifier` from SMTP configuration.
    ///
    /// Port defaults to 587. Port 465 uses implicit TLS; other ports use
    /// STARTTLS unless `tls` is false. Credentials come from `SMTP_USERNAME`
    /// and `SMTP_PASSWORD` when both are set.
    pub fn from_config(
        smtp_host: &str,
        smtp_port: Option<u16>,
        tls: bool,
        from: &str,
        renderer: TemplateRenderer,
    ) -> Result<Self, NotifyError> {
        let from_mailbox: Mailbox = from
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Config(e.to_string()))?;

        let port = smtp_port.unwrap_or(587);
        let mut builder = if port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)
                .map_err(|e| NotifyError::Config(e.to_string()))?
                .port(port)
        } else if tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(smtp_host)
                .map_err(|e| NotifyError::Config(e.to_string()))?
                .port(port)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host).port(port)
        };

        if let (Ok(username), Ok(password)) =
            (std::env::var("SMTP_USERNAME"), std::env::var("SMTP_PASSWORD"))
        {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            transport: builder.build(),
            from: from_mailbox,
            renderer,
        })
    }

    /// Build from the `email` config section. Fails if no SMTP host is set.
    pub fn from_email_config(config: &EmailConfig) -> Result<Self, NotifyError> {
        let host = config
            .smtp_host
            .as_deref()
            .ok_or_else(|| NotifyError::Config("SMTP_HOST not set".to_string()))?;
        Self::from_config(
            host,
            config.smtp_port,
            config.smtp_tls,
            &config.from,
            TemplateRenderer::new(),
        )
    }

    fn build_message(&self, to: &[Mailbox], mail: RenderedMail) -> Result<Message, NotifyError> {
        let mut builder = Message::builder().from(self.from.clone());
        for recipient in to {
            builder = builder.to(recipient.clone());
        }
        builder
            .subject(mail.subject)
            .body(mail.body)
            .map_err(|e| NotifyError::Smtp(e.to_string()))
    }

    async fn deliver(&self, to: &str, reports: &[AnomalyReport]) -> Result<usize, NotifyError> {
        let recipients = parse_recipients(to)?;
        let mail = self.renderer.render(reports)?;
        let message = self.build_message(&recipients, mail)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;
        Ok(recipients.len())
    }
}

#[async_trait::async_trait]
impl ReportMailer for EmailNotifier {
    async fn send(&self, to: &str, reports: &[AnomalyReport]) -> bool {
        match self.deliver(to, reports).await {
            Ok(recipients) => {
                tracing::info!(
                    channel = "email",
                    recipients,
                    reports = reports.len(),
                    "report mail delivered"
                );
                true
            }
            Err(e) => {
                tracing::warn!(channel = "email", to = %to, error = %e, "report mail failed");
                false
            }
        }
    }

    fn channel_name(&self) -> &str {
        "email"
    }
}
