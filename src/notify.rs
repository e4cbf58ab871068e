//! SMTP delivery of the run report.

use crate::config::{EmailSettings, SecureSocket};
use crate::error::VaultError;
use crate::report::RunSummary;
use lettre::address::{Address, Envelope};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

/// Sends plain-text reports through one SMTP relay.
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    settings: EmailSettings,
}

impl Mailer {
    /// Build the transport. Nothing is sent and no connection is opened.
    pub fn from_settings(settings: &EmailSettings) -> Result<Self, VaultError> {
        let host = settings.smtp_host.trim();
        let builder = match settings.secure_socket()? {
            SecureSocket::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
            SecureSocket::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| VaultError::Notify(e.to_string()))?,
            SecureSocket::SslOnConnect => AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| VaultError::Notify(e.to_string()))?,
        };
        let builder = builder.port(settings.smtp_port);

        let builder = if settings.require_auth {
            if settings.username.trim().is_empty() {
                return Err(VaultError::InvalidConfig(
                    "email.require_auth is true but email.username is empty".into(),
                ));
            }
            builder.credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ))
        } else {
            builder
        };

        info!(
            host = %host,
            port = settings.smtp_port,
            security = %settings.secure_socket()?,
            "Mailer initialized"
        );

        Ok(Self {
            transport: builder.build(),
            settings: settings.clone(),
        })
    }

    pub async fn send_summary(&self, summary: &RunSummary) -> Result<(), VaultError> {
        self.send(&summary.subject(), &summary.render_text()).await
    }

    pub async fn send(&self, subject: &str, body: &str) -> Result<(), VaultError> {
        let message = compose(&self.settings, subject, body)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| VaultError::Notify(e.to_string()))?;
        info!(count = self.settings.recipients().count(), "Report e-mail sent");
        Ok(())
    }
}

/// Build the message with an explicit envelope, so `MAIL FROM` can differ
/// from the header sender.
pub fn compose(settings: &EmailSettings, subject: &str, body: &str) -> Result<Message, VaultError> {
    let from_addr = parse_address(&settings.from_address, "email.from_address")?;
    let from = Mailbox::new(
        Some(settings.from_name.clone()).filter(|n| !n.trim().is_empty()),
        from_addr,
    );
    let envelope_from = parse_address(settings.envelope_sender(), "email.envelope_from")?;

    let recipients = settings
        .recipients()
        .map(|r| parse_address(r, "email.to"))
        .collect::<Result<Vec<_>, _>>()?;
    if recipients.is_empty() {
        return Err(VaultError::Notify("No recipients configured".into()));
    }

    let envelope = Envelope::new(Some(envelope_from), recipients.clone())
        .map_err(|e| VaultError::Notify(e.to_string()))?;

    let mut builder = Message::builder()
        .from(from)
        .subject(subject)
        .envelope(envelope);
    for to in recipients {
        builder = builder.to(Mailbox::new(None, to));
    }

    builder
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .map_err(|e| VaultError::Notify(e.to_string()))
}

fn parse_address(raw: &str, field: &str) -> Result<Address, VaultError> {
    raw.trim()
        .parse::<Address>()
        .map_err(|e| VaultError::InvalidConfig(format!("Invalid {field} '{raw}': {e}")))
}
