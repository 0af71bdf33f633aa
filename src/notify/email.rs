//! SMTP notification sink
//!
//! Wraps the `lettre` async SMTP transport. One message is sent per call with
//! every enabled recipient on the `To` line.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use super::{NotificationError, NotificationSink};
use crate::model::Recipient;

pub struct SmtpSink {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpSink {
    pub fn new(
        host: &str,
        port: u16,
        from: &str,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self, NotificationError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?.port(port);

        if let (Some(user), Some(pass)) = (username, password) {
            builder = builder.credentials(Credentials::new(user, pass));
        }

        Ok(Self {
            mailer: builder.build(),
            from: from.parse()?,
        })
    }
}

/// Assemble the plain-text message for the enabled recipients
pub fn build_message(
    from: &Mailbox,
    recipients: &[Recipient],
    subject: &str,
    body: &str,
) -> Result<Message, NotificationError> {
    let mut builder = Message::builder()
        .from(from.clone())
        .subject(subject)
        .header(ContentType::TEXT_PLAIN);

    let mut any = false;
    for recipient in recipients.iter().filter(|r| r.enabled) {
        let address = recipient.email.parse()?;
        builder = builder.to(Mailbox::new(Some(recipient.name.clone()), address));
        any = true;
    }
    if !any {
        return Err(NotificationError::NoRecipients);
    }

    builder
        .body(body.to_string())
        .map_err(|e| NotificationError::Build(e.to_string()))
}

#[async_trait]
impl NotificationSink for SmtpSink {
    async fn send(
        &self,
        recipients: &[Recipient],
        subject: &str,
        body: &str,
    ) -> Result<(), NotificationError> {
        let message = build_message(&self.from, recipients, subject, body)?;
        self.mailer.send(message).await?;

        info!(recipients = recipients.len(), "notification email sent: {subject}");
        Ok(())
    }
}
