//! SMTP delivery over a pooled `lettre` transport with XOAUTH2.

use lettre::message::header::ContentType;
use lettre::message::{Attachment as MailAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::PoolConfig;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use super::oauth::TokenClient;
use super::{ChannelProvider, DeliveryChannel, DeliveryError, OutgoingMail};
use crate::config::SmtpSettings;

/// Authenticates senders against an SMTP relay.
#[derive(Debug, Clone)]
pub struct SmtpChannelProvider {
    settings: SmtpSettings,
    tokens: TokenClient,
}

impl SmtpChannelProvider {
    pub fn new(settings: SmtpSettings) -> Self {
        let tokens = TokenClient::new(&settings);
        Self { settings, tokens }
    }
}

#[async_trait::async_trait]
impl ChannelProvider for SmtpChannelProvider {
    type Channel = SmtpChannel;

    async fn acquire(&self, sender: &str, credential: &str) -> Result<SmtpChannel, DeliveryError> {
        let from = parse_mailbox(sender)?;
        let access_token = self.tokens.access_token(credential).await?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.settings.host)
            .map_err(|e| DeliveryError::Connect(e.to_string()))?
            .credentials(Credentials::new(sender.to_string(), access_token))
            .authentication(vec![Mechanism::Xoauth2])
            .pool_config(PoolConfig::new().max_size(self.settings.max_connections))
            .build();

        match transport.test_connection().await {
            Ok(true) => {}
            Ok(false) => {
                return Err(DeliveryError::Connect(format!(
                    "{} did not accept the connection",
                    self.settings.host
                )));
            }
            Err(e) => return Err(DeliveryError::Connect(e.to_string())),
        }

        debug!(host = %self.settings.host, sender = %sender, "smtp channel ready");
        Ok(SmtpChannel { transport, from })
    }
}

/// One authenticated sender's pooled connection.
pub struct SmtpChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

#[async_trait::async_trait]
impl DeliveryChannel for SmtpChannel {
    async fn send(&self, mail: OutgoingMail) -> Result<(), DeliveryError> {
        let message = build_message(&self.from, mail)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| DeliveryError::Send(e.to_string()))?;
        Ok(())
    }

    async fn close(self) {
        // Dropping the transport shuts its connection pool down.
        drop(self.transport);
        debug!(sender = %self.from, "smtp channel closed");
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, DeliveryError> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| DeliveryError::Address {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

fn build_message(from: &Mailbox, mail: OutgoingMail) -> Result<Message, DeliveryError> {
    let to = parse_mailbox(&mail.to)?;
    let content_type = ContentType::parse(&mail.attachment.content_type)
        .map_err(|e| DeliveryError::Build(e.to_string()))?;

    Message::builder()
        .from(from.clone())
        .to(to)
        .subject(mail.subject)
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(mail.body))
                .singlepart(
                    MailAttachment::new(mail.attachment.file_name)
                        .body(mail.attachment.bytes, content_type),
                ),
        )
        .map_err(|e| DeliveryError::Build(e.to_string()))
}
