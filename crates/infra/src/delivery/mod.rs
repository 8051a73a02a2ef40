//! Delivery dispatcher: one rendered artifact to one recipient.
//!
//! A [`ChannelProvider`] authenticates once per job and hands out a
//! [`DeliveryChannel`] that is reused for every record, then closed once.

pub mod oauth;
pub mod smtp;

pub use oauth::TokenClient;
pub use smtp::{SmtpChannel, SmtpChannelProvider};

use std::sync::LazyLock;

use regex::{NoExpand, Regex};
use thiserror::Error;

use crate::config::{DEFAULT_BODY, DEFAULT_SUBJECT};

static NAME_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[name\]").expect("placeholder pattern is valid"));

/// Delivery failure.
///
/// `Auth` and `Connect` come from acquiring a channel and are fatal to the
/// job; the rest come from a single send and only fail that record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("invalid address {address:?}: {reason}")]
    Address { address: String, reason: String },
    #[error("building message failed: {0}")]
    Build(String),
    #[error("send failed: {0}")]
    Send(String),
}

/// File attached to an outgoing mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn pdf(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: "application/pdf".to_string(),
            bytes,
        }
    }
}

/// One message for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment: Attachment,
}

/// Subject line, or the default when blank.
pub fn subject_line(subject: Option<&str>) -> String {
    subject
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SUBJECT)
        .to_string()
}

/// Body with every `[Name]` (any casing) replaced by the display name.
pub fn personalize(body_template: Option<&str>, display_name: &str) -> String {
    let template = body_template
        .filter(|b| !b.trim().is_empty())
        .unwrap_or(DEFAULT_BODY);
    NAME_PLACEHOLDER
        .replace_all(template, NoExpand(display_name))
        .into_owned()
}

/// Hands out authenticated channels.
#[async_trait::async_trait]
pub trait ChannelProvider: Send + Sync + 'static {
    type Channel: DeliveryChannel;

    /// Authenticate `sender` with `credential`. Called once per job.
    async fn acquire(&self, sender: &str, credential: &str) -> Result<Self::Channel, DeliveryError>;
}

/// An authenticated, reusable connection to the mail service.
#[async_trait::async_trait]
pub trait DeliveryChannel: Send + Sync + 'static {
    async fn send(&self, mail: OutgoingMail) -> Result<(), DeliveryError>;

    /// Release the connection. Called once, after the last group.
    async fn close(self);
}
