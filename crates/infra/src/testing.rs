//! Test doubles shared by unit and integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use certdrop_core::RawFields;
use tokio::time::Instant;

use crate::delivery::{ChannelProvider, DeliveryChannel, DeliveryError, OutgoingMail};
use crate::render::{RenderError, RenderOptions, TemplateEngine, TemplateError, TemplateKind};

/// `count` valid rows: `Person i` / `person{i}@example.com`.
pub(crate) fn rows(count: usize) -> Vec<RawFields> {
    (0..count)
        .map(|i| row(&format!("Person {i}"), &format!("person{i}@example.com")))
        .collect()
}

pub(crate) fn row(name: &str, email: &str) -> RawFields {
    [("name", name), ("email", email)].into_iter().collect()
}

/// Templates are UTF-8 text; a render is `<template>:<name>`.
/// Names containing `!` fail to render.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TextTemplates;

impl TemplateEngine for TextTemplates {
    type Template = String;

    fn decode(&self, bytes: &[u8], _kind: TemplateKind) -> Result<String, TemplateError> {
        String::from_utf8(bytes.to_vec()).map_err(|e| TemplateError::Malformed(e.to_string()))
    }

    fn render(
        &self,
        template: &String,
        display_name: &str,
        _options: &RenderOptions,
    ) -> Result<Vec<u8>, RenderError> {
        if display_name.contains('!') {
            return Err(RenderError::Malformed(format!("cannot draw {display_name:?}")));
        }
        Ok(format!("{template}:{display_name}").into_bytes())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SentMail {
    pub mail: OutgoingMail,
    pub started: Instant,
    pub finished: Instant,
}

/// Observations shared between a [`FakeProvider`] and its channels.
#[derive(Debug, Default)]
pub(crate) struct FakeState {
    acquired: AtomicUsize,
    closed: AtomicUsize,
    attempts: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    sent: Mutex<Vec<SentMail>>,
}

impl FakeState {
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Sends attempted, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Successfully sent mails.
    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeProvider {
    state: Arc<FakeState>,
    refuse_acquire: bool,
    fail_sends: bool,
    send_delay: Duration,
}

impl FakeProvider {
    pub fn state(&self) -> Arc<FakeState> {
        Arc::clone(&self.state)
    }

    pub fn refusing(mut self) -> Self {
        self.refuse_acquire = true;
        self
    }

    pub fn failing_sends(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }
}

#[async_trait::async_trait]
impl ChannelProvider for FakeProvider {
    type Channel = FakeChannel;

    async fn acquire(&self, _sender: &str, credential: &str) -> Result<FakeChannel, DeliveryError> {
        if self.refuse_acquire {
            return Err(DeliveryError::Auth(format!("credential {credential:?} rejected")));
        }
        self.state.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(FakeChannel {
            state: Arc::clone(&self.state),
            fail_sends: self.fail_sends,
            send_delay: self.send_delay,
        })
    }
}

pub(crate) struct FakeChannel {
    state: Arc<FakeState>,
    fail_sends: bool,
    send_delay: Duration,
}

#[async_trait::async_trait]
impl DeliveryChannel for FakeChannel {
    async fn send(&self, mail: OutgoingMail) -> Result<(), DeliveryError> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let started = Instant::now();
        if !self.send_delay.is_zero() {
            tokio::time::sleep(self.send_delay).await;
        }
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_sends {
            return Err(DeliveryError::Send("channel down".into()));
        }
        self.state.sent.lock().unwrap().push(SentMail {
            mail,
            started,
            finished: Instant::now(),
        });
        Ok(())
    }

    async fn close(self) {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
    }
}
