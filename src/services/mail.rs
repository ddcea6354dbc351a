//! Outgoing mail.
//!
//! Delivery is pluggable through [`Mailer`]. [`LogMailer`] records messages
//! in an in-memory outbox and logs them, which is what development and tests
//! use.

use escolar_common::Result;
use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Sends email messages.
pub trait Mailer: Send + Sync {
    fn send(&self, message: EmailMessage) -> Result<()>;
}

/// Mailer that logs messages and keeps them in an outbox.
#[derive(Debug, Default)]
pub struct LogMailer {
    outbox: Mutex<Vec<EmailMessage>>,
}

impl LogMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far, oldest first.
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.outbox.lock().clone()
    }
}

impl Mailer for LogMailer {
    fn send(&self, message: EmailMessage) -> Result<()> {
        tracing::info!(to = %message.to, subject = %message.subject, "Sending email");
        self.outbox.lock().push(message);
        Ok(())
    }
}

impl<M: Mailer + ?Sized> Mailer for std::sync::Arc<M> {
    fn send(&self, message: EmailMessage) -> Result<()> {
        (**self).send(message)
    }
}
