//! Outbound account letters (email verification, password reset).
//!
//! Delivery is fire-and-forget from the caller's point of view: the session
//! service hands letters to [`dispatch`] and never waits on, or fails because
//! of, the notifier.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::EmailConfig;
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Letter {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl Letter {
    pub fn verification(email: &EmailConfig, to: &str, token: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: "Confirm your UpSkill account".into(),
            body: format!(
                "Welcome to UpSkill!\n\nConfirm your email address by opening:\n{}/api/auth/verify?token={}\n",
                email.base_url.trim_end_matches('/'),
                token
            ),
        }
    }

    pub fn password_reset(email: &EmailConfig, to: &str, token: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: "Reset your UpSkill password".into(),
            body: format!(
                "Someone asked to reset the password for this account.\n\nUse this link to choose a new one:\n{}/reset?token={}\n\nIf this wasn't you, ignore this letter.\n",
                email.base_url.trim_end_matches('/'),
                token
            ),
        }
    }

    /// The `token=` query value of the first link in the body.
    pub fn link_token(&self) -> Option<&str> {
        let start = self.body.find("token=")? + "token=".len();
        let rest = &self.body[start..];
        let end = rest
            .find(|c: char| c.is_whitespace() || c == '&')
            .unwrap_or(rest.len());
        Some(&rest[..end])
    }

    /// The body with its link token blanked out.
    pub fn redacted_body(&self) -> String {
        match self.link_token() {
            Some(token) if !token.is_empty() => self.body.replace(token, "[redacted]"),
            _ => self.body.clone(),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, letter: Letter) -> Result<(), AppError>;
}

/// Sends `letter` on a background task. Failures are logged and dropped.
pub fn dispatch(notifier: Arc<dyn Notifier>, letter: Letter) {
    tokio::spawn(async move {
        let to = letter.to.clone();
        if let Err(e) = notifier.send(letter).await {
            warn!(to = %to, "failed to deliver letter: {}", e);
        }
    });
}

/// Writes letters to the log instead of delivering them. Link tokens are
/// redacted unless [`LogNotifier::reveal_links`] is switched on.
#[derive(Debug, Clone)]
pub struct LogNotifier {
    from: String,
    reveal_links: bool,
}

impl LogNotifier {
    pub fn new(email: &EmailConfig) -> Self {
        Self {
            from: email.from.clone(),
            reveal_links: false,
        }
    }

    /// Logs letters verbatim, tokens included. Development only.
    pub fn reveal_links(mut self, reveal: bool) -> Self {
        self.reveal_links = reveal;
        self
    }

    fn render(&self, letter: &Letter) -> String {
        if self.reveal_links {
            letter.body.clone()
        } else {
            letter.redacted_body()
        }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, letter: Letter) -> Result<(), AppError> {
        info!(
            from = %self.from,
            to = %letter.to,
            subject = %letter.subject,
            "mail not configured, letter logged:\n{}",
            self.render(&letter)
        );
        Ok(())
    }
}

/// Keeps every letter in an outbox. Used by tests to read the links a user
/// would have received.
#[derive(Debug, Default, Clone)]
pub struct MemoryNotifier {
    outbox: Arc<Mutex<Vec<Letter>>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn letters(&self) -> Vec<Letter> {
        self.outbox.lock().await.clone()
    }

    /// Polls until at least `count` letters arrived or `timeout` elapsed.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Letter> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let letters = self.letters().await;
            if letters.len() >= count || tokio::time::Instant::now() >= deadline {
                return letters;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, letter: Letter) -> Result<(), AppError> {
        self.outbox.lock().await.push(letter);
        Ok(())
    }
}
