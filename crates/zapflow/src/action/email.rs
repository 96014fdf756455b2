//! `sendEmail` over SMTP.

use std::time::Duration;

use async_trait::async_trait;
use lettre::address::AddressError;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use super::context::RunContext;
use super::handler::ActionHandler;

const DEFAULT_FROM_NAME: &str = "Zap Automation";

/// SMTP connection settings.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    /// Submission port; STARTTLS is always required.
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Sender address. The display name comes from the step's `fromName`.
    pub from: String,
}

/// Errors from the email handler. Each becomes the step's failure reason.
#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("invalid email parameters: {0}")]
    InvalidParameters(#[from] serde_json::Error),

    #[error("No recipients specified")]
    NoRecipients,

    #[error("Email subject is required")]
    MissingSubject,

    #[error("Email body is required")]
    MissingBody,

    #[error("invalid address {address:?}: {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: AddressError,
    },

    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum Recipients {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmailParameters {
    #[serde(default, alias = "recipients")]
    to: Option<Recipients>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    from_name: Option<String>,
}

/// A validated `sendEmail` request.
#[derive(Debug, Clone, PartialEq)]
struct EmailRequest {
    recipients: Vec<String>,
    subject: String,
    body: String,
    from_name: String,
}

impl EmailRequest {
    fn from_parameters(parameters: &Value) -> Result<Self, EmailError> {
        let params = EmailParameters::deserialize(parameters)?;

        let recipients: Vec<String> = match params.to {
            Some(Recipients::One(to)) => vec![to],
            Some(Recipients::Many(to)) => to,
            None => Vec::new(),
        }
        .into_iter()
        .map(|to| to.trim().to_owned())
        .filter(|to| !to.is_empty())
        .collect();

        if recipients.is_empty() {
            return Err(EmailError::NoRecipients);
        }

        let subject = params
            .subject
            .filter(|s| !s.is_empty())
            .ok_or(EmailError::MissingSubject)?;
        let body = params
            .body
            .filter(|s| !s.is_empty())
            .ok_or(EmailError::MissingBody)?;
        let from_name = params
            .from_name
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_FROM_NAME.to_owned());

        Ok(Self {
            recipients,
            subject,
            body,
            from_name,
        })
    }

    fn to_message(&self, from: &str, ctx: &RunContext) -> Result<Message, EmailError> {
        let sender = Mailbox::new(Some(self.from_name.clone()), parse_address(from)?);

        let mut builder = Message::builder()
            .from(sender)
            .subject(self.subject.clone())
            // Stable across redeliveries so receiving servers can deduplicate.
            .message_id(Some(format!("<{}.{}@zapflow>", ctx.run_id, ctx.stage)));

        for to in &self.recipients {
            builder = builder.to(Mailbox::new(None, parse_address(to)?));
        }

        Ok(builder.multipart(MultiPart::alternative_plain_html(
            self.body.clone(),
            self.body.clone(),
        ))?)
    }
}

fn parse_address(address: &str) -> Result<lettre::Address, EmailError> {
    address
        .parse()
        .map_err(|source| EmailError::InvalidAddress {
            address: address.to_owned(),
            source,
        })
}

/// Sends the step's `body` as both the plain-text and HTML part.
///
/// Parameters: `{ to | recipients, subject, body, fromName? }` where
/// recipients is a single address or a list.
#[derive(Clone)]
pub struct SmtpEmailHandler {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpEmailHandler {
    pub fn new(settings: &SmtpSettings) -> Result<Self, EmailError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)?
            .port(settings.port)
            .timeout(Some(Duration::from_secs(10)));

        if let Some(username) = &settings.username {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                settings.password.clone().unwrap_or_default(),
            ));
        }

        // Reject a bad sender at startup rather than on every step.
        parse_address(&settings.from)?;

        Ok(Self {
            transport: builder.build(),
            from: settings.from.clone(),
        })
    }
}

#[async_trait]
impl ActionHandler for SmtpEmailHandler {
    type Error = EmailError;

    async fn execute(&self, parameters: &Value, ctx: &RunContext) -> Result<Value, EmailError> {
        let request = EmailRequest::from_parameters(parameters)?;
        let message = request.to_message(&self.from, ctx)?;

        self.transport.send(message).await?;

        info!(
            run_id = %ctx.run_id,
            stage = ctx.stage,
            recipients = request.recipients.len(),
            "Email sent"
        );

        Ok(json!({
            "recipients": request.recipients,
            "subject": request.subject,
            "sentAt": super::sent_at(),
        }))
    }
}
