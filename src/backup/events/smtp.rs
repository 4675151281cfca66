use crate::backup::events::{BackupEvent, EventKind, EventSink};
use crate::backup::function_path;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use bon::Builder;
use function_name::named;
use getset::Getters;
use itertools::Itertools;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Emails selected backup events over SMTP.
///
/// Credentials are kept in a [`RedactedString`] so they never show up in
/// logs or re-serialized configuration.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct SmtpEventSink {
    #[builder(into)]
    host: String,
    #[builder(into)]
    smtp_mode: SmtpMode,
    #[builder(into)]
    from: Mailbox,
    #[validate(length(min = 1))]
    #[builder(into)]
    to: Vec<Mailbox>,
    #[builder(into)]
    username: String,
    #[builder(into)]
    password: RedactedString,
    #[serde(default = "default_events")]
    #[builder(default = default_events())]
    events: Vec<EventKind>,
}

fn default_events() -> Vec<EventKind> {
    vec![EventKind::JobFailed, EventKind::DestinationWriteSucceeded]
}

/// SMTP connection security modes
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SmtpMode {
    Unsecured,
    Ssl,
    StartTls,
}

impl SmtpEventSink {
    pub fn wants(&self, kind: EventKind) -> bool {
        self.events.contains(&kind)
    }

    #[named]
    fn compose(&self, subject: String, body: String) -> Result<Message> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(subject)
            .header(ContentType::TEXT_PLAIN);
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }
        builder
            .body(body)
            .map_err(Error::from)
            .add_msg(format!("cannot compose email for {:?}", self.to))
            .add_fn_name(function_path!())
    }

    #[named]
    fn transport(&self) -> Result<SmtpTransport> {
        let host = self.host.as_str();
        let builder = match self.smtp_mode {
            SmtpMode::Unsecured => SmtpTransport::builder_dangerous(host),
            SmtpMode::Ssl => SmtpTransport::relay(host)
                .map_err(Error::from)
                .add_msg(format!("invalid ssl relay {host:?}"))
                .add_fn_name(function_path!())?,
            SmtpMode::StartTls => SmtpTransport::starttls_relay(host)
                .map_err(Error::from)
                .add_msg(format!("invalid starttls relay {host:?}"))
                .add_fn_name(function_path!())?,
        };
        let credentials = Credentials::new(self.username.clone(), self.password.expose().to_owned());
        Ok(builder.credentials(credentials).build())
    }

    #[named]
    fn deliver(&self, subject: String, body: String) -> Result<()> {
        tracing::info!(host = %self.host, subject = %subject, "delivering email notification");
        let email = self.compose(subject, body)?;
        let response = self
            .transport()?
            .send(&email)
            .map_err(Error::from)
            .add_fn_name(function_path!())?;
        if response.is_positive() {
            return Ok(());
        }
        Err(Error::lots_of_error(
            response
                .message()
                .map(|line| Error::smtp_send_error(line.to_owned()))
                .collect_vec(),
        ))
    }
}

impl EventSink for SmtpEventSink {
    fn handle(&self, event: &BackupEvent) -> Result<()> {
        if !self.wants(event.kind()) {
            return Ok(());
        }
        self.deliver(event.topic(), event.to_string())
    }
}
