//! JSON messages exchanged with the subscriber.
//!
//! The first inbound message is a [`SubscribeMessage`]. Every later inbound
//! message is ignored. Outbound messages are [`ServerMessage`]s: one
//! [`LogMessage`] per log line, or a single [`ErrorMessage`] right before the
//! connection is closed when the session is rejected.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{RequestError, SessionError};
use crate::source::{
    LabelSelector, LogEvent, SelectionRequest, StreamOptions, Target, DEFAULT_SINCE_SECONDS,
    DEFAULT_TAIL_LINES,
};

/// Raw subscription request, as sent by the subscriber
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscribeMessage {
    pub namespace: String,
    #[serde(default, alias = "pod", skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(default, alias = "labelSelector", skip_serializing_if = "Option::is_none")]
    pub selector: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(default)]
    pub timestamps: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tail: Option<i64>,
}

impl TryFrom<SubscribeMessage> for SelectionRequest {
    type Error = RequestError;

    fn try_from(message: SubscribeMessage) -> Result<Self, Self::Error> {
        if message.namespace.trim().is_empty() {
            return Err(RequestError::Invalid("namespace must not be empty".to_string()));
        }

        let since_seconds = non_negative("since", message.since)?.unwrap_or(DEFAULT_SINCE_SECONDS);
        let tail_lines = non_negative("tail", message.tail)?.unwrap_or(DEFAULT_TAIL_LINES);

        // An explicit instance wins over a selector
        let target = match message.instance.filter(|name| !name.is_empty()) {
            Some(name) => Target::Instance(name),
            None => Target::Selector(LabelSelector::new(message.selector.unwrap_or_default())),
        };

        Ok(SelectionRequest {
            namespace: message.namespace,
            target,
            sub_component: message.container.filter(|name| !name.is_empty()),
            options: StreamOptions {
                timestamps: message.timestamps,
                since_seconds: Some(since_seconds),
                tail_lines: Some(tail_lines),
                follow: true,
            },
        })
    }
}

fn non_negative(field: &str, value: Option<i64>) -> Result<Option<i64>, RequestError> {
    match value {
        Some(v) if v < 0 => Err(RequestError::Invalid(format!(
            "{} must be zero or positive, got {}",
            field, v
        ))),
        other => Ok(other),
    }
}

impl SelectionRequest {
    /// Parse a subscription request from its JSON text, applying defaults
    pub fn parse(text: &str) -> Result<Self, RequestError> {
        let message: SubscribeMessage = serde_json::from_str(text)?;
        message.try_into()
    }
}

/// One log line as delivered to the subscriber
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    pub instance: String,
    #[serde(rename = "subComponent")]
    pub sub_component: String,
    pub log: String,
}

impl From<&LogEvent> for LogMessage {
    fn from(event: &LogEvent) -> Self {
        Self {
            instance: event.source.instance.clone(),
            sub_component: event.source.sub_component.clone(),
            log: event.text(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorMessage {
    pub fn new(message: String, error_type: String, code: Option<String>) -> Self {
        Self {
            error: ErrorDetail {
                message,
                r#type: error_type,
                code,
            },
        }
    }
}

impl From<&SessionError> for ErrorMessage {
    fn from(error: &SessionError) -> Self {
        Self::new(error.to_string(), error.kind().to_string(), None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Log(LogMessage),
    Error(ErrorMessage),
}

impl From<&LogEvent> for ServerMessage {
    fn from(event: &LogEvent) -> Self {
        ServerMessage::Log(event.into())
    }
}
