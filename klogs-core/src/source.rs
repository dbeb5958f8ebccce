use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Default look-back window applied when a subscriber omits `since`
pub const DEFAULT_SINCE_SECONDS: i64 = 120;

/// Default number of historical lines applied when a subscriber omits `tail`
pub const DEFAULT_TAIL_LINES: i64 = 100;

/// Identifies one tailable stream: a single container of a single pod
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub namespace: String,
    pub instance: String,
    pub sub_component: String,
}

impl SourceDescriptor {
    pub fn new(
        namespace: impl Into<String>,
        instance: impl Into<String>,
        sub_component: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            instance: instance.into(),
            sub_component: sub_component.into(),
        }
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.instance, self.sub_component)
    }
}

/// Parameters applied to every log stream opened by a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOptions {
    pub timestamps: bool,
    /// Look-back window in seconds (None = provider default, usually unbounded)
    pub since_seconds: Option<i64>,
    /// Historical lines to replay before following (None = all)
    pub tail_lines: Option<i64>,
    pub follow: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            timestamps: false,
            since_seconds: Some(DEFAULT_SINCE_SECONDS),
            tail_lines: Some(DEFAULT_TAIL_LINES),
            follow: true,
        }
    }
}

/// Equality-based label selector. An empty selector matches every instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector(BTreeMap<String, String>);

impl LabelSelector {
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        Self(labels)
    }

    pub fn everything() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    /// True when every selector label is present with the same value
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LabelSelector {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Renders as `key=value,key=value`, the form accepted by the Kubernetes API
impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

/// How a request picks its instances
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Instance(String),
    Selector(LabelSelector),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Instance(name) => write!(f, "instance {}", name),
            Target::Selector(selector) if selector.is_empty() => f.write_str("all instances"),
            Target::Selector(selector) => write!(f, "selector {}", selector),
        }
    }
}

/// A parsed subscription request with defaults already applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionRequest {
    pub namespace: String,
    pub target: Target,
    /// Restrict the session to one container name
    pub sub_component: Option<String>,
    pub options: StreamOptions,
}

impl SelectionRequest {
    pub fn instance(namespace: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            target: Target::Instance(instance.into()),
            sub_component: None,
            options: StreamOptions::default(),
        }
    }

    pub fn selector(namespace: impl Into<String>, selector: LabelSelector) -> Self {
        Self {
            namespace: namespace.into(),
            target: Target::Selector(selector),
            sub_component: None,
            options: StreamOptions::default(),
        }
    }

    pub fn with_sub_component(mut self, sub_component: impl Into<String>) -> Self {
        self.sub_component = Some(sub_component.into());
        self
    }

    pub fn with_options(mut self, options: StreamOptions) -> Self {
        self.options = options;
        self
    }
}

/// One line read from one source. The trailing newline is stripped.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub source: Arc<SourceDescriptor>,
    pub payload: Bytes,
    /// Position of this line within its source, starting at 0
    pub seq: u64,
    pub emitted_at: DateTime<Utc>,
}

impl LogEvent {
    pub fn new(source: Arc<SourceDescriptor>, payload: Bytes, seq: u64) -> Self {
        Self {
            source,
            payload,
            seq,
            emitted_at: Utc::now(),
        }
    }

    /// Payload decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}
