//! NATS client implementation with JetStream support.

use anyhow::Result;
use async_nats::jetstream::consumer::PullConsumer;
use async_nats::jetstream::{self, stream::Stream};
use std::time::Duration;
use tracing::info;

/// Default retention period for event streams (1 hour).
///
/// Events are live notifications: anything a gateway replica has not
/// consumed within an hour is stale and may be aged out.
pub const DEFAULT_RETENTION_SECS: u64 = 3_600;

/// Default max messages per stream.
pub const DEFAULT_MAX_MESSAGES: i64 = 1_000_000;

/// Default max bytes per stream (256MB).
pub const DEFAULT_MAX_BYTES: i64 = 268_435_456;

/// The event categories this system publishes and consumes.
/// Each category gets its own stream and queue consumer.
pub const EVENT_CATEGORIES: [&str; 4] = ["task", "comment", "user", "notification"];

/// Configuration for creating a stream.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Stream name.
    pub name: String,
    /// Subject patterns to capture.
    pub subjects: Vec<String>,
    /// Retention period in seconds.
    pub max_age_secs: u64,
    /// Maximum number of messages.
    pub max_messages: i64,
    /// Maximum bytes.
    pub max_bytes: i64,
}

impl StreamConfig {
    /// Create a stream config for a domain event category.
    ///
    /// # Arguments
    /// * `category` - Event category (e.g., "task", "comment")
    ///
    /// Creates stream named `{CATEGORY}_EVENTS` capturing `{category}.>`,
    /// which covers both organization-routed subjects (`task.<org_id>`)
    /// and user-routed subjects (`user.<user_id>`).
    pub fn for_category(category: &str) -> Self {
        let name = format!("{}_EVENTS", category.to_uppercase());
        let subject = format!("{}.>", category);

        Self {
            name,
            subjects: vec![subject],
            max_age_secs: DEFAULT_RETENTION_SECS,
            max_messages: DEFAULT_MAX_MESSAGES,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    /// Set retention period in seconds.
    pub fn with_retention(mut self, secs: u64) -> Self {
        self.max_age_secs = secs;
        self
    }

    /// Add additional subject patterns.
    pub fn with_subjects(mut self, subjects: Vec<String>) -> Self {
        self.subjects = subjects;
        self
    }
}

/// Wrapper around the NATS client with JetStream context.
#[derive(Clone)]
pub struct NatsClient {
    jetstream: jetstream::Context,
}

impl NatsClient {
    /// Connect to a NATS server and create a JetStream context.
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", url);
        let client = async_nats::connect(url).await?;
        let jetstream = jetstream::new(client);

        Ok(Self { jetstream })
    }

    /// Create or get a stream with the given configuration.
    pub async fn ensure_stream_with_config(&self, config: &StreamConfig) -> Result<Stream> {
        info!(
            "Ensuring stream '{}' exists (subjects: {:?}, retention: {}s)",
            config.name, config.subjects, config.max_age_secs
        );

        let stream = self
            .jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: config.name.clone(),
                subjects: config.subjects.clone(),
                retention: jetstream::stream::RetentionPolicy::Limits,
                max_messages: config.max_messages,
                max_bytes: config.max_bytes,
                max_age: Duration::from_secs(config.max_age_secs),
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            })
            .await?;

        info!("Stream '{}' ready", config.name);
        Ok(stream)
    }

    /// Convenience method to create the event stream for a category.
    /// Stream name: `{CATEGORY}_EVENTS`, subjects: `{category}.>`
    pub async fn ensure_event_stream(&self, category: &str) -> Result<Stream> {
        let config = StreamConfig::for_category(category);
        self.ensure_stream_with_config(&config).await
    }

    /// Create an ephemeral pull consumer on an existing stream.
    ///
    /// No `durable_name` is set: the consumer identity is anonymous and
    /// dies with the subscription, so a restarted gateway starts fresh
    /// rather than resuming a stale cursor.
    pub async fn pull_consumer(&self, stream_name: &str) -> Result<PullConsumer> {
        let stream = self
            .jetstream
            .get_stream(stream_name)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get stream {}: {}", stream_name, e))?;

        let consumer = stream
            .create_consumer(jetstream::consumer::pull::Config {
                durable_name: None,
                ..Default::default()
            })
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create consumer on {}: {}", stream_name, e))?;

        Ok(consumer)
    }

    /// Publish a message to JetStream (with acknowledgment).
    pub async fn publish(&self, subject: impl Into<String>, payload: bytes::Bytes) -> Result<()> {
        self.jetstream
            .publish(subject.into(), payload)
            .await?
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_stream_naming() {
        let config = StreamConfig::for_category("task");
        assert_eq!(config.name, "TASK_EVENTS");
        assert_eq!(config.subjects, vec!["task.>".to_string()]);
    }

    #[test]
    fn builder_overrides() {
        let config = StreamConfig::for_category("comment")
            .with_retention(60)
            .with_subjects(vec!["comment.>".to_string(), "mention.>".to_string()]);
        assert_eq!(config.max_age_secs, 60);
        assert_eq!(config.subjects.len(), 2);
    }
}
