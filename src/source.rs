//! The source contract consumed by the [`Registry`](crate::registry::Registry).
//!
//! A [`Source`] is a configured producer for one external origin. Its
//! lifecycle is:
//!
//! 1. Built from its type tag and configuration by [`build_source`] (or
//!    [`new_source`] for defaults).
//! 2. [`initialize`](Source::initialize) is called exactly once, by
//!    `Registry::add`. An error prevents registration.
//! 3. [`stream`](Source::stream) is called zero or more times. Each call
//!    emits what the origin currently has through a [`StreamSink`] and
//!    returns, or returns early once the sink is cancelled.
//!
//! Sources are stateless between `stream` calls apart from the client handle
//! created in `initialize`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::UnknownSourceType;
use crate::models::Activity;
use crate::source_type::SourceType;
use crate::sources::{
    ChangeDetectionSource, GithubIssuesSource, GithubReleasesSource, HackerNewsSource,
    MastodonTagSource, RssFeedSource,
};

/// A polymorphic producer of [`Activity`] values.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use pulse::models::Activity;
/// use pulse::source::{Source, StreamSink};
/// use pulse::source_type::SourceType;
///
/// #[derive(serde::Serialize)]
/// struct Silent;
///
/// #[async_trait]
/// impl Source for Silent {
///     fn uid(&self) -> String { "rss-feed/silent".to_string() }
///     fn name(&self) -> String { "Silent".to_string() }
///     fn url(&self) -> String { String::new() }
///     fn source_type(&self) -> SourceType { SourceType::RssFeed }
///     async fn initialize(&mut self) -> anyhow::Result<()> { Ok(()) }
///     async fn stream(&self, _sink: StreamSink) {}
///     fn config(&self) -> serde_json::Result<serde_json::Value> {
///         serde_json::to_value(self)
///     }
/// }
/// ```
#[async_trait]
pub trait Source: Send + Sync {
    /// Natural key. Stable for a given logical configuration.
    fn uid(&self) -> String;

    /// Presentation-only display name.
    fn name(&self) -> String;

    /// Presentation-only web URL of the origin.
    fn url(&self) -> String;

    fn source_type(&self) -> SourceType;

    /// Apply defaults, validate required fields, build any client handle.
    async fn initialize(&mut self) -> Result<()>;

    /// Emit everything the origin currently has, then return.
    ///
    /// Must return promptly once `sink` is cancelled; every send through the
    /// sink already observes cancellation.
    async fn stream(&self, sink: StreamSink);

    /// The source's configuration in generic structured form, as persisted
    /// and later passed back to [`build_source`].
    fn config(&self) -> serde_json::Result<serde_json::Value>;
}

/// The sending half of the ingestion queues, bound to one source's
/// cancellation token.
///
/// Sends wait for queue capacity, which is the pipeline's backpressure, but
/// give up as soon as the token is cancelled.
#[derive(Clone)]
pub struct StreamSink {
    activities: mpsc::Sender<Activity>,
    errors: mpsc::Sender<anyhow::Error>,
    cancel: CancellationToken,
}

impl StreamSink {
    pub fn new(
        activities: mpsc::Sender<Activity>,
        errors: mpsc::Sender<anyhow::Error>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            activities,
            errors,
            cancel,
        }
    }

    /// Queue an activity. Returns `false` if the source was cancelled or the
    /// pipeline is gone; the caller should stop streaming.
    pub async fn activity(&self, activity: Activity) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.activities.send(activity) => sent.is_ok(),
        }
    }

    /// Queue an error. Same return convention as [`StreamSink::activity`].
    pub async fn error(&self, error: anyhow::Error) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.errors.send(error) => sent.is_ok(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the source is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// A source with default configuration for a type tag.
pub fn new_source(tag: &str) -> Result<Box<dyn Source>, UnknownSourceType> {
    let source_type: SourceType = tag.parse()?;
    Ok(default_source(source_type))
}

fn default_source(source_type: SourceType) -> Box<dyn Source> {
    match source_type {
        SourceType::RssFeed => Box::new(RssFeedSource::default()),
        SourceType::GithubReleases => Box::new(GithubReleasesSource::default()),
        SourceType::GithubIssues => Box::new(GithubIssuesSource::default()),
        SourceType::HackerNews => Box::new(HackerNewsSource::default()),
        SourceType::MastodonTag => Box::new(MastodonTagSource::default()),
        SourceType::ChangeDetection => Box::new(ChangeDetectionSource::default()),
    }
}

/// Rebuild a source from its type tag and stored configuration.
///
/// The result is not yet initialized.
pub fn build_source(tag: &str, config: serde_json::Value) -> Result<Box<dyn Source>> {
    let source_type: SourceType = tag.parse()?;

    let source: Box<dyn Source> = match source_type {
        SourceType::RssFeed => Box::new(from_config::<RssFeedSource>(source_type, config)?),
        SourceType::GithubReleases => {
            Box::new(from_config::<GithubReleasesSource>(source_type, config)?)
        }
        SourceType::GithubIssues => {
            Box::new(from_config::<GithubIssuesSource>(source_type, config)?)
        }
        SourceType::HackerNews => Box::new(from_config::<HackerNewsSource>(source_type, config)?),
        SourceType::MastodonTag => {
            Box::new(from_config::<MastodonTagSource>(source_type, config)?)
        }
        SourceType::ChangeDetection => {
            Box::new(from_config::<ChangeDetectionSource>(source_type, config)?)
        }
    };

    Ok(source)
}

fn from_config<T: serde::de::DeserializeOwned>(
    source_type: SourceType,
    config: serde_json::Value,
) -> Result<T> {
    serde_json::from_value(config)
        .with_context(|| format!("Invalid configuration for '{}' source", source_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivityMeta, ChangeNotice};
    use chrono::Utc;
    use std::time::Duration;

    fn notice(uid: &str) -> Activity {
        Activity::ChangeNotice(ChangeNotice {
            meta: ActivityMeta {
                uid: uid.to_string(),
                source_uid: "change-detection/test".to_string(),
                source_type: SourceType::ChangeDetection,
                title: "Page changed".to_string(),
                body: String::new(),
                url: "https://example.com".to_string(),
                image_url: None,
                created_at: Utc::now(),
            },
            diff_url: None,
            previous_hash: None,
        })
    }

    #[test]
    fn test_new_source_for_every_tag() {
        for t in SourceType::ALL {
            let source = new_source(t.as_str()).unwrap();
            assert_eq!(source.source_type(), t);
        }
    }

    #[test]
    fn test_new_source_rejects_unknown_tag() {
        let err = new_source("friendster").err().unwrap();
        assert_eq!(err, UnknownSourceType("friendster".to_string()));
    }

    #[test]
    fn test_build_source_rebuilds_from_its_own_config() {
        let original = build_source(
            "github-releases",
            serde_json::json!({ "repositories": ["rust-lang/rust"] }),
        )
        .unwrap();

        let rebuilt = build_source("github-releases", original.config().unwrap()).unwrap();
        assert_eq!(rebuilt.uid(), original.uid());
        assert_eq!(rebuilt.name(), original.name());
    }

    #[test]
    fn test_build_source_reports_bad_config() {
        let err = build_source("rss-feed", serde_json::json!({ "url": 42 }))
            .err()
            .unwrap();
        assert!(format!("{:#}", err).contains("rss-feed"));
    }

    #[tokio::test]
    async fn test_sink_delivers_while_live() {
        let (tx, mut rx) = mpsc::channel(1);
        let (etx, mut erx) = mpsc::channel(1);
        let sink = StreamSink::new(tx, etx, CancellationToken::new());

        assert!(sink.activity(notice("a")).await);
        assert!(sink.error(anyhow::anyhow!("boom")).await);
        assert_eq!(rx.recv().await.unwrap().uid(), "a");
        assert_eq!(erx.recv().await.unwrap().to_string(), "boom");
    }

    #[tokio::test]
    async fn test_blocked_send_returns_on_cancel() {
        let (tx, _rx) = mpsc::channel(1);
        let (etx, _erx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let sink = StreamSink::new(tx, etx, cancel.clone());

        // Fill the queue so the next send blocks.
        assert!(sink.activity(notice("a")).await);

        let blocked = tokio::spawn({
            let sink = sink.clone();
            async move { sink.activity(notice("b")).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let sent = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .unwrap()
            .unwrap();
        assert!(!sent);
        assert!(sink.is_cancelled());
    }
}
