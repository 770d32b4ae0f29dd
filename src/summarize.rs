//! Summarizer abstraction and implementations.
//!
//! Every activity is summarized exactly once, by an ingestion worker, before
//! it is stored. Two implementations:
//! - **[`ExcerptSummarizer`]**: offline default; derives both summaries from
//!   the cleaned activity text.
//! - **[`OpenAiSummarizer`]**: asks a chat model for a JSON object with
//!   `short_summary` and `full_summary`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use crate::config::SummarizerConfig;
use crate::embedding::OpenAiClient;
use crate::models::{Activity, ActivitySummary};

const SHORT_SUMMARY_MAX: usize = 200;
const FULL_SUMMARY_MAX: usize = 1000;

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, activity: &Activity) -> Result<ActivitySummary>;
}

/// Instantiate the summarizer named by `summarizer.provider`.
pub fn create_summarizer(config: &SummarizerConfig) -> Result<Arc<dyn Summarizer>> {
    match config.provider.as_str() {
        "excerpt" => Ok(Arc::new(ExcerptSummarizer)),
        "openai" => Ok(Arc::new(OpenAiSummarizer::new(config)?)),
        other => bail!("Unknown summarizer provider: {}", other),
    }
}

// ============ Excerpt Summarizer ============

pub struct ExcerptSummarizer;

#[async_trait]
impl Summarizer for ExcerptSummarizer {
    async fn summarize(&self, activity: &Activity) -> Result<ActivitySummary> {
        Ok(excerpt(activity))
    }
}

fn excerpt(activity: &Activity) -> ActivitySummary {
    let body = clean_text(activity.body());
    let text = if body.is_empty() {
        clean_text(activity.title())
    } else {
        body
    };

    ActivitySummary {
        short_summary: truncate_chars(first_sentence(&text), SHORT_SUMMARY_MAX),
        full_summary: truncate_chars(&text, FULL_SUMMARY_MAX),
    }
}

/// Strip HTML tags and collapse whitespace.
pub(crate) fn clean_text(input: &str) -> String {
    let mut stripped = String::with_capacity(input.len());
    let mut in_tag = false;
    for c in input.chars() {
        match c {
            '<' => {
                in_tag = true;
                stripped.push(' ');
            }
            '>' if in_tag => in_tag = false,
            _ if !in_tag => stripped.push(c),
            _ => {}
        }
    }

    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&#x2F;", "/")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&");

    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_sentence(text: &str) -> &str {
    for (i, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            let end = i + c.len_utf8();
            let rest = &text[end..];
            if rest.is_empty() || rest.starts_with(' ') {
                return &text[..end];
            }
        }
    }
    text
}

/// Cap at `max` characters, ending with an ellipsis when cut.
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

// ============ OpenAI Summarizer ============

const SYSTEM_PROMPT: &str = "You summarize activity from feeds, code repositories and social \
timelines. Respond with a JSON object with two string fields: \"short_summary\" (one sentence, \
at most 200 characters) and \"full_summary\" (one paragraph).";

/// Summarizer backed by `POST /v1/chat/completions`.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiSummarizer {
    model: String,
    client: OpenAiClient,
}

impl OpenAiSummarizer {
    pub fn new(config: &SummarizerConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            client: OpenAiClient::from_env(config.timeout_secs, config.max_retries)?,
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, activity: &Activity) -> Result<ActivitySummary> {
        let prompt = format!(
            "Title: {}\nURL: {}\n\n{}",
            activity.title(),
            activity.url(),
            truncate_chars(&clean_text(activity.body()), 8000)
        );

        let request = serde_json::json!({
            "model": self.model,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
        });

        let response: ChatResponse = self.client.post("chat/completions", &request).await?;
        parse_chat_response(response)
    }
}

fn parse_chat_response(response: ChatResponse) -> Result<ActivitySummary> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| anyhow::anyhow!("chat completion has no message content"))?;

    let summary: ActivitySummary =
        serde_json::from_str(&content).with_context(|| "Summary is not the expected JSON object")?;

    if summary.short_summary.trim().is_empty() {
        bail!("Summary has an empty short_summary");
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivityMeta, FeedItem};
    use crate::source_type::SourceType;
    use chrono::Utc;

    fn feed_item(title: &str, body: &str) -> Activity {
        Activity::FeedItem(FeedItem {
            meta: ActivityMeta {
                uid: "item-1".to_string(),
                source_uid: "rss-feed/https://example.com/feed.xml".to_string(),
                source_type: SourceType::RssFeed,
                title: title.to_string(),
                body: body.to_string(),
                url: "https://example.com/1".to_string(),
                image_url: None,
                created_at: Utc::now(),
            },
            feed_url: "https://example.com/feed.xml".to_string(),
            author: None,
            categories: Vec::new(),
        })
    }

    #[test]
    fn test_clean_text_strips_tags_and_entities() {
        let cleaned = clean_text("<p>Hello&nbsp;<b>world</b></p>\n\n<p>Tom &amp; Jerry</p>");
        assert_eq!(cleaned, "Hello world Tom & Jerry");
    }

    #[tokio::test]
    async fn test_excerpt_uses_first_sentence() {
        let summary = ExcerptSummarizer
            .summarize(&feed_item(
                "Release notes",
                "<p>Version 2.0 is out. It ships a new parser. Upgrade soon!</p>",
            ))
            .await
            .unwrap();
        assert_eq!(summary.short_summary, "Version 2.0 is out.");
        assert_eq!(
            summary.full_summary,
            "Version 2.0 is out. It ships a new parser. Upgrade soon!"
        );
    }

    #[tokio::test]
    async fn test_excerpt_falls_back_to_title() {
        let summary = ExcerptSummarizer
            .summarize(&feed_item("Show HN: a tiny database", ""))
            .await
            .unwrap();
        assert_eq!(summary.short_summary, "Show HN: a tiny database");
    }

    #[test]
    fn test_truncate_is_char_safe() {
        let text = "é".repeat(300);
        let cut = truncate_chars(&text, SHORT_SUMMARY_MAX);
        assert_eq!(cut.chars().count(), SHORT_SUMMARY_MAX);
        assert!(cut.ends_with('…'));
    }

    #[test]
    fn test_parse_chat_response() {
        let json = serde_json::json!({
            "choices": [{
                "message": {
                    "content": "{\"short_summary\":\"A\",\"full_summary\":\"A longer text\"}"
                }
            }]
        });
        let summary = parse_chat_response(serde_json::from_value(json).unwrap()).unwrap();
        assert_eq!(summary.short_summary, "A");
        assert_eq!(summary.full_summary, "A longer text");
    }

    #[test]
    fn test_parse_chat_response_rejects_prose() {
        let json = serde_json::json!({
            "choices": [{ "message": { "content": "Here is a summary" } }]
        });
        assert!(parse_chat_response(serde_json::from_value(json).unwrap()).is_err());
    }

    #[test]
    fn test_parse_chat_response_requires_a_choice() {
        let response = serde_json::from_value(serde_json::json!({ "choices": [] })).unwrap();
        assert!(parse_chat_response(response).is_err());
    }
}
