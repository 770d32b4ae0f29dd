//! Closed set of source type tags and the activity variants they produce.
//!
//! A source type tag (e.g. `"rss-feed"`) is the persisted discriminator for
//! both axes of dynamic dispatch:
//!
//! - **Sources**: [`build_source`](crate::source::build_source) maps a tag to
//!   a fresh adapter and deserializes its stored configuration into it.
//! - **Activities**: [`decode_activity`] maps a tag to the matching
//!   [`Activity`] variant and deserializes the raw payload into it.
//!
//! Both mappings are exhaustive `match`es over [`SourceType`]; unknown tags
//! are rejected at parse time with [`UnknownSourceType`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::UnknownSourceType;
use crate::models::Activity;

/// Every adapter this crate knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    RssFeed,
    GithubReleases,
    GithubIssues,
    HackerNews,
    MastodonTag,
    ChangeDetection,
}

/// The shape of activity a source type emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    FeedItem,
    Release,
    Issue,
    ForumPost,
    StatusUpdate,
    ChangeNotice,
}

impl SourceType {
    pub const ALL: [SourceType; 6] = [
        SourceType::RssFeed,
        SourceType::GithubReleases,
        SourceType::GithubIssues,
        SourceType::HackerNews,
        SourceType::MastodonTag,
        SourceType::ChangeDetection,
    ];

    /// The persisted tag, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::RssFeed => "rss-feed",
            SourceType::GithubReleases => "github-releases",
            SourceType::GithubIssues => "github-issues",
            SourceType::HackerNews => "hacker-news",
            SourceType::MastodonTag => "mastodon-tag",
            SourceType::ChangeDetection => "change-detection",
        }
    }

    pub fn activity_kind(&self) -> ActivityKind {
        match self {
            SourceType::RssFeed => ActivityKind::FeedItem,
            SourceType::GithubReleases => ActivityKind::Release,
            SourceType::GithubIssues => ActivityKind::Issue,
            SourceType::HackerNews => ActivityKind::ForumPost,
            SourceType::MastodonTag => ActivityKind::StatusUpdate,
            SourceType::ChangeDetection => ActivityKind::ChangeNotice,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = UnknownSourceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownSourceType(s.to_string()))
    }
}

/// Rebuild a concrete [`Activity`] from its stored raw payload.
///
/// The payload is the variant struct serialized by [`Activity::to_raw_json`];
/// the source type tag selects which variant to deserialize into.
pub fn decode_activity(source_type: SourceType, raw_json: &str) -> serde_json::Result<Activity> {
    let activity = match source_type.activity_kind() {
        ActivityKind::FeedItem => Activity::FeedItem(serde_json::from_str(raw_json)?),
        ActivityKind::Release => Activity::Release(serde_json::from_str(raw_json)?),
        ActivityKind::Issue => Activity::Issue(serde_json::from_str(raw_json)?),
        ActivityKind::ForumPost => Activity::ForumPost(serde_json::from_str(raw_json)?),
        ActivityKind::StatusUpdate => Activity::StatusUpdate(serde_json::from_str(raw_json)?),
        ActivityKind::ChangeNotice => Activity::ChangeNotice(serde_json::from_str(raw_json)?),
    };
    Ok(activity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_parse_back_to_the_same_type() {
        for t in SourceType::ALL {
            assert_eq!(t.as_str().parse::<SourceType>().unwrap(), t);
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = "myspace".parse::<SourceType>().unwrap_err();
        assert_eq!(err, UnknownSourceType("myspace".to_string()));
    }
}
