//! Video references: id extraction and the extraction collaborator

use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

use super::ContentError;

/// What the transcript lookup produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptOutcome {
    Available(String),
    /// The video exists but carries no captions
    NoCaptions,
    /// The lookup was blocked (network, region, bot detection)
    Restricted(String),
}

/// Everything a video source could obtain for one reference
#[derive(Debug, Clone)]
pub struct VideoExtraction {
    pub transcript: TranscriptOutcome,
    /// Downloaded audio track, used when the transcript is unavailable
    pub audio: Option<Vec<u8>>,
    pub media_type: Option<String>,
    pub title: String,
    pub description: String,
}

impl VideoExtraction {
    /// Title shown on the resulting quiz
    pub fn display_title(&self) -> String {
        let title = self.title.trim();
        if title.is_empty() {
            "YouTube Video".to_string()
        } else {
            title.to_string()
        }
    }
}

/// Transcript and audio extraction collaborator
#[async_trait]
pub trait VideoSource: Send + Sync {
    /// Fetch transcript and, where possible, audio for a video reference
    async fn fetch(&self, reference: &str) -> Result<VideoExtraction, ContentError>;
}

/// Extract the 11-character video id: `v=<id>` or any `/<id>` path segment
pub fn extract_video_id(reference: &str) -> Option<String> {
    static VIDEO_ID_RE: OnceLock<Regex> = OnceLock::new();

    let re = VIDEO_ID_RE.get_or_init(|| {
        Regex::new(r"(?:v=|/)([0-9A-Za-z_-]{11})(?:[?&#/]|$)")
            .expect("Invalid regex pattern")
    });

    re.captures(reference.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
