//! Content normalization
//!
//! Turns the five kinds of user-supplied study material into a uniform
//! [`ContentDescriptor`]: text to be chunked, a bare title, or a media
//! payload for multimodal generation.
//!
//! ```text
//!   note ──────────────┐
//!   title ─────────────┤
//!   file ──▶ FileParser ┼──▶ NormalizedContent ──▶ GenerationRequest
//!   audio ─────────────┤
//!   video ─▶ VideoSource┘   (transcript first, audio fallback)
//! ```
//!
//! File parsing and video extraction are external collaborators behind the
//! [`FileParser`] and [`VideoSource`] traits. Their failures surface as
//! distinct [`ContentError`] variants so callers can show a precise message.

pub mod video;

use std::sync::Arc;
use thiserror::Error;

use crate::error::{ErrorCategory, QuizErrorTrait};
use crate::models::{Difficulty, GenerationRequest, MediaPayload, SourceKind, UserId};

pub use video::{extract_video_id, TranscriptOutcome, VideoExtraction, VideoSource};

/// Maximum accepted upload size
pub const MAX_FILE_BYTES: usize = 20 * 1024 * 1024;

/// Default media type for voice notes without one
pub const DEFAULT_AUDIO_TYPE: &str = "audio/ogg";

/// Errors raised while normalizing content
#[derive(Error, Debug)]
pub enum ContentError {
    /// Text note was empty after trimming
    #[error("Note is empty")]
    EmptyNote,

    /// File parsed but yielded no text
    #[error("No extractable text in file")]
    NoExtractableText,

    /// File exceeds the accepted size
    #[error("File is {size} bytes, limit is {limit}")]
    FileTooLarge { size: usize, limit: usize },

    /// Media payload carried no bytes
    #[error("Media payload is empty")]
    EmptyMedia,

    /// Video reference could not be understood
    #[error("Invalid video reference: {0}")]
    InvalidReference(String),

    /// Video has no captions and no audio could be obtained
    #[error("Video has no captions available")]
    NoCaptions,

    /// Transcript fetch blocked by network or region restrictions
    #[error("Video unavailable from this network/region: {0}")]
    Restricted(String),

    /// Neither transcript nor audio could be obtained
    #[error("No transcript and no audio obtainable")]
    NoTranscriptOrAudio,
}

impl QuizErrorTrait for ContentError {
    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Restricted(_))
    }

    fn user_message(&self) -> String {
        match self {
            Self::EmptyNote => "Your note is empty. Send some text to build questions from.".into(),
            Self::NoExtractableText => "Failed to parse file content.".into(),
            Self::FileTooLarge { .. } => {
                "File exceeds 20 MB. Please split it and send again.".into()
            }
            Self::EmptyMedia => "The audio could not be downloaded.".into(),
            Self::InvalidReference(_) => "Invalid video link.".into(),
            Self::NoCaptions => {
                "Could not fetch transcript. Is the video valid/captioned?".into()
            }
            Self::Restricted(_) => {
                "The video could not be reached from our server (network or region restriction)."
                    .into()
            }
            Self::NoTranscriptOrAudio => {
                "Neither a transcript nor the audio of this video could be obtained.".into()
            }
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Validation
    }
}

/// An uploaded document as received from the user
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub bytes: Vec<u8>,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
}

/// Text extracted from a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFile {
    pub text: String,
    pub filename: String,
}

/// Document text extraction collaborator
pub trait FileParser: Send + Sync {
    /// Extract text, or fail with [`ContentError::NoExtractableText`]
    fn parse(&self, file: &UploadedFile) -> Result<ParsedFile, ContentError>;
}

/// Treats any upload as UTF-8 text; binary formats need a dedicated parser
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextParser;

impl FileParser for PlainTextParser {
    fn parse(&self, file: &UploadedFile) -> Result<ParsedFile, ContentError> {
        if file.bytes.len() > MAX_FILE_BYTES {
            return Err(ContentError::FileTooLarge {
                size: file.bytes.len(),
                limit: MAX_FILE_BYTES,
            });
        }

        let text = String::from_utf8_lossy(&file.bytes).into_owned();
        if text.trim().is_empty() {
            return Err(ContentError::NoExtractableText);
        }

        Ok(ParsedFile {
            text,
            filename: file.filename.clone().unwrap_or_else(|| "file".to_string()),
        })
    }
}

/// Study material as supplied by the user
#[derive(Debug, Clone)]
pub enum SourceInput {
    Note(String),
    Title(String),
    File(UploadedFile),
    Audio {
        bytes: Vec<u8>,
        media_type: Option<String>,
    },
    Video {
        reference: String,
    },
}

/// Uniform descriptor handed to generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentDescriptor {
    /// Source text, chunked before generation
    Text(String),
    /// Bare title; the prompt may expand beyond it
    Title(String),
    /// Raw media sent alongside the prompt
    Media(MediaPayload),
}

impl ContentDescriptor {
    pub fn is_multimodal(&self) -> bool {
        matches!(self, Self::Media(_))
    }

    pub fn is_title_mode(&self) -> bool {
        matches!(self, Self::Title(_))
    }
}

/// Result of normalization
#[derive(Debug, Clone)]
pub struct NormalizedContent {
    pub kind: SourceKind,
    pub descriptor: ContentDescriptor,
    /// Display title for the resulting quiz
    pub title: Option<String>,
}

impl NormalizedContent {
    /// Build the generation request for this content
    pub fn into_request(
        self,
        requester: UserId,
        desired_count: u32,
        difficulty: Difficulty,
        allow_beyond_source: bool,
    ) -> GenerationRequest {
        let (text, title, media, allow_beyond_source) = match self.descriptor {
            ContentDescriptor::Text(text) => (Some(text), self.title, None, allow_beyond_source),
            ContentDescriptor::Title(title) => (None, Some(title), None, true),
            ContentDescriptor::Media(payload) => (None, self.title, Some(payload), true),
        };

        GenerationRequest {
            kind: self.kind,
            text,
            title,
            media,
            desired_count: desired_count.max(1),
            difficulty,
            allow_beyond_source,
            requester,
        }
    }
}

/// Converts [`SourceInput`] into [`NormalizedContent`]
#[derive(Clone)]
pub struct ContentNormalizer {
    file_parser: Arc<dyn FileParser>,
    video_source: Option<Arc<dyn VideoSource>>,
}

impl Default for ContentNormalizer {
    fn default() -> Self {
        Self::new(Arc::new(PlainTextParser))
    }
}

impl ContentNormalizer {
    pub fn new(file_parser: Arc<dyn FileParser>) -> Self {
        Self {
            file_parser,
            video_source: None,
        }
    }

    pub fn with_video_source(mut self, source: Arc<dyn VideoSource>) -> Self {
        self.video_source = Some(source);
        self
    }

    /// Normalize one input
    pub async fn normalize(&self, input: SourceInput) -> Result<NormalizedContent, ContentError> {
        match input {
            SourceInput::Note(text) => {
                if text.trim().is_empty() {
                    return Err(ContentError::EmptyNote);
                }
                Ok(NormalizedContent {
                    kind: SourceKind::Note,
                    descriptor: ContentDescriptor::Text(text),
                    title: None,
                })
            }
            SourceInput::Title(title) => {
                let title = title.trim().to_string();
                if title.is_empty() {
                    return Err(ContentError::EmptyNote);
                }
                Ok(NormalizedContent {
                    kind: SourceKind::Title,
                    descriptor: ContentDescriptor::Title(title.clone()),
                    title: Some(title),
                })
            }
            SourceInput::File(file) => {
                let parsed = self.file_parser.parse(&file)?;
                if parsed.text.trim().is_empty() {
                    return Err(ContentError::NoExtractableText);
                }
                tracing::debug!(
                    filename = %parsed.filename,
                    chars = parsed.text.chars().count(),
                    "File parsed"
                );
                Ok(NormalizedContent {
                    kind: SourceKind::File,
                    descriptor: ContentDescriptor::Text(parsed.text),
                    title: Some(parsed.filename),
                })
            }
            SourceInput::Audio { bytes, media_type } => {
                if bytes.is_empty() {
                    return Err(ContentError::EmptyMedia);
                }
                let media_type = media_type.unwrap_or_else(|| DEFAULT_AUDIO_TYPE.to_string());
                Ok(NormalizedContent {
                    kind: SourceKind::Media,
                    descriptor: ContentDescriptor::Media(MediaPayload::new(bytes, media_type)),
                    title: None,
                })
            }
            SourceInput::Video { reference } => self.normalize_video(&reference).await,
        }
    }

    async fn normalize_video(&self, reference: &str) -> Result<NormalizedContent, ContentError> {
        let source = self
            .video_source
            .as_ref()
            .ok_or(ContentError::NoTranscriptOrAudio)?;

        let extraction = source.fetch(reference).await?;
        let title = Some(extraction.display_title());

        let failure = match extraction.transcript {
            TranscriptOutcome::Available(text) if !text.trim().is_empty() => {
                return Ok(NormalizedContent {
                    kind: SourceKind::Note,
                    descriptor: ContentDescriptor::Text(text),
                    title,
                });
            }
            TranscriptOutcome::Available(_) | TranscriptOutcome::NoCaptions => {
                ContentError::NoCaptions
            }
            TranscriptOutcome::Restricted(reason) => ContentError::Restricted(reason),
        };

        match extraction.audio {
            Some(bytes) if !bytes.is_empty() => {
                tracing::info!(reason = %failure, "Transcript unavailable, using audio track");
                let media_type = extraction
                    .media_type
                    .unwrap_or_else(|| DEFAULT_AUDIO_TYPE.to_string());
                Ok(NormalizedContent {
                    kind: SourceKind::Media,
                    descriptor: ContentDescriptor::Media(MediaPayload::new(bytes, media_type)),
                    title,
                })
            }
            _ => Err(failure),
        }
    }
}
