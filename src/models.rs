// Core data structures for the quiz pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Telegram-style numeric user / chat identifier
pub type UserId = i64;

/// Kind of study material a request was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Note,
    Title,
    File,
    Media,
}

impl SourceKind {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Title => "title",
            Self::File => "file",
            Self::Media => "media",
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "note" => Ok(Self::Note),
            "title" => Ok(Self::Title),
            "file" => Ok(Self::File),
            "media" => Ok(Self::Media),
            other => Err(format!("unknown source kind '{other}'")),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Difficulty label passed through to the AI prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    /// Label as it appears in prompts
    pub fn label(&self) -> &'static str {
        match self {
            Self::Easy => "Easy",
            Self::Medium => "Medium",
            Self::Hard => "Hard",
        }
    }
}

impl std::str::FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            other => Err(format!("unknown difficulty '{other}'")),
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How generated items are rendered at the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderFormat {
    #[default]
    Text,
    Poll,
}

impl RenderFormat {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Poll => "poll",
        }
    }
}

impl std::str::FromStr for RenderFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "poll" | "quiz" => Ok(Self::Poll),
            other => Err(format!("unknown render format '{other}'")),
        }
    }
}

impl fmt::Display for RenderFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw media handed to the AI service instead of text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPayload {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

impl MediaPayload {
    pub fn new(bytes: impl Into<Vec<u8>>, media_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            media_type: media_type.into(),
        }
    }
}

/// One user action asking for a quiz; discarded after handoff
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub kind: SourceKind,
    /// Note text, file text, or transcript
    pub text: Option<String>,
    /// Bare title (title mode) or a display title for other kinds
    pub title: Option<String>,
    pub media: Option<MediaPayload>,
    pub desired_count: u32,
    pub difficulty: Difficulty,
    pub allow_beyond_source: bool,
    pub requester: UserId,
}

impl GenerationRequest {
    /// Request built from a typed note
    pub fn note(requester: UserId, text: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Note,
            text: Some(text.into()),
            title: None,
            media: None,
            desired_count: 5,
            difficulty: Difficulty::default(),
            allow_beyond_source: false,
            requester,
        }
    }

    /// Request built from a bare title
    pub fn title(requester: UserId, title: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Title,
            text: None,
            title: Some(title.into()),
            media: None,
            desired_count: 5,
            difficulty: Difficulty::default(),
            allow_beyond_source: true,
            requester,
        }
    }

    pub fn with_count(mut self, desired_count: u32) -> Self {
        self.desired_count = desired_count.max(1);
        self
    }

    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn with_allow_beyond(mut self, allow: bool) -> Self {
        self.allow_beyond_source = allow;
        self
    }

    /// Title of the quiz built from this request
    pub fn quiz_title(&self) -> String {
        if let Some(title) = self.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            return title.to_string();
        }
        match self.kind {
            SourceKind::Media => "Media Quiz".to_string(),
            _ => match self.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
                Some(text) => format!("{}...", crate::utils::truncate_chars(text, 30)),
                None => "Quiz".to_string(),
            },
        }
    }
}

/// Bounded slice of source text processed independently by generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChunk {
    pub chunk_index: usize,
    pub text: String,
    pub max_chars: usize,
}

/// One validated question/choices/answer/explanation unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedItem {
    pub question: String,
    pub choices: Vec<String>,
    pub answer_index: usize,
    #[serde(default)]
    pub explanation: String,
}

impl GeneratedItem {
    /// The correct choice text; validated items always have one
    pub fn correct_choice(&self) -> Option<&str> {
        self.choices.get(self.answer_index).map(String::as_str)
    }
}

/// Account tier; ordering of caps is custom-key > premium > regular
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Regular,
    Premium,
    CustomKey,
}

impl Tier {
    /// Resolve tier: a user-supplied key wins, then premium, then regular
    pub fn resolve(has_custom_key: bool, is_premium: bool) -> Self {
        if has_custom_key {
            Self::CustomKey
        } else if is_premium {
            Self::Premium
        } else {
            Self::Regular
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Premium => "premium",
            Self::CustomKey => "custom_key",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-user quota state and settings
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaRecord {
    pub user_id: UserId,
    pub username: Option<String>,
    pub daily_count: u32,
    /// Local date (YYYY-MM-DD) the daily counter belongs to
    pub activity_date: Option<String>,
    pub last_submission_at: Option<DateTime<Utc>>,
    pub is_premium: bool,
    pub api_key_fingerprint: Option<String>,
    pub total_submissions: u64,
    pub total_generations: u64,
    pub total_items_generated: u64,
    pub questions_per_request: u32,
    pub default_format: RenderFormat,
}

impl QuotaRecord {
    /// Fresh record as created on first contact
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            username: None,
            daily_count: 0,
            activity_date: None,
            last_submission_at: None,
            is_premium: false,
            api_key_fingerprint: None,
            total_submissions: 0,
            total_generations: 0,
            total_items_generated: 0,
            questions_per_request: 5,
            default_format: RenderFormat::Text,
        }
    }

    pub fn has_custom_key(&self) -> bool {
        self.api_key_fingerprint.is_some()
    }

    /// Whether `presented` is the key this user registered
    pub fn key_matches(&self, presented: Option<&str>) -> bool {
        match (&self.api_key_fingerprint, presented) {
            (Some(registered), Some(key)) => *registered == api_key_fingerprint(key),
            _ => false,
        }
    }

    /// Tier of a request presenting `api_key`
    ///
    /// The custom-key tier only applies while the registered key itself pays
    /// for the request; anything else runs on the service key.
    pub fn tier(&self, api_key: Option<&str>) -> Tier {
        Tier::resolve(self.key_matches(api_key), self.is_premium)
    }
}

/// SHA-256 fingerprint of a user-supplied API key; the key itself is never stored
pub fn api_key_fingerprint(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Opaque sendable target: the requester's direct chat or a registered channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub chat_id: i64,
    pub label: String,
}

impl Destination {
    pub fn new(chat_id: i64, label: impl Into<String>) -> Self {
        Self {
            chat_id,
            label: label.into(),
        }
    }

    /// The requester's own direct chat
    pub fn direct(user_id: UserId) -> Self {
        Self::new(user_id, "PM")
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.chat_id)
    }
}

/// Scheduled job status; transitions only pending -> processing -> {sent, failed}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Sent,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Sent)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted, time-deferred generation-and-delivery request
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub id: String,
    pub owner: UserId,
    pub destination: Destination,
    pub kind: SourceKind,
    pub text: Option<String>,
    pub title: Option<String>,
    pub media: Option<MediaPayload>,
    pub difficulty: Difficulty,
    pub allow_beyond_source: bool,
    pub desired_count: u32,
    pub format: RenderFormat,
    pub pacing_seconds: u32,
    pub scheduled_at: DateTime<Utc>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub error_message: Option<String>,
}

impl ScheduledJob {
    /// New pending job carrying everything needed to generate later
    pub fn from_request(
        request: GenerationRequest,
        destination: Destination,
        format: RenderFormat,
        pacing_seconds: u32,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner: request.requester,
            destination,
            kind: request.kind,
            text: request.text,
            title: request.title,
            media: request.media,
            difficulty: request.difficulty,
            allow_beyond_source: request.allow_beyond_source,
            desired_count: request.desired_count,
            format,
            pacing_seconds,
            scheduled_at,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            claimed_by: None,
            claimed_at: None,
            lease_expires_at: None,
            attempts: 0,
            error_message: None,
        }
    }

    /// Rebuild the generation request embedded in this job
    pub fn to_request(&self) -> GenerationRequest {
        GenerationRequest {
            kind: self.kind,
            text: self.text.clone(),
            title: self.title.clone(),
            media: self.media.clone(),
            desired_count: self.desired_count,
            difficulty: self.difficulty,
            allow_beyond_source: self.allow_beyond_source,
            requester: self.owner,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.scheduled_at <= now
    }
}

/// Persisted artifact of a successful generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quiz {
    pub id: String,
    pub title: String,
    pub owner: UserId,
    pub items: Vec<GeneratedItem>,
    pub created_at: DateTime<Utc>,
    pub play_count: u64,
    pub share_count: u64,
}

impl Quiz {
    pub fn new(owner: UserId, title: impl Into<String>, items: Vec<GeneratedItem>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            owner,
            items,
            created_at: Utc::now(),
            play_count: 0,
            share_count: 0,
        }
    }
}
