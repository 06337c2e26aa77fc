//! Prompt construction for the generation service

use crate::models::{Difficulty, MediaPayload};

/// What one generation call is built from
#[derive(Debug, Clone, Copy)]
pub enum PromptSource<'a> {
    /// One chunk of source text
    Text(&'a str),
    /// A bare topic title
    Title(&'a str),
    /// Audio or other media sent inline
    Media(&'a MediaPayload),
}

/// One call to the generation service
#[derive(Clone, Copy)]
pub struct GenerationPrompt<'a> {
    pub source: PromptSource<'a>,
    pub count: usize,
    pub difficulty: Difficulty,
    pub allow_beyond_source: bool,
    /// Requester's own key, overriding the service key for this call
    pub api_key: Option<&'a str>,
}

impl std::fmt::Debug for GenerationPrompt<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationPrompt")
            .field("source", &self.source)
            .field("count", &self.count)
            .field("difficulty", &self.difficulty)
            .field("allow_beyond_source", &self.allow_beyond_source)
            .field("api_key", &self.api_key.map(|_| "<redacted>"))
            .finish()
    }
}

impl<'a> GenerationPrompt<'a> {
    pub fn new(source: PromptSource<'a>, count: usize, difficulty: Difficulty) -> Self {
        Self {
            source,
            count: count.max(1),
            difficulty,
            allow_beyond_source: false,
            api_key: None,
        }
    }

    pub fn allow_beyond(mut self, allow: bool) -> Self {
        self.allow_beyond_source = allow;
        self
    }

    pub fn with_api_key(mut self, api_key: Option<&'a str>) -> Self {
        self.api_key = api_key;
        self
    }

    fn scope_hint(&self) -> &'static str {
        match self.source {
            PromptSource::Title(_) => {
                "Only a topic title is provided. Draw on general knowledge of the topic."
            }
            PromptSource::Media(_) => {
                "The study material is the attached media. Base questions on what it contains."
            }
            PromptSource::Text(_) if self.allow_beyond_source => {
                "You may include closely related facts beyond the provided material."
            }
            PromptSource::Text(_) => "Use only information contained in the provided material.",
        }
    }

    fn source_block(&self) -> &'a str {
        match self.source {
            PromptSource::Text(text) => text,
            PromptSource::Title(title) => title,
            PromptSource::Media(_) => "(attached media)",
        }
    }

    /// Full instruction text sent to the service
    pub fn render(&self) -> String {
        format!(
            r#"Generate {count} multiple-choice questions from the provided study material.
Difficulty Level: {difficulty}
{scope_hint}

Respond in valid JSON array format. Each object must follow this format:
{{
  "question": "string",
  "choices": ["string", "string", "string", "string"],
  "answer_index": number (0-3),
  "explanation": "string (max 200 characters)"
}}
Rules:
- Only return the JSON array, with no surrounding text or code fences
- Each item has 2 to 4 choices, each under 100 characters
- Ensure the correct answer index matches the choices array

Source:
{source}"#,
            count = self.count,
            difficulty = self.difficulty.label(),
            scope_hint = self.scope_hint(),
            source = self.source_block(),
        )
    }
}
