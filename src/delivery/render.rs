//! Rendering of generated items into destination messages

use html_escape::encode_text;
use serde::Serialize;

use crate::models::{GeneratedItem, RenderFormat};
use crate::utils::truncate_chars;

/// Explanation length shown to recipients
pub const MAX_SHOWN_EXPLANATION: usize = 195;

const LETTERS: [&str; 4] = ["A", "B", "C", "D"];

/// Label for the choice at `index`: A-D, then 5, 6, ...
pub fn choice_label(index: usize) -> String {
    LETTERS
        .get(index)
        .map_or_else(|| (index + 1).to_string(), |letter| (*letter).to_string())
}

/// Quiz-style poll payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollMessage {
    pub question: String,
    pub options: Vec<String>,
    pub correct_option_id: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// One message ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderedMessage {
    /// HTML-formatted text
    Text(String),
    Poll(PollMessage),
}

/// Render the `number`-th item (1-based) in the requested format
pub fn render(format: RenderFormat, number: usize, item: &GeneratedItem) -> RenderedMessage {
    match format {
        RenderFormat::Text => RenderedMessage::Text(render_text(number, item)),
        RenderFormat::Poll => RenderedMessage::Poll(render_poll(item)),
    }
}

/// Numbered question, labelled choices, highlighted answer, optional explanation
pub fn render_text(number: usize, item: &GeneratedItem) -> String {
    let mut text = format!("{number}. {}\n", encode_text(&item.question));

    for (i, choice) in item.choices.iter().enumerate() {
        text.push_str(&format!("{}. {}\n", choice_label(i), encode_text(choice)));
    }

    if let Some(correct) = item.correct_choice() {
        text.push_str(&format!(
            "\n<b>Correct Answer</b>: {} - {}",
            choice_label(item.answer_index),
            encode_text(correct)
        ));
    }

    let explanation = item.explanation.trim();
    if !explanation.is_empty() {
        text.push_str(&format!(
            "\n<b>Explanation:</b> {}",
            encode_text(truncate_chars(explanation, MAX_SHOWN_EXPLANATION))
        ));
    }

    text
}

pub fn render_poll(item: &GeneratedItem) -> PollMessage {
    let explanation = item.explanation.trim();
    PollMessage {
        question: item.question.clone(),
        options: item.choices.clone(),
        correct_option_id: item.answer_index,
        explanation: (!explanation.is_empty())
            .then(|| truncate_chars(explanation, MAX_SHOWN_EXPLANATION).to_string()),
    }
}
