//! Structural validation of AI output
//!
//! The AI service is asked for a JSON array of items. Each element is
//! checked on its own; a bad element is rejected with a reason and the rest
//! are kept, so a batch returning 3 of 5 valid items still yields 3.

use serde_json::Value;
use thiserror::Error;

use crate::models::GeneratedItem;
use crate::utils::truncate_chars;

pub const MIN_CHOICES: usize = 2;
pub const MAX_CHOICES: usize = 4;

/// Why an element of the AI response was dropped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    #[error("element is not an object")]
    NotAnObject,

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{0}' has the wrong type")]
    WrongType(&'static str),

    #[error("question is empty")]
    EmptyQuestion,

    #[error("{0} choices, expected 2 to 4")]
    ChoiceCount(usize),

    #[error("choice {0} is empty")]
    EmptyChoice(usize),

    #[error("answer_index {index} outside {choices} choices")]
    AnswerOutOfRange { index: i64, choices: usize },
}

/// A dropped element and its position in the response array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedItem {
    pub index: usize,
    pub reason: RejectReason,
}

/// Valid items plus everything that was dropped
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub items: Vec<GeneratedItem>,
    pub rejected: Vec<RejectedItem>,
}

impl ValidationReport {
    pub fn total(&self) -> usize {
        self.items.len() + self.rejected.len()
    }
}

/// Response text that is not a JSON array at all
#[derive(Error, Debug)]
pub enum MalformedResponse {
    #[error("response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("response is JSON but not an array")]
    NotAnArray,
}

/// Strip markdown code fences and surrounding prose down to the JSON array
pub fn extract_json_array(text: &str) -> &str {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.strip_suffix("```").unwrap_or(rest))
        .unwrap_or(trimmed)
        .trim();

    if unfenced.starts_with('[') {
        return unfenced;
    }

    match (unfenced.find('['), unfenced.rfind(']')) {
        (Some(start), Some(end)) if end > start => &unfenced[start..=end],
        _ => unfenced,
    }
}

/// Parse raw response text and validate every element
pub fn parse_response(
    text: &str,
    max_explanation_chars: usize,
) -> Result<ValidationReport, MalformedResponse> {
    let value: Value = serde_json::from_str(extract_json_array(text))?;
    match value {
        Value::Array(elements) => Ok(validate_elements(&elements, max_explanation_chars)),
        _ => Err(MalformedResponse::NotAnArray),
    }
}

/// Validate already-parsed elements
pub fn validate_elements(elements: &[Value], max_explanation_chars: usize) -> ValidationReport {
    let mut report = ValidationReport::default();

    for (index, element) in elements.iter().enumerate() {
        match validate_element(element, max_explanation_chars) {
            Ok(item) => report.items.push(item),
            Err(reason) => report.rejected.push(RejectedItem { index, reason }),
        }
    }

    report
}

fn validate_element(element: &Value, max_explanation_chars: usize) -> Result<GeneratedItem, RejectReason> {
    let object = element.as_object().ok_or(RejectReason::NotAnObject)?;

    let field = |name: &'static str| object.get(name).ok_or(RejectReason::MissingField(name));

    let question = field("question")?
        .as_str()
        .ok_or(RejectReason::WrongType("question"))?
        .trim();
    if question.is_empty() {
        return Err(RejectReason::EmptyQuestion);
    }

    let raw_choices = field("choices")?
        .as_array()
        .ok_or(RejectReason::WrongType("choices"))?;
    let mut choices = Vec::with_capacity(raw_choices.len());
    for (i, choice) in raw_choices.iter().enumerate() {
        let text = choice.as_str().ok_or(RejectReason::WrongType("choices"))?.trim();
        if text.is_empty() {
            return Err(RejectReason::EmptyChoice(i));
        }
        choices.push(text.to_string());
    }
    if !(MIN_CHOICES..=MAX_CHOICES).contains(&choices.len()) {
        return Err(RejectReason::ChoiceCount(choices.len()));
    }

    let answer_index = field("answer_index")?
        .as_i64()
        .ok_or(RejectReason::WrongType("answer_index"))?;
    if answer_index < 0 || answer_index as usize >= choices.len() {
        return Err(RejectReason::AnswerOutOfRange {
            index: answer_index,
            choices: choices.len(),
        });
    }

    let explanation = match field("explanation")? {
        Value::String(s) => truncate_chars(s.trim(), max_explanation_chars).to_string(),
        Value::Null => String::new(),
        _ => return Err(RejectReason::WrongType("explanation")),
    };

    Ok(GeneratedItem {
        question: question.to_string(),
        choices,
        answer_index: answer_index as usize,
        explanation,
    })
}
