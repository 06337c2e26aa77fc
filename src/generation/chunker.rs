//! Text chunking and item-count distribution
//!
//! Chunks are plain character windows, left to right. They are not aware of
//! words or sentences: each chunk is generated independently, so a clumsy
//! boundary costs little. Concatenating the chunks always reproduces the
//! input exactly.

use std::future::Future;

use crate::models::{ContentChunk, GeneratedItem};

/// Slice `text` into ordered chunks of at most `max_chars` characters
pub fn chunk(text: &str, max_chars: usize) -> Vec<ContentChunk> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let split_at = rest
            .char_indices()
            .nth(max_chars)
            .map_or(rest.len(), |(idx, _)| idx);
        let (head, tail) = rest.split_at(split_at);
        chunks.push(ContentChunk {
            chunk_index: chunks.len(),
            text: head.to_string(),
            max_chars,
        });
        rest = tail;
    }

    chunks
}

/// Items requested from each chunk: `max(1, desired / chunks)`
pub fn per_chunk_target(desired_count: usize, chunk_count: usize) -> usize {
    (desired_count / chunk_count.max(1)).max(1)
}

/// What a distribution run produced
#[derive(Debug, Clone, Default)]
pub struct Distribution {
    /// Collected items, never more than requested
    pub items: Vec<GeneratedItem>,
    /// Generation calls made
    pub calls: usize,
    /// Chunks never sent because the target was already met
    pub skipped: usize,
}

/// Walk the chunks asking `generate(chunk, per_chunk)` for items until
/// `desired_count` is collected; the result is truncated to `desired_count`.
///
/// No chunk is queried twice, so when the chunks cannot supply enough items
/// the result is shorter than requested.
pub async fn distribute<F, Fut>(
    chunks: &[ContentChunk],
    desired_count: usize,
    mut generate: F,
) -> Distribution
where
    F: FnMut(&ContentChunk, usize) -> Fut,
    Fut: Future<Output = Vec<GeneratedItem>>,
{
    let per_chunk = per_chunk_target(desired_count, chunks.len());
    let mut outcome = Distribution::default();

    for (position, chunk) in chunks.iter().enumerate() {
        if outcome.items.len() >= desired_count {
            outcome.skipped = chunks.len() - position;
            break;
        }

        let batch = generate(chunk, per_chunk).await;
        outcome.calls += 1;
        tracing::debug!(
            chunk_index = chunk.chunk_index,
            requested = per_chunk,
            received = batch.len(),
            "Chunk generated"
        );
        outcome.items.extend(batch);
    }

    outcome.items.truncate(desired_count);
    outcome
}
