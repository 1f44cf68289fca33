use crate::error::IngestError;
use crate::models::IngestionOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::from(&IngestionOptions::default())
    }
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            chunk_size: value.chunk_size,
            overlap: value.chunk_overlap,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// A window of the source text. `start` and `end` are character offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub ordinal: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Splits `text` into overlapping fixed-size character windows.
///
/// Each window spans `[start, min(start + chunk_size, len))`; the next one
/// starts `overlap` characters before the previous end, or at the previous
/// end when that would not move forward. Splitting stops at the first window
/// that reaches the end of the text.
pub fn chunk_spans(text: &str, config: ChunkingConfig) -> Vec<TextChunk> {
    let chars: Vec<char> = text.chars().collect();
    let chunk_size = config.chunk_size.max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(TextChunk {
            ordinal: chunks.len(),
            start,
            end,
            text: chars[start..end].iter().collect(),
        });

        if end == chars.len() {
            break;
        }

        let next = end.saturating_sub(config.overlap);
        start = if next <= start { end } else { next };
    }

    chunks
}

pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    chunk_spans(text, ChunkingConfig { chunk_size, overlap })
        .into_iter()
        .map(|chunk| chunk.text)
        .collect()
}
