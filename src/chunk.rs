//! Chunker (C3): heading-aware, token-bounded splitting of normalized text
//!
//! Token counting follows the pattern in `llmspell-rag`'s
//! `chunking::tokenizer::TiktokenCounter`: a BPE tokenizer from the same
//! family the embedding model consumes (`cl100k_base` for the
//! `text-embedding-3-*` family).

use tiktoken_rs::{cl100k_base, CoreBPE};

use crate::config::ChunkerConfig;

/// One chunk produced by [`chunk_text`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    pub heading_path: Option<Vec<String>>,
    pub chunk_index: usize,
    pub token_count: usize,
}

struct Section {
    heading_path: Option<Vec<String>>,
    text: String,
}

/// Count tokens the same way the chunker and embedder both do, so chunk
/// boundaries agree with what the embedding API actually bills.
pub struct Tokenizer {
    bpe: CoreBPE,
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            bpe: cl100k_base().expect("cl100k_base vocabulary is statically bundled"),
        }
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.bpe.encode_ordinary(text).len()
    }

    fn encode(&self, text: &str) -> Vec<usize> {
        self.bpe.encode_ordinary(text)
    }

    fn decode(&self, tokens: &[usize]) -> String {
        self.bpe.decode(tokens.to_vec()).unwrap_or_default()
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Split normalized markdown-ish text into heading-aware, token-bounded
/// chunks. Returns `[]` for empty/whitespace-only input.
pub fn chunk_text(text: &str, tokenizer: &Tokenizer, config: &ChunkerConfig) -> Vec<TextChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let sections = split_into_sections(text);
    let mut chunks = Vec::new();

    for section in sections {
        let section_token_count = tokenizer.count_tokens(&section.text);
        if section_token_count <= config.max_tokens {
            chunks.push(PartialChunk {
                text: section.text,
                heading_path: section.heading_path,
            });
            continue;
        }
        chunks.extend(split_section_by_tokens(&section, tokenizer, config));
    }

    chunks
        .into_iter()
        .enumerate()
        .map(|(chunk_index, partial)| {
            let token_count = tokenizer.count_tokens(&partial.text);
            TextChunk {
                text: partial.text,
                heading_path: partial.heading_path,
                chunk_index,
                token_count,
            }
        })
        .collect()
}

struct PartialChunk {
    text: String,
    heading_path: Option<Vec<String>>,
}

/// Walk markdown-style `#`-prefixed headings, tracking an ancestor stack so
/// each section records the full heading path it sits under.
fn split_into_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut current_text = String::new();
    let mut current_path: Option<Vec<String>> = None;

    let flush = |sections: &mut Vec<Section>, text: &mut String, path: &Option<Vec<String>>| {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            sections.push(Section {
                heading_path: path.clone(),
                text: trimmed.to_string(),
            });
        }
        text.clear();
    };

    for line in text.lines() {
        if let Some((level, title)) = parse_heading(line) {
            flush(&mut sections, &mut current_text, &current_path);

            while stack.last().is_some_and(|(l, _)| *l >= level) {
                stack.pop();
            }
            stack.push((level, title.to_string()));
            current_path = Some(stack.iter().map(|(_, t)| t.clone()).collect());
            continue;
        }
        current_text.push_str(line);
        current_text.push('\n');
    }
    flush(&mut sections, &mut current_text, &current_path);

    if sections.is_empty() {
        sections.push(Section {
            heading_path: None,
            text: text.trim().to_string(),
        });
    }

    sections
}

fn parse_heading(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = trimmed[level..].trim_start();
    if rest.is_empty() {
        return None;
    }
    Some((level, rest))
}

/// Sliding-window split of one oversized section. Each window starts at
/// `[pos, pos+target)` tokens, is decoded, then shrunk to a sentence
/// boundary past the 50% mark (falling back to a whitespace boundary past
/// 80%). A shrunk window below `min` tokens is dropped unless it's the
/// final window; `pos` advances by `end - overlap`, or to `end` outright if
/// that advance wouldn't move forward or would leave a too-small remainder.
fn split_section_by_tokens(
    section: &Section,
    tokenizer: &Tokenizer,
    config: &ChunkerConfig,
) -> Vec<PartialChunk> {
    let tokens = tokenizer.encode(&section.text);
    let total = tokens.len();
    let mut parts = Vec::new();
    let mut pos = 0usize;

    while pos < total {
        let target_end = (pos + config.target_tokens).min(total);
        let window_text = tokenizer.decode(&tokens[pos..target_end]);

        let (shrunk_text, shrunk_len) = if target_end >= total {
            (window_text, target_end - pos)
        } else {
            shrink_to_boundary(&window_text, tokenizer)
        };

        let end = pos + shrunk_len.max(1);
        let is_final = end >= total;

        if shrunk_len >= config.min_tokens || is_final {
            let text = shrunk_text.trim().to_string();
            if !text.is_empty() {
                parts.push(PartialChunk {
                    text,
                    heading_path: section.heading_path.clone(),
                });
            }
        }

        if is_final {
            break;
        }

        let candidate = end.saturating_sub(config.overlap_tokens);
        let remaining_after_candidate = total.saturating_sub(candidate);
        pos = if candidate <= pos || remaining_after_candidate < config.min_tokens {
            end
        } else {
            candidate
        };
    }

    parts
}

/// Shrink a decoded window to a sentence boundary past the halfway point,
/// or a whitespace boundary past 80%; unchanged if neither exists. Returns
/// the shrunk text and its token count.
fn shrink_to_boundary(window_text: &str, tokenizer: &Tokenizer) -> (String, usize) {
    let chars: Vec<char> = window_text.chars().collect();
    let char_len = chars.len();
    let half = char_len / 2;
    let eighty_percent = char_len * 4 / 5;

    let cut = [". ", "? ", "! "]
        .into_iter()
        .find_map(|boundary| find_last_boundary_at_or_after(&chars, boundary, half))
        .or_else(|| find_last_boundary_at_or_after(&chars, " ", eighty_percent));

    let shrunk: String = match cut {
        Some(pos) => chars[..pos].iter().collect(),
        None => window_text.to_string(),
    };
    let trimmed = shrunk.trim().to_string();
    let token_count = tokenizer.count_tokens(&trimmed);
    (trimmed, token_count)
}

fn find_last_boundary_at_or_after(chars: &[char], boundary: &str, min_pos: usize) -> Option<usize> {
    let boundary_chars: Vec<char> = boundary.chars().collect();
    let mut best = None;
    let mut i = min_pos;
    while i + boundary_chars.len() <= chars.len() {
        if chars[i..i + boundary_chars.len()] == boundary_chars[..] {
            best = Some(i + boundary_chars.len());
        }
        i += 1;
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ChunkerConfig {
        ChunkerConfig {
            target_tokens: 50,
            min_tokens: 5,
            max_tokens: 60,
            overlap_tokens: 10,
        }
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let tokenizer = Tokenizer::new();
        assert!(chunk_text("", &tokenizer, &config()).is_empty());
        assert!(chunk_text("   \n  ", &tokenizer, &config()).is_empty());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let tokenizer = Tokenizer::new();
        let chunks = chunk_text("A short paragraph of text.", &tokenizer, &config());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert!(chunks[0].token_count > 0);
    }

    #[test]
    fn every_chunk_has_positive_token_count() {
        let tokenizer = Tokenizer::new();
        let text = "# Title\n\nSome content here.\n\n## Sub\n\nMore content.";
        let chunks = chunk_text(text, &tokenizer, &config());
        assert!(chunks.iter().all(|c| c.token_count > 0));
    }

    #[test]
    fn headings_populate_heading_path() {
        let tokenizer = Tokenizer::new();
        let text = "# Parent\n\nintro\n\n## Child\n\nchild content here";
        let chunks = chunk_text(text, &tokenizer, &config());
        let child_chunk = chunks
            .iter()
            .find(|c| c.text.contains("child content"))
            .unwrap();
        let path = child_chunk.heading_path.as_ref().unwrap();
        assert_eq!(path, &vec!["Parent".to_string(), "Child".to_string()]);
    }

    #[test]
    fn no_headings_means_single_section_with_no_path() {
        let tokenizer = Tokenizer::new();
        let chunks = chunk_text("just plain text, no headings at all", &tokenizer, &config());
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].heading_path.is_none());
    }

    #[test]
    fn long_text_is_split_within_token_bounds() {
        let tokenizer = Tokenizer::new();
        let sentence = "The quick brown fox jumps over the lazy dog. ";
        let long_text = sentence.repeat(60);
        let cfg = config();
        let chunks = chunk_text(&long_text, &tokenizer, &cfg);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            // windows start at target_tokens, not max_tokens, so a
            // sentence-boundary shrink should never overshoot target by much
            assert!(chunk.token_count <= cfg.target_tokens + 5);
            assert!(chunk.token_count <= cfg.max_tokens);
        }
    }

    #[test]
    fn windows_below_min_tokens_are_dropped_unless_final() {
        let tokenizer = Tokenizer::new();
        // no sentence/whitespace boundaries at all past the shrink points,
        // so every non-final window keeps its full target-sized text and
        // nothing should ever fall below `min` except possibly the last one
        let long_text = "a".repeat(2000);
        let cfg = ChunkerConfig {
            target_tokens: 50,
            min_tokens: 5,
            max_tokens: 60,
            overlap_tokens: 10,
        };
        let chunks = chunk_text(&long_text, &tokenizer, &cfg);
        assert!(!chunks.is_empty());
        for (i, chunk) in chunks.iter().enumerate() {
            assert!(chunk.token_count >= cfg.min_tokens || i == chunks.len() - 1);
        }
    }

    #[test]
    fn chunk_indices_are_sequential() {
        let tokenizer = Tokenizer::new();
        let sentence = "Sentence number marker here for splitting purposes. ";
        let long_text = sentence.repeat(40);
        let chunks = chunk_text(&long_text, &tokenizer, &config());
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
        }
    }

    #[test]
    fn count_tokens_of_empty_string_is_zero() {
        let tokenizer = Tokenizer::new();
        assert_eq!(tokenizer.count_tokens(""), 0);
    }
}
