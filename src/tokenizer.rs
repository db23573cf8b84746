//! OCR text → fixed-length `input_ids` / `attention_mask` buffers.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;

const MAX_CHARS_PER_WORD: usize = 100;

/// Ids of the framing tokens a sequence model expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialTokens {
    pub cls: i64,
    pub sep: i64,
    pub pad: i64,
    pub unk: i64,
}

/// Subword tokenizer. `encode` returns content tokens only; framing and
/// padding are added by [`TokenizerBridge`].
pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Vec<i64>;
    fn special_tokens(&self) -> SpecialTokens;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBuffer {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
}

impl TokenBuffer {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

#[derive(Clone)]
pub struct TokenizerBridge {
    tokenizer: Arc<dyn Tokenizer>,
}

impl TokenizerBridge {
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { tokenizer }
    }

    /// `[CLS] tokens… [SEP] [PAD]…`, exactly `max_length` long. Overlong text is
    /// truncated before `[SEP]`; the mask is 1 over real tokens, 0 over padding.
    pub fn tokenize(&self, text: &str, max_length: usize) -> TokenBuffer {
        let special = self.tokenizer.special_tokens();
        let budget = max_length.saturating_sub(2);

        let mut input_ids = Vec::with_capacity(max_length);
        input_ids.push(special.cls);
        input_ids.extend(self.tokenizer.encode(text).into_iter().take(budget));
        input_ids.push(special.sep);
        input_ids.truncate(max_length);

        let mut attention_mask = vec![1i64; input_ids.len()];
        input_ids.resize(max_length, special.pad);
        attention_mask.resize(max_length, 0);

        TokenBuffer {
            input_ids,
            attention_mask,
        }
    }
}

/// Uncased BERT-style WordPiece over a `vocab.txt` (one token per line, id =
/// line number).
#[derive(Debug)]
pub struct WordPieceTokenizer {
    vocab: HashMap<String, i64>,
    special: SpecialTokens,
}

impl WordPieceTokenizer {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read vocabulary from {}", path.display()))?;
        Self::from_vocab(&contents)
    }

    pub fn from_vocab(contents: &str) -> Result<Self> {
        let vocab: HashMap<String, i64> = contents
            .lines()
            .enumerate()
            .map(|(id, token)| (token.trim_end_matches('\r').to_string(), id as i64))
            .filter(|(token, _)| !token.is_empty())
            .collect();

        let lookup = |token: &str| {
            vocab
                .get(token)
                .copied()
                .ok_or_else(|| anyhow!("vocabulary is missing required token {token}"))
        };
        let special = SpecialTokens {
            cls: lookup("[CLS]")?,
            sep: lookup("[SEP]")?,
            pad: lookup("[PAD]")?,
            unk: lookup("[UNK]")?,
        };

        Ok(Self { vocab, special })
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    fn normalize(text: &str) -> String {
        text.to_lowercase()
            .nfd()
            .filter(|c| !is_combining_mark(*c))
            .collect()
    }

    /// Greedy longest-match-first split; a word with no full segmentation
    /// becomes a single `[UNK]`.
    fn tokenize_word(&self, word: &str, out: &mut Vec<i64>) {
        let chars: Vec<char> = word.chars().collect();
        if chars.len() > MAX_CHARS_PER_WORD {
            out.push(self.special.unk);
            return;
        }

        let mut pieces = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let mut end = chars.len();
            let mut matched = None;
            while start < end {
                let mut candidate: String = chars[start..end].iter().collect();
                if start > 0 {
                    candidate.insert_str(0, "##");
                }
                if let Some(id) = self.vocab.get(&candidate) {
                    matched = Some(*id);
                    break;
                }
                end -= 1;
            }
            match matched {
                Some(id) => pieces.push(id),
                None => {
                    out.push(self.special.unk);
                    return;
                }
            }
            start = end;
        }
        out.extend(pieces);
    }
}

impl Tokenizer for WordPieceTokenizer {
    fn encode(&self, text: &str) -> Vec<i64> {
        let normalized = Self::normalize(text);
        let mut ids = Vec::new();
        for word in normalized
            .split_word_bounds()
            .filter(|segment| !segment.trim().is_empty())
        {
            self.tokenize_word(word, &mut ids);
        }
        ids
    }

    fn special_tokens(&self) -> SpecialTokens {
        self.special
    }
}
