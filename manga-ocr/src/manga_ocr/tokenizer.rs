use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tokenizers::{models::wordpiece::WordPiece, AddedToken, Tokenizer};

use super::load_json;

const UNK: &str = "[UNK]";
const CLS: &str = "[CLS]";
const SEP: &str = "[SEP]";
const PAD: &str = "[PAD]";

/// Character-level WordPiece tokenizer of the decoder.
pub struct OcrTokenizer {
    tokenizer: Tokenizer,
    cls_id: u32,
    sep_id: u32,
    pad_id: u32,
    unk_id: u32,
}

impl OcrTokenizer {
    pub fn load(vocab_path: &Path, special_tokens_path: &Path) -> Result<Self> {
        let model = WordPiece::from_file(vocab_path.to_string_lossy().as_ref())
            .unk_token(UNK.to_string())
            .build()
            .map_err(|e| anyhow!(e))
            .with_context(|| format!("failed to read vocab {}", vocab_path.display()))?;
        let mut tokenizer = Tokenizer::new(model);

        let specials: serde_json::Value = load_json(special_tokens_path)?;
        let mut added = Vec::new();
        if let Some(obj) = specials.as_object() {
            for value in obj.values() {
                // entries are either plain strings or {"content": ...} objects
                let token = value
                    .as_str()
                    .or_else(|| value.get("content").and_then(|c| c.as_str()));
                if let Some(token) = token {
                    added.push(AddedToken::from(token.to_string(), true));
                }
            }
        }
        if !added.is_empty() {
            tokenizer.add_special_tokens(&added);
        }

        let id = |token: &str| {
            tokenizer
                .token_to_id(token)
                .ok_or_else(|| anyhow!("special token {token} missing from vocab"))
        };
        let cls_id = id(CLS)?;
        let sep_id = id(SEP)?;
        let pad_id = id(PAD)?;
        let unk_id = id(UNK)?;

        Ok(Self {
            tokenizer,
            cls_id,
            sep_id,
            pad_id,
            unk_id,
        })
    }

    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }

    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    /// Decode ids to text, dropping special tokens.
    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        let size = self.tokenizer.get_vocab_size(true) as u32;
        if let Some(id) = ids.iter().find(|&&id| id >= size) {
            anyhow::bail!(
                "token id {id} is outside the vocabulary of {size} tokens, \
                 the ONNX graphs do not match the tokenizer"
            );
        }
        self.tokenizer.decode(ids, true).map_err(|e| anyhow!(e))
    }

    /// Encode a ground-truth string as `[CLS] chars [SEP]`, padded with `[PAD]`
    /// and truncated to `max_length`.
    pub fn encode_label(&self, text: &str, max_length: usize) -> Vec<u32> {
        let mut ids = Vec::with_capacity(max_length);
        ids.push(self.cls_id);
        for ch in text.chars().filter(|c| !c.is_whitespace()) {
            let mut buf = [0u8; 4];
            let id = self
                .tokenizer
                .token_to_id(ch.encode_utf8(&mut buf))
                .unwrap_or(self.unk_id);
            ids.push(id);
        }
        ids.push(self.sep_id);

        if ids.len() > max_length {
            ids.truncate(max_length);
            if let Some(last) = ids.last_mut() {
                *last = self.sep_id;
            }
        }
        ids.resize(max_length, self.pad_id);
        ids
    }
}
