use crate::charsets::{is_hiragana, is_kanji, is_katakana};

/// Splits running text into word-like chunks that are never broken across lines.
pub trait Segmenter: Send + Sync {
    fn segment(&self, text: &str) -> Vec<String>;
}

const OPENING_BRACKETS: &str = "「『（(［[【〈《〔｛{“‘";

fn is_punctuation(token: &str) -> bool {
    token.chars().all(|c| !c.is_alphanumeric())
}

/// Joins punctuation and whitespace tokens to the preceding word and opening
/// brackets to the following one.
fn attach_punctuation(tokens: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut opening = String::new();
    for token in tokens {
        if token.is_empty() {
            continue;
        }
        if token.chars().all(|c| OPENING_BRACKETS.contains(c)) {
            opening.push_str(&token);
            continue;
        }
        match chunks.last_mut() {
            Some(last) if opening.is_empty() && is_punctuation(&token) => last.push_str(&token),
            _ => chunks.push(std::mem::take(&mut opening) + &token),
        }
    }
    if !opening.is_empty() {
        chunks.push(opening);
    }
    chunks
}

/// Word segmentation with the TinySegmenter statistical model.
#[derive(Debug, Clone, Copy, Default)]
pub struct TinySegmenter;

impl Segmenter for TinySegmenter {
    fn segment(&self, text: &str) -> Vec<String> {
        attach_punctuation(tinysegmenter::tokenize(text))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    Kanji,
    Hiragana,
    Katakana,
    Alnum,
    Other,
}

fn script(ch: char) -> Script {
    if is_kanji(ch) || ch == '々' {
        Script::Kanji
    } else if is_katakana(ch) && !is_hiragana(ch) {
        Script::Katakana
    } else if is_hiragana(ch) && !is_katakana(ch) {
        Script::Hiragana
    } else if ch.is_alphanumeric() {
        Script::Alnum
    } else {
        Script::Other
    }
}

/// Rule-based fallback that groups characters by script. Okurigana stays with
/// the kanji before it, punctuation and spaces close the preceding chunk, and
/// marks shared by both kana scripts (such as `ー`) extend the current chunk.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptSegmenter;

impl Segmenter for ScriptSegmenter {
    fn segment(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut prev: Option<Script> = None;
        let mut closed = false;

        for ch in text.chars() {
            if is_hiragana(ch) && is_katakana(ch) {
                current.push(ch);
                continue;
            }
            let class = script(ch);
            if class == Script::Other {
                current.push(ch);
                closed = !current.is_empty() && prev.is_some();
                continue;
            }

            let split = !current.is_empty()
                && (closed
                    || match (prev, class) {
                        (None, _) => false,
                        (Some(a), b) if a == b => false,
                        (Some(Script::Kanji), Script::Hiragana) => false,
                        _ => true,
                    });
            if split {
                chunks.push(std::mem::take(&mut current));
                closed = false;
            }
            current.push(ch);
            prev = Some(class);
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }
}
