//! Character classes and the training vocabulary.

use std::path::Path;

use serde::Deserialize;

use crate::Result;

/// CJK unified ideographs, including every extension block.
pub fn is_kanji(ch: char) -> bool {
    matches!(ch as u32,
        0x4E00..=0x9FFF
        | 0x3400..=0x4DBF
        | 0x20000..=0x2A6DF
        | 0x2A700..=0x2EE5F
        | 0x30000..=0x323AF)
}

/// Code points whose Unicode name mentions HIRAGANA.
pub fn is_hiragana(ch: char) -> bool {
    matches!(ch as u32,
        0x3041..=0x3096
        | 0x3099..=0x309F
        | 0x30A0
        | 0x30FC
        | 0xFF70
        | 0x1B001..=0x1B11F
        | 0x1B132
        | 0x1B150..=0x1B152
        | 0x1F200)
}

/// Code points whose Unicode name mentions KATAKANA.
pub fn is_katakana(ch: char) -> bool {
    matches!(ch as u32,
        0x3099..=0x309C
        | 0x30A0..=0x30FF
        | 0x31F0..=0x31FF
        | 0x32D0..=0x32FE
        | 0xFF65..=0xFF9F
        | 0x1AFF0..=0x1AFFE
        | 0x1B000
        | 0x1B120..=0x1B122
        | 0x1B155
        | 0x1B164..=0x1B167)
}

pub fn is_ascii(ch: char) -> bool {
    ch.is_ascii()
}

#[derive(Deserialize)]
struct VocabRow {
    #[serde(rename = "char")]
    ch: String,
}

/// The model vocabulary and the kana subsets furigana is drawn from.
#[derive(Debug, Clone, Default)]
pub struct Charsets {
    pub vocab: Vec<char>,
    pub hiragana: Vec<char>,
    pub katakana: Vec<char>,
}

impl Charsets {
    pub fn load(vocab_csv: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(vocab_csv)?;
        let mut vocab = Vec::new();
        for row in reader.deserialize::<VocabRow>() {
            if let Some(ch) = row?.ch.chars().next() {
                vocab.push(ch);
            }
        }
        Ok(Self::from_vocab(vocab))
    }

    pub fn from_vocab(vocab: Vec<char>) -> Self {
        // the tail of the hiragana block and the head of the katakana block are
        // marks and archaic letters that make poor furigana
        let mut hiragana: Vec<char> = vocab.iter().copied().filter(|&c| is_hiragana(c)).collect();
        hiragana.truncate(hiragana.len().saturating_sub(6));
        let katakana: Vec<char> = vocab
            .iter()
            .copied()
            .filter(|&c| is_katakana(c))
            .skip(3)
            .collect();
        Self {
            vocab,
            hiragana,
            katakana,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_classes() {
        assert!(is_kanji('漢'));
        assert!(is_kanji('𠀋'));
        assert!(!is_kanji('あ'));
        assert!(!is_kanji('豈'), "compatibility ideographs are not unified");

        assert!(is_hiragana('あ'));
        assert!(is_hiragana('ー'));
        assert!(!is_hiragana('ア'));

        assert!(is_katakana('ア'));
        assert!(is_katakana('ｱ'));
        assert!(is_katakana('ー'));
        assert!(!is_katakana('あ'));

        assert!(is_ascii('A'));
        assert!(!is_ascii('Ａ'));
    }

    #[test]
    fn test_load_subsets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.csv");
        let hiragana = "あいうえおかきくけこ";
        let katakana = "アイウエオカ";
        let mut csv = String::from("char\n");
        for ch in format!("{hiragana}{katakana}漢").chars() {
            csv.push(ch);
            csv.push('\n');
        }
        std::fs::write(&path, csv).unwrap();

        let charsets = Charsets::load(&path).unwrap();
        assert_eq!(charsets.vocab.len(), 17);
        assert_eq!(charsets.hiragana, vec!['あ', 'い', 'う', 'え']);
        assert_eq!(charsets.katakana, vec!['エ', 'オ', 'カ']);
    }
}
