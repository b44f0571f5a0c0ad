use manga_ocr::OcrTokenizer;
use serde::Serialize;

use super::dataset::IGNORE_INDEX;
use crate::{DevError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Metrics {
    /// Character error rate over the whole batch.
    pub cer: f64,
    /// Share of exact matches.
    pub accuracy: f64,
}

fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

impl Metrics {
    /// Compare predictions with references, ignoring whitespace.
    ///
    /// CER is undefined when any reference is empty; it is then reported as 0
    /// for the whole batch, while accuracy is still computed.
    pub fn compute<P: AsRef<str>, R: AsRef<str>>(predictions: &[P], references: &[R]) -> Self {
        let pairs: Vec<(String, String)> = predictions
            .iter()
            .zip(references)
            .map(|(p, r)| (strip_whitespace(p.as_ref()), strip_whitespace(r.as_ref())))
            .collect();
        if pairs.is_empty() {
            return Self {
                cer: 0.0,
                accuracy: 0.0,
            };
        }

        let errors: usize = pairs
            .iter()
            .map(|(p, r)| strsim::levenshtein(p, r))
            .sum();
        let total: usize = pairs.iter().map(|(_, r)| r.chars().count()).sum();
        let cer = if pairs.iter().any(|(_, r)| r.is_empty()) {
            tracing::warn!("Some references are empty, reporting CER as 0");
            0.0
        } else {
            errors as f64 / total as f64
        };

        let correct = pairs.iter().filter(|(p, r)| p == r).count();
        Self {
            cer,
            accuracy: correct as f64 / pairs.len() as f64,
        }
    }

    /// Decode generated ids and label ids first. Ignored label positions count as padding.
    pub fn compute_from_ids(
        tokenizer: &OcrTokenizer,
        prediction_ids: &[Vec<u32>],
        label_ids: &[Vec<i64>],
    ) -> Result<Self> {
        let decode = |ids: &[u32]| {
            tokenizer
                .decode(ids)
                .map_err(|e| DevError::Tokenizer(format!("{e:#}")))
        };
        let predictions = prediction_ids
            .iter()
            .map(|ids| decode(ids))
            .collect::<Result<Vec<String>>>()?;
        let references = label_ids
            .iter()
            .map(|ids| {
                let ids: Vec<u32> = ids
                    .iter()
                    .map(|&id| {
                        if id == IGNORE_INDEX {
                            tokenizer.pad_id()
                        } else {
                            id as u32
                        }
                    })
                    .collect();
                decode(&ids)
            })
            .collect::<Result<Vec<String>>>()?;
        Ok(Self::compute(&predictions, &references))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let m = Metrics::compute(&["こんにちは", "世界"], &["こん にちは", "世界"]);
        assert_eq!(m.cer, 0.0);
        assert_eq!(m.accuracy, 1.0);
    }

    #[test]
    fn test_cer_is_corpus_level() {
        // one substitution in 4 reference chars, one deletion in 2
        let m = Metrics::compute(&["あいうX", "か"], &["あいうえ", "かき"]);
        assert!((m.cer - 2.0 / 6.0).abs() < 1e-9);
        assert_eq!(m.accuracy, 0.0);
    }

    #[test]
    fn test_empty_references() {
        let m = Metrics::compute(&["あ"], &[" "]);
        assert_eq!(m.cer, 0.0);
        assert_eq!(m.accuracy, 0.0);

        let m = Metrics::compute::<&str, &str>(&[], &[]);
        assert_eq!(m.accuracy, 0.0);
    }

    #[test]
    fn test_any_empty_reference_zeroes_cer() {
        let m = Metrics::compute(&["あいう", "X"], &["かきく", ""]);
        assert_eq!(m.cer, 0.0);
        assert_eq!(m.accuracy, 0.0);

        let m = Metrics::compute(&["あ", ""], &["あ", " "]);
        assert_eq!(m.cer, 0.0);
        assert_eq!(m.accuracy, 1.0);
    }

    #[test]
    fn test_compute_from_ids() {
        let dir = tempfile::tempdir().unwrap();
        let vocab = dir.path().join("vocab.txt");
        let specials = dir.path().join("special_tokens_map.json");
        std::fs::write(&vocab, "[PAD]\n[UNK]\n[CLS]\n[SEP]\nあ\nい\n").unwrap();
        std::fs::write(
            &specials,
            r#"{"unk_token": "[UNK]", "sep_token": "[SEP]", "pad_token": "[PAD]", "cls_token": "[CLS]"}"#,
        )
        .unwrap();
        let tok = OcrTokenizer::load(&vocab, &specials).unwrap();

        assert!(Metrics::compute_from_ids(&tok, &[vec![2, 99, 3]], &[vec![2, 4, 3]]).is_err());

        let m = Metrics::compute_from_ids(
            &tok,
            &[vec![2, 4, 5, 3], vec![2, 4, 3]],
            &[vec![2, 4, 5, 3, -100, -100], vec![2, 5, 3, -100, -100, -100]],
        )
        .unwrap();
        assert_eq!(m.accuracy, 0.5);
        assert!((m.cer - 1.0 / 3.0).abs() < 1e-9);
    }
}
