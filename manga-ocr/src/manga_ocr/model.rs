use std::path::Path;

use anyhow::{Context, Result};
use ndarray::{Array2, Array3, Array4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
use serde::Deserialize;

const PIXEL_VALUES: &str = "pixel_values";
const LAST_HIDDEN_STATE: &str = "last_hidden_state";
const INPUT_IDS: &str = "input_ids";
const ENCODER_HIDDEN_STATES: &str = "encoder_hidden_states";
const LOGITS: &str = "logits";

fn default_max_length() -> usize {
    300
}

fn default_num_beams() -> usize {
    1
}

fn default_length_penalty() -> f32 {
    1.0
}

/// Generation settings stored in the model's `config.json`.
#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    pub decoder_start_token_id: u32,
    pub eos_token_id: u32,
    pub pad_token_id: u32,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default = "default_num_beams")]
    pub num_beams: usize,
    #[serde(default)]
    pub no_repeat_ngram_size: usize,
    #[serde(default = "default_length_penalty")]
    pub length_penalty: f32,
    #[serde(default)]
    pub early_stopping: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(untagged)]
pub enum ImageSize {
    Square(u32),
    Rect { height: u32, width: u32 },
}

impl ImageSize {
    pub fn dims(&self) -> (u32, u32) {
        match *self {
            ImageSize::Square(s) => (s, s),
            ImageSize::Rect { height, width } => (width, height),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct PreprocessorConfig {
    pub size: ImageSize,
    pub image_mean: [f32; 3],
    pub image_std: [f32; 3],
    #[serde(default = "default_true")]
    pub do_resize: bool,
    #[serde(default = "default_true")]
    pub do_normalize: bool,
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            size: ImageSize::Square(224),
            image_mean: [0.5; 3],
            image_std: [0.5; 3],
            do_resize: true,
            do_normalize: true,
        }
    }
}

/// ONNX export of the vision encoder-decoder: one session per half.
pub struct VisionEncoderDecoder {
    encoder: Session,
    decoder: Session,
    config: GenerationConfig,
}

#[derive(Debug, Clone)]
struct Hypothesis {
    tokens: Vec<i64>,
    score: f32,
}

fn build_session(path: &Path, force_cpu: bool) -> Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_execution_providers(crate::execution_providers(force_cpu))?
        .commit_from_file(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    Ok(session)
}

impl VisionEncoderDecoder {
    pub fn load(
        encoder_path: &Path,
        decoder_path: &Path,
        config: GenerationConfig,
        force_cpu: bool,
    ) -> Result<Self> {
        let encoder = build_session(encoder_path, force_cpu)?;
        let decoder = build_session(decoder_path, force_cpu)?;
        tracing::info!(
            "Generation: max_length={}, num_beams={}, no_repeat_ngram_size={}",
            config.max_length,
            config.num_beams,
            config.no_repeat_ngram_size
        );
        Ok(Self {
            encoder,
            decoder,
            config,
        })
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Generate token ids for one image, without the start and end tokens.
    pub fn forward(&mut self, pixel_values: &Array4<f32>, max_length: usize) -> Result<Vec<u32>> {
        let hidden = self.encode(pixel_values)?;
        let decoder = &mut self.decoder;
        let next_logprobs =
            |sequences: &[Vec<i64>]| next_token_logprobs(decoder, &hidden, sequences);
        let tokens = if self.config.num_beams <= 1 {
            greedy_search(&self.config, max_length, next_logprobs)?
        } else {
            beam_search(&self.config, max_length, next_logprobs)?
        };

        Ok(tokens
            .into_iter()
            .skip(1)
            .filter(|&t| t != self.config.eos_token_id as i64)
            .map(|t| t as u32)
            .collect())
    }

    fn encode(&mut self, pixel_values: &Array4<f32>) -> Result<Array3<f32>> {
        let input = Value::from_array(pixel_values.clone())?;
        let outputs = self.encoder.run(ort::inputs![PIXEL_VALUES => input])?;
        let (shape, data) = outputs[LAST_HIDDEN_STATE].try_extract_tensor::<f32>()?;
        if shape.len() != 3 {
            anyhow::bail!("unexpected encoder output shape {:?}", shape);
        }
        let dims = (shape[0] as usize, shape[1] as usize, shape[2] as usize);
        let hidden = Array3::from_shape_vec(dims, data.to_vec())?;
        Ok(hidden)
    }
}

/// Log-probabilities of the next token, one row per sequence. All sequences
/// must have the same length.
fn next_token_logprobs(
    decoder: &mut Session,
    hidden: &Array3<f32>,
    sequences: &[Vec<i64>],
) -> Result<Array2<f32>> {
    let batch = sequences.len();
    let seq_len = sequences.first().map_or(0, Vec::len);
    let flat: Vec<i64> = sequences.iter().flatten().copied().collect();
    let input_ids = Array2::from_shape_vec((batch, seq_len), flat)?;

    let (_, n, h) = hidden.dim();
    let states = hidden
        .broadcast((batch, n, h))
        .context("failed to broadcast encoder states")?
        .to_owned();

    let outputs = decoder.run(ort::inputs![
        INPUT_IDS => Value::from_array(input_ids)?,
        ENCODER_HIDDEN_STATES => Value::from_array(states)?,
    ])?;
    let (shape, data) = outputs[LOGITS].try_extract_tensor::<f32>()?;
    if shape.len() != 3 {
        anyhow::bail!("unexpected logits shape {:?}", shape);
    }
    let out_len = shape[1] as usize;
    let vocab = shape[2] as usize;

    let mut flat = Vec::with_capacity(batch * vocab);
    for b in 0..batch {
        let offset = (b * out_len + out_len - 1) * vocab;
        flat.extend(log_softmax(&data[offset..offset + vocab]));
    }
    Ok(Array2::from_shape_vec((batch, vocab), flat)?)
}

fn greedy_search<F>(
    config: &GenerationConfig,
    max_length: usize,
    mut next_logprobs: F,
) -> Result<Vec<i64>>
where
    F: FnMut(&[Vec<i64>]) -> Result<Array2<f32>>,
{
    let eos = config.eos_token_id as i64;
    let ngram = config.no_repeat_ngram_size;
    let mut tokens = vec![config.decoder_start_token_id as i64];

    while tokens.len() < max_length {
        let mut logprobs = next_logprobs(std::slice::from_ref(&tokens))?
            .outer_iter()
            .next()
            .context("decoder returned no logits")?
            .to_vec();
        for banned in banned_ngram_tokens(&tokens, ngram) {
            logprobs[banned as usize] = f32::NEG_INFINITY;
        }
        let next = argmax(&logprobs) as i64;
        tokens.push(next);
        if next == eos {
            break;
        }
    }
    tracing::debug!("Greedy decoding produced {} tokens", tokens.len());
    Ok(tokens)
}

/// Beam search over `config.num_beams` hypotheses. An end token only closes a
/// hypothesis when it ranks among the top `num_beams` candidates of its step.
/// Finished scores are divided by `len ^ length_penalty`.
fn beam_search<F>(
    config: &GenerationConfig,
    max_length: usize,
    mut next_logprobs: F,
) -> Result<Vec<i64>>
where
    F: FnMut(&[Vec<i64>]) -> Result<Array2<f32>>,
{
    let num_beams = config.num_beams;
    let eos = config.eos_token_id as i64;
    let ngram = config.no_repeat_ngram_size;
    let penalty = config.length_penalty;

    let mut beams = vec![Hypothesis {
        tokens: vec![config.decoder_start_token_id as i64],
        score: 0.0,
    }];
    let mut finished: Vec<Hypothesis> = Vec::new();
    let mut done = false;

    while beams[0].tokens.len() < max_length {
        let sequences: Vec<Vec<i64>> = beams.iter().map(|b| b.tokens.clone()).collect();
        let logprobs = next_logprobs(&sequences)?;

        let mut candidates = Vec::with_capacity(beams.len() * 2 * num_beams);
        for (b, (beam, row)) in beams.iter().zip(logprobs.outer_iter()).enumerate() {
            let mut lp = row.to_vec();
            for banned in banned_ngram_tokens(&beam.tokens, ngram) {
                lp[banned as usize] = f32::NEG_INFINITY;
            }
            for token in top_k(&lp, 2 * num_beams) {
                candidates.push((beam.score + lp[token], b, token as i64));
            }
        }
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

        let cur_len = beams[0].tokens.len();
        let mut next = Vec::with_capacity(num_beams);
        for (rank, (score, b, token)) in candidates.into_iter().enumerate() {
            if score == f32::NEG_INFINITY {
                break;
            }
            if token == eos {
                if rank < num_beams {
                    finished.push(Hypothesis {
                        tokens: beams[b].tokens.clone(),
                        score: score / (cur_len as f32).powf(penalty),
                    });
                }
            } else {
                let mut tokens = beams[b].tokens.clone();
                tokens.push(token);
                next.push(Hypothesis { tokens, score });
            }
            if next.len() == num_beams {
                break;
            }
        }

        if next.is_empty() {
            done = true;
            break;
        }
        beams = next;

        if finished.len() >= num_beams {
            if config.early_stopping {
                done = true;
                break;
            }
            let worst = worst_of_best(&finished, num_beams);
            let best_possible = beams[0].score / (cur_len as f32 + 1.0).powf(penalty);
            if worst >= best_possible {
                done = true;
                break;
            }
        }
    }

    if !done {
        for beam in beams {
            let len = beam.tokens.len() as f32;
            finished.push(Hypothesis {
                score: beam.score / len.powf(penalty),
                tokens: beam.tokens,
            });
        }
    }

    let best = finished
        .into_iter()
        .max_by(|a, b| a.score.total_cmp(&b.score))
        .context("beam search produced no hypotheses")?;
    tracing::debug!(
        "Beam search produced {} tokens (score {:.3})",
        best.tokens.len(),
        best.score
    );
    Ok(best.tokens)
}

fn worst_of_best(finished: &[Hypothesis], n: usize) -> f32 {
    let mut scores: Vec<f32> = finished.iter().map(|h| h.score).collect();
    scores.sort_by(|a, b| b.total_cmp(a));
    scores.truncate(n);
    scores.last().copied().unwrap_or(f32::NEG_INFINITY)
}

fn log_softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let sum: f32 = logits.iter().map(|&x| (x - max).exp()).sum();
    let log_sum = sum.ln() + max;
    logits.iter().map(|&x| x - log_sum).collect()
}

fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

fn top_k(values: &[f32], k: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    idx.sort_unstable_by(|&a, &b| values[b].total_cmp(&values[a]));
    idx.truncate(k);
    idx
}

/// Tokens that would complete an n-gram already present in `tokens`.
fn banned_ngram_tokens(tokens: &[i64], n: usize) -> Vec<i64> {
    if n == 0 || tokens.len() + 1 < n {
        return Vec::new();
    }
    let prefix = &tokens[tokens.len() + 1 - n..];
    tokens
        .windows(n)
        .filter(|w| &w[..n - 1] == prefix)
        .map(|w| w[n - 1])
        .collect()
}
