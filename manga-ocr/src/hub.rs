use std::{
    fmt,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use hf_hub::api::tokio::{Api, ApiBuilder};

/// Hub repository with the configs and the tokenizer vocabulary.
pub const DEFAULT_MODEL: &str = "kha-white/manga-ocr-base";
/// Hub repository with an ONNX export of [`DEFAULT_MODEL`].
pub const DEFAULT_ONNX_MODEL: &str = "mayocream/manga-ocr-onnx";

const ENCODER: &str = "encoder_model.onnx";
const DECODER: &str = "decoder_model.onnx";
const CONFIG: &str = "config.json";
const PREPROCESSOR_CONFIG: &str = "preprocessor_config.json";
const VOCAB: &str = "vocab.txt";
const SPECIAL_TOKENS_MAP: &str = "special_tokens_map.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Dir(PathBuf),
    Hub(String),
}

impl Location {
    /// An existing directory is used as is, anything else is a hub repository id.
    pub fn parse(name_or_path: &str) -> Self {
        let local = Path::new(name_or_path);
        if local.is_dir() {
            Location::Dir(local.to_path_buf())
        } else {
            Location::Hub(name_or_path.to_string())
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Dir(dir) => write!(f, "{}", dir.display()),
            Location::Hub(repo) => write!(f, "hub repo {repo}"),
        }
    }
}

/// Where the model is read from. The ONNX graphs may live apart from the
/// configs and vocabulary, since the published checkpoint has no ONNX export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
    pub model: Location,
    pub onnx: Location,
}

impl ModelSource {
    /// Without an explicit `onnx` location, a local model directory is
    /// expected to hold the graphs too, while a hub model takes them from
    /// [`DEFAULT_ONNX_MODEL`].
    pub fn new(model: &str, onnx: Option<&str>) -> Self {
        let model = Location::parse(model);
        let onnx = match (onnx, &model) {
            (Some(onnx), _) => Location::parse(onnx),
            (None, Location::Dir(_)) => model.clone(),
            (None, Location::Hub(_)) => Location::Hub(DEFAULT_ONNX_MODEL.to_string()),
        };
        Self { model, onnx }
    }

    pub fn location_of(&self, name: &str) -> &Location {
        if is_onnx(name) {
            &self.onnx
        } else {
            &self.model
        }
    }

    fn needs_hub(&self) -> bool {
        matches!(self.model, Location::Hub(_)) || matches!(self.onnx, Location::Hub(_))
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.model == self.onnx {
            write!(f, "{}", self.model)
        } else {
            write!(f, "{} (ONNX graphs from {})", self.model, self.onnx)
        }
    }
}

fn is_onnx(name: &str) -> bool {
    name == ENCODER || name == DECODER
}

fn missing_file(name: &str, location: &Location) -> String {
    if is_onnx(name) {
        format!(
            "{name} not found in {location}. Export the model with \
             `optimum-cli export onnx --model {DEFAULT_MODEL} <dir>` and pass <dir> \
             with --onnx-model or MANGA_OCR_ONNX_MODEL"
        )
    } else {
        format!("model file {name} not found in {location}")
    }
}

/// Local paths of everything needed to run the model.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub encoder: PathBuf,
    pub decoder: PathBuf,
    pub config: PathBuf,
    pub preprocessor_config: PathBuf,
    pub vocab: PathBuf,
    pub special_tokens_map: PathBuf,
}

async fn locate(api: Option<&Api>, source: &ModelSource, name: &str) -> Result<PathBuf> {
    let location = source.location_of(name);
    let path = match location {
        Location::Dir(dir) => {
            let path = dir.join(name);
            if !path.is_file() {
                anyhow::bail!(missing_file(name, location));
            }
            path
        }
        Location::Hub(repo_id) => {
            let api = api.context("hub client not initialised")?;
            api.model(repo_id.clone())
                .get(name)
                .await
                .with_context(|| missing_file(name, location))?
        }
    };
    tracing::debug!("{} -> {}", name, path.display());
    Ok(path)
}

impl ModelFiles {
    /// Resolve every file from its local directory or hub repository.
    pub async fn resolve(source: &ModelSource) -> Result<Self> {
        let api = if source.needs_hub() {
            tracing::info!("Fetching model files from {}", source);
            let api = ApiBuilder::new()
                .with_progress(true)
                .build()
                .context("failed to initialise hub client")?;
            Some(api)
        } else {
            None
        };
        let api = api.as_ref();

        Ok(Self {
            encoder: locate(api, source, ENCODER).await?,
            decoder: locate(api, source, DECODER).await?,
            config: locate(api, source, CONFIG).await?,
            preprocessor_config: locate(api, source, PREPROCESSOR_CONFIG).await?,
            vocab: locate(api, source, VOCAB).await?,
            special_tokens_map: locate(api, source, SPECIAL_TOKENS_MAP).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG_FILES: [&str; 4] = [CONFIG, PREPROCESSOR_CONFIG, VOCAB, SPECIAL_TOKENS_MAP];

    fn touch(dir: &Path, names: &[&str]) {
        for name in names {
            std::fs::write(dir.join(name), "").unwrap();
        }
    }

    #[test]
    fn test_default_source_takes_graphs_from_onnx_repo() {
        let source = ModelSource::new(DEFAULT_MODEL, None);
        for name in [ENCODER, DECODER] {
            assert_eq!(
                source.location_of(name),
                &Location::Hub(DEFAULT_ONNX_MODEL.to_string())
            );
        }
        for name in CONFIG_FILES {
            assert_eq!(
                source.location_of(name),
                &Location::Hub(DEFAULT_MODEL.to_string())
            );
        }
    }

    #[test]
    fn test_explicit_onnx_location() {
        let dir = tempfile::tempdir().unwrap();
        let onnx = dir.path().to_str().unwrap();
        let source = ModelSource::new(DEFAULT_MODEL, Some(onnx));
        assert_eq!(source.location_of(ENCODER), &Location::Dir(dir.path().to_path_buf()));
        assert_eq!(source.location_of(VOCAB), &Location::Hub(DEFAULT_MODEL.to_string()));

        let source = ModelSource::new(DEFAULT_MODEL, Some("someone/other-export"));
        assert_eq!(source.location_of(DECODER), &Location::Hub("someone/other-export".into()));
    }

    #[test]
    fn test_local_model_keeps_graphs_alongside() {
        let dir = tempfile::tempdir().unwrap();
        let source = ModelSource::new(dir.path().to_str().unwrap(), None);
        assert_eq!(source.onnx, source.model);
        assert!(!source.needs_hub());
    }

    #[tokio::test]
    async fn test_resolve_from_separate_dirs() {
        let configs = tempfile::tempdir().unwrap();
        let graphs = tempfile::tempdir().unwrap();
        touch(configs.path(), &CONFIG_FILES);
        touch(graphs.path(), &[ENCODER, DECODER]);

        let source = ModelSource::new(
            configs.path().to_str().unwrap(),
            Some(graphs.path().to_str().unwrap()),
        );
        let files = ModelFiles::resolve(&source).await.unwrap();
        assert_eq!(files.vocab, configs.path().join(VOCAB));
        assert_eq!(files.encoder, graphs.path().join(ENCODER));
        assert_eq!(files.decoder, graphs.path().join(DECODER));
    }

    #[tokio::test]
    async fn test_missing_graphs_explain_export() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &CONFIG_FILES);

        let source = ModelSource::new(dir.path().to_str().unwrap(), None);
        let err = ModelFiles::resolve(&source).await.unwrap_err().to_string();
        assert!(err.contains(ENCODER));
        assert!(err.contains("optimum-cli export onnx"));
        assert!(err.contains("--onnx-model"));
    }

    #[tokio::test]
    async fn test_missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &[ENCODER, DECODER, CONFIG]);

        let source = ModelSource::new(dir.path().to_str().unwrap(), None);
        let err = ModelFiles::resolve(&source).await.unwrap_err().to_string();
        assert!(err.contains("model file preprocessor_config.json not found"));
    }
}
