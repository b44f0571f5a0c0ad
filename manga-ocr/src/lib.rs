mod hub;

pub mod golden;
pub mod manga_ocr;
pub mod run;

pub use hub::{Location, ModelFiles, ModelSource, DEFAULT_MODEL, DEFAULT_ONNX_MODEL};
pub use manga_ocr::{
    post_process, preprocess, LoadOptions, MangaOcr, OcrTokenizer, PreprocessorConfig,
};

use std::time::Instant;

use image::{DynamicImage, GrayImage, Luma};
use ort::execution_providers::ExecutionProviderDispatch;

const WARM_UP_SIZE: (u32, u32) = (64, 64);

/// Anything that turns an image crop into text.
pub trait Recognizer {
    fn recognize(&mut self, image: &DynamicImage) -> anyhow::Result<String>;

    /// Recognize a blank page once and discard the result.
    fn warm_up(&mut self) -> anyhow::Result<()> {
        let started = Instant::now();
        let blank = GrayImage::from_pixel(WARM_UP_SIZE.0, WARM_UP_SIZE.1, Luma([255]));
        self.recognize(&DynamicImage::ImageLuma8(blank))?;
        tracing::debug!("Warm-up took {:?}", started.elapsed());
        Ok(())
    }
}

pub fn cuda_is_available() -> bool {
    (unsafe {
        libloading::Library::new(if cfg!(target_os = "windows") {
            "nvcuda.dll"
        } else {
            "libcuda.so"
        })
        .is_ok()
    }) && cfg!(feature = "cuda")
}

pub fn coreml_is_available() -> bool {
    cfg!(feature = "coreml") && cfg!(target_vendor = "apple")
}

/// Execution providers to register on the ONNX sessions, in priority order.
/// An empty list means plain CPU execution.
pub fn execution_providers(force_cpu: bool) -> Vec<ExecutionProviderDispatch> {
    #[allow(unused_mut)]
    let mut providers = Vec::new();
    if force_cpu {
        return providers;
    }

    #[cfg(feature = "cuda")]
    if cuda_is_available() {
        providers.push(ort::execution_providers::CUDAExecutionProvider::default().build());
    }

    #[cfg(feature = "coreml")]
    if coreml_is_available() {
        providers.push(ort::execution_providers::CoreMLExecutionProvider::default().build());
    }

    providers
}

pub fn device_name(force_cpu: bool) -> &'static str {
    if force_cpu {
        "CPU"
    } else if cuda_is_available() {
        "CUDA"
    } else if coreml_is_available() {
        "CoreML"
    } else {
        "CPU"
    }
}
