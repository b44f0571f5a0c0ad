use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DevError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Font error: {0}")]
    Font(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Invalid data: {0}")]
    Data(String),
}

pub type Result<T> = std::result::Result<T, DevError>;
