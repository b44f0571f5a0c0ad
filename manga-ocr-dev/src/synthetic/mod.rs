pub mod compose;
pub mod css;
pub mod fonts;
pub mod generator;
pub mod renderer;
pub mod run_generate;
pub mod scan_fonts;
pub mod segmenter;

pub use compose::Renderer;
pub use css::{CssOverrides, CssParams};
pub use fonts::{FontCatalog, FontInfo};
pub use generator::{LengthDistribution, Sample, SyntheticDataGenerator};
pub use renderer::{ChromeRenderer, HtmlRenderer};
pub use segmenter::{ScriptSegmenter, Segmenter, TinySegmenter};
