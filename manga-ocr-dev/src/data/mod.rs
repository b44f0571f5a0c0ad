pub mod backgrounds;
pub mod manga109;

pub use backgrounds::{find_rectangle, Background, BackgroundCatalog};
pub use manga109::{FrameRow, TextRow};
