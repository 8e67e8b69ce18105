//! Raster core of a children's coloring book: pixel buffer, smoothed brush
//! strokes, tolerance flood fill, coverage-based completion, undo/redo and
//! durable snapshot storage with fallbacks.

pub mod buffer;
pub mod celebration;
pub mod completion;
pub mod cues;
pub mod error;
pub mod fill;
pub mod history;
pub mod logger;
pub mod outline;
pub mod palette;
pub mod persistence;
pub mod session;
pub mod settings;
pub mod stroke;
pub mod text;

pub use buffer::PixelBuffer;
pub use error::{CanvasError, StoreError};
pub use session::{ColoringSession, Collaborators, PageDescriptor};
pub use settings::ColoringSettings;
