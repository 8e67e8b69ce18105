use thiserror::Error;

/// Failures while decoding, encoding or reshaping pixel data.
#[derive(Debug, Error)]
pub enum CanvasError {
    #[error("could not decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("could not encode image: {0}")]
    Encode(#[source] image::ImageError),
    #[error("invalid buffer dimensions {width}x{height} for {len} bytes")]
    Dimensions { width: u32, height: u32, len: usize },
    #[error("malformed data URL")]
    DataUrl,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Failures of a durable key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] bincode::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid base64 value: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid snapshot record: {0}")]
    InvalidFormat(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Canvas(#[from] CanvasError),
}
