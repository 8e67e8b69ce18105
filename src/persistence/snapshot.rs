use serde::{Deserialize, Serialize};

use crate::buffer::{EncodeFormat, MAX_CANVAS_DIM, PixelBuffer};
use crate::error::{CanvasError, StoreError};

/// Leading field of every serialized record.
pub const SNAPSHOT_MAGIC: &str = "CBS1";
const KEY_PREFIX: &str = "snapshot-";

pub fn snapshot_key(page_id: u32) -> String {
    format!("{KEY_PREFIX}{page_id}")
}

/// Inverse of [`snapshot_key`].
pub fn page_id_from_key(key: &str) -> Option<u32> {
    key.strip_prefix(KEY_PREFIX)?.parse().ok()
}

/// Durable copy of a page's buffer, stored under `snapshot-<page_id>`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SnapshotRecord {
    magic: String,
    pub page_id: u32,
    /// PNG bytes of the buffer.
    pub encoded_image: Vec<u8>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub width: u32,
    pub height: u32,
    pub byte_size: u64,
}

impl SnapshotRecord {
    pub fn capture(page_id: u32, buffer: &PixelBuffer, timestamp: i64) -> Result<Self, CanvasError> {
        let encoded_image = buffer.encode(EncodeFormat::Png)?;
        Ok(Self {
            magic: SNAPSHOT_MAGIC.to_string(),
            page_id,
            byte_size: encoded_image.len() as u64,
            encoded_image,
            timestamp,
            width: buffer.width(),
            height: buffer.height(),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize and validate the header fields.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, StoreError> {
        let record: SnapshotRecord = bincode::deserialize(raw)?;
        if record.magic != SNAPSHOT_MAGIC {
            return Err(StoreError::InvalidFormat(format!(
                "unknown magic '{}'",
                record.magic
            )));
        }
        if record.width == 0
            || record.height == 0
            || record.width > MAX_CANVAS_DIM
            || record.height > MAX_CANVAS_DIM
        {
            return Err(StoreError::InvalidFormat(format!(
                "snapshot size {}x{} out of range",
                record.width, record.height
            )));
        }
        if record.byte_size != record.encoded_image.len() as u64 {
            return Err(StoreError::InvalidFormat(format!(
                "byte size {} does not match payload of {} bytes",
                record.byte_size,
                record.encoded_image.len()
            )));
        }
        Ok(record)
    }

    /// Decode the image payload. A payload whose dimensions disagree with
    /// the header is rejected.
    pub fn decode(&self) -> Result<PixelBuffer, StoreError> {
        let buffer = PixelBuffer::decode(&self.encoded_image)?;
        if buffer.dimensions() != (self.width, self.height) {
            return Err(StoreError::InvalidFormat(format!(
                "payload is {}x{}, header says {}x{}",
                buffer.width(),
                buffer.height(),
                self.width,
                self.height
            )));
        }
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::WHITE;
    use image::Rgba;

    fn sample() -> PixelBuffer {
        let mut buf = PixelBuffer::new_filled(12, 9, WHITE);
        buf.set_pixel(3, 4, Rgba([10, 200, 30, 255]));
        buf
    }

    #[test]
    fn key_helpers_agree() {
        assert_eq!(snapshot_key(42), "snapshot-42");
        assert_eq!(page_id_from_key("snapshot-42"), Some(42));
        assert_eq!(page_id_from_key("kpop-colorings"), None);
        assert_eq!(page_id_from_key("snapshot-x"), None);
    }

    #[test]
    fn record_restores_exact_pixels() {
        let record = SnapshotRecord::capture(42, &sample(), 1_700_000_000_000).unwrap();
        assert_eq!(record.byte_size, record.encoded_image.len() as u64);
        let back = SnapshotRecord::from_bytes(&record.to_bytes().unwrap()).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.decode().unwrap(), sample());
    }

    #[test]
    fn rejects_wrong_magic_and_truncated_bytes() {
        let mut record = SnapshotRecord::capture(1, &sample(), 0).unwrap();
        record.magic = "NOPE".into();
        let raw = record.to_bytes().unwrap();
        assert!(matches!(
            SnapshotRecord::from_bytes(&raw),
            Err(StoreError::InvalidFormat(_))
        ));
        assert!(SnapshotRecord::from_bytes(&raw[..6]).is_err());
    }

    #[test]
    fn rejects_header_payload_mismatch() {
        let mut record = SnapshotRecord::capture(1, &sample(), 0).unwrap();
        record.width = 13;
        assert!(record.decode().is_err());
    }
}
