//! Older clients kept every saved page in one JSON list under a single key,
//! each image inlined as a base64 data URL. This module reads and writes
//! that list.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::buffer::{EncodeFormat, PixelBuffer};
use crate::error::{CanvasError, StoreError};

pub const LEGACY_KEY: &str = "kpop-colorings";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SavedColoring {
    pub page_id: u32,
    pub data_url: String,
    pub timestamp: i64,
    #[serde(default)]
    pub completion_percentage: f32,
}

impl SavedColoring {
    pub fn from_buffer(
        page_id: u32,
        buffer: &PixelBuffer,
        completion_percentage: f32,
        timestamp: i64,
    ) -> Result<Self, CanvasError> {
        let format = EncodeFormat::Png;
        Ok(Self {
            page_id,
            data_url: encode_data_url(format.mime_type(), &buffer.encode(format)?),
            timestamp,
            completion_percentage,
        })
    }

    pub fn decode(&self) -> Result<PixelBuffer, CanvasError> {
        PixelBuffer::decode(&decode_data_url(&self.data_url)?)
    }
}

pub fn encode_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Payload bytes of a `data:<mime>;base64,<payload>` URL.
pub fn decode_data_url(url: &str) -> Result<Vec<u8>, CanvasError> {
    let rest = url.strip_prefix("data:").ok_or(CanvasError::DataUrl)?;
    let (header, payload) = rest.split_once(',').ok_or(CanvasError::DataUrl)?;
    if !header.ends_with(";base64") {
        return Err(CanvasError::DataUrl);
    }
    Ok(STANDARD.decode(payload.trim())?)
}

pub fn parse_list(raw: &[u8]) -> Result<Vec<SavedColoring>, StoreError> {
    Ok(serde_json::from_slice(raw)?)
}

pub fn encode_list(records: &[SavedColoring]) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(records)?)
}

/// Most recent record for `page_id`.
pub fn latest_for(records: &[SavedColoring], page_id: u32) -> Option<&SavedColoring> {
    records
        .iter()
        .filter(|r| r.page_id == page_id)
        .max_by_key(|r| r.timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::WHITE;

    #[test]
    fn parses_the_camel_case_wire_format() {
        let json = br#"[
            {"pageId": 3, "dataUrl": "data:image/png;base64,AAAA", "timestamp": 10, "completionPercentage": 12.5},
            {"pageId": 3, "dataUrl": "data:image/png;base64,BBBB", "timestamp": 20}
        ]"#;
        let list = parse_list(json).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].completion_percentage, 12.5);
        assert_eq!(list[1].completion_percentage, 0.0);
        assert_eq!(latest_for(&list, 3).unwrap().timestamp, 20);
        assert!(latest_for(&list, 4).is_none());
    }

    #[test]
    fn data_url_round_trip() {
        let url = encode_data_url("image/png", &[1, 2, 3]);
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(decode_data_url(&url).unwrap(), vec![1, 2, 3]);
        assert!(matches!(decode_data_url("image/png;base64,AQID"), Err(CanvasError::DataUrl)));
        assert!(matches!(decode_data_url("data:image/png,AQID"), Err(CanvasError::DataUrl)));
        assert!(matches!(decode_data_url("data:image/png;base64,@@"), Err(CanvasError::Base64(_))));
    }

    #[test]
    fn record_decodes_back_to_buffer() {
        let buf = PixelBuffer::new_filled(5, 4, WHITE);
        let record = SavedColoring::from_buffer(9, &buf, 0.0, 1).unwrap();
        assert_eq!(record.decode().unwrap(), buf);
        let json = String::from_utf8(encode_list(&[record]).unwrap()).unwrap();
        assert!(json.contains("\"pageId\":9"));
        assert!(json.contains("\"completionPercentage\""));
    }
}
