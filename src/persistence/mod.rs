//! Durable storage for page artwork.
//!
//! Snapshots are written under `snapshot-<page_id>` through a background
//! writer. Older saves may also exist in the legacy list. Reads try the
//! snapshot first, then the legacy list.

pub mod legacy;
pub mod snapshot;
pub mod store;
pub mod writer;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::buffer::PixelBuffer;
use crate::error::StoreError;
pub use legacy::{LEGACY_KEY, SavedColoring};
pub use snapshot::{SnapshotRecord, snapshot_key};
pub use store::{DirectoryStore, FallbackStore, FlatFileStore, KeyValueStore, MemoryStore};
use writer::SnapshotWriter;

/// Where an opened page's pixels came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestoreSource {
    Snapshot,
    Legacy,
    Fresh,
    Placeholder,
}

/// One row of the saved-artwork gallery.
#[derive(Clone, Debug, PartialEq)]
pub struct SavedArtwork {
    pub page_id: u32,
    pub timestamp: i64,
    pub source: RestoreSource,
    pub dimensions: Option<(u32, u32)>,
    pub byte_size: u64,
    pub completion: Option<f32>,
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub struct Persistence {
    store: Arc<dyn KeyValueStore>,
    writer: SnapshotWriter,
}

impl Persistence {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let writer = SnapshotWriter::spawn(Arc::clone(&store));
        Self { store, writer }
    }

    /// Directory-backed store at `<dir>/snapshots` with a flat JSON file
    /// `<dir>/colorings.json` as fallback.
    pub fn open_dir(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        let primary: Option<Arc<dyn KeyValueStore>> =
            match DirectoryStore::open(dir.join("snapshots")) {
                Ok(store) => Some(Arc::new(store)),
                Err(e) => {
                    warn!(dir = %dir.display(), "snapshot directory unavailable: {}", e);
                    None
                }
            };
        let fallback = Arc::new(FlatFileStore::new(dir.join("colorings.json")));
        info!(dir = %dir.display(), "artwork store opened");
        Ok(Self::new(Arc::new(FallbackStore::new(primary, fallback))))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Queue a snapshot write; returns immediately.
    pub fn save_snapshot_async(&self, page_id: u32, buffer: PixelBuffer) {
        self.writer.submit(page_id, buffer, now_millis());
    }

    pub fn save_snapshot(&self, page_id: u32, buffer: &PixelBuffer) -> Result<(), StoreError> {
        self.writer.flush();
        writer::write_snapshot(self.store.as_ref(), page_id, buffer, now_millis())
    }

    /// Wait for queued snapshot writes.
    pub fn flush(&self) {
        self.writer.flush();
    }

    pub fn load_snapshot(&self, page_id: u32) -> Result<Option<PixelBuffer>, StoreError> {
        Ok(self.snapshot_record(page_id)?.map(|r| r.decode()).transpose()?)
    }

    fn snapshot_record(&self, page_id: u32) -> Result<Option<SnapshotRecord>, StoreError> {
        self.writer.flush();
        match self.store.get(&snapshot_key(page_id))? {
            Some(raw) => Ok(Some(SnapshotRecord::from_bytes(&raw)?)),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Legacy list
    // ------------------------------------------------------------------

    pub fn legacy_records(&self) -> Result<Vec<SavedColoring>, StoreError> {
        match self.store.get(LEGACY_KEY)? {
            Some(raw) => legacy::parse_list(&raw),
            None => Ok(Vec::new()),
        }
    }

    pub fn load_legacy(&self, page_id: u32) -> Result<Option<PixelBuffer>, StoreError> {
        let records = self.legacy_records()?;
        match legacy::latest_for(&records, page_id) {
            Some(record) => Ok(Some(record.decode()?)),
            None => Ok(None),
        }
    }

    /// Insert or replace the legacy record for its page.
    pub fn save_legacy(&self, record: SavedColoring) -> Result<(), StoreError> {
        let mut records = self.legacy_records().unwrap_or_else(|e| {
            warn!(stage = "legacy-read", "discarding unreadable legacy list: {}", e);
            Vec::new()
        });
        records.retain(|r| r.page_id != record.page_id);
        records.push(record);
        self.store.put(LEGACY_KEY, &legacy::encode_list(&records)?)
    }

    // ------------------------------------------------------------------
    // Load chain
    // ------------------------------------------------------------------

    /// Saved artwork for a page: the durable snapshot, else the newest
    /// legacy record. Every failure is logged and falls through.
    pub fn restore(&self, page_id: u32) -> Option<(PixelBuffer, RestoreSource)> {
        match self.load_snapshot(page_id) {
            Ok(Some(buffer)) => return Some((buffer, RestoreSource::Snapshot)),
            Ok(None) => {}
            Err(e) => warn!(page_id, stage = "snapshot", "snapshot unusable: {}", e),
        }
        match self.load_legacy(page_id) {
            Ok(Some(buffer)) => return Some((buffer, RestoreSource::Legacy)),
            Ok(None) => {}
            Err(e) => warn!(page_id, stage = "legacy", "legacy record unusable: {}", e),
        }
        None
    }

    // ------------------------------------------------------------------
    // Gallery
    // ------------------------------------------------------------------

    /// Every page with saved artwork, newest first. A page with both a
    /// snapshot and a legacy record is listed once, by its newer save.
    pub fn saved_artworks(&self) -> Result<Vec<SavedArtwork>, StoreError> {
        self.writer.flush();
        let mut by_page: BTreeMap<u32, SavedArtwork> = BTreeMap::new();
        let mut keep_newest = |art: SavedArtwork| {
            let slot = by_page.entry(art.page_id).or_insert_with(|| art.clone());
            if art.timestamp > slot.timestamp {
                *slot = art;
            }
        };

        for key in self.store.keys()? {
            let Some(page_id) = snapshot::page_id_from_key(&key) else {
                continue;
            };
            match self.snapshot_record(page_id) {
                Ok(Some(record)) => keep_newest(SavedArtwork {
                    page_id,
                    timestamp: record.timestamp,
                    source: RestoreSource::Snapshot,
                    dimensions: Some((record.width, record.height)),
                    byte_size: record.byte_size,
                    completion: None,
                }),
                Ok(None) => {}
                Err(e) => warn!(page_id, stage = "gallery", "skipping unreadable snapshot: {}", e),
            }
        }

        match self.legacy_records() {
            Ok(records) => {
                for record in records {
                    keep_newest(SavedArtwork {
                        page_id: record.page_id,
                        timestamp: record.timestamp,
                        source: RestoreSource::Legacy,
                        dimensions: None,
                        byte_size: record.data_url.len() as u64,
                        completion: Some(record.completion_percentage),
                    });
                }
            }
            Err(e) => warn!(stage = "gallery", "legacy list unreadable: {}", e),
        }

        let mut artworks: Vec<SavedArtwork> = by_page.into_values().collect();
        artworks.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(a.page_id.cmp(&b.page_id)));
        Ok(artworks)
    }

    /// Remove both the snapshot and any legacy records for a page.
    pub fn delete_artwork(&self, page_id: u32) -> Result<(), StoreError> {
        self.writer.flush();
        self.store.delete(&snapshot_key(page_id))?;
        let mut records = self.legacy_records()?;
        let before = records.len();
        records.retain(|r| r.page_id != page_id);
        if records.len() != before {
            self.store.put(LEGACY_KEY, &legacy::encode_list(&records)?)?;
        }
        info!(page_id, "saved artwork deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::WHITE;
    use image::Rgba;

    fn page(mark: u8) -> PixelBuffer {
        let mut buf = PixelBuffer::new_filled(10, 10, WHITE);
        buf.set_pixel(1, 1, Rgba([mark, 0, 0, 255]));
        buf
    }

    #[test]
    fn snapshot_wins_over_legacy() {
        let p = Persistence::in_memory();
        p.save_legacy(SavedColoring::from_buffer(5, &page(1), 10.0, 1).unwrap())
            .unwrap();
        assert_eq!(p.restore(5), Some((page(1), RestoreSource::Legacy)));
        p.save_snapshot_async(5, page(2));
        assert_eq!(p.restore(5), Some((page(2), RestoreSource::Snapshot)));
        assert_eq!(p.restore(6), None);
    }

    #[test]
    fn corrupt_snapshot_falls_through_to_legacy() {
        let p = Persistence::in_memory();
        p.store().put(&snapshot_key(3), b"garbage").unwrap();
        p.save_legacy(SavedColoring::from_buffer(3, &page(7), 0.0, 1).unwrap())
            .unwrap();
        assert_eq!(p.restore(3), Some((page(7), RestoreSource::Legacy)));
    }

    #[test]
    fn gallery_lists_newest_first_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let p = Persistence::open_dir(dir.path()).unwrap();
        p.save_legacy(SavedColoring::from_buffer(1, &page(1), 40.0, 100).unwrap())
            .unwrap();
        p.save_legacy(SavedColoring::from_buffer(2, &page(2), 90.0, i64::MAX - 1).unwrap())
            .unwrap();
        p.save_snapshot(3, &page(3)).unwrap();

        let list = p.saved_artworks().unwrap();
        let ids: Vec<u32> = list.iter().map(|a| a.page_id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
        assert_eq!(list[1].dimensions, Some((10, 10)));
        assert_eq!(list[2].completion, Some(40.0));

        p.delete_artwork(2).unwrap();
        p.delete_artwork(3).unwrap();
        let ids: Vec<u32> = p.saved_artworks().unwrap().iter().map(|a| a.page_id).collect();
        assert_eq!(ids, vec![1]);
        assert_eq!(p.restore(3), None);
    }

    #[test]
    fn save_legacy_replaces_existing_page_entry() {
        let p = Persistence::in_memory();
        p.save_legacy(SavedColoring::from_buffer(1, &page(1), 0.0, 1).unwrap())
            .unwrap();
        p.save_legacy(SavedColoring::from_buffer(1, &page(2), 0.0, 2).unwrap())
            .unwrap();
        assert_eq!(p.legacy_records().unwrap().len(), 1);
        assert_eq!(p.load_legacy(1).unwrap(), Some(page(2)));
    }

    #[test]
    fn directory_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let p = Persistence::open_dir(dir.path()).unwrap();
            p.save_snapshot_async(42, page(9));
        }
        let p = Persistence::open_dir(dir.path()).unwrap();
        assert_eq!(p.load_snapshot(42).unwrap(), Some(page(9)));
    }
}
