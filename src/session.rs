//! One open coloring page: owns the buffer, the stroke renderer, the undo
//! stack and the completion latch, and talks to storage and the embedder's
//! collaborators (cue player, reward source, completion callback).

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::buffer::{EncodeFormat, PixelBuffer};
use crate::celebration::{SPARKLES_PER_CELEBRATION, Sparkle, sparkle_field};
use crate::completion::CompletionTracker;
use crate::cues::{Cue, CuePlayer, SilentCues};
use crate::error::{CanvasError, StoreError};
use crate::fill::flood_fill;
use crate::history::HistoryManager;
use crate::outline::outline_buffer;
use crate::palette::{BrushColor, BrushKind, BrushState, Palette};
use crate::persistence::{Persistence, SavedColoring, now_millis};
pub use crate::persistence::RestoreSource;
use crate::settings::ColoringSettings;
use crate::stroke::{PointerId, PointerSample, StrokeOutcome, StrokeRenderer};
use crate::text::error_placeholder;

pub const MIN_BRUSH_WIDTH: f32 = 1.0;
pub const MAX_BRUSH_WIDTH: f32 = 200.0;

/// Which page to open, as handed over by the page catalog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageDescriptor {
    pub id: u32,
    pub source_image_ref: String,
    pub display_name: String,
}

// ============================================================================
// COLLABORATORS
// ============================================================================

/// Fetches the encoded bytes of a page's source artwork.
pub trait SourceLoader: Send + Sync {
    fn load(&self, source_ref: &str) -> std::io::Result<Vec<u8>>;
}

impl<F> SourceLoader for F
where
    F: Fn(&str) -> std::io::Result<Vec<u8>> + Send + Sync,
{
    fn load(&self, source_ref: &str) -> std::io::Result<Vec<u8>> {
        self(source_ref)
    }
}

/// Resolves source references as paths under a root directory.
#[derive(Clone, Debug)]
pub struct FsSourceLoader {
    root: PathBuf,
}

impl FsSourceLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SourceLoader for FsSourceLoader {
    fn load(&self, source_ref: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.root.join(source_ref.trim_start_matches('/')))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reward {
    pub id: String,
    pub name: String,
    pub emoji: String,
    pub unlocked_at: i64,
}

/// Picks the reward granted when a page is completed.
pub trait RewardSource: Send + Sync {
    fn unlock(&self) -> Option<Reward>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoRewards;

impl RewardSource for NoRewards {
    fn unlock(&self) -> Option<Reward> {
        None
    }
}

/// Payload of the page-complete callback.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionEvent {
    pub page_id: u32,
    pub percentage: f32,
    pub reward: Option<Reward>,
    /// The session's celebration layout; the same for every event it fires.
    pub sparkles: Vec<Sparkle>,
}

pub type CompletionCallback = Box<dyn FnMut(CompletionEvent) + Send>;

pub struct Collaborators {
    pub cues: Arc<dyn CuePlayer>,
    pub rewards: Arc<dyn RewardSource>,
    pub on_complete: Option<CompletionCallback>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            cues: Arc::new(SilentCues),
            rewards: Arc::new(NoRewards),
            on_complete: None,
        }
    }
}

/// An encoded image ready to be offered as a download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportedImage {
    pub file_name: String,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

/// `<slug>-<YYYYMMDD-HHMMSS>.png`. The slug keeps lowercased ASCII
/// alphanumerics and joins every other run with one dash.
pub fn export_file_name(display_name: &str, at: DateTime<Local>) -> String {
    let mut slug = String::with_capacity(display_name.len());
    for c in display_name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    let slug = if slug.is_empty() { "artwork" } else { slug };
    format!("{}-{}.png", slug, at.format("%Y%m%d-%H%M%S"))
}

// ============================================================================
// COLORING SESSION
// ============================================================================

pub struct ColoringSession {
    id: Uuid,
    page: PageDescriptor,
    settings: ColoringSettings,
    palette: Palette,
    brush: BrushState,
    buffer: PixelBuffer,
    restored_from: RestoreSource,
    renderer: StrokeRenderer,
    history: HistoryManager,
    completion: CompletionTracker,
    sparkles: Vec<Sparkle>,
    persistence: Arc<Persistence>,
    loader: Arc<dyn SourceLoader>,
    collab: Collaborators,
}

impl ColoringSession {
    /// Open a page: the durable snapshot if one exists, else the legacy
    /// record, else the fresh source art, else an error placeholder.
    /// Never fails; each failed stage is logged and skipped.
    pub fn open(
        page: PageDescriptor,
        settings: ColoringSettings,
        palette: Palette,
        persistence: Arc<Persistence>,
        loader: Arc<dyn SourceLoader>,
        collab: Collaborators,
    ) -> Self {
        let id = Uuid::new_v4();
        let (w, h) = (settings.canvas_width, settings.canvas_height);

        let (buffer, restored_from) = match persistence.restore(page.id) {
            Some((buffer, source)) if buffer.dimensions() != (w, h) => {
                debug!(page_id = page.id, "restored artwork resized to canvas");
                (buffer.fit_canvas(w, h), source)
            }
            Some(restored) => restored,
            None => fresh_page(&page, &settings, loader.as_ref()),
        };

        let mut session = Self {
            id,
            brush: BrushState::new(&palette, settings.brush_width),
            renderer: StrokeRenderer::new(settings.stroke_config(), id.as_u128() as u64),
            history: settings.history(),
            completion: settings.completion_tracker(),
            sparkles: sparkle_field(
                (id.as_u128() >> 64) as u64,
                SPARKLES_PER_CELEBRATION,
                &palette,
            ),
            page,
            settings,
            palette,
            buffer,
            restored_from,
            persistence,
            loader,
            collab,
        };
        session.completion.prime(&session.buffer);
        session.record_history();
        info!(
            session = %session.id,
            page_id = session.page.id,
            source = ?session.restored_from,
            completion = session.completion.percentage(),
            "page opened"
        );
        session
    }

    // ---- pointer input -----------------------------------------------------

    /// With the fill brush a press fills at the pointer instead of starting
    /// a stroke.
    pub fn pointer_down(&mut self, sample: PointerSample) -> StrokeOutcome {
        if self.brush.kind == BrushKind::Fill {
            if self.renderer.is_drawing() {
                return StrokeOutcome::Ignored;
            }
            return if self.fill_at(sample.pos.x, sample.pos.y) {
                StrokeOutcome::Committed
            } else {
                StrokeOutcome::Ignored
            };
        }
        self.renderer.pointer_down(sample, &self.brush, &self.buffer)
    }

    pub fn pointer_move(&mut self, sample: PointerSample) -> StrokeOutcome {
        self.renderer.pointer_move(sample)
    }

    /// Paint whatever movement was queued since the last frame.
    pub fn render_frame(&mut self) -> bool {
        self.renderer
            .render_frame(&mut self.buffer, &self.brush, self.collab.cues.as_ref())
    }

    pub fn pointer_up(&mut self, pointer: PointerId) -> StrokeOutcome {
        let outcome =
            self.renderer
                .pointer_up(pointer, &mut self.buffer, &self.brush, self.collab.cues.as_ref());
        if outcome == StrokeOutcome::Committed {
            self.after_commit();
        }
        outcome
    }

    /// Leaving the canvas ends the stroke the same way as lifting.
    pub fn pointer_leave(&mut self, pointer: PointerId) -> StrokeOutcome {
        self.pointer_up(pointer)
    }

    pub fn pointer_cancel(&mut self, pointer: PointerId) -> StrokeOutcome {
        self.renderer.pointer_cancel(pointer, &mut self.buffer)
    }

    // ---- edits -------------------------------------------------------------

    /// Flood-fill the region under (`x`, `y`) with the current colour.
    /// Returns false when nothing changed.
    pub fn fill_at(&mut self, x: f32, y: f32) -> bool {
        let color = self.brush.color.rgba();
        match flood_fill(
            &mut self.buffer,
            x.floor() as i32,
            y.floor() as i32,
            color,
            self.settings.fill_tolerance,
        ) {
            Some(report) => {
                debug!(page_id = self.page.id, filled = report.filled, "region filled");
                self.after_commit();
                true
            }
            None => false,
        }
    }

    pub fn undo(&mut self) -> bool {
        self.renderer.abort(&mut self.buffer);
        let Some(restored) = self.history.undo() else {
            return false;
        };
        self.apply_restore(restored);
        true
    }

    pub fn redo(&mut self) -> bool {
        self.renderer.abort(&mut self.buffer);
        let Some(restored) = self.history.redo() else {
            return false;
        };
        self.apply_restore(restored);
        true
    }

    fn apply_restore(&mut self, restored: PixelBuffer) {
        self.buffer = restored;
        self.collab.cues.play(Cue::Whoosh);
        self.update_completion();
    }

    /// Start over from the original source art. Completion drops to 0 and
    /// the page-complete event can fire again.
    pub fn clear(&mut self) {
        self.renderer.abort(&mut self.buffer);
        let (buffer, source) = fresh_page(&self.page, &self.settings, self.loader.as_ref());
        self.buffer = buffer;
        self.restored_from = source;
        self.completion.reset();
        self.collab.cues.play(Cue::Clear);
        self.record_history();
        // Overwrite the stored artwork so a reopen shows the cleared page.
        self.persistence
            .save_snapshot_async(self.page.id, self.buffer.clone());
        info!(page_id = self.page.id, "page cleared");
    }

    // ---- brush -------------------------------------------------------------

    /// Select a palette colour by name. Colours outside the palette are
    /// rejected and the selection is left unchanged.
    pub fn select_color(&mut self, name: &str) -> bool {
        match self.palette.find(name) {
            Some(color) => {
                self.brush.color = color.clone();
                self.collab.cues.play(Cue::LetsGo);
                true
            }
            None => {
                warn!(color = name, "colour not in palette");
                false
            }
        }
    }

    pub fn select_brush(&mut self, kind: BrushKind) {
        self.brush.kind = kind;
        match kind {
            BrushKind::Glitter => self.collab.cues.play(Cue::Sparkle),
            BrushKind::Laser => self.collab.cues.play(Cue::PowerChord),
            _ => {}
        }
    }

    pub fn set_brush_width(&mut self, width: f32) {
        self.brush.width = width.clamp(MIN_BRUSH_WIDTH, MAX_BRUSH_WIDTH);
    }

    // ---- queries -----------------------------------------------------------

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn page(&self) -> &PageDescriptor {
        &self.page
    }

    pub fn buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    pub fn brush(&self) -> &BrushState {
        &self.brush
    }

    pub fn color(&self) -> &BrushColor {
        &self.brush.color
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn restored_from(&self) -> RestoreSource {
        self.restored_from
    }

    pub fn completion(&self) -> f32 {
        self.completion.percentage()
    }

    /// Sparkles to show when the page completes, fixed for the session.
    pub fn sparkles(&self) -> &[Sparkle] {
        &self.sparkles
    }

    pub fn is_complete(&self) -> bool {
        self.completion.is_latched()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn is_drawing(&self) -> bool {
        self.renderer.is_drawing()
    }

    // ---- output ------------------------------------------------------------

    pub fn export_png(&self, at: DateTime<Local>) -> Result<ExportedImage, CanvasError> {
        let format = EncodeFormat::Png;
        Ok(ExportedImage {
            file_name: export_file_name(&self.page.display_name, at),
            mime_type: format.mime_type(),
            bytes: self.buffer.encode(format)?,
        })
    }

    /// Write the current buffer to durable storage now, bypassing the
    /// every-Nth-entry schedule.
    pub fn save_now(&self) -> Result<(), StoreError> {
        self.persistence.save_snapshot(self.page.id, &self.buffer)
    }

    /// Store the page in the legacy list format as well.
    pub fn save_legacy(&self) -> Result<(), StoreError> {
        let record = SavedColoring::from_buffer(
            self.page.id,
            &self.buffer,
            self.completion.percentage(),
            now_millis(),
        )?;
        self.persistence.save_legacy(record)
    }

    /// Wait until queued snapshot writes have reached the store.
    pub fn flush(&self) {
        self.persistence.flush();
    }

    // ---- internals ---------------------------------------------------------

    fn after_commit(&mut self) {
        self.record_history();
        self.update_completion();
    }

    /// Push the buffer onto the undo stack; every Nth push is also queued
    /// for durable storage.
    fn record_history(&mut self) {
        if let Err(e) = self.history.record(&self.buffer) {
            warn!(page_id = self.page.id, stage = "history", "history entry dropped: {}", e);
            return;
        }
        debug!(
            page_id = self.page.id,
            entries = self.history.len(),
            bytes = self.history.memory_usage(),
            "history recorded"
        );
        if self.history.recorded() % self.settings.snapshot_interval.max(1) == 0 {
            self.persistence
                .save_snapshot_async(self.page.id, self.buffer.clone());
        }
    }

    fn update_completion(&mut self) {
        let update = self.completion.update(&self.buffer);
        if !update.crossed {
            return;
        }
        self.collab.cues.play(Cue::Cheer);
        let reward = self.collab.rewards.unlock();
        info!(
            page_id = self.page.id,
            percentage = update.percentage,
            reward = reward.as_ref().map(|r| r.name.as_str()),
            "page complete"
        );
        if let Some(callback) = self.collab.on_complete.as_mut() {
            callback(CompletionEvent {
                page_id: self.page.id,
                percentage: update.percentage,
                reward,
                sparkles: self.sparkles.clone(),
            });
        }
    }
}

/// The page's source art on a white canvas, optionally outlined. Falls back
/// to the error placeholder when the art cannot be fetched or decoded.
fn fresh_page(
    page: &PageDescriptor,
    settings: &ColoringSettings,
    loader: &dyn SourceLoader,
) -> (PixelBuffer, RestoreSource) {
    let (w, h) = (settings.canvas_width, settings.canvas_height);
    let decoded = loader
        .load(&page.source_image_ref)
        .map_err(|e| e.to_string())
        .and_then(|bytes| image::load_from_memory(&bytes).map_err(|e| e.to_string()));
    let source = match decoded {
        Ok(source) => source,
        Err(e) => {
            warn!(
                page_id = page.id,
                source = %page.source_image_ref,
                stage = "source",
                "source art unusable, showing placeholder: {}",
                e
            );
            return (error_placeholder(w, h), RestoreSource::Placeholder);
        }
    };

    let composed = PixelBuffer::compose_source(&source, w, h, settings.source_fit);
    if !settings.outline_on_load {
        return (composed, RestoreSource::Fresh);
    }
    match outline_buffer(&composed, settings.outline_threshold) {
        Ok(lines) => (lines, RestoreSource::Fresh),
        Err(e) => {
            warn!(page_id = page.id, stage = "outline", "outline conversion failed: {}", e);
            (composed, RestoreSource::Fresh)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cues::RecordedCues;
    use crate::stroke::Point;
    use chrono::TimeZone;
    use image::{ImageEncoder, Rgba, RgbaImage};
    use std::sync::Mutex;

    fn png(img: &RgbaImage) -> Vec<u8> {
        let mut out = Vec::new();
        image::codecs::png::PngEncoder::new(&mut out)
            .write_image(img.as_raw(), img.width(), img.height(), image::ColorType::Rgba8)
            .unwrap();
        out
    }

    fn small_settings() -> ColoringSettings {
        ColoringSettings {
            canvas_width: 40,
            canvas_height: 30,
            ..ColoringSettings::default()
        }
    }

    fn page() -> PageDescriptor {
        PageDescriptor {
            id: 1,
            source_image_ref: "page.png".into(),
            display_name: "Star Stage".into(),
        }
    }

    fn white_source() -> Arc<dyn SourceLoader> {
        let bytes = png(&RgbaImage::from_pixel(40, 30, Rgba([255, 255, 255, 255])));
        Arc::new(move |_: &str| Ok::<_, std::io::Error>(bytes.clone()))
    }

    fn open_with(collab: Collaborators) -> ColoringSession {
        ColoringSession::open(
            page(),
            small_settings(),
            Palette::default(),
            Arc::new(Persistence::in_memory()),
            white_source(),
            collab,
        )
    }

    fn sample(x: f32, y: f32, t: u64) -> PointerSample {
        PointerSample {
            pointer: 1,
            pos: Point::new(x, y),
            time_ms: t,
        }
    }

    #[test]
    fn export_names_are_slugged_and_stamped() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(export_file_name("Star Stage!", at), "star-stage-20240309-140507.png");
        assert_eq!(export_file_name("  --Lisa's  Mic--", at), "lisa-s-mic-20240309-140507.png");
        assert_eq!(export_file_name("★", at), "artwork-20240309-140507.png");
    }

    #[test]
    fn broken_source_shows_placeholder() {
        let session = ColoringSession::open(
            page(),
            small_settings(),
            Palette::default(),
            Arc::new(Persistence::in_memory()),
            Arc::new(|_: &str| Ok::<_, std::io::Error>(b"not an image".to_vec())),
            Collaborators::default(),
        );
        assert_eq!(session.restored_from(), RestoreSource::Placeholder);
        assert_eq!(session.buffer().dimensions(), (40, 30));
    }

    #[test]
    fn missing_source_file_shows_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let session = ColoringSession::open(
            page(),
            small_settings(),
            Palette::default(),
            Arc::new(Persistence::in_memory()),
            Arc::new(FsSourceLoader::new(dir.path())),
            Collaborators::default(),
        );
        assert_eq!(session.restored_from(), RestoreSource::Placeholder);
    }

    #[test]
    fn fill_brush_fills_on_press() {
        let mut session = open_with(Collaborators::default());
        session.select_brush(BrushKind::Fill);
        assert!(session.select_color("Red"));
        assert_eq!(session.pointer_down(sample(5.0, 5.0, 0)), StrokeOutcome::Committed);
        assert_eq!(session.buffer().get_pixel(39, 29), Rgba([255, 0, 0, 255]));
        assert_eq!(session.completion(), 100.0);
        // Same colour again: nothing to do, no new history entry.
        let entries = session.history().len();
        assert!(!session.fill_at(1.0, 1.0));
        assert_eq!(session.history().len(), entries);
    }

    #[test]
    fn colour_outside_palette_is_rejected() {
        let cues = Arc::new(RecordedCues::default());
        let mut session = open_with(Collaborators {
            cues: cues.clone(),
            ..Collaborators::default()
        });
        let before = session.color().clone();
        assert!(!session.select_color("Chartreuse"));
        assert_eq!(session.color(), &before);
        assert!(session.select_color("gold"));
        assert_eq!(session.color().name, "Gold");
        assert_eq!(cues.played(), vec![Cue::LetsGo]);
    }

    #[test]
    fn brush_selection_plays_cues_and_width_is_clamped() {
        let cues = Arc::new(RecordedCues::default());
        let mut session = open_with(Collaborators {
            cues: cues.clone(),
            ..Collaborators::default()
        });
        session.select_brush(BrushKind::Glitter);
        session.select_brush(BrushKind::Laser);
        session.select_brush(BrushKind::Crayon);
        assert_eq!(cues.played(), vec![Cue::Sparkle, Cue::PowerChord]);
        session.set_brush_width(0.0);
        assert_eq!(session.brush().width, MIN_BRUSH_WIDTH);
        session.set_brush_width(1e6);
        assert_eq!(session.brush().width, MAX_BRUSH_WIDTH);
    }

    #[test]
    fn undo_during_a_stroke_discards_it_first() {
        let mut session = open_with(Collaborators::default());
        let opened = session.buffer().clone();
        session.pointer_down(sample(5.0, 5.0, 0));
        session.pointer_move(sample(20.0, 5.0, 16));
        session.render_frame();
        assert_ne!(session.buffer(), &opened);
        assert!(!session.undo());
        assert!(!session.is_drawing());
        assert_eq!(session.buffer(), &opened);
    }

    #[test]
    fn completion_fires_callback_with_reward_once() {
        struct OneReward;
        impl RewardSource for OneReward {
            fn unlock(&self) -> Option<Reward> {
                Some(Reward {
                    id: "mic".into(),
                    name: "Golden Mic".into(),
                    emoji: "🎤".into(),
                    unlocked_at: 0,
                })
            }
        }
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let cues = Arc::new(RecordedCues::default());
        let mut session = open_with(Collaborators {
            cues: cues.clone(),
            rewards: Arc::new(OneReward),
            on_complete: Some(Box::new(move |e| sink.lock().unwrap().push(e))),
        });
        session.select_brush(BrushKind::Fill);
        session.fill_at(0.0, 0.0);
        session.select_color("Lime");
        session.fill_at(0.0, 0.0);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].page_id, 1);
        assert_eq!(events[0].reward.as_ref().unwrap().name, "Golden Mic");
        assert_eq!(events[0].sparkles.len(), SPARKLES_PER_CELEBRATION);
        assert_eq!(events[0].sparkles.as_slice(), session.sparkles());
        assert_eq!(cues.count(Cue::Cheer), 1);
    }

    #[test]
    fn outline_on_load_converts_source() {
        let mut img = RgbaImage::from_pixel(40, 30, Rgba([255, 255, 255, 255]));
        for y in 0..30 {
            for x in 20..40 {
                img.put_pixel(x, y, Rgba([0, 0, 200, 255]));
            }
        }
        let bytes = png(&img);
        let settings = ColoringSettings {
            outline_on_load: true,
            source_fit: 1.0,
            ..small_settings()
        };
        let session = ColoringSession::open(
            page(),
            settings,
            Palette::default(),
            Arc::new(Persistence::in_memory()),
            Arc::new(move |_: &str| Ok::<_, std::io::Error>(bytes.clone())),
            Collaborators::default(),
        );
        assert_eq!(session.buffer().get_pixel(35, 15), Rgba([255, 255, 255, 255]));
        assert_eq!(session.buffer().get_pixel(20, 15), Rgba([0, 0, 0, 255]));
    }
}
