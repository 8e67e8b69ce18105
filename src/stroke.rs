use image::Rgba;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use crate::buffer::PixelBuffer;
use crate::cues::{Cue, CuePlayer};
use crate::palette::{BrushKind, BrushState};

/// Identifier of a pointer / touch source.
pub type PointerId = u64;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    fn midpoint(self, other: Point) -> Point {
        Point::new((self.x + other.x) * 0.5, (self.y + other.y) * 0.5)
    }

    fn distance(self, other: Point) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// A pointer event position in buffer coordinates, stamped with the event
/// time in milliseconds (any monotonic origin).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointerSample {
    pub pointer: PointerId,
    pub pos: Point,
    pub time_ms: u64,
}

/// Tunables for stroke rendering.
#[derive(Clone, Debug, PartialEq)]
pub struct StrokeConfig {
    pub glitter_dots: u32,
    pub glitter_jitter: f32,
    pub glitter_dot_size: u32,
    pub cue_throttle_ms: u64,
    pub thin_line_divisor: f32,
    pub thin_line_min: f32,
}

impl Default for StrokeConfig {
    fn default() -> Self {
        Self {
            glitter_dots: 3,
            glitter_jitter: 5.0,
            glitter_dot_size: 4,
            cue_throttle_ms: 200,
            thin_line_divisor: 4.0,
            thin_line_min: 3.0,
        }
    }
}

impl StrokeConfig {
    /// Effective line width for `brush`.
    pub fn line_width(&self, brush: &BrushState) -> f32 {
        match brush.kind {
            BrushKind::Laser => {
                (brush.width / self.thin_line_divisor.max(1.0)).max(self.thin_line_min)
            }
            _ => brush.width.max(1.0),
        }
    }
}

/// What a pointer event did to the gesture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrokeOutcome {
    /// Not part of the active gesture (foreign pointer, idle, fill brush).
    Ignored,
    Started,
    /// Position queued for the next frame.
    Queued,
    /// Gesture finished; the buffer holds the stroke and wants a history entry.
    Committed,
    /// Gesture discarded; the buffer was restored to its pre-stroke content.
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Drawing { pointer: PointerId },
}

#[derive(Clone, Copy)]
enum Paint {
    Color(Rgba<u8>),
    Erase,
}

// ============================================================================
// STROKE RENDERER
// ============================================================================

/// Turns pointer movement into paint.
///
/// Idle → Drawing on pointer-down (the pointer id is captured and every other
/// source is ignored until release), Drawing → Idle on up/leave (commit) or
/// cancel (discard). Move events only queue the newest position; the paint
/// step runs once per [`render_frame`](Self::render_frame), so a burst of
/// moves between frames collapses to a single segment.
pub struct StrokeRenderer {
    config: StrokeConfig,
    phase: Phase,
    /// Last ≤4 positions, newest last.
    samples: Vec<Point>,
    pending: Option<(Point, u64)>,
    /// Buffer content at pointer-down, restored on cancel.
    before: Option<PixelBuffer>,
    last_cue_ms: Option<u64>,
    rng: StdRng,
}

impl StrokeRenderer {
    pub fn new(config: StrokeConfig, seed: u64) -> Self {
        Self {
            config,
            phase: Phase::Idle,
            samples: Vec::with_capacity(5),
            pending: None,
            before: None,
            last_cue_ms: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &StrokeConfig {
        &self.config
    }

    pub fn is_drawing(&self) -> bool {
        matches!(self.phase, Phase::Drawing { .. })
    }

    fn owns(&self, pointer: PointerId) -> bool {
        self.phase == Phase::Drawing { pointer }
    }

    pub fn pointer_down(
        &mut self,
        sample: PointerSample,
        brush: &BrushState,
        buffer: &PixelBuffer,
    ) -> StrokeOutcome {
        if self.is_drawing() || brush.kind == BrushKind::Fill {
            return StrokeOutcome::Ignored;
        }
        self.phase = Phase::Drawing {
            pointer: sample.pointer,
        };
        self.samples.clear();
        self.samples.push(sample.pos);
        self.pending = None;
        self.before = Some(buffer.clone());
        debug!(pointer = sample.pointer, kind = brush.kind.name(), "stroke started");
        StrokeOutcome::Started
    }

    pub fn pointer_move(&mut self, sample: PointerSample) -> StrokeOutcome {
        if !self.owns(sample.pointer) {
            return StrokeOutcome::Ignored;
        }
        self.pending = Some((sample.pos, sample.time_ms));
        StrokeOutcome::Queued
    }

    /// Apply the queued position, if any. Returns whether anything was painted.
    pub fn render_frame(
        &mut self,
        buffer: &mut PixelBuffer,
        brush: &BrushState,
        cues: &dyn CuePlayer,
    ) -> bool {
        let Some((pos, time_ms)) = self.pending.take() else {
            return false;
        };
        if !self.is_drawing() {
            return false;
        }
        self.paint_to(buffer, brush, pos, time_ms, cues);
        true
    }

    /// Pointer-up and pointer-leave both commit.
    pub fn pointer_up(
        &mut self,
        pointer: PointerId,
        buffer: &mut PixelBuffer,
        brush: &BrushState,
        cues: &dyn CuePlayer,
    ) -> StrokeOutcome {
        if !self.owns(pointer) {
            return StrokeOutcome::Ignored;
        }
        self.render_frame(buffer, brush, cues);

        // Close the smoothed tail: curves stop at the last midpoint.
        let n = self.samples.len();
        if n >= 3 {
            let tail_start = self.samples[n - 2].midpoint(self.samples[n - 1]);
            let paint = paint_for(brush);
            let radius = self.config.line_width(brush) * 0.5;
            stamp_segment(buffer, tail_start, self.samples[n - 1], radius, paint);
        }

        self.reset();
        debug!(pointer, "stroke committed");
        StrokeOutcome::Committed
    }

    pub fn pointer_cancel(&mut self, pointer: PointerId, buffer: &mut PixelBuffer) -> StrokeOutcome {
        if !self.owns(pointer) {
            return StrokeOutcome::Ignored;
        }
        if let Some(before) = self.before.take() {
            *buffer = before;
        }
        self.reset();
        debug!(pointer, "stroke cancelled");
        StrokeOutcome::Cancelled
    }

    /// Abandon any in-progress gesture, restoring the pre-stroke buffer.
    pub fn abort(&mut self, buffer: &mut PixelBuffer) {
        if let Phase::Drawing { pointer } = self.phase {
            self.pointer_cancel(pointer, buffer);
        }
    }

    fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.samples.clear();
        self.pending = None;
        self.before = None;
    }

    fn paint_to(
        &mut self,
        buffer: &mut PixelBuffer,
        brush: &BrushState,
        pos: Point,
        time_ms: u64,
        cues: &dyn CuePlayer,
    ) {
        self.samples.push(pos);
        let paint = paint_for(brush);
        let radius = self.config.line_width(brush) * 0.5;

        let n = self.samples.len();
        if n >= 3 {
            let (p0, p1, p2) = (self.samples[n - 3], self.samples[n - 2], self.samples[n - 1]);
            stamp_quadratic(buffer, p0.midpoint(p1), p1, p1.midpoint(p2), radius, paint);
        } else if n == 2 {
            stamp_segment(buffer, self.samples[0], self.samples[1], radius, paint);
        }

        if brush.kind == BrushKind::Glitter {
            self.scatter_glitter(buffer, brush.color.rgba(), pos);
            let due = self
                .last_cue_ms
                .is_none_or(|last| time_ms.saturating_sub(last) > self.config.cue_throttle_ms);
            if due {
                cues.play(Cue::Sparkle);
                self.last_cue_ms = Some(time_ms);
            }
        }

        if self.samples.len() > 4 {
            let excess = self.samples.len() - 4;
            self.samples.drain(..excess);
        }
    }

    fn scatter_glitter(&mut self, buffer: &mut PixelBuffer, color: Rgba<u8>, at: Point) {
        let jitter = self.config.glitter_jitter;
        for _ in 0..self.config.glitter_dots {
            let ox = self.rng.gen_range(-jitter..=jitter);
            let oy = self.rng.gen_range(-jitter..=jitter);
            let opacity = self.rng.gen_range(0.5f32..1.0);
            buffer.blend_rect(
                at.x + ox,
                at.y + oy,
                self.config.glitter_dot_size,
                color,
                opacity,
            );
        }
        trace!(x = at.x, y = at.y, "glitter scattered");
    }
}

fn paint_for(brush: &BrushState) -> Paint {
    if brush.kind == BrushKind::Eraser {
        Paint::Erase
    } else {
        Paint::Color(brush.color.rgba())
    }
}

// ============================================================================
// RASTERIZATION
// ============================================================================

/// Stamp a hard-edged disc. Repeated stamps along a path give round caps
/// and joins.
fn stamp_circle(buffer: &mut PixelBuffer, center: Point, radius: f32, paint: Paint) {
    let radius = radius.max(0.5);
    let radius_sq = radius * radius;
    let min_x = (center.x - radius).floor() as i32;
    let max_x = (center.x + radius).ceil() as i32;
    let min_y = (center.y - radius).floor() as i32;
    let max_y = (center.y + radius).ceil() as i32;

    for y in min_y..=max_y {
        let dy = y as f32 + 0.5 - center.y;
        for x in min_x..=max_x {
            let dx = x as f32 + 0.5 - center.x;
            if dx * dx + dy * dy > radius_sq {
                continue;
            }
            match paint {
                Paint::Color(c) => buffer.set_pixel(x, y, c),
                Paint::Erase => buffer.erase_pixel(x, y),
            }
        }
    }
}

/// Straight segment with one stamp per pixel of length.
fn stamp_segment(buffer: &mut PixelBuffer, start: Point, end: Point, radius: f32, paint: Paint) {
    let distance = start.distance(end);
    if distance < 0.1 {
        stamp_circle(buffer, start, radius, paint);
        return;
    }
    let steps = distance.ceil() as usize;
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        let p = Point::new(start.x + (end.x - start.x) * t, start.y + (end.y - start.y) * t);
        stamp_circle(buffer, p, radius, paint);
    }
}

/// Quadratic Bézier from `start` to `end` pulled toward `control`.
fn stamp_quadratic(
    buffer: &mut PixelBuffer,
    start: Point,
    control: Point,
    end: Point,
    radius: f32,
    paint: Paint,
) {
    // Control-polygon length bounds the curve length from above.
    let length = start.distance(control) + control.distance(end);
    if length < 0.1 {
        stamp_circle(buffer, start, radius, paint);
        return;
    }
    let steps = length.ceil() as usize;
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        let u = 1.0 - t;
        let p = Point::new(
            u * u * start.x + 2.0 * u * t * control.x + t * t * end.x,
            u * u * start.y + 2.0 * u * t * control.y + t * t * end.y,
        );
        stamp_circle(buffer, p, radius, paint);
    }
}
