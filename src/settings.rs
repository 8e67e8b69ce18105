use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, warn};

use crate::buffer::MAX_CANVAS_DIM;
use crate::completion::{
    CompletionTracker, DEFAULT_SAMPLE_STRIDE, DEFAULT_THRESHOLD, DEFAULT_WHITE_CUTOFF,
};
use crate::fill::DEFAULT_TOLERANCE;
use crate::history::{DEFAULT_HISTORY_CAP, HistoryManager};
use crate::outline::DEFAULT_OUTLINE_THRESHOLD;
use crate::stroke::StrokeConfig;

const SETTINGS_FILE: &str = "colorbook_settings.cfg";

/// Tunables for a coloring session, persisted as `key=value` lines.
#[derive(Clone, Debug, PartialEq)]
pub struct ColoringSettings {
    pub history_cap: usize,
    /// A durable snapshot is written every Nth history entry.
    pub snapshot_interval: u64,
    pub completion_stride: usize,
    pub completion_threshold: f32,
    pub white_cutoff: u8,
    pub fill_tolerance: u8,
    pub brush_width: f32,
    pub thin_line_divisor: f32,
    pub thin_line_min: f32,
    pub glitter_dots: u32,
    pub glitter_jitter: f32,
    pub glitter_dot_size: u32,
    pub cue_throttle_ms: u64,
    pub source_fit: f32,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub outline_on_load: bool,
    pub outline_threshold: f32,
    pub store_dir: PathBuf,
}

impl Default for ColoringSettings {
    fn default() -> Self {
        let stroke = StrokeConfig::default();
        Self {
            history_cap: DEFAULT_HISTORY_CAP,
            snapshot_interval: 10,
            completion_stride: DEFAULT_SAMPLE_STRIDE,
            completion_threshold: DEFAULT_THRESHOLD,
            white_cutoff: DEFAULT_WHITE_CUTOFF,
            fill_tolerance: DEFAULT_TOLERANCE,
            brush_width: 20.0,
            thin_line_divisor: stroke.thin_line_divisor,
            thin_line_min: stroke.thin_line_min,
            glitter_dots: stroke.glitter_dots,
            glitter_jitter: stroke.glitter_jitter,
            glitter_dot_size: stroke.glitter_dot_size,
            cue_throttle_ms: stroke.cue_throttle_ms,
            source_fit: 0.95,
            canvas_width: 800,
            canvas_height: 600,
            outline_on_load: false,
            outline_threshold: DEFAULT_OUTLINE_THRESHOLD,
            store_dir: crate::logger::data_dir().join("Colorbook").join("store"),
        }
    }
}

fn parse_or<T: FromStr>(key: &str, val: &str, fallback: T) -> T {
    match val.parse() {
        Ok(v) => v,
        Err(_) => {
            warn!(key, value = val, "ignoring malformed setting");
            fallback
        }
    }
}

impl ColoringSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/colorbook/colorbook_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\Colorbook\colorbook_settings.cfg
    /// On macOS:   ~/Library/Application Support/Colorbook/colorbook_settings.cfg
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("colorbook");
            return Some(config_dir.join(SETTINGS_FILE));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            return Some(PathBuf::from(appdata).join("Colorbook").join(SETTINGS_FILE));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("Colorbook")
                    .join(SETTINGS_FILE),
            );
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|d| d.join(SETTINGS_FILE)))
        }
    }

    /// Parse `key=value` lines. Unknown keys are skipped; malformed values
    /// keep their default.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "history_cap" => s.history_cap = parse_or(key, val, s.history_cap).max(1),
                "snapshot_interval" => {
                    s.snapshot_interval = parse_or(key, val, s.snapshot_interval).max(1)
                }
                "completion_stride" => {
                    s.completion_stride = parse_or(key, val, s.completion_stride).max(1)
                }
                "completion_threshold" => {
                    s.completion_threshold = parse_or(key, val, s.completion_threshold)
                }
                "white_cutoff" => s.white_cutoff = parse_or(key, val, s.white_cutoff),
                "fill_tolerance" => s.fill_tolerance = parse_or(key, val, s.fill_tolerance),
                "brush_width" => s.brush_width = parse_or(key, val, s.brush_width),
                "thin_line_divisor" => s.thin_line_divisor = parse_or(key, val, s.thin_line_divisor),
                "thin_line_min" => s.thin_line_min = parse_or(key, val, s.thin_line_min),
                "glitter_dots" => s.glitter_dots = parse_or(key, val, s.glitter_dots),
                "glitter_jitter" => s.glitter_jitter = parse_or(key, val, s.glitter_jitter),
                "glitter_dot_size" => s.glitter_dot_size = parse_or(key, val, s.glitter_dot_size),
                "cue_throttle_ms" => s.cue_throttle_ms = parse_or(key, val, s.cue_throttle_ms),
                "source_fit" => s.source_fit = parse_or(key, val, s.source_fit).clamp(0.05, 1.0),
                "canvas_width" => {
                    s.canvas_width = parse_or(key, val, s.canvas_width).clamp(1, MAX_CANVAS_DIM)
                }
                "canvas_height" => {
                    s.canvas_height = parse_or(key, val, s.canvas_height).clamp(1, MAX_CANVAS_DIM)
                }
                "outline_on_load" => s.outline_on_load = parse_or(key, val, s.outline_on_load),
                "outline_threshold" => s.outline_threshold = parse_or(key, val, s.outline_threshold),
                "store_dir" if !val.is_empty() => s.store_dir = PathBuf::from(val),
                _ => debug!(key, "unknown setting"),
            }
        }
        s
    }

    pub fn to_cfg(&self) -> String {
        format!(
            "history_cap={}\n\
             snapshot_interval={}\n\
             completion_stride={}\n\
             completion_threshold={}\n\
             white_cutoff={}\n\
             fill_tolerance={}\n\
             brush_width={}\n\
             thin_line_divisor={}\n\
             thin_line_min={}\n\
             glitter_dots={}\n\
             glitter_jitter={}\n\
             glitter_dot_size={}\n\
             cue_throttle_ms={}\n\
             source_fit={}\n\
             canvas_width={}\n\
             canvas_height={}\n\
             outline_on_load={}\n\
             outline_threshold={}\n\
             store_dir={}\n",
            self.history_cap,
            self.snapshot_interval,
            self.completion_stride,
            self.completion_threshold,
            self.white_cutoff,
            self.fill_tolerance,
            self.brush_width,
            self.thin_line_divisor,
            self.thin_line_min,
            self.glitter_dots,
            self.glitter_jitter,
            self.glitter_dot_size,
            self.cue_throttle_ms,
            self.source_fit,
            self.canvas_width,
            self.canvas_height,
            self.outline_on_load,
            self.outline_threshold,
            self.store_dir.display(),
        )
    }

    /// Load settings from disk (defaults if the file is missing or unreadable).
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) => {
                debug!(path = %path.display(), "settings not loaded: {}", e);
                Self::default()
            }
        }
    }

    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = Self::settings_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_cfg())
    }

    pub fn stroke_config(&self) -> StrokeConfig {
        StrokeConfig {
            glitter_dots: self.glitter_dots,
            glitter_jitter: self.glitter_jitter,
            glitter_dot_size: self.glitter_dot_size,
            cue_throttle_ms: self.cue_throttle_ms,
            thin_line_divisor: self.thin_line_divisor,
            thin_line_min: self.thin_line_min,
        }
    }

    pub fn completion_tracker(&self) -> CompletionTracker {
        CompletionTracker::new(
            self.completion_stride,
            self.white_cutoff,
            self.completion_threshold,
        )
    }

    pub fn history(&self) -> HistoryManager {
        HistoryManager::new(self.history_cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cfg_text_round_trips() {
        let mut s = ColoringSettings::default();
        s.history_cap = 12;
        s.outline_on_load = true;
        s.glitter_jitter = 2.5;
        s.store_dir = PathBuf::from("/tmp/colorbook store");
        assert_eq!(ColoringSettings::parse(&s.to_cfg()), s);
    }

    #[test]
    fn malformed_and_unknown_lines_keep_defaults() {
        let s = ColoringSettings::parse(
            "# comment\nhistory_cap=lots\nwhite_cutoff=300\nno equals sign\nfuture_key=1\nfill_tolerance = 24\n",
        );
        let d = ColoringSettings::default();
        assert_eq!(s.history_cap, d.history_cap);
        assert_eq!(s.white_cutoff, d.white_cutoff);
        assert_eq!(s.fill_tolerance, 24);
    }

    #[test]
    fn zero_values_are_clamped() {
        let s = ColoringSettings::parse("history_cap=0\nsnapshot_interval=0\ncompletion_stride=0\n");
        assert_eq!(s.history_cap, 1);
        assert_eq!(s.snapshot_interval, 1);
        assert_eq!(s.completion_stride, 1);
    }

    #[test]
    fn canvas_size_is_capped() {
        let s = ColoringSettings::parse("canvas_width=100000
canvas_height=0
");
        assert_eq!(s.canvas_width, MAX_CANVAS_DIM);
        assert_eq!(s.canvas_height, 1);
    }

    #[test]
    fn save_and_load_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE);
        let mut s = ColoringSettings::default();
        s.canvas_width = 1024;
        s.save_to(&path).unwrap();
        assert_eq!(ColoringSettings::load_from(&path).canvas_width, 1024);
        assert_eq!(
            ColoringSettings::load_from(&dir.path().join("missing.cfg")),
            ColoringSettings::default()
        );
    }

    #[test]
    fn helpers_carry_values() {
        let mut s = ColoringSettings::default();
        s.cue_throttle_ms = 99;
        s.history_cap = 7;
        s.completion_threshold = 60.0;
        assert_eq!(s.stroke_config().cue_throttle_ms, 99);
        assert_eq!(s.history().cap(), 7);
        assert_eq!(s.completion_tracker().threshold(), 60.0);
    }
}
