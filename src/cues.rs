//! Audio-cue handle. The core never synthesizes sound; it asks a
//! [`CuePlayer`] passed in by the embedder to play a named cue.

use std::sync::Mutex;

use tracing::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Cue {
    Sparkle,
    Whoosh,
    Clear,
    PowerChord,
    Cheer,
    LetsGo,
}

pub trait CuePlayer: Send + Sync {
    fn play(&self, cue: Cue);
}

/// Plays nothing. Default for headless use.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentCues;

impl CuePlayer for SilentCues {
    fn play(&self, cue: Cue) {
        trace!(?cue, "cue suppressed");
    }
}

/// Remembers every cue in order; handy for embedders' tests.
#[derive(Debug, Default)]
pub struct RecordedCues {
    played: Mutex<Vec<Cue>>,
}

impl RecordedCues {
    pub fn played(&self) -> Vec<Cue> {
        self.played.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn count(&self, cue: Cue) -> usize {
        self.played().iter().filter(|c| **c == cue).count()
    }
}

impl CuePlayer for RecordedCues {
    fn play(&self, cue: Cue) {
        if let Ok(mut played) = self.played.lock() {
            played.push(cue);
        }
    }
}
