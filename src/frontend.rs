// src/frontend.rs

use crate::error::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// --- Stimuli ---

#[derive(Debug, Clone, PartialEq)]
pub enum Stimulus {
    Fixation,
    Text(String),
    Image {
        path: PathBuf,
        caption: Option<String>,
    },
}

impl Stimulus {
    /// Attaches a caption. Text stimuli get it on a new line.
    pub fn with_caption(self, caption: String) -> Stimulus {
        match self {
            Stimulus::Image { path, .. } => Stimulus::Image {
                path,
                caption: Some(caption),
            },
            Stimulus::Text(text) => Stimulus::Text(format!("{}\n{}", text, caption)),
            Stimulus::Fixation => Stimulus::Text(caption),
        }
    }
}

// --- Input ---

/// A key observed by the frontend, stamped with the frontend clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPress {
    pub key: String,
    pub at: Duration,
}

/// Operator cancellation flag, shared with signal handlers.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        AbortSignal(Arc::new(AtomicBool::new(false)))
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// --- Collaborator ---

/// Presentation, input and time for one participant.
///
/// Implementations must keep `show` cheap; all waiting happens through
/// `sleep` so the executor stays in control of polling.
pub trait Frontend {
    fn show(&mut self, stimulus: &Stimulus) -> Result<()>;

    /// Keys pressed since the previous call (or since `clear_keys`).
    fn poll_keys(&mut self) -> Result<Vec<KeyPress>>;

    /// Drops any pending keys.
    fn clear_keys(&mut self) -> Result<()>;

    fn now(&self) -> Duration;

    fn sleep(&mut self, duration: Duration);

    /// Releases presentation resources. Must be safe to call more than once.
    fn close(&mut self);
}
