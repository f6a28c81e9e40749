// src/stimuli.rs

use crate::config::ExperimentConfig;
use crate::constants::{NEUTRAL_MAGNITUDE_KEY, PLACEHOLDER_TARGET_TEXT, PLACEHOLDER_TEXT};
use crate::frontend::Stimulus;
use log::{debug, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Stimuli for every condition, resolved once at session start.
///
/// Missing assets are replaced by text placeholders so a session never stops
/// over a lost image file.
#[derive(Debug, Clone)]
pub struct StimulusCatalog {
    target: Stimulus,
    cues: HashMap<String, Stimulus>,
    monetary: HashMap<String, Stimulus>,
    neutral_monetary: Stimulus,
    hit: Stimulus,
    miss: Stimulus,
    placeholders: usize,
}

impl StimulusCatalog {
    pub fn load(config: &ExperimentConfig) -> Self {
        Self::load_with(config, |p| p.exists())
    }

    pub fn load_with<F>(config: &ExperimentConfig, exists: F) -> Self
    where
        F: Fn(&Path) -> bool,
    {
        let visuals = &config.visuals;
        let mut placeholders = 0;
        let mut resolve = |path: Option<&PathBuf>, what: &str, fallback: &str| -> Stimulus {
            match path {
                Some(p) if exists(p) => Stimulus::Image {
                    path: p.clone(),
                    caption: None,
                },
                Some(p) => {
                    warn!("{} image not found: {:?}, using placeholder", what, p);
                    placeholders += 1;
                    Stimulus::Text(fallback.to_string())
                }
                None => {
                    warn!("No {} image configured, using placeholder", what);
                    placeholders += 1;
                    Stimulus::Text(fallback.to_string())
                }
            }
        };

        let target = resolve(Some(&visuals.target_image), "Target", PLACEHOLDER_TARGET_TEXT);

        let mut cues = HashMap::new();
        let mut monetary = HashMap::new();
        for c in &config.conditions {
            let key = c.magnitude_key();
            cues.insert(
                c.label.clone(),
                resolve(visuals.cue_images.get(&key), "Cue", PLACEHOLDER_TEXT),
            );
            monetary.insert(
                c.label.clone(),
                resolve(
                    visuals.monetary_feedback_images.get(&key),
                    "Monetary feedback",
                    PLACEHOLDER_TEXT,
                ),
            );
        }
        let neutral_monetary = resolve(
            visuals.monetary_feedback_images.get(NEUTRAL_MAGNITUDE_KEY),
            "Neutral monetary feedback",
            PLACEHOLDER_TEXT,
        );

        let perf = &visuals.performance_feedback_images;
        let hit = resolve(Some(&perf.hit), "Performance feedback (hit)", PLACEHOLDER_TEXT);
        let miss = resolve(Some(&perf.miss), "Performance feedback (miss)", PLACEHOLDER_TEXT);

        debug!("[Stimuli] Catalog ready, {} placeholder(s)", placeholders);
        StimulusCatalog {
            target,
            cues,
            monetary,
            neutral_monetary,
            hit,
            miss,
            placeholders,
        }
    }

    pub fn target(&self) -> &Stimulus {
        &self.target
    }

    pub fn cue(&self, label: &str) -> Stimulus {
        self.cues
            .get(label)
            .cloned()
            .unwrap_or_else(|| Stimulus::Text(PLACEHOLDER_TEXT.to_string()))
    }

    pub fn performance(&self, hit: bool) -> &Stimulus {
        if hit {
            &self.hit
        } else {
            &self.miss
        }
    }

    /// Monetary feedback asset. Misses always show the neutral (magnitude 0)
    /// asset, whatever the condition's magnitude.
    pub fn monetary(&self, label: &str, hit: bool) -> Stimulus {
        if !hit {
            return self.neutral_monetary.clone();
        }
        self.monetary
            .get(label)
            .cloned()
            .unwrap_or_else(|| Stimulus::Text(PLACEHOLDER_TEXT.to_string()))
    }

    pub fn placeholder_count(&self) -> usize {
        self.placeholders
    }
}

/// Substitutes `{name}` placeholders in a screen text.
pub fn fill_template(template: &str, vars: &[(&str, String)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{}}}", name), value)
    })
}
