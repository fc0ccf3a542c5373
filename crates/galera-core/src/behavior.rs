//! Randomised pacing and page interaction plans.
//!
//! Nothing here is required for correctness; it only shapes request timing and
//! in-page activity so traffic looks less mechanical.

use std::time::Duration;

use rand::Rng;
use scraper::{Html, Selector};

use crate::config::BehaviorConfig;

/// Elements a visitor would plausibly move to.
pub const INTERACTIVE_SELECTOR: &str = "a, button, input, select";
/// Elements eligible for a random click.
pub const CLICKABLE_SELECTOR: &str = "button";

/// One step of an interaction plan, executed by the rendered fetcher.
///
/// Element indices refer to `document.querySelectorAll` over
/// [`INTERACTIVE_SELECTOR`] (scrolls) or [`CLICKABLE_SELECTOR`] (clicks).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionStep {
    ScrollToElement { index: usize },
    ScrollBy { pixels: u32 },
    ScrollToTop,
    Pause(Duration),
    Click { index: usize },
    /// Appends `text` to the value of the first element matching `selector`.
    Type { selector: String, text: String },
}

#[derive(Debug, Clone, Default)]
pub struct BehaviorSimulator {
    config: BehaviorConfig,
}

impl BehaviorSimulator {
    pub fn new(config: BehaviorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BehaviorConfig {
        &self.config
    }

    /// A duration drawn uniformly from `[min_pause, max_pause]`.
    pub fn pause_duration(&self) -> Duration {
        if !self.config.enabled {
            return Duration::ZERO;
        }
        uniform(self.config.min_pause, self.config.max_pause)
    }

    /// Suspends the caller for [`pause_duration`](Self::pause_duration).
    pub async fn pace(&self) {
        let pause = self.pause_duration();
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }

    /// Suspends the caller for a duration drawn from a request's delay range.
    pub async fn pace_within(&self, range: (Duration, Duration)) {
        if !self.config.enabled {
            return;
        }
        let delay = uniform(range.0, range.1);
        if !delay.is_zero() {
            tracing::debug!(component = "behavior", delay_ms = %delay.as_millis(), "Pacing");
            tokio::time::sleep(delay).await;
        }
    }

    /// Delay after one keystroke, drawn uniformly from `typing_delay`.
    pub fn keystroke_delay(&self) -> Duration {
        if !self.config.enabled {
            return Duration::ZERO;
        }
        uniform(self.config.typing_delay.0, self.config.typing_delay.1)
    }

    /// Types `text` into `selector` one character at a time, pausing
    /// [`keystroke_delay`](Self::keystroke_delay) after each character.
    pub fn plan_typing(&self, selector: &str, text: &str) -> Vec<InteractionStep> {
        text.chars()
            .flat_map(|ch| {
                [
                    InteractionStep::Type {
                        selector: selector.to_string(),
                        text: ch.to_string(),
                    },
                    InteractionStep::Pause(self.keystroke_delay()),
                ]
            })
            .collect()
    }

    /// Builds a randomised interaction sequence for a rendered document.
    ///
    /// Moves to 2-5 interactive elements, scrolls down 300-700 px, sometimes
    /// scrolls back to the top and sometimes clicks a button. Every action is
    /// followed by a pause.
    pub fn plan_interactions(&self, doc: &Html) -> Vec<InteractionStep> {
        if !self.config.enabled {
            return Vec::new();
        }

        let interactive = count_matches(doc, INTERACTIVE_SELECTOR);
        let clickable = count_matches(doc, CLICKABLE_SELECTOR);
        let mut rng = rand::rng();
        let mut steps = Vec::new();

        if interactive > 0 {
            let moves = rng.random_range(2..=5usize).min(interactive);
            for _ in 0..moves {
                steps.push(InteractionStep::ScrollToElement {
                    index: rng.random_range(0..interactive),
                });
                steps.push(InteractionStep::Pause(self.pause_duration()));
            }
        }

        steps.push(InteractionStep::ScrollBy {
            pixels: rng.random_range(300..=700),
        });
        steps.push(InteractionStep::Pause(self.pause_duration()));

        if rng.random_bool(self.config.scroll_back_probability.clamp(0.0, 1.0)) {
            steps.push(InteractionStep::ScrollToTop);
            steps.push(InteractionStep::Pause(self.pause_duration()));
        }

        if clickable > 0 && rng.random_bool(self.config.click_probability.clamp(0.0, 1.0)) {
            steps.push(InteractionStep::Click {
                index: rng.random_range(0..clickable),
            });
            steps.push(InteractionStep::Pause(self.pause_duration()));
        }

        steps
    }
}

fn count_matches(doc: &Html, css: &str) -> usize {
    Selector::parse(css)
        .map(|selector| doc.select(&selector).count())
        .unwrap_or(0)
}

fn uniform(min: Duration, max: Duration) -> Duration {
    let (low, high) = if min <= max { (min, max) } else { (max, min) };
    if low == high {
        return low;
    }
    let secs = rand::rng().random_range(low.as_secs_f64()..=high.as_secs_f64());
    Duration::from_secs_f64(secs)
}
