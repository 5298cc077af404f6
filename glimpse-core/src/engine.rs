//! Capture decision engine
//!
//! Keeps a per-class streak of consecutive qualifying detections and decides,
//! detection by detection, whether a crop of the detected region should be
//! captured.
//!
//! Only classes that appear in the evaluated detections are touched. A frame
//! with no detections leaves every streak as it was.

use crate::types::{Action, CaptureRegion, Detection, ImageDimensions};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Minimum confidence for a detection to count toward a streak
pub const QUALIFYING_CONFIDENCE: f32 = 0.4;

/// Streak length at which a capture fires
pub const CAPTURE_STREAK: u32 = 2;

/// Pixels added around a box before cropping
pub const CAPTURE_MARGIN: u32 = 10;

/// Labels captured when configuration does not say otherwise
pub const DEFAULT_CAPTURABLE_CLASSES: &[&str] = &["card", "wallets"];

/// Global capture policy, shared by every class
#[derive(Debug, Clone)]
pub struct CapturePolicy {
    capturable: HashSet<String>,
    min_confidence: f32,
    streak_threshold: u32,
    margin: u32,
}

impl CapturePolicy {
    /// Policy with the fixed thresholds and the given capturable labels
    pub fn new<I, S>(capturable: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            capturable: capturable.into_iter().map(Into::into).collect(),
            min_confidence: QUALIFYING_CONFIDENCE,
            streak_threshold: CAPTURE_STREAK,
            margin: CAPTURE_MARGIN,
        }
    }

    pub fn is_capturable(&self, class_name: &str) -> bool {
        self.capturable.contains(class_name)
    }

    /// Capturable class at or above the confidence floor. NaN never qualifies.
    pub fn qualifies(&self, detection: &Detection) -> bool {
        self.is_capturable(&detection.class_name) && detection.confidence >= self.min_confidence
    }

    pub fn capturable_classes(&self) -> impl Iterator<Item = &str> {
        self.capturable.iter().map(String::as_str)
    }

    pub fn min_confidence(&self) -> f32 {
        self.min_confidence
    }

    pub fn streak_threshold(&self) -> u32 {
        self.streak_threshold
    }

    pub fn margin(&self) -> u32 {
        self.margin
    }
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CAPTURABLE_CLASSES.iter().copied())
    }
}

/// Per-class streak counters.
///
/// A class missing from the map has a streak of 0. Counters live only in
/// memory and are shared by every caller holding the same `Arc`.
#[derive(Debug, Default)]
pub struct ClassCounters {
    inner: Mutex<HashMap<String, u32>>,
}

impl ClassCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current streak for a class
    pub fn count(&self, class_name: &str) -> u32 {
        self.inner.lock().get(class_name).copied().unwrap_or(0)
    }

    /// Copy of every counter that has been touched
    pub fn snapshot(&self) -> HashMap<String, u32> {
        self.inner.lock().clone()
    }

    /// Forget every streak
    pub fn reset_all(&self) {
        self.inner.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.inner.lock()
    }
}

/// Debounce state machine turning detections into capture actions
#[derive(Debug, Clone)]
pub struct CaptureEngine {
    policy: Arc<CapturePolicy>,
    counters: Arc<ClassCounters>,
}

impl CaptureEngine {
    /// Engine with its own, empty counter state
    pub fn new(policy: CapturePolicy) -> Self {
        Self::with_counters(policy, Arc::new(ClassCounters::new()))
    }

    /// Engine over an existing counter state
    pub fn with_counters(policy: CapturePolicy, counters: Arc<ClassCounters>) -> Self {
        Self {
            policy: Arc::new(policy),
            counters,
        }
    }

    pub fn policy(&self) -> &CapturePolicy {
        &self.policy
    }

    pub fn counters(&self) -> &Arc<ClassCounters> {
        &self.counters
    }

    /// Evaluate a single detection
    pub fn evaluate(&self, detection: &Detection, dims: ImageDimensions) -> Action {
        let mut counters = self.counters.lock();
        step(&self.policy, &mut counters, detection, dims)
    }

    /// Evaluate every detection of one frame, in order, under one lock.
    ///
    /// `on_capture` runs while the counters are still locked, so captures of
    /// a class reach it in the same order as the resets that produced them.
    /// Keep it cheap and non-blocking.
    pub fn evaluate_frame<F>(
        &self,
        detections: &[Detection],
        dims: ImageDimensions,
        mut on_capture: F,
    ) -> Vec<Action>
    where
        F: FnMut(&Detection, CaptureRegion),
    {
        let mut counters = self.counters.lock();
        detections
            .iter()
            .map(|detection| {
                let action = step(&self.policy, &mut counters, detection, dims);
                if let Action::Capture(region) = action {
                    on_capture(detection, region);
                }
                action
            })
            .collect()
    }
}

fn step(
    policy: &CapturePolicy,
    counters: &mut HashMap<String, u32>,
    detection: &Detection,
    dims: ImageDimensions,
) -> Action {
    if !policy.qualifies(detection) {
        counters.insert(detection.class_name.clone(), 0);
        return Action::None;
    }

    let streak = counters.entry(detection.class_name.clone()).or_insert(0);
    *streak = streak.saturating_add(1);

    if *streak < policy.streak_threshold {
        debug!("{} streak at {}", detection.class_name, streak);
        return Action::None;
    }

    *streak = 0;
    let region = CaptureRegion::around(&detection.bbox, policy.margin, dims);
    debug!("{} streak reached, capturing {:?}", detection.class_name, region);
    Action::Capture(region)
}
