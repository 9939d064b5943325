//! Rule-based gate deciding which moderation events are worth persisting.
//!
//! Rules are compiled once and applied per message on the moderation hot
//! path, so anything expensive (regexes) happens in `compile()`.

pub mod rules;

use chrono::{DateTime, Utc};

use crate::models::ModerationKind;

/// Exclusive minimum duration in seconds for storing timeout messages.
pub const MIN_TIMEOUT_DURATION: i64 = 5;
/// Exclusive minimum number of seconds between a message and the action for
/// the moderation to be considered human.
pub const MIN_HUMANLY_POSSIBLE: f64 = 0.9;

/// Projection of a moderation event plus one attached message, fed to every
/// rule. One value is reused across the messages of a batch; only the first
/// carries `is_most_recent_msg`.
#[derive(Debug, Clone)]
pub struct Traits {
    pub kind: ModerationKind,
    pub body: String,
    /// When the message was said.
    pub at: DateTime<Utc>,
    /// When the action against it was taken.
    pub moderated_at: DateTime<Utc>,
    pub timeout_duration: i64,
    pub is_most_recent_msg: bool,
}

pub trait Rule: Send + Sync {
    /// One-time preparation. Regexes and similar objects are built here
    /// rather than in constructors, so the caller controls when the
    /// potentially expensive step runs.
    fn compile(&mut self);

    fn is_compliant(&self, target: &Traits) -> bool;

    /// A final rule that votes yes short-circuits the whole evaluation to
    /// compliant; a final rule that votes no is skipped.
    fn is_final(&self) -> bool;
}

/// Ordered rule list. Evaluation walks left to right, so final rules belong
/// before ordinary ones; the analyzer does not reorder them.
pub struct Analyzer {
    rules: Vec<Box<dyn Rule>>,
}

impl Analyzer {
    pub fn new(rules: Vec<Box<dyn Rule>>) -> Self {
        Self { rules }
    }

    /// Calls `compile()` on every rule. Required before [`is_compliant`].
    ///
    /// [`is_compliant`]: Analyzer::is_compliant
    pub fn compile(&mut self) {
        for rule in &mut self.rules {
            rule.compile();
        }
    }

    /// True when `target` passes every ordinary rule, or as soon as a final
    /// rule accepts it.
    pub fn is_compliant(&self, target: &Traits) -> bool {
        for rule in &self.rules {
            let v = rule.is_compliant(target);
            if rule.is_final() {
                if v {
                    return true;
                }
                continue;
            }
            if !v {
                return false;
            }
        }
        true
    }

    /// The production rule set, compiled and ready.
    pub fn standard() -> Self {
        let mut analyzer = Analyzer::new(vec![
            Box::new(rules::AlwaysStoreBans),
            Box::new(rules::OnlyHumanModerations::new(MIN_HUMANLY_POSSIBLE)),
            Box::new(rules::MinTimeoutDuration::new(MIN_TIMEOUT_DURATION)),
            Box::new(rules::NoLinks::new()),
        ]);
        analyzer.compile();
        analyzer
    }
}
