// src/heuristics/rules.rs

use regex::Regex;

use super::{Rule, Traits};
use crate::models::ModerationKind;

/// Bans are stored unconditionally.
///
/// They are rarely automatic and almost always happen for a good reason, so
/// they carry the most useful context. Keeping this rule final and first also
/// shields bans from the caveats of the rules below.
pub struct AlwaysStoreBans;

impl Rule for AlwaysStoreBans {
    fn compile(&mut self) {}
    fn is_compliant(&self, target: &Traits) -> bool {
        target.kind == ModerationKind::Ban
    }
    fn is_final(&self) -> bool {
        true
    }
}

/// Only store moderations a human could have performed.
///
/// Bots react to a message within milliseconds; a moderator has to read it
/// first. Only the most recent message in a batch is old enough to measure
/// this against.
///
/// Caveat: a user spamming while the moderator acts may slip a last message
/// under the threshold and lose the whole batch.
pub struct OnlyHumanModerations {
    min_humanly_possible: f64,
}

impl OnlyHumanModerations {
    pub fn new(min_humanly_possible: f64) -> Self {
        Self { min_humanly_possible }
    }
}

impl Rule for OnlyHumanModerations {
    fn compile(&mut self) {}
    fn is_compliant(&self, target: &Traits) -> bool {
        if target.is_most_recent_msg {
            let elapsed = (target.moderated_at - target.at).num_milliseconds() as f64 / 1000.0;
            return elapsed > self.min_humanly_possible;
        }
        true
    }
    fn is_final(&self) -> bool {
        false
    }
}

/// Only store timeouts longer than a minimum duration.
///
/// Channel bots hand out 1s/5s timeouts to purge links and caps; those say
/// nothing about the user. Bans and deletions carry a duration of 0 and are
/// unaffected.
pub struct MinTimeoutDuration {
    min: i64,
}

impl MinTimeoutDuration {
    pub fn new(min: i64) -> Self {
        Self { min }
    }
}

impl Rule for MinTimeoutDuration {
    fn compile(&mut self) {}
    fn is_compliant(&self, target: &Traits) -> bool {
        if target.kind == ModerationKind::Timeout {
            return target.timeout_duration > self.min;
        }
        true
    }
    fn is_final(&self) -> bool {
        false
    }
}

/// No messages with links.
///
/// Moderated messages containing links tend to be automoderated and tell
/// moderators nothing about the user.
pub struct NoLinks {
    urlrg: Option<Regex>,
}

impl NoLinks {
    pub fn new() -> Self {
        Self { urlrg: None }
    }
}

impl Default for NoLinks {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule for NoLinks {
    fn compile(&mut self) {
        self.urlrg = Some(
            Regex::new(r"\b(https?|ftps?|file)://[-A-Za-z0-9+&@#/%?=~_|!:,.;]*[-A-Za-z0-9+&@#/%=~_|]")
                .expect("static url pattern"),
        );
    }
    fn is_compliant(&self, target: &Traits) -> bool {
        let urlrg = self.urlrg.as_ref().expect("NoLinks evaluated before compile()");
        !urlrg.is_match(&target.body)
    }
    fn is_final(&self) -> bool {
        false
    }
}
