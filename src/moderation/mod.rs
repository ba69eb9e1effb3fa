//! Heuristic content moderation.
//!
//! [`ContentModerator::moderate`] runs independent category detectors over
//! the text and sums their fixed contributions into a 0-100 risk score:
//!
//! | Category | Contribution |
//! |---|---|
//! | hate speech | 50 |
//! | violence | 40 |
//! | scam | 35 |
//! | spam (2+ distinct indicators) | 30 |
//! | profanity | 5 per occurrence, at most 20 |
//! | personal information | 15 |
//!
//! The sum is clamped to 100 and mapped to a [`RiskLevel`]. The moderator
//! never fails and has no side effects; acting on the result is up to the
//! caller.

mod patterns;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::PortcullisError;
use crate::sanitize;

/// Coarse risk classification, ordered from safest to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Classify a clamped risk score.
    pub fn from_score(score: u8) -> Self {
        match score {
            50.. => RiskLevel::Critical,
            35..=49 => RiskLevel::High,
            20..=34 => RiskLevel::Medium,
            10..=19 => RiskLevel::Low,
            _ => RiskLevel::Safe,
        }
    }

    /// Only `safe` and `low` count as safe.
    pub fn is_safe(&self) -> bool {
        *self <= RiskLevel::Low
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = PortcullisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safe" => Ok(RiskLevel::Safe),
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            other => Err(PortcullisError::Configuration(format!(
                "unknown risk level '{other}'"
            ))),
        }
    }
}

/// Content categories a text can be flagged for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationFlag {
    HateSpeech,
    Violence,
    Spam,
    Profanity,
    PersonalInfo,
    Scam,
}

impl ModerationFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationFlag::HateSpeech => "hate_speech",
            ModerationFlag::Violence => "violence",
            ModerationFlag::Spam => "spam",
            ModerationFlag::Profanity => "profanity",
            ModerationFlag::PersonalInfo => "personal_info",
            ModerationFlag::Scam => "scam",
        }
    }
}

impl fmt::Display for ModerationFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`ContentModerator::moderate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationResult {
    pub risk_level: RiskLevel,
    /// Sum of category contributions, clamped to 0-100.
    pub risk_score: u8,
    pub flags: BTreeSet<ModerationFlag>,
    /// One human-readable reason per triggered category, in detection order.
    pub reasons: Vec<String>,
    /// The input with personal information redacted.
    pub filtered_text: String,
}

impl ModerationResult {
    pub fn is_safe(&self) -> bool {
        self.risk_level.is_safe()
    }

    pub fn has_flag(&self, flag: ModerationFlag) -> bool {
        self.flags.contains(&flag)
    }
}

const HATE_SPEECH_POINTS: u32 = 50;
const VIOLENCE_POINTS: u32 = 40;
const SPAM_POINTS: u32 = 30;
const SPAM_MIN_INDICATORS: usize = 2;
const PROFANITY_POINTS_EACH: u32 = 5;
const PROFANITY_POINTS_MAX: u32 = 20;
const PERSONAL_INFO_POINTS: u32 = 15;
const SCAM_POINTS: u32 = 35;

/// Stateless pattern-based content scorer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentModerator;

impl ContentModerator {
    pub fn new() -> Self {
        Self
    }

    /// Score `text` across every category.
    ///
    /// Detectors see the NFKC-normalized text, so fullwidth and other
    /// compatibility forms score like their plain equivalents.
    /// `filtered_text` is derived from that normalized text.
    pub fn moderate(&self, text: &str) -> ModerationResult {
        let normalized = sanitize::normalize_text(text);
        let text = normalized.as_str();
        let mut score: u32 = 0;
        let mut flags = BTreeSet::new();
        let mut reasons = Vec::new();

        if patterns::hate_speech().is_match(text) {
            score += HATE_SPEECH_POINTS;
            flags.insert(ModerationFlag::HateSpeech);
            reasons.push("hate speech detected".to_string());
        }

        if patterns::violence().is_match(text) {
            score += VIOLENCE_POINTS;
            flags.insert(ModerationFlag::Violence);
            reasons.push("violent content detected".to_string());
        }

        let indicators = spam_indicators(text);
        if indicators >= SPAM_MIN_INDICATORS {
            score += SPAM_POINTS;
            flags.insert(ModerationFlag::Spam);
            reasons.push(format!("spam detected ({indicators} indicators)"));
        }

        let profanities = patterns::profanity().find_iter(text).count() as u32;
        if profanities > 0 {
            score += (PROFANITY_POINTS_EACH * profanities).min(PROFANITY_POINTS_MAX);
            flags.insert(ModerationFlag::Profanity);
            reasons.push(format!("profanity detected ({profanities} occurrences)"));
        }

        let filtered_text = self.remove_pii(text);
        if filtered_text != text {
            score += PERSONAL_INFO_POINTS;
            flags.insert(ModerationFlag::PersonalInfo);
            reasons.push("personal information detected".to_string());
        }

        if patterns::scam().is_match(text) {
            score += SCAM_POINTS;
            flags.insert(ModerationFlag::Scam);
            reasons.push("scam indicators detected".to_string());
        }

        let risk_score = score.min(100) as u8;
        ModerationResult {
            risk_level: RiskLevel::from_score(risk_score),
            risk_score,
            flags,
            reasons,
            filtered_text,
        }
    }

    /// Short-form gate: `(true, None)` when safe, otherwise the reasons.
    pub fn is_safe(&self, text: &str) -> (bool, Option<String>) {
        let result = self.moderate(text);
        if result.is_safe() {
            (true, None)
        } else {
            (
                false,
                Some(format!(
                    "content flagged as {} risk: {}",
                    result.risk_level,
                    result.reasons.join("; ")
                )),
            )
        }
    }

    /// Replace every profane word with asterisks of the same length.
    pub fn filter_profanity(&self, text: &str) -> String {
        patterns::profanity()
            .replace_all(text, |caps: &regex::Captures<'_>| {
                "*".repeat(caps[0].chars().count())
            })
            .into_owned()
    }

    /// Redact card numbers, SSNs, phone numbers and email addresses.
    ///
    /// A redaction can expose a new word boundary for an earlier detector
    /// (a phone match eating the last digit of a card number), so passes
    /// repeat until nothing changes. Each changing pass removes digits or
    /// an `@` and markers contain neither, so the loop terminates and the
    /// result is a fixed point.
    pub fn remove_pii(&self, text: &str) -> String {
        let mut out = text.to_string();
        loop {
            let next = redact_pass(&out);
            if next == out {
                return out;
            }
            out = next;
        }
    }

    /// Standalone 0-100 spam likelihood, separate from `risk_score`.
    ///
    /// 15 per distinct indicator (at most 45), 25 for shouting (over half of
    /// at least 10 letters upper case), 20 for more than 3 `!`, 20 for more
    /// than 2 URLs.
    pub fn spam_score(&self, text: &str) -> u8 {
        let mut score = (spam_indicators(text) as u32 * 15).min(45);

        let (letters, upper) = text
            .chars()
            .filter(|c| c.is_alphabetic())
            .fold((0u32, 0u32), |(letters, upper), c| {
                (letters + 1, upper + u32::from(c.is_uppercase()))
            });
        if letters >= 10 && upper * 2 > letters {
            score += 25;
        }

        if text.matches('!').count() > 3 {
            score += 20;
        }

        if patterns::url().find_iter(text).count() > 2 {
            score += 20;
        }

        score.min(100) as u8
    }
}

fn redact_pass(text: &str) -> String {
    let mut out = text.to_string();
    for (pattern, marker) in patterns::pii() {
        if pattern.is_match(&out) {
            out = pattern.replace_all(&out, *marker).into_owned();
        }
    }
    out
}

fn spam_indicators(text: &str) -> usize {
    patterns::spam().matches(text).iter().count()
}
