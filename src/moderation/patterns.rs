//! Compiled category detectors for the content moderator.

use std::sync::OnceLock;

use regex::{Regex, RegexBuilder, RegexSet, RegexSetBuilder};

const HATE_SPEECH: &[&str] = &[
    r"\b(?:kill|exterminate|eradicate|deport)\s+all\s+(?:the\s+)?\w+",
    r"\b(?:subhuman|untermensch)s?\b",
    r"\b\w+\s+(?:are|is)\s+(?:vermin|parasites|subhuman|a\s+disease)\b",
    r"\bethnic\s+cleansing\b",
    r"\b(?:inferior|master)\s+race\b",
    r"\bwhite\s+power\b",
    r"\bgo\s+back\s+to\s+(?:your|where)\s+(?:own\s+)?(?:country|you\s+came\s+from)\b",
];

const VIOLENCE: &[&str] = &[
    r"\b(?:i(?:'ll|\s+will)|gonna|going\s+to)\s+(?:kill|murder|shoot|stab|hurt|strangle)\b",
    r"\bkill\s+(?:you|him|her|them|yourself)\b",
    r"\bhow\s+to\s+(?:make|build)\s+(?:a\s+)?(?:bomb|explosive|pipe\s+bomb|weapon)",
    r"\bmass\s+(?:shooting|murder|killing)\b",
    r"\b(?:bomb|shoot\s+up|attack)\s+(?:the\s+|a\s+)?(?:school|office|building|church|mosque|synagogue|temple)\b",
    r"\b(?:torture|behead|dismember)\w*\b",
];

/// Independent spam indicators; the number of distinct matches matters.
const SPAM: &[&str] = &[
    r"\bbuy\s+now\b",
    r"\blimited\s+time\b",
    r"\bclick\s+here\b",
    r"\b100%\s+free\b",
    r"\bact\s+now\b",
    r"\border\s+now\b",
    r"\bfree\s+money\b",
    r"\bmake\s+money\s+fast\b",
    r"\bwork\s+from\s+home\b",
    r"\brisk[-\s]free\b",
    r"\bno\s+credit\s+check\b",
    r"\bearn\s+\$\d+",
    r"\bdouble\s+your\s+(?:money|income)\b",
    r"\bexclusive\s+(?:deal|offer)\b",
    r"\bonce\s+in\s+a\s+lifetime\b",
];

const SCAM: &[&str] = &[
    r"\byou(?:'ve|\s+have)\s+(?:won|been\s+selected)\b",
    r"\bclaim\s+your\s+(?:prize|reward|winnings)\b",
    r"\blottery\b",
    r"\bverify\s+your\s+(?:account|identity)\b",
    r"\bconfirm\s+your\s+(?:password|bank|account|card)\b",
    r"\baccount\s+(?:has\s+been\s+)?(?:suspended|locked)\b",
    r"\bwire\s+transfer\b",
    r"\bsend\s+(?:us\s+)?(?:your\s+)?(?:bank|card|credit\s+card)\s+details\b",
    r"\bpay\s+(?:with|in)\s+gift\s+cards?\b",
    r"\binheritance\s+(?:fund|claim)\b",
];

const PROFANITY: &str = r"\b(?:fuck\w*|motherfuck\w*|shit\w*|bullshit|bitch\w*|bastards?|assholes?|dickheads?|damn|crap|piss(?:ed)?|wankers?)\b";

fn set(patterns: &[&str]) -> RegexSet {
    RegexSetBuilder::new(patterns)
        .case_insensitive(true)
        .build()
        .expect("built-in moderation patterns must compile")
}

fn regex(pattern: &str, case_insensitive: bool) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .expect("built-in moderation pattern must compile")
}

pub(crate) fn hate_speech() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| set(HATE_SPEECH))
}

pub(crate) fn violence() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| set(VIOLENCE))
}

pub(crate) fn spam() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| set(SPAM))
}

pub(crate) fn scam() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| set(SCAM))
}

pub(crate) fn profanity() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| regex(PROFANITY, true))
}

pub(crate) fn url() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| regex(r"\b(?:https?://|www\.)\S+", true))
}

/// Personal-information detectors with their redaction markers, in the
/// order they are applied.
pub(crate) fn pii() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            (regex(r"\b(?:\d{4}[-\s]?){3}\d{4}\b", false), "[REDACTED_CARD]"),
            (regex(r"\b\d{3}-\d{2}-\d{4}\b", false), "[REDACTED_SSN]"),
            (
                regex(
                    r"(?:\+?1[-.\s]?)?(?:\(\d{3}\)|\b\d{3})[-.\s]?\d{3}[-.\s]?\d{4}\b",
                    false,
                ),
                "[REDACTED_PHONE]",
            ),
            (
                regex(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b", false),
                "[REDACTED_EMAIL]",
            ),
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spam_indicators_are_counted_separately() {
        let text = "BUY NOW!!! LIMITED TIME!!! CLICK HERE!!! 100% FREE!!!";
        assert_eq!(spam().matches(text).iter().count(), 4);
    }

    #[test]
    fn pii_markers_contain_no_detectable_pii() {
        for (_, marker) in pii() {
            assert!(pii().iter().all(|(re, _)| !re.is_match(marker)));
        }
    }

    #[test]
    fn profanity_respects_word_boundaries() {
        assert!(profanity().is_match("well, damn"));
        assert!(!profanity().is_match("Scunthorpe classic grass"));
    }
}
