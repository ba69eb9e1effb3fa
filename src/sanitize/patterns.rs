//! Compiled detector patterns for the field sanitizers.

use std::sync::OnceLock;

use regex::{Regex, RegexSet, RegexSetBuilder};

/// Phrases and markers that try to redirect a model's instructions.
const PROMPT_INJECTION: &[&str] = &[
    r"ignore\s+(?:all\s+)?(?:the\s+|your\s+)?(?:previous|prior|above|earlier|preceding)\s+(?:instructions?|prompts?|rules|directions|context)",
    r"disregard\s+(?:all\s+)?(?:the\s+|your\s+)?(?:previous|prior|above|earlier)?\s*(?:instructions?|prompts?|rules|guidelines)",
    r"forget\s+(?:all\s+|everything\s+)?(?:your\s+|the\s+)?(?:previous\s+|prior\s+)?(?:instructions|rules|training)",
    r"override\s+(?:your|the|all)\s+(?:instructions|rules|safety|guidelines)",
    r"new\s+instructions\s*:",
    r"(?:reveal|show|print|repeat|output)\s+(?:me\s+)?(?:your|the)\s+(?:system\s+|initial\s+|hidden\s+)?(?:prompt|instructions)",
    r"\byou\s+are\s+now\s+(?:a|an|in|the)\b",
    r"\bpretend\s+(?:to\s+be|you\s+are)\b",
    r"\bact\s+as\s+(?:an?\s+)?(?:unrestricted|unfiltered|jailbroken|different)\b",
    r"\bjailbreak",
    r"\bdo\s+anything\s+now\b",
    r"(?:^|\n)\s*(?:system|assistant)\s*:",
    r"\[/?(?:inst|system)\]",
    r"<\|\s*(?:im_start|im_end|system|endoftext)\s*\|>",
    r"<<\s*/?\s*sys\s*>>",
    r"###\s*(?:instruction|system|response)\b",
];

/// Classic tautology and statement-injection fragments.
const SQL_INJECTION: &[&str] = &[
    r"'\s*(?:or|and)\s+'?\w+'?\s*=\s*'?\w+",
    r"\bor\s+1\s*=\s*1\b",
    r"\bunion\s+(?:all\s+)?select\b",
    r";\s*(?:drop|delete|insert|update|alter|create|truncate|exec|shutdown)\b",
    r"\b(?:drop|truncate|alter)\s+(?:table|database)\b",
    r"\binsert\s+into\s+\w+.*\bvalues\b",
    r"\bdelete\s+from\s+\w+\s*(?:;|where\b|$)",
    r"\bupdate\s+\w+\s+set\s+\w+\s*=",
    r"'\s*;?\s*--",
    r"/\*.*\*/",
    r"\bxp_cmdshell\b",
    r"\bwaitfor\s+delay\b",
    r"\b(?:sleep|benchmark|pg_sleep)\s*\(\s*\d+",
];

fn case_insensitive_set(patterns: &[&str]) -> RegexSet {
    RegexSetBuilder::new(patterns)
        .case_insensitive(true)
        .build()
        .expect("built-in detector patterns must compile")
}

pub(crate) fn prompt_injection() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| case_insensitive_set(PROMPT_INJECTION))
}

pub(crate) fn sql_injection() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| case_insensitive_set(SQL_INJECTION))
}

/// Simplified RFC 5322 address grammar.
pub(crate) fn email() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("email regex pattern must be valid")
    })
}

/// Letters in any script, spaces, hyphens and apostrophes.
pub(crate) fn name() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[\p{L}\p{M} '\-]+$").expect("name regex pattern must be valid")
    })
}
