//! Text patterns that mark content as sensitive.
//!
//! Used two ways: incrementally by the keystroke filter, which asks
//! [`PatternSet::assess`] about its buffer after every key, and in bulk by
//! the screen sampler, which runs OCR output through [`PatternSet::scrub`].

use std::ops::Range;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::settings::RedactionConfig;

pub const REDACTED: &str = "[redacted]";

const CARD_MIN_DIGITS: usize = 13;
const CARD_MAX_DIGITS: usize = 19;

static CARD_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d(?:[ -]?\d){12,18}\b").expect("card pattern is valid"));
static SSN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("ssn pattern is valid"));

/// Luhn checksum over a string of ASCII digits.
pub fn luhn_valid(digits: &str) -> bool {
    let mut sum = 0;
    let mut count = 0;
    for (i, c) in digits.chars().rev().enumerate() {
        let Some(d) = c.to_digit(10) else {
            return false;
        };
        let value = if i % 2 == 1 {
            let doubled = d * 2;
            if doubled > 9 {
                doubled - 9
            } else {
                doubled
            }
        } else {
            d
        };
        sum += value;
        count += 1;
    }
    count > 0 && sum % 10 == 0
}

/// True when the digits of `candidate` (separators ignored) look like a
/// payment card: 13 to 19 digits with a valid Luhn checksum.
pub fn is_card_number(candidate: &str) -> bool {
    let digits: String = candidate.chars().filter(|c| c.is_ascii_digit()).collect();
    (CARD_MIN_DIGITS..=CARD_MAX_DIGITS).contains(&digits.len()) && luhn_valid(&digits)
}

/// Verdict on a keystroke buffer. Byte offsets index into the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assessment {
    Clear,
    /// Text from `hold_from` on may still turn out to be secret.
    Suspect { hold_from: usize },
    /// Text from `keep_until` on is secret.
    Sensitive { keep_until: usize },
}

#[derive(Debug, Clone, Copy)]
struct DigitTail {
    start: usize,
    digits: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scrubbed {
    pub text: String,
    pub redactions: usize,
}

#[derive(Debug, Clone)]
pub struct PatternSet {
    /// `password:` / `token =` / `password hunter2`
    keyword_assignment: Option<Regex>,
    /// `cvv 123` / `pin: 4431`
    code_assignment: Option<Regex>,
    /// Buffer ends in a keyword whose value has not been typed yet.
    keyword_tail: Option<Regex>,
    keyword_value: Option<Regex>,
    code_value: Option<Regex>,
}

fn alternation(words: &[String]) -> Option<String> {
    let parts: Vec<String> = words
        .iter()
        .map(|word| {
            word.split_whitespace()
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"[\s_-]*")
        })
        .filter(|part| !part.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("|"))
    }
}

fn compile(pattern: Option<String>) -> Result<Option<Regex>> {
    pattern
        .map(|p| Regex::new(&p).with_context(|| format!("invalid redaction pattern {p}")))
        .transpose()
}

impl PatternSet {
    pub fn new(config: &RedactionConfig) -> Result<Self> {
        let keywords = alternation(&config.keywords);
        let codes = alternation(&config.code_keywords);
        let all: Vec<String> = config
            .keywords
            .iter()
            .chain(config.code_keywords.iter())
            .cloned()
            .collect();

        Ok(Self {
            keyword_assignment: compile(keywords.as_ref().map(|k| format!(r"(?i)\b(?:{k})(?:\s*[:=]|\s+\S)")))?,
            code_assignment: compile(codes.as_ref().map(|k| format!(r"(?i)\b(?:{k})\s*[:=#]?\s*\d")))?,
            keyword_tail: compile(alternation(&all).map(|k| format!(r"(?i)\b(?:{k})\s*$")))?,
            keyword_value: compile(keywords.map(|k| format!(r"(?i)\b(?:{k})(?:\s*[:=]\s*\S*|\s+\S+)")))?,
            code_value: compile(codes.map(|k| format!(r"(?i)\b(?:{k})\s*[:=#]?\s*\d[\d -]*")))?,
        })
    }

    /// Classify a keystroke buffer.
    pub fn assess(&self, buffer: &str, suspect_digit_run: usize) -> Assessment {
        let mut sensitive_at: Option<usize> = None;
        let mut mark = |at: usize| {
            sensitive_at = Some(sensitive_at.map_or(at, |prev| prev.min(at)));
        };

        for re in [&self.keyword_assignment, &self.code_assignment].into_iter().flatten() {
            if let Some(m) = re.find(buffer) {
                mark(m.start());
            }
        }
        if let Some(m) = SSN.find(buffer) {
            mark(m.start());
        }
        if let Some(m) = CARD_RUN.find_iter(buffer).find(|m| is_card_number(m.as_str())) {
            mark(m.start());
        }

        let tail = digit_tail(buffer);
        if let Some(start) = tail.and_then(|t| card_suffix(buffer, t.start)) {
            mark(start);
        }

        if let Some(keep_until) = sensitive_at {
            return Assessment::Sensitive { keep_until };
        }

        if let Some(tail) = tail.filter(|t| t.digits >= suspect_digit_run) {
            return Assessment::Suspect { hold_from: tail.start };
        }

        if let Some(m) = self.keyword_tail.as_ref().and_then(|re| re.find(buffer)) {
            return Assessment::Suspect { hold_from: m.start() };
        }

        Assessment::Clear
    }

    /// Replace every sensitive span in `text` with [`REDACTED`].
    pub fn scrub(&self, text: &str) -> Scrubbed {
        let mut spans: Vec<Range<usize>> = Vec::new();

        spans.extend(
            CARD_RUN
                .find_iter(text)
                .filter(|m| is_card_number(m.as_str()))
                .map(|m| m.range()),
        );
        spans.extend(SSN.find_iter(text).map(|m| m.range()));
        for re in [&self.keyword_value, &self.code_value].into_iter().flatten() {
            spans.extend(re.find_iter(text).map(|m| m.range()));
        }

        if spans.is_empty() {
            return Scrubbed {
                text: text.to_string(),
                redactions: 0,
            };
        }

        spans.sort_by_key(|r| r.start);
        let mut merged: Vec<Range<usize>> = Vec::with_capacity(spans.len());
        for span in spans {
            if let Some(last) = merged.last_mut() {
                if span.start <= last.end {
                    last.end = last.end.max(span.end);
                    continue;
                }
            }
            merged.push(span);
        }

        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for span in &merged {
            out.push_str(&text[cursor..span.start]);
            out.push_str(REDACTED);
            cursor = span.end;
        }
        out.push_str(&text[cursor..]);

        Scrubbed {
            text: out,
            redactions: merged.len(),
        }
    }

    pub fn contains_sensitive(&self, text: &str) -> bool {
        self.scrub(text).redactions > 0
    }
}

/// Trailing run of digits, spaces and dashes, starting at its first digit.
fn digit_tail(buffer: &str) -> Option<DigitTail> {
    let mut start = buffer.len();
    let mut digits = 0;
    for (idx, c) in buffer.char_indices().rev() {
        if c.is_ascii_digit() {
            digits += 1;
            start = idx;
        } else if c != ' ' && c != '-' {
            break;
        }
    }
    (digits > 0).then_some(DigitTail { start, digits })
}

/// Start of the longest card-like digit suffix within the tail, if any.
fn card_suffix(buffer: &str, tail_start: usize) -> Option<usize> {
    let positions: Vec<(usize, char)> = buffer[tail_start..]
        .char_indices()
        .filter(|(_, c)| c.is_ascii_digit())
        .map(|(i, c)| (tail_start + i, c))
        .collect();

    (CARD_MIN_DIGITS..=CARD_MAX_DIGITS.min(positions.len()))
        .rev()
        .find_map(|len| {
            let suffix = &positions[positions.len() - len..];
            let digits: String = suffix.iter().map(|(_, c)| *c).collect();
            luhn_valid(&digits).then(|| suffix[0].0)
        })
}
