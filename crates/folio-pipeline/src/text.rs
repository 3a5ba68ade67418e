// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Text clean-up applied to recognition output and language-model input.

use once_cell::sync::Lazy;
use regex::Regex;

/// Replaces output that is mostly unreadable.
pub const UNCLEAR_TEXT_NOTICE: &str = "[Document text unclear - manual review recommended]";
/// Joins the head and tail of an over-long input.
pub const TRUNCATION_MARKER: &str = "\n...[truncated]...\n";

/// Historical orthography letters that must survive filtering even though
/// some sit in the IPA block.
pub const DOKE_CHARACTERS: [char; 11] = ['ɓ', 'ɗ', 'ȿ', 'ɀ', 'ŋ', 'ʃ', 'ʒ', 'ṱ', 'ḓ', 'ḽ', 'ṋ'];

const UNCLEAR_EXCERPT_CHARS: usize = 500;
const MIN_ALPHA_RATIO: f64 = 0.3;
const MIN_SURVIVING_RATIO: f64 = 0.2;
const MIN_LENGTH_FOR_FALLBACK: usize = 50;

// Markup that recognisers hallucinate on handwriting: inline maths, LaTeX
// commands, super/subscripts, CJK brackets.
static MARKUP_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\$[^$]+\$",
        r"\\frac\{[^}]*\}\{[^}]*\}",
        r"\\[a-zA-Z]+\{[^}]*\}",
        r"\^[\d\{\}]+",
        r"_[\d\{\}]+",
        r"[《》「」『』【】〈〉]",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid markup regex"))
    .collect()
});

static PUNCTUATION_OR_SPACE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\p{Pc}\p{Pd}\p{Pe}\p{Pf}\p{Pi}\p{Po}\p{Ps}\p{Zs}]$")
        .expect("valid punctuation regex")
});

fn keep_char(c: char) -> bool {
    let code = c as u32;
    if code < 0x0250 || (0x1E00..0x1F00).contains(&code) || DOKE_CHARACTERS.contains(&c) {
        return true;
    }
    let mut buf = [0u8; 4];
    PUNCTUATION_OR_SPACE.is_match(c.encode_utf8(&mut buf))
}

fn alpha_ratio(line: &str) -> f64 {
    let total = line.chars().count().max(1);
    let alpha = line.chars().filter(|c| c.is_alphabetic()).count();
    alpha as f64 / total as f64
}

/// Strip recognition artefacts from `text`.
///
/// Markup is removed first; then every line keeps only Latin, Latin Extended
/// Additional, historical orthography, punctuation, and space characters.
/// Lines that are not at least 30% letters are dropped. When less than a
/// fifth of a long text survives, the text is probably in a script this
/// filter does not cover, so a notice plus the first 500 characters of the
/// unfiltered text is returned instead.
pub fn post_filter(text: &str) -> String {
    let mut stripped = text.to_string();
    for pattern in MARKUP_PATTERNS.iter() {
        stripped = pattern.replace_all(&stripped, "").into_owned();
    }

    let lines: Vec<String> = stripped
        .split('\n')
        .filter_map(|line| {
            let cleaned: String = line.chars().filter(|&c| keep_char(c)).collect();
            if cleaned.trim().is_empty() || alpha_ratio(&cleaned) <= MIN_ALPHA_RATIO {
                None
            } else {
                Some(cleaned.trim().to_string())
            }
        })
        .collect();
    let cleaned = lines.join("\n");

    let original_len = stripped.chars().count();
    let cleaned_len = cleaned.chars().count();
    if (cleaned_len as f64) < original_len as f64 * MIN_SURVIVING_RATIO
        && original_len > MIN_LENGTH_FOR_FALLBACK
    {
        let excerpt: String = stripped.chars().take(UNCLEAR_EXCERPT_CHARS).collect();
        return format!("{}\n{}", UNCLEAR_TEXT_NOTICE, excerpt).trim().to_string();
    }
    cleaned.trim().to_string()
}

/// Cap `text` at roughly `max_chars` by keeping its head and tail.
pub fn truncate_head_tail(text: &str, max_chars: usize) -> String {
    let len = text.chars().count();
    if len <= max_chars {
        return text.to_string();
    }
    let half = max_chars / 2;
    let head: String = text.chars().take(half).collect();
    let tail: String = text.chars().skip(len - half).collect();
    format!("{}{}{}", head, TRUNCATION_MARKER, tail)
}

/// Historical orthography letters present in `text`, in alphabet order.
pub fn doke_characters(text: &str) -> Vec<char> {
    DOKE_CHARACTERS
        .iter()
        .copied()
        .filter(|c| text.contains(*c))
        .collect()
}
