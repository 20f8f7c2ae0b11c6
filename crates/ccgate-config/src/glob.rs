// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use regex::Regex;

/// Matches `text` against a simple glob `pattern` where `*` matches any
/// (possibly empty) run of characters and every other character is literal.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let mut escaped = String::with_capacity(pattern.len() * 2);
    escaped.push('^');
    for part in pattern.split('*') {
        if !escaped.ends_with('^') {
            escaped.push_str(".*");
        }
        escaped.push_str(&regex::escape(part));
    }
    escaped.push('$');
    Regex::new(&escaped)
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}
