// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Comment text cleanup applied after loading
//!
//! Social media comments often spell words with spaces between the letters
//! ("a k t u e l l") to dodge filters. Those runs are joined back into a single
//! token, repeated spaces are collapsed and the result is trimmed.

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphabetic() || matches!(c, 'ä' | 'ö' | 'ü' | 'Ä' | 'Ö' | 'Ü' | 'ß')
}

fn is_single_letter(token: &str) -> bool {
    let mut chars = token.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if is_word_char(c))
}

/// A token that can close a spaced-out run: one letter or closing
/// punctuation, optionally followed by non-letters (e.g. "l," or "l!").
fn closes_run(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if is_word_char(c) || matches!(c, '!' | '?' | ',' | '.') => {
            chars.next().map_or(true, |next| !is_word_char(next))
        }
        _ => false,
    }
}

/// Join runs of single spaced letters into one word
pub fn join_spaced_letters(text: &str) -> String {
    let tokens: Vec<&str> = text.split(' ').filter(|t| !t.is_empty()).collect();
    let mut out: Vec<String> = Vec::with_capacity(tokens.len());
    let mut i = 0;

    while i < tokens.len() {
        let mut end = i;
        while end < tokens.len() && is_single_letter(tokens[end]) {
            end += 1;
        }

        // need at least one spaced letter followed by a closing token
        if end > i && end < tokens.len() && closes_run(tokens[end]) {
            out.push(tokens[i..=end].concat());
            i = end + 1;
        } else if end > i + 1 {
            // the last single letter closes the run itself
            out.push(tokens[i..end].concat());
            i = end;
        } else {
            out.push(tokens[i].to_string());
            i += 1;
        }
    }

    out.join(" ")
}

/// Full cleanup pipeline for a single comment
pub fn clean_comment(text: &str) -> String {
    join_spaced_letters(text.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joins_spaced_word() {
        assert_eq!(clean_comment("das ist a k t u e l l"), "das ist aktuell");
        assert_eq!(clean_comment("h a l l o, wie gehts"), "hallo, wie gehts");
    }

    #[test]
    fn test_leaves_regular_text_alone() {
        assert_eq!(clean_comment("Ich bin da"), "Ich bin da");
        assert_eq!(clean_comment("a word"), "a word");
    }

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(clean_comment("  zu   viele  Leerzeichen "), "zu viele Leerzeichen");
    }

    #[test]
    fn test_umlauts_count_as_letters() {
        assert_eq!(clean_comment("s ü ß"), "süß");
    }
}
