//! Lexicographic range bounds for prefix queries.
//!
//! Member names use the closed alphabet `a`..`z`. The characters on either
//! side of it in ASCII, `` ` `` and `{`, act as the range delimiters:
//!
//! ```text
//! ` a b c ... x y z {
//! ^                 ^
//! below every name  above every name
//! ```
//!
//! For prefix `abc` the range is `(abb{, abc{)`: `abb{` sorts after every
//! name starting with `abb` and before `abc`, while `abc{` sorts after every
//! name starting with `abc`.

/// Characters allowed in member names and prefixes, plus both delimiters.
const ALPHABET: &[u8] = b"`abcdefghijklmnopqrstuvwxyz{";

/// The upper delimiter. Any member containing it is a range sentinel.
pub const DELIMITER: char = '{';

/// First character outside `a`..`z`, if any.
pub fn invalid_char(s: &str) -> Option<char> {
    s.chars().find(|c| !c.is_ascii_lowercase())
}

/// Range `(start, end)` strictly enclosing every name starting with `prefix`.
///
/// `prefix` must already be validated with [`invalid_char`].
pub fn prefix_range(prefix: &str) -> (String, String) {
    let (head, last) = match prefix.char_indices().next_back() {
        Some((idx, ch)) => (prefix.get(..idx).unwrap_or_default(), Some(ch)),
        None => ("", None),
    };
    let position = last.map_or(0, |ch| ALPHABET.partition_point(|&b| char::from(b) < ch));
    let predecessor = ALPHABET
        .get(position.max(1).saturating_sub(1))
        .map_or('`', |&b| char::from(b));

    let start = format!("{head}{predecessor}{DELIMITER}");
    let end = format!("{prefix}{DELIMITER}");
    (start, end)
}
