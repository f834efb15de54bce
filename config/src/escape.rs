//! # List Escaping
//!
//! The textual encoding of multi-valued properties.
//!
//! A raw value is split on every comma that is not preceded by a backslash.
//! `\,` encodes a literal comma; any other `\x` collapses to `x`, so `\\`
//! encodes a literal backslash. Tokens are trimmed and empty tokens dropped.

use thiserror::Error;

/// A raw list value ended with a backslash that escapes nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("value ends with a dangling escape character")]
pub struct DanglingEscape;

/// Split a raw list value into its trimmed, non-empty tokens.
///
/// Single left-to-right scan: characters accumulate into the current token,
/// which is flushed on each unescaped comma and at the end of input.
pub fn split_list(raw: &str) -> Result<Vec<String>, DanglingEscape> {
    let mut tokens = Vec::new();
    let mut current = String::with_capacity(raw.len().min(64));
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => return Err(DanglingEscape),
            },
            ',' => flush(&mut tokens, &mut current),
            other => current.push(other),
        }
    }
    flush(&mut tokens, &mut current);

    Ok(tokens)
}

fn flush(tokens: &mut Vec<String>, current: &mut String) {
    let token = current.trim();
    if !token.is_empty() {
        tokens.push(token.to_string());
    }
    current.clear();
}

/// Encode items so that [`split_list`] yields them back.
pub fn join_list<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut joined = String::new();
    for (index, item) in items.into_iter().enumerate() {
        if index > 0 {
            joined.push(',');
        }
        for c in item.as_ref().chars() {
            if c == ',' || c == '\\' {
                joined.push('\\');
            }
            joined.push(c);
        }
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_escaped_comma() {
        assert_eq!(split_list("1,2\\,3").unwrap(), vec!["1", "2,3"]);
    }

    #[test]
    fn test_split_drops_blank_tokens() {
        assert_eq!(split_list(" a , ,  ,b,").unwrap(), vec!["a", "b"]);
        assert!(split_list(" ,  , ").unwrap().is_empty());
    }

    #[test]
    fn test_split_collapses_other_escapes() {
        assert_eq!(split_list("a\\bc,d\\\\e").unwrap(), vec!["abc", "d\\e"]);
    }

    #[test]
    fn test_split_dangling_escape_is_rejected() {
        assert_eq!(split_list("a,b\\"), Err(DanglingEscape));
    }

    #[test]
    fn test_join_escapes_separators() {
        let joined = join_list(["x,y", "c:\\tmp", "plain"]);
        assert_eq!(joined, "x\\,y,c:\\\\tmp,plain");
        assert_eq!(split_list(&joined).unwrap(), vec!["x,y", "c:\\tmp", "plain"]);
    }
}
