//! # Placeholder Expansion
//!
//! Expands `${name}` and `${name:default}` references inside raw values.
//!
//! - A reference that resolves is replaced by the (recursively expanded) value
//! - An unresolved reference with a default is replaced by the default
//! - An unresolved reference without a default is left as-is and skipped
//! - Malformed syntax (no closing brace, empty name) stops expansion and the
//!   text is returned unchanged from that point
//!
//! Expansion rescans from the start of every substitution, so a default may
//! itself contain references. Nested references are matched by depth.

use tracing::warn;

/// Maximum nesting of values that reference other values.
pub const MAX_DEPTH: usize = 32;

/// Maximum nested substitutions performed while expanding the value behind
/// one reference of the input. References written in the input itself are
/// not counted.
pub const MAX_SUBSTITUTIONS: usize = 64;

const OPEN: &str = "${";

/// Expand every placeholder in `raw`.
///
/// `lookup` returns the raw value of a name, or `None` when it is undefined.
/// Values returned by `lookup` are expanded in turn before substitution.
pub fn expand<F>(raw: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut expander = Expander {
        lookup,
        nested: 0,
        truncated: false,
    };
    let expanded = expander.expand(raw, 0);
    if expander.truncated {
        warn!(
            max_depth = MAX_DEPTH,
            max_substitutions = MAX_SUBSTITUTIONS,
            "Placeholder expansion limit reached, value left partially expanded"
        );
    }
    expanded
}

struct Expander<F> {
    lookup: F,
    nested: usize,
    truncated: bool,
}

impl<F> Expander<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn expand(&mut self, raw: &str, depth: usize) -> String {
        if depth > MAX_DEPTH {
            self.truncated = true;
            return raw.to_string();
        }

        let mut value = raw.to_string();
        let mut start = 0;
        while let Some(open) = find_from(&value, OPEN, start) {
            if self.truncated {
                return value;
            }
            let Some(close) = closing_brace(&value, open) else {
                return value;
            };

            let body = &value[open + OPEN.len()..close];
            let (name, default) = match body.find(':') {
                Some(separator) => (&body[..separator], Some(&body[separator + 1..])),
                None => (body, None),
            };
            if name.is_empty() {
                return value;
            }

            let replacement = match (self.lookup)(name) {
                Some(found) => Some(self.expand(&found, depth + 1)),
                None => default.map(str::to_string),
            };
            let Some(replacement) = replacement else {
                start = close + 1;
                continue;
            };

            if depth == 0 {
                self.nested = 0;
            } else {
                self.nested += 1;
                if self.nested > MAX_SUBSTITUTIONS {
                    self.truncated = true;
                    return value;
                }
            }

            let next = format!("{}{}{}", &value[..open], replacement, &value[close + 1..]);
            if next == value {
                return value;
            }
            value = next;
        }
        value
    }
}

fn find_from(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    haystack
        .get(from..)
        .and_then(|tail| tail.find(needle))
        .map(|at| at + from)
}

/// Index of the `}` closing the reference opened at `open`.
fn closing_brace(value: &str, open: usize) -> Option<usize> {
    let bytes = value.as_bytes();
    let mut depth = 1usize;
    let mut i = open + OPEN.len();
    while i < bytes.len() {
        match bytes[i] {
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                depth += 1;
                i += 2;
                continue;
            }
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn with(entries: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_simple_reference() {
        assert_eq!(expand("${p1}", with(&[("p1", "v1")])), "v1");
        assert_eq!(expand("url=${p1}/x", with(&[("p1", "v1")])), "url=v1/x");
    }

    #[test]
    fn test_default_used_when_missing() {
        assert_eq!(expand("${missing:d1}", with(&[])), "d1");
        assert_eq!(expand("${missing:}", with(&[])), "");
    }

    #[test]
    fn test_nested_default() {
        assert_eq!(expand("${missing:${p2}/foo}", with(&[("p2", "v2")])), "v2/foo");
    }

    #[test]
    fn test_unresolved_is_kept_and_scan_continues() {
        assert_eq!(
            expand("${missing} and ${p1}", with(&[("p1", "v1")])),
            "${missing} and v1"
        );
    }

    #[test]
    fn test_values_are_expanded_recursively() {
        let lookup = with(&[("host", "db"), ("url", "jdbc://${host}:${port:5432}")]);
        assert_eq!(expand("${url}/app", lookup), "jdbc://db:5432/app");
    }

    #[test]
    fn test_malformed_input_degrades_to_literal() {
        let lookup = with(&[("p1", "v1")]);
        assert_eq!(expand("${p1", &lookup), "${p1");
        assert_eq!(expand("${}", &lookup), "${}");
        assert_eq!(expand("${:fallback}", &lookup), "${:fallback}");
        assert_eq!(expand("${p1} then ${broken", &lookup), "v1 then ${broken");
        assert_eq!(expand("no references", &lookup), "no references");
    }

    #[test]
    fn test_self_reference_terminates() {
        assert_eq!(expand("${a}", with(&[("a", "${a}")])), "${a}");
        let cyclic = with(&[("a", "${b}"), ("b", "${a}")]);
        let expanded = expand("${a}", cyclic);
        assert!(matches!(expanded.as_str(), "${a}" | "${b}"));
    }

    #[test]
    fn test_many_references_all_expand() {
        let raw = vec!["${host}"; 150].join(",");
        let expanded = expand(&raw, with(&[("host", "h")]));
        assert_eq!(expanded, vec!["h"; 150].join(","));

        let raw = vec!["${url}"; 120].join(" ");
        let lookup = with(&[("host", "db"), ("url", "${host}:${port:5432}")]);
        assert_eq!(expand(&raw, lookup), vec!["db:5432"; 120].join(" "));
    }

    #[test]
    fn test_growing_reference_is_bounded() {
        let expanded = expand("${a}", with(&[("a", "${a}${a}")]));
        assert!(expanded.contains("${a}"));
    }
}
