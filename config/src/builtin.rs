//! # Built-in Converters
//!
//! Every [`ConverterRegistry`] starts with converters for text, booleans, the
//! fixed-width numeric types, `char`, durations, RFC 3339 instants, URLs,
//! paths and type names. They are registered at
//! [`BUILTIN_PRIORITY`](crate::BUILTIN_PRIORITY) so any explicit registration
//! replaces them.

use std::error::Error;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use errors::BoxError;
use url::Url;

use crate::converter::ConverterRegistry;
use crate::typeref::TypeRef;

crate::configurable!(
    String,
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    Duration,
    DateTime<Utc>,
    Url,
    PathBuf,
    TypeRef,
);

/// Tokens converting to `true`, compared case-insensitively. Anything else is `false`.
pub const TRUTHY: [&str; 8] = ["true", "1", "yes", "y", "on", "ja", "j", "oui"];

macro_rules! register_parsed {
    ($registry:expr, $($ty:ty),+ $(,)?) => {
        $( $registry.register_builtin::<$ty, _>(parse_with::<$ty>); )+
    };
}

pub(crate) fn register_builtins(registry: &ConverterRegistry) {
    registry.register_builtin::<String, _>(|raw| Ok(raw.to_string()));
    registry.register_builtin::<bool, _>(|raw| Ok(parse_bool(raw)));
    registry.register_builtin::<char, _>(parse_char);
    register_parsed!(
        registry, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64,
    );
    registry.register_builtin::<Duration, _>(parse_duration);
    registry.register_builtin::<DateTime<Utc>, _>(|raw| {
        Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
    });
    registry.register_builtin::<Url, _>(parse_with::<Url>);
    registry.register_builtin::<PathBuf, _>(|raw| Ok(PathBuf::from(raw)));

    let known = registry.known_types();
    registry.register_builtin::<TypeRef, _>(move |raw| {
        known
            .get(raw.trim())
            .map(|entry| *entry.value())
            .ok_or_else(|| format!("unknown type '{raw}'").into())
    });
}

fn parse_with<T>(raw: &str) -> Result<T, BoxError>
where
    T: FromStr,
    T::Err: Error + Send + Sync + 'static,
{
    raw.parse::<T>().map_err(BoxError::from)
}

pub fn parse_bool(raw: &str) -> bool {
    TRUTHY.iter().any(|token| token.eq_ignore_ascii_case(raw))
}

fn parse_char(raw: &str) -> Result<char, BoxError> {
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(format!("expected exactly one character, got {} characters", raw.chars().count()).into()),
    }
}

const NANOS_PER_SECOND: u128 = 1_000_000_000;
const NANOS_PER_MINUTE: u128 = 60 * NANOS_PER_SECOND;
const NANOS_PER_HOUR: u128 = 60 * NANOS_PER_MINUTE;
const NANOS_PER_DAY: u128 = 24 * NANOS_PER_HOUR;

/// Parse a duration.
///
/// Accepts ISO-8601 durations (`PT15M`, `P1DT2H`, `PT0.5S`) and unit
/// suffixed amounts, optionally chained (`250ms`, `1.5s`, `1h 30m`). The unit
/// suffixes are `ns`, `us`/`µs`, `ms`, `s`, `m`, `h` and `d`, which makes the
/// `Debug` rendering of a `Duration` parse back to the same value.
pub fn parse_duration(raw: &str) -> Result<Duration, BoxError> {
    let text = raw.trim();
    let nanos = match text.strip_prefix(['P', 'p']) {
        Some(body) => parse_iso8601(body, text)?,
        None => parse_unit_amounts(text)?,
    };
    nanos_to_duration(nanos).ok_or_else(|| format!("duration '{text}' is out of range").into())
}

fn parse_unit_amounts(text: &str) -> Result<u128, BoxError> {
    if text.is_empty() {
        return Err("empty duration".into());
    }

    let mut total: u128 = 0;
    let mut rest = text;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        let tail = tail.trim_start();
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.' || c.is_whitespace())
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);

        let scale = unit_nanos(unit)
            .ok_or_else(|| format!("missing or unknown unit '{unit}' in duration '{text}'"))?;
        let amount = scaled_nanos(number, scale)
            .ok_or_else(|| format!("invalid amount '{number}' in duration '{text}'"))?;
        total = total
            .checked_add(amount)
            .ok_or_else(|| format!("duration '{text}' is out of range"))?;
        rest = tail.trim_start();
    }
    Ok(total)
}

fn unit_nanos(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" => Some(1_000),
        "ms" => Some(1_000_000),
        "s" => Some(NANOS_PER_SECOND),
        "m" => Some(NANOS_PER_MINUTE),
        "h" => Some(NANOS_PER_HOUR),
        "d" => Some(NANOS_PER_DAY),
        _ => None,
    }
}

fn parse_iso8601(body: &str, text: &str) -> Result<u128, BoxError> {
    let body = body.to_ascii_uppercase();
    let (date, time) = match body.split_once('T') {
        Some((date, time)) => (date, Some(time)),
        None => (body.as_str(), None),
    };
    if date.is_empty() && time.is_none_or(str::is_empty) {
        return Err(format!("ISO-8601 duration '{text}' has no components").into());
    }

    let mut total = iso_components(date, &[('D', NANOS_PER_DAY)], text)?;
    if let Some(time) = time {
        if time.is_empty() {
            return Err(format!("ISO-8601 duration '{text}' has an empty time part").into());
        }
        let time_nanos = iso_components(
            time,
            &[
                ('H', NANOS_PER_HOUR),
                ('M', NANOS_PER_MINUTE),
                ('S', NANOS_PER_SECOND),
            ],
            text,
        )?;
        total = total
            .checked_add(time_nanos)
            .ok_or_else(|| format!("duration '{text}' is out of range"))?;
    }
    Ok(total)
}

fn iso_components(part: &str, designators: &[(char, u128)], text: &str) -> Result<u128, BoxError> {
    let mut total: u128 = 0;
    let mut rest = part;
    while !rest.is_empty() {
        let at = rest
            .find(|c: char| c.is_ascii_alphabetic())
            .ok_or_else(|| format!("ISO-8601 duration '{text}' is missing a designator"))?;
        let (number, tail) = rest.split_at(at);
        let designator = tail.chars().next().unwrap_or_default();
        let scale = designators
            .iter()
            .find(|(d, _)| *d == designator)
            .map(|(_, scale)| *scale)
            .ok_or_else(|| format!("unexpected designator '{designator}' in duration '{text}'"))?;
        let amount = scaled_nanos(number, scale)
            .ok_or_else(|| format!("invalid amount '{number}' in duration '{text}'"))?;
        total = total
            .checked_add(amount)
            .ok_or_else(|| format!("duration '{text}' is out of range"))?;
        rest = &tail[designator.len_utf8()..];
    }
    Ok(total)
}

/// `number` (digits with an optional fraction) times `scale`, truncated to whole nanoseconds.
fn scaled_nanos(number: &str, scale: u128) -> Option<u128> {
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut nanos = whole.checked_mul(scale)?;
    if !fraction.is_empty() {
        let digits = &fraction[..fraction.len().min(18)];
        let denominator = 10u128.pow(digits.len() as u32);
        let numerator: u128 = digits.parse().ok()?;
        nanos = nanos.checked_add(numerator * scale / denominator)?;
    }
    Some(nanos)
}

fn nanos_to_duration(nanos: u128) -> Option<Duration> {
    let secs = u64::try_from(nanos / NANOS_PER_SECOND).ok()?;
    let subsec = (nanos % NANOS_PER_SECOND) as u32;
    Some(Duration::new(secs, subsec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use errors::ConfigError;

    fn registry() -> ConverterRegistry {
        ConverterRegistry::new()
    }

    #[test]
    fn test_bool_truthy_tokens() {
        for token in ["true", "TRUE", "1", "yes", "Y", "on", "ja", "J", "Oui"] {
            assert!(parse_bool(token), "{token} should be true");
        }
        for token in ["false", "0", "no", "off", "nope", "2", "truthy"] {
            assert!(!parse_bool(token), "{token} should be false");
        }
    }

    #[test]
    fn test_numeric_malformed_input_fails() {
        let registry = registry();
        assert_eq!(registry.convert::<i32>(Some("-42")).unwrap(), Some(-42));
        assert_eq!(registry.convert::<f64>(Some("2.5")).unwrap(), Some(2.5));
        assert!(matches!(
            registry.convert::<i32>(Some("forty")),
            Err(ConfigError::ConversionFailed { .. })
        ));
        assert!(matches!(
            registry.convert::<u8>(Some("300")),
            Err(ConfigError::ConversionFailed { .. })
        ));
    }

    #[test]
    fn test_char_requires_single_character() {
        let registry = registry();
        assert_eq!(registry.convert::<char>(Some("é")).unwrap(), Some('é'));
        assert!(registry.convert::<char>(Some("ab")).is_err());
    }

    #[test]
    fn test_duration_unit_forms() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("1h 30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("2d").unwrap(), Duration::from_secs(172_800));
        assert_eq!(parse_duration("7µs").unwrap(), Duration::from_micros(7));
    }

    #[test]
    fn test_duration_iso8601_forms() {
        assert_eq!(parse_duration("PT15M").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("P1DT2H").unwrap(), Duration::from_secs(93_600));
        assert_eq!(parse_duration("pt0.5s").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn test_duration_rejects_garbage() {
        for raw in ["", "10", "5 parsecs", "PT", "P", "PTxS", "1..2s"] {
            assert!(parse_duration(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn test_scalar_round_trip_through_canonical_form() {
        let registry = registry();

        let duration = Duration::new(3, 5);
        let reparsed: Duration = registry
            .convert(Some(&format!("{duration:?}")))
            .unwrap()
            .unwrap();
        assert_eq!(reparsed, duration);

        let instant: DateTime<Utc> = registry
            .convert(Some("2024-02-29T12:30:00Z"))
            .unwrap()
            .unwrap();
        let again: DateTime<Utc> = registry
            .convert(Some(&instant.to_rfc3339()))
            .unwrap()
            .unwrap();
        assert_eq!(instant, again);

        for value in [i64::MIN, -1, 0, i64::MAX] {
            let back: i64 = registry.convert(Some(&value.to_string())).unwrap().unwrap();
            assert_eq!(back, value);
        }
        for value in [true, false] {
            let back: bool = registry.convert(Some(&value.to_string())).unwrap().unwrap();
            assert_eq!(back, value);
        }
        let url: Url = registry.convert(Some("https://example.org/a?b=c")).unwrap().unwrap();
        let back: Url = registry.convert(Some(url.as_str())).unwrap().unwrap();
        assert_eq!(url, back);
    }

    #[test]
    fn test_type_ref_by_full_and_short_name() {
        let registry = registry();
        let by_full: TypeRef = registry
            .convert(Some(std::any::type_name::<Duration>()))
            .unwrap()
            .unwrap();
        let by_short: TypeRef = registry.convert(Some("Duration")).unwrap().unwrap();
        assert!(by_full.is::<Duration>());
        assert_eq!(by_full, by_short);

        assert!(registry.convert::<TypeRef>(Some("NoSuchType")).is_err());
    }
}
