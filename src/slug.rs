//! Mapping between `(attribute slug, value)` pairs and URL path segments.
//!
//! A segment is `<attribute><SEPARATOR><value>`. Attribute slugs never contain
//! the separator, values may (everything after the first separator belongs to
//! the value). Numeric ranges are written `min_max` in the value part.

use lazy_regex::regex_is_match;
use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;

pub const SEPARATOR: char = '-';
pub const RANGE_SEPARATOR: char = '_';

pub const PAGE_SEGMENT: &str = "page";
pub const SORT_SEGMENT: &str = "sort";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Filter { attribute: String, value: String },
    /// Anything that does not split into a valid attribute slug and value
    Unrecognized(String),
}

pub fn is_attribute_slug(input: &str) -> bool {
    regex_is_match!(r"^[\p{L}\p{N}_.]+$", input)
}

pub fn is_value(input: &str) -> bool {
    regex_is_match!(r"^[\p{L}\p{N}_.\-]+$", input)
}

pub fn encode(attribute: &str, value: &str) -> String {
    format!("{attribute}{SEPARATOR}{value}")
}

pub fn encode_range(attribute: &str, range: &NumericRange) -> String {
    encode(attribute, &range.to_string())
}

pub fn decode(segment: &str) -> Segment {
    match segment.split_once(SEPARATOR) {
        Some((attribute, value)) if is_attribute_slug(attribute) && is_value(value) => {
            Segment::Filter {
                attribute: attribute.to_string(),
                value: value.to_string(),
            }
        }
        _ => Segment::Unrecognized(segment.to_string()),
    }
}

/// Inclusive numeric interval, `min <= max` always holds.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NumericRange {
    min: Decimal,
    max: Decimal,
}

impl NumericRange {
    pub fn new(min: Decimal, max: Decimal) -> Option<Self> {
        (min <= max).then_some(Self { min, max })
    }

    pub fn lower(&self) -> Decimal {
        self.min
    }

    pub fn upper(&self) -> Decimal {
        self.max
    }

    pub fn contains(&self, value: Decimal) -> bool {
        self.min <= value && value <= self.max
    }

    /// `None` for anything but `<number>_<number>` with min not above max.
    pub fn parse(value: &str) -> Option<Self> {
        let (min, max) = value.split_once(RANGE_SEPARATOR)?;
        Self::new(parse_number(min)?, parse_number(max)?)
    }
}

/// Plain decimal notation only, `Decimal::from_str` also takes `_` separators.
fn parse_number(input: &str) -> Option<Decimal> {
    if !regex_is_match!(r"^-?\d+(\.\d+)?$", input) {
        return None;
    }
    Decimal::from_str(input).ok().map(|n| n.normalize())
}

impl std::fmt::Display for NumericRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{RANGE_SEPARATOR}{}", self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn decodes_what_it_encodes() {
        for (a, v) in [
            ("grape", "merlot"),
            ("region", "bordeaux"),
            ("price", "1000_2000"),
            ("abv", "12.5_14"),
            ("vintage", "2019"),
        ] {
            assert_eq!(
                decode(&encode(a, v)),
                Segment::Filter {
                    attribute: a.to_string(),
                    value: v.to_string()
                }
            );
        }
    }

    #[test]
    fn value_keeps_everything_after_first_separator() {
        assert_eq!(
            decode("grape-sauvignon-blanc"),
            Segment::Filter {
                attribute: "grape".to_string(),
                value: "sauvignon-blanc".to_string()
            }
        );
    }

    #[test]
    fn malformed_segments_are_unrecognized() {
        for s in ["merlot", "-merlot", "grape-", "", "gr ape-merlot", "grape-mer/lot"] {
            assert_eq!(decode(s), Segment::Unrecognized(s.to_string()));
        }
    }

    #[test]
    fn parses_ranges() {
        let r = NumericRange::parse("1000_2000").unwrap();
        assert_eq!((r.lower(), r.upper()), (dec!(1000), dec!(2000)));
        assert!(r.contains(dec!(1500)));
        assert!(r.contains(dec!(2000)));
        assert!(!r.contains(dec!(2000.01)));
        assert_eq!(r.to_string(), "1000_2000");
        assert_eq!(
            NumericRange::parse("-5_10.50").map(|r| r.to_string()).as_deref(),
            Some("-5_10.5")
        );
        assert_eq!(NumericRange::parse("7_7").map(|r| r.lower()), Some(dec!(7)));
    }

    #[test]
    fn rejects_bad_ranges() {
        for v in [
            "2000_1000", "abc_10", "10", "10_", "_10", "1_2_3", "1_000_2000", "1e3_2000", " 1_2",
            "+1_2", "1._2",
        ] {
            assert_eq!(NumericRange::parse(v), None, "{v}");
        }
    }

    #[test]
    fn negative_range_survives_segment_codec() {
        let range = NumericRange::parse("-5_10").unwrap();
        let segment = encode_range("temperature", &range);
        assert_eq!(segment, "temperature--5_10");
        match decode(&segment) {
            Segment::Filter { attribute, value } => {
                assert_eq!(attribute, "temperature");
                assert_eq!(NumericRange::parse(&value), Some(range));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
