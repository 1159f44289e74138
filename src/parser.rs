//! Attribute extraction and range normalisation for RPSL blocks.
//!
//! Blocks stay raw bytes all the way through: registry dumps carry the
//! occasional non-UTF-8 byte, so the regexes run on bytes and only the
//! captured fragments are decoded (lossily).

use ipnet::Ipv4Subnets;
use lazy_static::lazy_static;
use regex::bytes::Regex;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Mutex;

lazy_static! {
    static ref PROPERTY_PATTERNS: Mutex<HashMap<String, Regex>> = Mutex::new(HashMap::new());
    static ref TOKEN_SEPARATORS: regex::Regex =
        regex::Regex::new(r"[ ,]+").expect("token separator pattern must compile");
    static ref CHANGED_DATE: regex::Regex =
        regex::Regex::new(r"^.+?@.+? \d+").expect("changed date pattern must compile");
    static ref RE_INETNUM_RANGE: Regex = Regex::new(
        r"(?m-u)^inetnum:[\s]*((?:\d{1,3}\.){3}\d{1,3})[\s]*-[\s]*((?:\d{1,3}\.){3}\d{1,3})"
    )
    .expect("inetnum range pattern must compile");
    static ref RE_INETNUM_CIDR: Regex =
        Regex::new(r"(?m-u)^inetnum:[\s]*((?:\d{1,3}\.){3}\d{1,3}/\d+)")
            .expect("inetnum cidr pattern must compile");
    static ref RE_INETNUM_THREE_OCTETS: Regex =
        Regex::new(r"(?m-u)^inetnum:[\s]*((?:\d{1,3}\.){2}\d{1,3}/\d+)")
            .expect("truncated inetnum pattern must compile");
    static ref RE_INETNUM_TWO_OCTETS: Regex =
        Regex::new(r"(?m-u)^inetnum:[\s]*((?:\d{1,3}\.){1}\d{1,3}/\d+)")
            .expect("truncated inetnum pattern must compile");
    static ref RE_INET6NUM: Regex = Regex::new(r"(?m-u)^inet6num:[\s]*([0-9a-fA-F:/]{1,43})")
        .expect("inet6num pattern must compile");
    static ref RE_ROUTE: Regex = Regex::new(r"(?m-u)^route:[\s]*((?:\d{1,3}\.){3}\d{1,3}/\d{1,2})")
        .expect("route pattern must compile");
    static ref RE_ROUTE6: Regex = Regex::new(r"(?m-u)^route6:[\s]*([0-9a-fA-F:/]{1,43})")
        .expect("route6 pattern must compile");
}

/// Compiled `^<name>:\s?(.+)$` patterns, cached per attribute name.
/// Unicode is off so `.` eats the occasional non-UTF-8 byte instead of
/// aborting the match. [`Regex`] clones share the compiled program, so
/// handing out clones is cheap.
fn property_regex(name: &str) -> Regex {
    let mut cache = PROPERTY_PATTERNS
        .lock()
        .expect("property pattern cache poisoned");
    cache
        .entry(name.to_string())
        .or_insert_with(|| {
            Regex::new(&format!(r"(?m-u)^{}:\s?(.+)$", regex::escape(name)))
                .expect("attribute pattern must compile")
        })
        .clone()
}

/// Collect every `<name>:` value line in the block, trimmed and with
/// stray `<name>: ` echoes stripped out of the captured fragment.
fn property_fragments(block: &[u8], name: &str) -> Vec<String> {
    let echo = format!("{name}: ");
    property_regex(name)
        .captures_iter(block)
        .filter_map(|caps| {
            let value = String::from_utf8_lossy(&caps[1]);
            let value = value.trim().replace(&echo, "");
            (!value.is_empty()).then_some(value)
        })
        .collect()
}

/// Extract a single-valued attribute: all matching lines joined with
/// single spaces, whitespace runs collapsed. `None` when the block has
/// no such attribute (or only empty values).
pub fn parse_property(block: &[u8], name: &str) -> Option<String> {
    let fragments = property_fragments(block, name);
    if fragments.is_empty() {
        return None;
    }
    let joined = fragments.join(" ");
    let collapsed = joined.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

/// Extract a multi-valued attribute: values split on spaces and commas,
/// deduplicated, first-seen order preserved. Hyphens are not
/// separators, so `MNT-IEVOL` stays one token.
pub fn parse_properties(block: &[u8], name: &str) -> Vec<String> {
    let fragments = property_fragments(block, name);
    if fragments.is_empty() {
        return Vec::new();
    }
    let joined = fragments.join(" ");
    let mut seen = HashSet::new();
    TOKEN_SEPARATORS
        .split(&joined)
        .filter(|token| !token.is_empty())
        .filter(|token| seen.insert(token.to_string()))
        .map(String::from)
        .collect()
}

/// Normalise whatever range a block advertises into CIDR strings.
///
/// The patterns are tried in order and the first matching one wins:
/// dashed IPv4 ranges (expanded to their minimal CIDR cover), plain
/// `inetnum` prefixes, the truncated three- and two-octet forms some
/// registries ship (zero-padded), then `inet6num`, `route`, `route6`.
/// An empty result means the block carries no usable range.
pub fn parse_cidrs(block: &[u8]) -> Vec<String> {
    if let Some(caps) = RE_INETNUM_RANGE.captures(block) {
        let start = String::from_utf8_lossy(&caps[1]);
        let end = String::from_utf8_lossy(&caps[2]);
        return match (start.parse::<Ipv4Addr>(), end.parse::<Ipv4Addr>()) {
            (Ok(start), Ok(end)) => Ipv4Subnets::new(start, end, 0)
                .map(|net| net.to_string())
                .collect(),
            _ => Vec::new(),
        };
    }
    if let Some(caps) = RE_INETNUM_CIDR.captures(block) {
        return vec![String::from_utf8_lossy(&caps[1]).into_owned()];
    }
    if let Some(caps) = RE_INETNUM_THREE_OCTETS.captures(block) {
        let value = String::from_utf8_lossy(&caps[1]);
        if let Some((addr, len)) = value.split_once('/') {
            return vec![format!("{addr}.0/{len}")];
        }
    }
    if let Some(caps) = RE_INETNUM_TWO_OCTETS.captures(block) {
        let value = String::from_utf8_lossy(&caps[1]);
        if let Some((addr, len)) = value.split_once('/') {
            return vec![format!("{addr}.0.0/{len}")];
        }
    }
    if let Some(caps) = RE_INET6NUM.captures(block) {
        return vec![String::from_utf8_lossy(&caps[1]).into_owned()];
    }
    if let Some(caps) = RE_ROUTE.captures(block) {
        return vec![String::from_utf8_lossy(&caps[1]).into_owned()];
    }
    if let Some(caps) = RE_ROUTE6.captures(block) {
        return vec![String::from_utf8_lossy(&caps[1]).into_owned()];
    }
    Vec::new()
}

/// Derive a `last_modified` value from a legacy `changed:` attribute of
/// the shape `<email> <YYYYMMDD>`.
///
/// A valid-looking date comes back as `YYYY-M-D` without zero padding.
/// A dated line that fails the shape check is dropped (the caller logs
/// nothing above DEBUG); a value without an `@` at all is passed
/// through untouched.
pub fn last_modified_from_changed(changed: &str) -> Option<String> {
    if CHANGED_DATE.is_match(changed) {
        let date = changed.split_whitespace().nth(1).unwrap_or_default().trim();
        if date.len() == 8 && date.bytes().all(|b| b.is_ascii_digit()) {
            let year: u32 = date[0..4].parse().ok()?;
            let month: u32 = date[4..6].parse().ok()?;
            let day: u32 = date[6..8].parse().ok()?;
            if (1..=12).contains(&month) && (1..=31).contains(&day) {
                return Some(format!("{year}-{month}-{day}"));
            }
        }
        log::debug!("ignoring invalid changed date {changed:?}");
        None
    } else if changed.contains('@') {
        log::debug!("ignoring invalid changed date {changed:?}");
        None
    } else {
        Some(changed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_property_single_line() {
        let block = b"inetnum: 10.0.0.0/8\nnetname: TEST-NET\ncountry: AU\n";
        assert_eq!(
            parse_property(block, "netname"),
            Some("TEST-NET".to_string())
        );
        assert_eq!(parse_property(block, "country"), Some("AU".to_string()));
        assert_eq!(parse_property(block, "status"), None);
    }

    #[test]
    fn test_parse_property_joins_and_collapses_whitespace() {
        let block = b"descr:  Example   Carrier\ndescr: Sydney\n";
        assert_eq!(
            parse_property(block, "descr"),
            Some("Example Carrier Sydney".to_string())
        );
    }

    #[test]
    fn test_parse_property_requires_line_start() {
        let block = b"mnt-lower: SOME-MNT\n";
        // "lower:" only appears mid-line, never at a line start.
        assert_eq!(parse_property(block, "lower"), None);
    }

    #[test]
    fn test_parse_property_decodes_lossily() {
        let block = b"descr: caf\xe9 net\n";
        assert_eq!(
            parse_property(block, "descr"),
            Some("caf\u{fffd} net".to_string())
        );
    }

    #[test]
    fn test_parse_properties_splits_on_spaces_and_commas() {
        let block = b"mnt-by: MNT-IEVOL, MNT-CLOUD14 MNT-THIRD\n";
        assert_eq!(
            parse_properties(block, "mnt-by"),
            vec!["MNT-IEVOL", "MNT-CLOUD14", "MNT-THIRD"]
        );
    }

    #[test]
    fn test_parse_properties_preserves_hyphenated_tokens() {
        let block = b"mnt-by: MNT-IEVOL,MNT-CLOUD14\n";
        let tokens = parse_properties(block, "mnt-by");
        assert!(tokens.contains(&"MNT-IEVOL".to_string()));
        assert!(tokens.contains(&"MNT-CLOUD14".to_string()));
        assert!(!tokens.contains(&"MNT".to_string()));
    }

    #[test]
    fn test_parse_properties_deduplicates() {
        let block = b"mnt-by: MNT-A MNT-B\nmnt-by: MNT-A\n";
        assert_eq!(parse_properties(block, "mnt-by"), vec!["MNT-A", "MNT-B"]);
    }

    #[test]
    fn test_parse_properties_empty_when_absent() {
        assert!(parse_properties(b"inetnum: 10.0.0.0/8\n", "mnt-by").is_empty());
    }

    #[test]
    fn test_range_expansion_to_minimal_cover() {
        let block = b"inetnum: 192.0.2.0 - 192.0.2.127\n";
        assert_eq!(parse_cidrs(block), vec!["192.0.2.0/25"]);
    }

    #[test]
    fn test_range_expansion_multiple_prefixes() {
        let block = b"inetnum: 192.0.2.0 - 192.0.2.191\n";
        assert_eq!(parse_cidrs(block), vec!["192.0.2.0/25", "192.0.2.128/26"]);
    }

    #[test]
    fn test_full_ipv4_space_collapses_to_default_route() {
        let block = b"inetnum: 0.0.0.0 - 255.255.255.255\n";
        assert_eq!(parse_cidrs(block), vec!["0.0.0.0/0"]);
    }

    #[test]
    fn test_range_with_invalid_octets_yields_nothing() {
        let block = b"inetnum: 300.0.2.0 - 300.0.2.127\n";
        assert!(parse_cidrs(block).is_empty());
    }

    #[test]
    fn test_plain_inetnum_prefix() {
        let block = b"inetnum: 203.0.113.0/24\n";
        assert_eq!(parse_cidrs(block), vec!["203.0.113.0/24"]);
    }

    #[test]
    fn test_three_octet_truncation_is_zero_padded() {
        let block = b"inetnum: 177.46.7/24\n";
        assert_eq!(parse_cidrs(block), vec!["177.46.7.0/24"]);
    }

    #[test]
    fn test_two_octet_truncation_is_zero_padded() {
        let block = b"inetnum: 148.204/16\n";
        assert_eq!(parse_cidrs(block), vec!["148.204.0.0/16"]);
    }

    #[test]
    fn test_inet6num_prefix() {
        let block = b"inet6num: 2001:db8::/32\n";
        assert_eq!(parse_cidrs(block), vec!["2001:db8::/32"]);
    }

    #[test]
    fn test_inet6num_default_route() {
        let block = b"inet6num: ::/0\n";
        assert_eq!(parse_cidrs(block), vec!["::/0"]);
    }

    #[test]
    fn test_route_prefix() {
        let block = b"route: 10.0.0.0/8\norigin: AS65000\n";
        assert_eq!(parse_cidrs(block), vec!["10.0.0.0/8"]);
    }

    #[test]
    fn test_route6_prefix() {
        let block = b"route6: 2001:db8:1000::/36\norigin: AS65000\n";
        assert_eq!(parse_cidrs(block), vec!["2001:db8:1000::/36"]);
    }

    #[test]
    fn test_no_range_attribute_yields_nothing() {
        let block = b"person: Jan Janssen\naddress: Somewhere\n";
        assert!(parse_cidrs(block).is_empty());
    }

    /// Feeding a normalised prefix back through the normaliser must be
    /// a fixed point.
    #[test]
    fn test_normalisation_is_idempotent() {
        for input in [
            "inetnum: 192.0.2.0 - 192.0.2.191",
            "inetnum: 177.46.7/24",
            "inetnum: 148.204/16",
            "inet6num: 2001:db8::/32",
        ] {
            let first = parse_cidrs(input.as_bytes());
            for cidr in &first {
                let again = parse_cidrs(format!("inetnum: {cidr}\n").as_bytes());
                assert_eq!(again, vec![cidr.clone()], "not idempotent for {input}");
            }
        }
    }

    #[test]
    fn test_truncated_forms_cover_same_addresses_as_canonical() {
        assert_eq!(
            parse_cidrs(b"inetnum: 177.46.7/24\n"),
            parse_cidrs(b"inetnum: 177.46.7.0/24\n")
        );
        assert_eq!(
            parse_cidrs(b"inetnum: 148.204/16\n"),
            parse_cidrs(b"inetnum: 148.204.0.0/16\n")
        );
    }

    #[test]
    fn test_changed_date_valid() {
        assert_eq!(
            last_modified_from_changed("x@y.com 20220310"),
            Some("2022-3-10".to_string())
        );
    }

    #[test]
    fn test_changed_date_strips_leading_zeros() {
        assert_eq!(
            last_modified_from_changed("noc@example.net 20010101"),
            Some("2001-1-1".to_string())
        );
    }

    #[test]
    fn test_changed_date_invalid_month() {
        assert_eq!(last_modified_from_changed("x@y.com 20221310"), None);
    }

    #[test]
    fn test_changed_date_wrong_length() {
        assert_eq!(last_modified_from_changed("x@y.com 2022031"), None);
    }

    #[test]
    fn test_changed_date_bad_string_with_email() {
        assert_eq!(last_modified_from_changed("x@y.com badstring"), None);
    }

    #[test]
    fn test_changed_without_email_passes_through() {
        assert_eq!(
            last_modified_from_changed("20020101"),
            Some("20020101".to_string())
        );
    }
}
