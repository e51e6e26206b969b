//! Port-spec and target-list parsing.
//!
//! `parse_port_spec` returns a flat deduplicated vector rather than a
//! `Single/Range/List` tree, since nothing here needs to re-serialize a
//! range back to a compact string.

use crate::error::{Error, Result};
use crate::types::ScanTarget;
use std::collections::BTreeSet;

/// Parse a port spec string into a deduplicated, ascending port list.
///
/// Empty input defaults to `"1-1000"`. Whitespace around tokens and around
/// `-`/`,` is trimmed. Ports are restricted to `1..=65535`.
pub fn parse_port_spec(input: &str) -> Result<Vec<u16>> {
    let input = input.trim();
    let input = if input.is_empty() { "1-1000" } else { input };

    let mut ports = BTreeSet::new();

    for token in input.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        if let Some((start_str, end_str)) = token.split_once('-') {
            let start = parse_single_port(start_str.trim())?;
            let end = parse_single_port(end_str.trim())?;
            if start > end {
                return Err(Error::InvalidInput(format!(
                    "invalid range: start {start} > end {end} in token '{token}'"
                )));
            }
            for port in start..=end {
                ports.insert(port);
            }
        } else {
            ports.insert(parse_single_port(token)?);
        }
    }

    Ok(ports.into_iter().collect())
}

fn parse_single_port(token: &str) -> Result<u16> {
    let value: u32 = token
        .parse()
        .map_err(|_| Error::InvalidInput(format!("invalid port token: '{token}'")))?;

    if value == 0 || value > 65535 {
        return Err(Error::InvalidInput(format!(
            "port out of range 1-65535: '{token}'"
        )));
    }

    Ok(value as u16)
}

/// Expand a raw target list (hostnames or dotted-quads, already expanded
/// upstream from any CIDR) into deduplicated `ScanTarget` values,
/// preserving first-seen order.
pub fn parse_target_list(raw: &[String]) -> Vec<ScanTarget> {
    let mut seen = BTreeSet::new();
    let mut targets = Vec::new();

    for host in raw {
        let host = host.trim();
        if host.is_empty() || !seen.insert(host.to_string()) {
            continue;
        }
        targets.push(ScanTarget::new(host));
    }

    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port_spec_single() {
        assert_eq!(parse_port_spec("80").unwrap(), vec![80]);
    }

    #[test]
    fn test_parse_port_spec_range() {
        assert_eq!(parse_port_spec("1-5,10").unwrap(), vec![1, 2, 3, 4, 5, 10]);
    }

    #[test]
    fn test_parse_port_spec_reversed_range_errors() {
        assert!(parse_port_spec("10-5").is_err());
    }

    #[test]
    fn test_parse_port_spec_empty_defaults() {
        let ports = parse_port_spec("").unwrap();
        assert_eq!(ports.len(), 1000);
        assert_eq!(ports[0], 1);
        assert_eq!(ports[999], 1000);
    }

    #[test]
    fn test_parse_port_spec_whitespace_tolerant() {
        assert_eq!(parse_port_spec(" 22 , 80 - 82 ").unwrap(), vec![22, 80, 81, 82]);
    }

    #[test]
    fn test_parse_port_spec_dedup() {
        assert_eq!(parse_port_spec("80,80,80-81").unwrap(), vec![80, 81]);
    }

    #[test]
    fn test_parse_port_spec_zero_errors() {
        assert!(parse_port_spec("0").is_err());
    }

    #[test]
    fn test_parse_port_spec_out_of_range_errors() {
        assert!(parse_port_spec("99999").is_err());
    }

    #[test]
    fn test_parse_port_spec_non_numeric_errors() {
        assert!(parse_port_spec("abc").is_err());
    }

    #[test]
    fn test_s1_port_enumeration() {
        let ports = parse_port_spec("22,80-82").unwrap();
        assert_eq!(ports, vec![22, 80, 81, 82]);
    }

    #[test]
    fn test_s6_port_range_expansion() {
        assert_eq!(parse_port_spec("1-5,10").unwrap(), vec![1, 2, 3, 4, 5, 10]);
        assert!(parse_port_spec("10-5").is_err());
    }

    #[test]
    fn test_parse_target_list_dedup() {
        let raw = vec!["host".to_string(), "host".to_string(), "host".to_string()];
        let targets = parse_target_list(&raw);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].host, "host");
    }

    #[test]
    fn test_parse_target_list_order_preserved() {
        let raw = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        let targets = parse_target_list(&raw);
        assert_eq!(targets.iter().map(|t| t.host.as_str()).collect::<Vec<_>>(), vec!["b", "a"]);
    }

    #[test]
    fn test_parse_target_list_skips_blank() {
        let raw = vec!["".to_string(), "  ".to_string(), "host1".to_string()];
        let targets = parse_target_list(&raw);
        assert_eq!(targets.len(), 1);
    }
}
