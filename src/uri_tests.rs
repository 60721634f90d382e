//! Unit tests for the URI grammar.

use rstest::rstest;

use super::Uri;
use crate::error::DriverError;

#[test]
fn parses_scheme_host_and_port() {
    let uri = Uri::parse("tcp://localhost:8080").expect("valid uri");
    assert_eq!(uri.scheme(), "tcp");
    assert_eq!(uri.host(), "localhost");
    assert_eq!(uri.port(), 8080);
    assert!(uri.options().is_empty());
}

#[test]
fn port_defaults_to_zero() {
    let uri = Uri::parse("test://").expect("valid uri");
    assert_eq!(uri.scheme(), "test");
    assert_eq!(uri.host(), "");
    assert_eq!(uri.port(), 0);
}

#[test]
fn host_may_be_a_device_path() {
    let uri = Uri::parse("serial:///dev/ttyUSB0:115200").expect("valid uri");
    assert_eq!(uri.host(), "/dev/ttyUSB0");
    assert_eq!(uri.port(), 115_200);
}

#[test]
fn parses_options_after_the_port() {
    let uri = Uri::parse("udp://host:2000?local_port=3000&connected=1").expect("valid uri");
    assert_eq!(uri.port(), 2000);
    assert_eq!(uri.option("local_port"), Some("3000"));
    assert_eq!(uri.option("connected"), Some("1"));
    assert_eq!(uri.option("missing"), None);
    assert_eq!(uri.option_or("missing", "0"), "0");
}

#[test]
fn parses_options_without_a_port() {
    let uri = Uri::parse("udp://host?local_port=3000").expect("valid uri");
    assert_eq!(uri.port(), 0);
    assert_eq!(uri.option("local_port"), Some("3000"));
}

#[test]
fn later_duplicate_options_win() {
    let uri = Uri::parse("udp://host:1?k=a&k=b").expect("valid uri");
    assert_eq!(uri.option("k"), Some("b"));
}

#[rstest]
#[case::no_scheme("localhost:8080")]
#[case::garbled_separator("tcp:/localhost")]
#[case::port_with_trailing_characters("tcp://host:80b0")]
#[case::empty_port("tcp://host:")]
#[case::empty_port_with_options("tcp://host:?k=v")]
#[case::trailing_question_mark("udp://host:2000?")]
#[case::trailing_ampersand("udp://host:2000?k=v&")]
#[case::option_without_value("udp://host:2000?k")]
fn rejects_malformed_locators(#[case] input: &str) {
    let error = Uri::parse(input).expect_err("malformed");
    assert!(matches!(error, DriverError::InvalidArgument(_)), "{error}");
}

#[test]
fn legacy_udp_form_is_rewritten_to_local_port() {
    let uri = Uri::parse_udp_compat("udp://192.168.0.1:2000:3000").expect("legacy form");
    assert_eq!(uri.host(), "192.168.0.1");
    assert_eq!(uri.port(), 2000);
    assert_eq!(uri.option("local_port"), Some("3000"));
}

#[test]
fn modern_udp_form_passes_through() {
    let uri = Uri::parse_udp_compat("udp://host:2000?local_port=3000").expect("modern form");
    assert_eq!(uri.option("local_port"), Some("3000"));
}

#[test]
fn single_port_udp_form_is_not_rewritten() {
    let uri = Uri::parse_udp_compat("udp://host:2000").expect("plain form");
    assert_eq!(uri.port(), 2000);
    assert_eq!(uri.option("local_port"), None);
}

#[test]
fn raw_ipv6_literal_is_rejected_rather_than_mis_split() {
    let error = Uri::parse_udp_compat("udp://fe80::1:2000:3000").expect_err("ambiguous literal");
    assert!(matches!(error, DriverError::InvalidArgument(_)), "{error}");
}
