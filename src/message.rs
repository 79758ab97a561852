use std::collections::HashMap;
use std::io::{Cursor, Write};
use thiserror::Error;

/// SSDP datagrams are tiny; anything larger than this is somebody
/// else's protocol.
pub(crate) const MAX_PACKET_SIZE: usize = 512;

/// A decoded SSDP datagram.
///
/// Every message is HTTP/1.1-shaped: requests use `<METHOD> * HTTP/1.1`
/// as their first line, responses `HTTP/1.1 <status>`. Header lookup is
/// case-insensitive on receipt; emission uses the upper-case canonical
/// forms.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Message {
    NotifyAlive {
        notification_type: String,
        unique_service_name: String,
        location: String,
        server: String,
        max_age: i32,
    },
    NotifyByeBye {
        notification_type: String,
        unique_service_name: String,
    },
    Search {
        search_target: String,
        maximum_wait_secs: u64,
    },
    Response {
        search_target: String,
        unique_service_name: String,
        location: String,
        server: String,
        max_age: i32,
    },
}

#[derive(Debug, Error)]
pub(crate) enum ParseError {
    #[error("datagram is not UTF-8")]
    NotUtf8,
    #[error("datagram is empty")]
    Empty,
    #[error("malformed request line {0:?}")]
    BadRequestLine(String),
    #[error("unsupported request target {0:?}")]
    UnknownTarget(String),
    #[error("unsupported method {0:?}")]
    UnknownMethod(String),
    #[error("NOTIFY is missing its {0} header")]
    MissingHeader(&'static str),
    #[error("unrecognised NTS value {0:?}")]
    UnknownSubtype(String),
    /// M-SEARCH without MAN, MX, and ST. Dropped without a warning,
    /// unlike the other variants.
    #[error("M-SEARCH is missing MAN, MX, or ST")]
    IncompleteSearch,
}

/// Decode one datagram.
///
/// A datagram whose first four bytes are `HTTP` is a response;
/// everything else is parsed as a request.
pub(crate) fn parse(buf: &[u8]) -> Result<Message, ParseError> {
    let text = std::str::from_utf8(buf).map_err(|_| ParseError::NotUtf8)?;

    let mut lines = text.lines();
    let first = lines.next().ok_or(ParseError::Empty)?;

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_ascii_uppercase(), value.trim());
        }
    }
    let header = |name: &str| headers.get(name).copied().unwrap_or_default();
    let required =
        |name: &str| headers.get(name).copied().filter(|v| !v.is_empty());

    if text.starts_with("HTTP") {
        return Ok(Message::Response {
            search_target: header("ST").to_string(),
            unique_service_name: header("USN").to_string(),
            location: header("LOCATION").to_string(),
            server: header("SERVER").to_string(),
            max_age: max_age(header("CACHE-CONTROL")),
        });
    }

    let mut request_line = first.split_whitespace();
    let (Some(method), Some(target), Some(version)) = (
        request_line.next(),
        request_line.next(),
        request_line.next(),
    ) else {
        return Err(ParseError::BadRequestLine(first.to_string()));
    };
    if !version.starts_with("HTTP/") {
        return Err(ParseError::BadRequestLine(first.to_string()));
    }
    if target != "*" {
        return Err(ParseError::UnknownTarget(target.to_string()));
    }

    match method {
        "NOTIFY" => {
            let nts = required("NTS").ok_or(ParseError::MissingHeader("NTS"))?;
            let notification_type = required("NT")
                .ok_or(ParseError::MissingHeader("NT"))?
                .to_string();
            if nts.eq_ignore_ascii_case("ssdp:alive") {
                Ok(Message::NotifyAlive {
                    notification_type,
                    unique_service_name: header("USN").to_string(),
                    location: header("LOCATION").to_string(),
                    server: header("SERVER").to_string(),
                    max_age: max_age(header("CACHE-CONTROL")),
                })
            } else if nts.eq_ignore_ascii_case("ssdp:byebye") {
                Ok(Message::NotifyByeBye {
                    notification_type,
                    unique_service_name: header("USN").to_string(),
                })
            } else {
                Err(ParseError::UnknownSubtype(nts.to_string()))
            }
        }
        "M-SEARCH" => {
            let (Some(_man), Some(mx), Some(st)) =
                (required("MAN"), required("MX"), required("ST"))
            else {
                return Err(ParseError::IncompleteSearch);
            };
            Ok(Message::Search {
                search_target: unquote(st).to_string(),
                maximum_wait_secs: mx.parse().unwrap_or(0),
            })
        }
        _ => Err(ParseError::UnknownMethod(method.to_string())),
    }
}

/// Extract the seconds value of a `max-age=<digits>` directive, or `-1`
/// if the header is absent or unparsable.
fn max_age(cache_control: &str) -> i32 {
    if let Some(rest) = cache_control
        .find("max-age=")
        .map(|at| &cache_control[at + "max-age=".len()..])
    {
        let digits =
            &rest[..rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len())];
        if let Ok(n) = digits.parse() {
            return n;
        }
    }
    -1
}

/// The device UUID embedded in a USN of the form
/// `uuid:<device-uuid>::<service-type>`, or `""` for any other shape.
pub(crate) fn device_id(unique_service_name: &str) -> &str {
    let parts: Vec<&str> = unique_service_name.split(':').collect();
    if parts.len() > 2 && parts[0] == "uuid" {
        parts[1]
    } else {
        ""
    }
}

/// Strip one pair of surrounding ASCII quotes, if both are present.
fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn build_alive(
    buf: &mut [u8],
    notification_type: &str,
    unique_service_name: &str,
    location: &str,
    max_age: u32,
) -> usize {
    let mut cursor = Cursor::new(buf);
    let _ = write!(
        cursor,
        "NOTIFY * HTTP/1.1\r
HOST: 239.255.255.250:1900\r
NT: {}\r
NTS: ssdp:alive\r
USN: {}\r
LOCATION: {}\r
CACHE-CONTROL: max-age={}\r
SERVER: {}/0.0 UPnP/1.0 {}/{}\r
\r\n",
        notification_type,
        unique_service_name,
        location,
        max_age,
        std::env::consts::OS,
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
    );
    cursor.position() as usize
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn build_byebye(
    buf: &mut [u8],
    notification_type: &str,
    unique_service_name: &str,
) -> usize {
    let mut cursor = Cursor::new(buf);
    let _ = write!(
        cursor,
        "NOTIFY * HTTP/1.1\r
HOST: 239.255.255.250:1900\r
NT: {notification_type}\r
NTS: ssdp:byebye\r
USN: {unique_service_name}\r
\r\n"
    );
    cursor.position() as usize
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn build_search(buf: &mut [u8], search_target: &str) -> usize {
    let mut cursor = Cursor::new(buf);
    let _ = write!(
        cursor,
        "M-SEARCH * HTTP/1.1\r
HOST: 239.255.255.250:1900\r
ST: {search_target}\r
MAN: \"ssdp:discover\"\r
MX: 3\r
\r\n"
    );
    cursor.position() as usize
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn build_response(
    buf: &mut [u8],
    search_target: &str,
    unique_service_name: &str,
    location: &str,
    max_age: u32,
    date: &str,
) -> usize {
    let mut cursor = Cursor::new(buf);
    let _ = write!(
        cursor,
        "HTTP/1.1 200 OK\r
ST: {}\r
USN: {}\r
LOCATION: {}\r
CACHE-CONTROL: max-age={}\r
DATE: {}\r
SERVER: {}/0.0 UPnP/1.0 {}/{}\r
EXT: \r
\r\n",
        search_target,
        unique_service_name,
        location,
        max_age,
        date,
        std::env::consts::OS,
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
    );
    cursor.position() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_utf8() {
        assert!(matches!(parse(&[128, 128]), Err(ParseError::NotUtf8)));
    }

    #[test]
    fn rejects_empty() {
        assert!(matches!(parse(&[]), Err(ParseError::Empty)));
    }

    #[test]
    fn rejects_bare_word() {
        assert!(matches!(
            parse(b"foo-bar\r\n\r\n"),
            Err(ParseError::BadRequestLine(_))
        ));
    }

    #[test]
    fn rejects_other_target() {
        let r = parse(b"NOTIFY /upnp HTTP/1.1\r\nNT: x\r\nNTS: ssdp:alive\r\n\r\n");
        assert!(matches!(r, Err(ParseError::UnknownTarget(t)) if t == "/upnp"));
    }

    #[test]
    fn rejects_other_method() {
        let r = parse(b"GET * HTTP/1.1\r\n\r\n");
        assert!(matches!(r, Err(ParseError::UnknownMethod(m)) if m == "GET"));
    }

    #[test]
    fn rejects_non_http_version() {
        assert!(matches!(
            parse(b"NOTIFY * SSDP/2.0\r\n\r\n"),
            Err(ParseError::BadRequestLine(_))
        ));
    }

    #[test]
    fn accepts_alive() {
        let r = parse(
            b"NOTIFY * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
NT: urn:test:svc:1\r\n\
nts: SSDP:ALIVE\r\n\
USN: uuid:u1::urn:test:svc:1\r\n\
Location: http://h/1\r\n\
Cache-Control: max-age=1800\r\n\
Server: test/1.0\r\n\
\r\n",
        );
        assert!(matches!(r,
            Ok(Message::NotifyAlive { notification_type, unique_service_name, location, server, max_age })
            if notification_type == "urn:test:svc:1"
                && unique_service_name == "uuid:u1::urn:test:svc:1"
                && location == "http://h/1"
                && server == "test/1.0"
                && max_age == 1800));
    }

    #[test]
    fn alive_without_optional_headers() {
        let r = parse(b"NOTIFY * HTTP/1.1\r\nNT: x\r\nNTS: ssdp:alive\r\n\r\n");
        assert!(matches!(r,
            Ok(Message::NotifyAlive { unique_service_name, location, max_age, .. })
            if unique_service_name.is_empty() && location.is_empty() && max_age == -1));
    }

    #[test]
    fn rejects_notify_without_nts() {
        let r = parse(b"NOTIFY * HTTP/1.1\r\nNT: x\r\n\r\n");
        assert!(matches!(r, Err(ParseError::MissingHeader("NTS"))));
    }

    #[test]
    fn rejects_notify_without_nt() {
        let r = parse(b"NOTIFY * HTTP/1.1\r\nNTS: ssdp:alive\r\n\r\n");
        assert!(matches!(r, Err(ParseError::MissingHeader("NT"))));
    }

    #[test]
    fn rejects_notify_bad_nts() {
        let r = parse(b"NOTIFY * HTTP/1.1\r\nNT: x\r\nNTS: potato\r\n\r\n");
        assert!(matches!(r, Err(ParseError::UnknownSubtype(s)) if s == "potato"));
    }

    #[test]
    fn accepts_byebye() {
        let r = parse(
            b"NOTIFY * HTTP/1.1\r\n\
NT: urn:test:svc:1\r\n\
NTS: ssdp:byebye\r\n\
USN: uuid:u1::urn:test:svc:1\r\n\
\r\n",
        );
        assert!(matches!(r,
            Ok(Message::NotifyByeBye { notification_type, unique_service_name })
            if notification_type == "urn:test:svc:1"
                && unique_service_name == "uuid:u1::urn:test:svc:1"));
    }

    #[test]
    fn accepts_search() {
        let r = parse(
            b"M-SEARCH * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
MAN: \"ssdp:discover\"\r\n\
MX: 3\r\n\
ST: urn:test:svc:1\r\n\
\r\n",
        );
        assert!(matches!(r,
            Ok(Message::Search { search_target, maximum_wait_secs })
            if search_target == "urn:test:svc:1" && maximum_wait_secs == 3));
    }

    #[test]
    fn search_unquotes_search_target() {
        let r = parse(b"M-SEARCH * HTTP/1.1\r\nMAN: x\r\nMX: 1\r\nST: \"ssdp:all\"\r\n\r\n");
        assert!(matches!(r,
            Ok(Message::Search { search_target, .. }) if search_target == "ssdp:all"));
    }

    #[test]
    fn search_with_unparsable_mx_waits_zero() {
        let r = parse(b"M-SEARCH * HTTP/1.1\r\nMAN: x\r\nMX: soon\r\nST: a\r\n\r\n");
        assert!(matches!(r,
            Ok(Message::Search { maximum_wait_secs, .. }) if maximum_wait_secs == 0));
    }

    #[test]
    fn search_with_negative_mx_waits_zero() {
        let r = parse(b"M-SEARCH * HTTP/1.1\r\nMAN: x\r\nMX: -4\r\nST: a\r\n\r\n");
        assert!(matches!(r,
            Ok(Message::Search { maximum_wait_secs, .. }) if maximum_wait_secs == 0));
    }

    #[test]
    fn rejects_search_missing_man_mx_or_st() {
        let missing_man = b"M-SEARCH * HTTP/1.1\r\nMX: 3\r\nST: a\r\n\r\n";
        let missing_mx = b"M-SEARCH * HTTP/1.1\r\nMAN: x\r\nST: a\r\n\r\n";
        let empty_st = b"M-SEARCH * HTTP/1.1\r\nMAN: x\r\nMX: 3\r\nST:\r\n\r\n";
        for datagram in [&missing_man[..], &missing_mx[..], &empty_st[..]] {
            assert!(matches!(
                parse(datagram),
                Err(ParseError::IncompleteSearch)
            ));
        }
    }

    #[test]
    fn accepts_response() {
        let r = parse(
            b"HTTP/1.1 200 OK\r\n\
st: urn:test:svc:1\r\n\
USN: uuid:u1::urn:test:svc:1\r\n\
LOCATION: http://h/1\r\n\
CACHE-CONTROL: max-age=300\r\n\
SERVER: test/1.0\r\n\
EXT: \r\n\
\r\n",
        );
        assert!(matches!(r,
            Ok(Message::Response { search_target, unique_service_name, location, server, max_age })
            if search_target == "urn:test:svc:1"
                && unique_service_name == "uuid:u1::urn:test:svc:1"
                && location == "http://h/1"
                && server == "test/1.0"
                && max_age == 300));
    }

    #[test]
    fn response_headers_are_all_optional() {
        let r = parse(b"HTTP/1.1 200 OK\r\n\r\n");
        assert!(matches!(r,
            Ok(Message::Response { search_target, max_age, .. })
            if search_target.is_empty() && max_age == -1));
    }

    #[test]
    fn max_age_round_trips() {
        for n in [0, 1, 60, 1800, 86400] {
            assert_eq!(max_age(&format!("max-age={n}")), n);
        }
    }

    #[test]
    fn max_age_tolerates_surrounding_directives() {
        assert_eq!(max_age("no-cache, max-age=120, private"), 120);
    }

    #[test]
    fn max_age_rejects_garbage() {
        assert_eq!(max_age(""), -1);
        assert_eq!(max_age("no-cache"), -1);
        assert_eq!(max_age("max-age=abc"), -1);
        assert_eq!(max_age("max-age="), -1);
        assert_eq!(max_age("max-age=99999999999999999999"), -1);
    }

    #[test]
    fn device_id_from_full_usn() {
        assert_eq!(device_id("uuid:u1::urn:test:svc:1"), "u1");
    }

    #[test]
    fn device_id_from_short_usn_is_empty() {
        assert_eq!(device_id("uuid:u1"), "");
    }

    #[test]
    fn device_id_from_foreign_usn_is_empty() {
        assert_eq!(device_id("urn:test:svc:1"), "");
        assert_eq!(device_id(""), "");
    }

    #[test]
    fn unquote_needs_both_quotes() {
        assert_eq!(unquote("\"ssdp:discover\""), "ssdp:discover");
        assert_eq!(unquote("\"lopsided"), "\"lopsided");
        assert_eq!(unquote("lopsided\""), "lopsided\"");
        assert_eq!(unquote("\""), "\"");
    }

    #[test]
    fn builds_alive() {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let n = build_alive(
            &mut buf,
            "urn:test:svc:1",
            "uuid:u1::urn:test:svc:1",
            "http://h/1",
            1800,
        );
        let expected = format!(
            "NOTIFY * HTTP/1.1\r
HOST: 239.255.255.250:1900\r
NT: urn:test:svc:1\r
NTS: ssdp:alive\r
USN: uuid:u1::urn:test:svc:1\r
LOCATION: http://h/1\r
CACHE-CONTROL: max-age=1800\r
SERVER: {}/0.0 UPnP/1.0 {}/{}\r
\r\n",
            std::env::consts::OS,
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
        );
        assert_eq!(&buf[..n], expected.as_bytes());
    }

    #[test]
    fn builds_byebye() {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let n = build_byebye(&mut buf, "urn:test:svc:1", "uuid:u1::urn:test:svc:1");
        let expected = "NOTIFY * HTTP/1.1\r
HOST: 239.255.255.250:1900\r
NT: urn:test:svc:1\r
NTS: ssdp:byebye\r
USN: uuid:u1::urn:test:svc:1\r
\r\n";
        assert_eq!(&buf[..n], expected.as_bytes());
    }

    #[test]
    fn builds_search() {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let n = build_search(&mut buf, "urn:test:svc:1");
        let expected = "M-SEARCH * HTTP/1.1\r
HOST: 239.255.255.250:1900\r
ST: urn:test:svc:1\r
MAN: \"ssdp:discover\"\r
MX: 3\r
\r\n";
        assert_eq!(&buf[..n], expected.as_bytes());
    }

    #[test]
    fn builds_response() {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let n = build_response(
            &mut buf,
            "urn:test:svc:1",
            "uuid:u1::urn:test:svc:1",
            "http://h/1",
            1800,
            "Thu, 01 Jan 2026 00:00:00 GMT",
        );
        let expected = format!(
            "HTTP/1.1 200 OK\r
ST: urn:test:svc:1\r
USN: uuid:u1::urn:test:svc:1\r
LOCATION: http://h/1\r
CACHE-CONTROL: max-age=1800\r
DATE: Thu, 01 Jan 2026 00:00:00 GMT\r
SERVER: {}/0.0 UPnP/1.0 {}/{}\r
EXT: \r
\r\n",
            std::env::consts::OS,
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
        );
        assert_eq!(&buf[..n], expected.as_bytes());
    }

    #[test]
    fn alive_round_trip() {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let n = build_alive(&mut buf, "urn:x:1", "uuid:u9::urn:x:1", "http://me", 300);
        let msg = parse(&buf[..n]).unwrap();
        assert!(matches!(msg,
            Message::NotifyAlive { notification_type, unique_service_name, max_age, .. }
            if notification_type == "urn:x:1"
                && unique_service_name == "uuid:u9::urn:x:1"
                && max_age == 300));
    }

    #[test]
    fn search_round_trip() {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let n = build_search(&mut buf, "ssdp:all");
        let msg = parse(&buf[..n]).unwrap();
        assert!(matches!(msg,
            Message::Search { search_target, maximum_wait_secs }
            if search_target == "ssdp:all" && maximum_wait_secs == 3));
    }
}
