use crate::checksum::checksum;
use crate::error::{Result, SolarMaxError};
use std::fmt;

/// FB is 251, the address reserved for an external host
pub const HOST_ADDRESS: Address = Address(0xFB);
/// the "port" of the data query sub-protocol
pub const DATA_QUERY_PORT: u8 = 0x64;

// '{' + "HHHH}"
const MIN_RESPONSE_LEN: usize = 6;
const CRC_TAIL_LEN: usize = 5;

/// Bus address of a device; always rendered as 2 uppercase hex digits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address(pub u8);

impl From<u8> for Address {
    fn from(index: u8) -> Self {
        Address(index)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:02X}", self.0)
    }
}

/// Value of the LEN field: `1+3+3+3+3` for the brace, both addresses, the
/// length itself and the port, then the body, `|`, checksum and `}`.
fn frame_length(body: &str) -> usize {
    1 + 3 + 3 + 3 + 3 + body.len() + 1 + 4 + 1
}

fn seal(pre_crc: String) -> String {
    let crc = checksum(&pre_crc);
    format!("{{{}{}}}", pre_crc, crc)
}

fn frame(src: Address, dest: Address, body: &str) -> String {
    seal(format!(
        "{};{};{:02X}|{:02X}:{}|",
        src,
        dest,
        frame_length(body),
        DATA_QUERY_PORT,
        body
    ))
}

/// Builds the data query for `code` addressed to device `dest`,
/// e.g. `{FB;01;16|64:ADR|0439}`.
pub fn build_query(dest: Address, code: &str) -> String {
    frame(HOST_ADDRESS, dest, code)
}

/// Builds a device answer carrying a raw `body` (`ADR=1`, `ADR=1,2` or empty).
pub fn build_response(src: Address, body: &str) -> String {
    frame(src, HOST_ADDRESS, body)
}

/// Builds a device answer reporting `value` for `code`.
pub fn build_value_response(src: Address, code: &str, value: u32) -> String {
    build_response(src, &format!("{}={:X}", code, value))
}

/// Validates a response frame and decodes its value.
///
/// `Ok(None)` means the device answered but had no data for the code.
pub fn parse_response(raw: &[u8]) -> Result<Option<u32>> {
    let data = std::str::from_utf8(raw)
        .ok()
        .filter(|s| s.is_ascii())
        .ok_or_else(|| SolarMaxError::malformed(format!("not an ASCII frame: {:02X?}", raw)))?;

    if data.len() < MIN_RESPONSE_LEN {
        return Err(SolarMaxError::malformed(format!(
            "frame too short ({} bytes): {:?}",
            data.len(),
            data
        )));
    }

    let tail = data.len() - CRC_TAIL_LEN;
    let received = &data[tail..data.len() - 1];
    let expected = checksum(&data[1..tail]);
    if received != expected {
        return Err(SolarMaxError::ChecksumMismatch {
            expected,
            received: received.to_string(),
        });
    }
    trace!("crc ok ({})", expected);

    parse_payload(data)
}

fn body(data: &str) -> Result<&str> {
    let segment = data
        .split('|')
        .nth(1)
        .ok_or_else(|| SolarMaxError::malformed(format!("no payload segment in {:?}", data)))?;
    Ok(match segment.split_once(':') {
        Some((_, body)) => body,
        None => segment,
    })
}

fn parse_payload(data: &str) -> Result<Option<u32>> {
    let body = body(data)?;
    if body.is_empty() {
        return Ok(None);
    }

    let (_, value) = body
        .split_once('=')
        .ok_or_else(|| SolarMaxError::malformed(format!("no value in {:?}", body)))?;

    // some firmware appends ",extra" to the value
    let value = match value.split_once(',') {
        Some((value, _)) => value,
        None => value,
    };
    if value.is_empty() {
        return Ok(None);
    }

    u32::from_str_radix(value, 16)
        .map(Some)
        .map_err(|e| SolarMaxError::malformed(format!("invalid hex value {:?}: {}", value, e)))
}

/// The command code echoed back in a response (`ADR` for `...|64:ADR=1|...`).
pub fn response_code(data: &str) -> Option<&str> {
    let body = body(data).ok()?;
    let code = match body.split_once('=') {
        Some((code, _)) => code,
        None => body,
    };
    if code.is_empty() {
        None
    } else {
        Some(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODES: [&str; 24] = [
        "PAC", "KHR", "DYR", "DMT", "DDY", "KYR", "KMT", "KDY", "KT0", "PIN", "TNP", "ADR", "PRL",
        "SWV", "UDC", "UL1", "IDC", "IL1", "TKK", "TYP", "TMI", "THR", "SYS", "SAL",
    ];

    #[test]
    fn test_address_rendering() {
        assert_eq!(Address(1).to_string(), "01");
        assert_eq!(Address(0x0a).to_string(), "0A");
        assert_eq!(HOST_ADDRESS.to_string(), "FB");
        assert_eq!(Address::from(255).to_string(), "FF");
    }

    #[test]
    fn test_build_query_known_frame() {
        assert_eq!(build_query(Address(1), "ADR"), "{FB;01;16|64:ADR|0439}");
    }

    #[test]
    fn test_build_query_length_and_checksum() {
        for index in [0u8, 1, 2, 15, 16, 99, 200, 255].iter() {
            for code in CODES.iter() {
                let query = build_query(Address(*index), code);
                assert!(query.starts_with('{') && query.ends_with('}'));

                let fields: Vec<&str> = query[1..].splitn(4, |c: char| c == ';' || c == '|').collect();
                assert_eq!(fields[0], "FB");
                assert_eq!(fields[1], format!("{:02X}", index));
                let declared = usize::from_str_radix(fields[2], 16).unwrap();
                assert_eq!(declared, 1 + 3 + 3 + 3 + 3 + code.len() + 1 + 4 + 1);
                assert_eq!(declared, query.len());
                assert!(query.contains(&format!("|64:{}|", code)));

                let tail = query.len() - 5;
                assert_eq!(&query[tail..query.len() - 1], checksum(&query[1..tail]));
            }
        }
    }

    #[test]
    fn test_parse_known_response() {
        let value = parse_response(b"{01;FB;18|64:ADR=1|04A9}").unwrap();
        assert_eq!(value, Some(1));
    }

    #[test]
    fn test_parse_round_trip() {
        for value in [0u32, 1, 0x1F4, 0xFFFF, 0x10000, 20004, u32::MAX].iter() {
            let response = build_value_response(Address(3), "PAC", *value);
            assert_eq!(parse_response(response.as_bytes()).unwrap(), Some(*value));
        }
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let response = build_value_response(Address(1), "KDY", 0x1234);
        let tail = response.len() - 5;
        for idx in 1..tail {
            let mut bytes = response.clone().into_bytes();
            bytes[idx] = if bytes[idx] == b'X' { b'Y' } else { b'X' };
            match parse_response(&bytes) {
                Err(SolarMaxError::ChecksumMismatch { .. }) => {}
                other => panic!("byte {} tampered, got {:?}", idx, other),
            }
        }
    }

    #[test]
    fn test_empty_body_is_absent() {
        let response = build_response(Address(1), "");
        assert_eq!(response, "{01;FB;13|64:|035F}");
        assert_eq!(parse_response(response.as_bytes()).unwrap(), None);

        // the LEN field is not re-validated on the way in
        assert_eq!(parse_response(b"{01;FB;08|64:|0363}").unwrap(), None);
    }

    #[test]
    fn test_empty_value_is_absent() {
        let response = build_response(Address(1), "ADR=");
        assert_eq!(parse_response(response.as_bytes()).unwrap(), None);
    }

    #[test]
    fn test_comma_suffix_is_discarded() {
        let response = build_response(Address(1), "ADR=1,2");
        assert_eq!(parse_response(response.as_bytes()).unwrap(), Some(1));
    }

    #[test]
    fn test_malformed_value() {
        let response = build_response(Address(1), "ADR=Z");
        assert!(matches!(
            parse_response(response.as_bytes()),
            Err(SolarMaxError::MalformedPayload(_))
        ));

        let response = build_response(Address(1), "ADR");
        assert!(matches!(
            parse_response(response.as_bytes()),
            Err(SolarMaxError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_short_and_binary_input() {
        assert!(matches!(parse_response(b""), Err(SolarMaxError::MalformedPayload(_))));
        assert!(matches!(parse_response(b"{04A}"), Err(SolarMaxError::MalformedPayload(_))));
        assert!(matches!(
            parse_response(&[0x7b, 0xff, 0xfe, 0x30, 0x30, 0x30, 0x30, 0x7d]),
            Err(SolarMaxError::MalformedPayload(_))
        ));
        // checksum of nothing is "0000", but there is no payload segment either
        assert!(matches!(parse_response(b"{0000}"), Err(SolarMaxError::MalformedPayload(_))));
    }

    #[test]
    fn test_partial_frame_fails_checksum() {
        let response = build_value_response(Address(1), "PAC", 0x1F4);
        let partial = &response.as_bytes()[..response.len() - 3];
        assert!(parse_response(partial).is_err());
    }

    #[test]
    fn test_response_code() {
        assert_eq!(response_code("{01;FB;18|64:ADR=1|04A9}"), Some("ADR"));
        assert_eq!(response_code("{01;FB;13|64:|035F}"), None);
        assert_eq!(response_code("garbage"), None);
    }
}
