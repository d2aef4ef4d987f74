//! SlimProto discovery codec.
//!
//! LMS discovery runs over UDP port 3483. A request is the ASCII marker `e`
//! followed by null-terminated 4-character tags naming the fields the sender
//! wants returned. A response starts with the marker `E` followed by
//! tag-length-value triplets: 4 ASCII tag bytes, 1 length byte, then that
//! many value bytes.

use crate::types::ServerInfo;
use std::net::IpAddr;

/// UDP port LMS instances listen on for discovery requests.
pub const DISCOVERY_PORT: u16 = 3483;

/// First byte of every discovery response datagram.
const RESPONSE_MARKER: u8 = b'E';

/// The discovery request payload, sent verbatim on every broadcast.
const DISCOVERY_REQUEST: &[u8] = b"eIPAD\0NAME\0VERS\0UUID\0JSON\0CLIP\0";

/// Returns the request payload broadcast to solicit discovery responses.
pub fn encode_request() -> &'static [u8] {
    DISCOVERY_REQUEST
}

/// Decodes a discovery response datagram into a [`ServerInfo`].
///
/// Returns `None` when the datagram is not a discovery response or omits a
/// required field (`NAME`, `JSON`). Unrecognized tags are skipped but still
/// consume their `5 + len` bytes to keep the cursor aligned. A truncated
/// trailing triplet ends the walk; malformed input never panics.
///
/// The server's identity address is always `sender`; an advertised `IPAD`
/// value is consumed for alignment but otherwise ignored.
pub fn decode_response(data: &[u8], sender: IpAddr) -> Option<ServerInfo> {
    if data.first() != Some(&RESPONSE_MARKER) {
        return None;
    }

    let mut name = None;
    let mut version = None;
    let mut unique_id = None;
    let mut control_api_port = None;
    let mut control_channel_port = None;

    let mut ptr = 1;
    while ptr + 5 <= data.len() {
        let tag = &data[ptr..ptr + 4];
        let len = data[ptr + 4] as usize;
        let end = ptr + 5 + len;
        if end > data.len() {
            // Truncated value: treat as end of triplets.
            break;
        }
        let value = String::from_utf8_lossy(&data[ptr + 5..end]);
        match tag {
            b"NAME" => name = Some(value.into_owned()),
            b"VERS" => version = Some(value.into_owned()),
            b"UUID" => unique_id = Some(value.into_owned()),
            b"JSON" => control_api_port = value.parse().ok(),
            b"CLIP" => control_channel_port = value.parse().ok(),
            _ => {}
        }
        ptr = end;
    }

    let name = name?;
    let control_api_port = control_api_port?;

    Some(ServerInfo {
        address: sender,
        unique_id: unique_id.unwrap_or_else(|| name.clone()),
        name,
        version,
        control_api_port,
        control_channel_port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const SENDER: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50));

    fn tlv(tag: &str, value: &str) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(tag.as_bytes());
        out.push(value.len() as u8);
        out.extend_from_slice(value.as_bytes());
        out
    }

    fn response(triplets: &[(&str, &str)]) -> Vec<u8> {
        let mut out = vec![b'E'];
        for (tag, value) in triplets {
            out.extend_from_slice(&tlv(tag, value));
        }
        out
    }

    #[test]
    fn request_is_the_fixed_byte_sequence() {
        assert_eq!(encode_request(), b"eIPAD\0NAME\0VERS\0UUID\0JSON\0CLIP\0");
    }

    #[test]
    fn full_response_decodes() {
        let data = response(&[
            ("NAME", "Living Room"),
            ("VERS", "9.0.2"),
            ("UUID", "a1b2c3"),
            ("JSON", "9000"),
            ("CLIP", "9090"),
        ]);
        let info = decode_response(&data, SENDER).unwrap();
        assert_eq!(info.address, SENDER);
        assert_eq!(info.name, "Living Room");
        assert_eq!(info.version.as_deref(), Some("9.0.2"));
        assert_eq!(info.unique_id, "a1b2c3");
        assert_eq!(info.control_api_port, 9000);
        assert_eq!(info.control_channel_port, Some(9090));
    }

    #[test]
    fn wrong_marker_is_not_a_response() {
        let mut data = response(&[("NAME", "x"), ("JSON", "9000")]);
        data[0] = b'e';
        assert!(decode_response(&data, SENDER).is_none());
        assert!(decode_response(&[], SENDER).is_none());
    }

    #[test]
    fn missing_name_or_api_port_fails() {
        let data = response(&[("JSON", "9000"), ("VERS", "9.0.2")]);
        assert!(decode_response(&data, SENDER).is_none());

        let data = response(&[("NAME", "Bedroom"), ("VERS", "9.0.2")]);
        assert!(decode_response(&data, SENDER).is_none());
    }

    #[test]
    fn unique_id_defaults_to_name() {
        let data = response(&[("NAME", "Bedroom"), ("JSON", "9000")]);
        let info = decode_response(&data, SENDER).unwrap();
        assert_eq!(info.unique_id, "Bedroom");
        assert_eq!(info.control_channel_port, None);
    }

    #[test]
    fn unknown_tags_keep_the_cursor_aligned() {
        let data = response(&[("XXXX", "ignored"), ("NAME", "Den"), ("JSON", "9000")]);
        let info = decode_response(&data, SENDER).unwrap();
        assert_eq!(info.name, "Den");
    }

    #[test]
    fn advertised_ipad_does_not_override_the_sender() {
        let data = response(&[("IPAD", "10.0.0.99"), ("NAME", "Den"), ("JSON", "9000")]);
        let info = decode_response(&data, SENDER).unwrap();
        assert_eq!(info.address, SENDER);
    }

    #[test]
    fn truncated_trailing_triplet_ends_the_walk() {
        let mut data = response(&[("NAME", "Den"), ("JSON", "9000")]);
        // Tag and length byte claiming 200 value bytes that are not there.
        data.extend_from_slice(b"VERS");
        data.push(200);
        data.extend_from_slice(b"9.0");
        let info = decode_response(&data, SENDER).unwrap();
        assert_eq!(info.name, "Den");
        assert_eq!(info.version, None);

        // Fewer than 5 bytes left stops cleanly too.
        let mut data = response(&[("NAME", "Den"), ("JSON", "9000")]);
        data.extend_from_slice(b"VER");
        assert!(decode_response(&data, SENDER).is_some());
    }

    #[test]
    fn unparseable_ports() {
        // A bad API port means the required field is missing.
        let data = response(&[("NAME", "Den"), ("JSON", "not-a-port")]);
        assert!(decode_response(&data, SENDER).is_none());

        // A bad CLI port degrades to no CLI channel.
        let data = response(&[("NAME", "Den"), ("JSON", "9000"), ("CLIP", "99999")]);
        let info = decode_response(&data, SENDER).unwrap();
        assert_eq!(info.control_channel_port, None);
    }
}
