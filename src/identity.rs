//! Parses the tag-prefixed identity string a device exposes via its
//! iSerialNumber descriptor (§4.4), and decodes the raw UTF-16LE string
//! descriptors the transport hands back (§4.3).

use log::warn;

use crate::device::DeviceInfo;
use crate::error::{Error, UsbResult};
use crate::transport::{DeviceHandle, Transport};

/// Decodes a raw USB string descriptor (`{bLength, bDescriptorType}` followed
/// by UTF-16LE code units) into an ASCII-ish `String`, matching §4.3's rule:
/// any code unit above `0x7F` becomes `'?'` rather than causing a failure.
///
/// `max_chars` caps how many characters are decoded, mirroring the original
/// tool's fixed destination-buffer size; a cap of zero is a distinct error
/// rather than silently producing an empty string, since it almost certainly
/// indicates a caller bug.
pub fn decode_string_descriptor(raw: &[u8], max_chars: usize) -> UsbResult<String> {
    if max_chars == 0 {
        return Err(Error::DestinationBufferZeroSized);
    }

    if raw.len() < 2 {
        return Err(Error::DescriptorFetchFailed);
    }

    let b_length = raw[0] as usize;
    if b_length < 2 || b_length > raw.len() {
        return Err(Error::DescriptorFetchFailed);
    }

    let code_unit_count = (b_length - 2) / 2;
    let take = code_unit_count.min(max_chars);

    let mut out = String::with_capacity(take);
    for i in 0..take {
        let offset = 2 + i * 2;
        let unit = u16::from_le_bytes([raw[offset], raw[offset + 1]]);
        if unit <= 0x7F {
            out.push(unit as u8 as char);
        } else {
            out.push('?');
        }
    }

    Ok(out)
}

/// Fetches and decodes a string descriptor in one step, translating any
/// transport failure into [Error::DescriptorFetchFailed].
pub fn fetch_string_descriptor(
    transport: &dyn Transport,
    handle: DeviceHandle,
    index: u8,
    max_chars: usize,
) -> UsbResult<String> {
    let mut raw = [0u8; 256];
    let len = transport
        .get_string_descriptor(handle, index, &mut raw)
        .map_err(|_| Error::DescriptorFetchFailed)?;

    decode_string_descriptor(&raw[..len], max_chars)
}

/// Parses the iSerialNumber identity string into a [DeviceInfo].
///
/// Every tag is independent: tags may appear in any order, missing tags
/// leave the corresponding field at its zero/empty default, and a tag whose
/// value fails to decode is logged and otherwise ignored rather than
/// aborting the whole parse.
pub fn parse_identity(serial: &str, product_id: u16) -> DeviceInfo {
    let mut info = DeviceInfo {
        raw_serial_string: serial.to_string(),
        product_id,
        ..Default::default()
    };

    if let Some(v) = parse_hex_u32(serial, "CPID:") {
        info.cpid = v;
    }
    if let Some(v) = parse_hex_u32(serial, "CPRV:") {
        info.cprv = v;
    }
    if let Some(v) = parse_hex_u32(serial, "CPFM:") {
        info.cpfm = v;
    }
    if let Some(v) = parse_hex_u32(serial, "SCEP:") {
        info.scep = v;
    }
    // BDID is parsed as a 64-bit value in the original tool, then narrowed to 32 bits.
    if let Some(v) = parse_hex_u64(serial, "BDID:") {
        info.bdid = v as u32;
    }
    if let Some(v) = parse_hex_u64(serial, "ECID:") {
        info.ecid = v;
    }
    if let Some(v) = parse_hex_u32(serial, "IBFL:") {
        info.ibfl = v;
    }

    if let Some(v) = parse_bracketed(serial, "SRNM:[") {
        info.srnm = v;
    }
    if let Some(v) = parse_bracketed(serial, "IMEI:[") {
        info.imei = v;
    }
    if let Some(v) = parse_bracketed(serial, "SRTG:[") {
        info.srtg = v;
    }
    if let Some(v) = parse_bracketed(serial, "PWND:[") {
        info.pwnd = Some(v);
    }

    if let Some(v) = parse_nonce(serial, "NONC:") {
        info.ap_nonce = v;
    }
    if let Some(v) = parse_nonce(serial, "SNON:") {
        info.sep_nonce = v;
    }

    info
}

/// Finds `tag` in `s` and parses the hex digits immediately following it as a `u32`.
fn parse_hex_u32(s: &str, tag: &str) -> Option<u32> {
    let digits = hex_digits_after(s, tag)?;
    match u32::from_str_radix(digits, 16) {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("identity: tag {tag} has an unparseable value {digits:?}");
            None
        }
    }
}

/// As [parse_hex_u32], but parses a `u64`.
fn parse_hex_u64(s: &str, tag: &str) -> Option<u64> {
    let digits = hex_digits_after(s, tag)?;
    match u64::from_str_radix(digits, 16) {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("identity: tag {tag} has an unparseable value {digits:?}");
            None
        }
    }
}

/// Returns the run of hex digits immediately following `tag`'s first occurrence in `s`.
fn hex_digits_after<'a>(s: &'a str, tag: &str) -> Option<&'a str> {
    let start = s.find(tag)? + tag.len();
    let rest = &s[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_hexdigit())
        .unwrap_or(rest.len());
    if end == 0 {
        None
    } else {
        Some(&rest[..end])
    }
}

/// Finds `tag` (which must include the trailing `[`) and returns the
/// characters up to (but not including) the next `]`.
fn parse_bracketed(s: &str, tag_with_bracket: &str) -> Option<String> {
    let start = s.find(tag_with_bracket)? + tag_with_bracket.len();
    let rest = &s[start..];
    let end = rest.find(']')?;
    Some(rest[..end].to_string())
}

/// Extracts and decodes the nonce following `tag` (e.g. `"NONC:"`, `"SNON:"`)
/// out of an arbitrary identity-grammar string. Used when the AP/SEP nonces
/// are read from a separate string descriptor (index 1) rather than the
/// main iSerialNumber string (§4.2 step 5).
pub fn extract_nonce(s: &str, tag: &str) -> Option<Vec<u8>> {
    parse_nonce(s, tag)
}

/// Decodes a run of hex-digit pairs following `tag` into bytes. The run
/// extends up to the first non-hex-digit character (typically whitespace or
/// end-of-string); an odd number of digits truncates to whole bytes. If any
/// pair within that run fails to parse as hex (which, given the run is
/// hex-digits-only, only happens if it's cut short), the whole nonce is
/// discarded rather than returned partially, matching the original tool.
fn parse_nonce(s: &str, tag: &str) -> Option<Vec<u8>> {
    let digits = hex_digits_after(s, tag)?;
    let byte_count = digits.len() / 2;
    if byte_count == 0 {
        warn!("identity: tag {tag} has no nonce bytes");
        return None;
    }

    let mut bytes = Vec::with_capacity(byte_count);
    for i in 0..byte_count {
        let pair = &digits[i * 2..i * 2 + 2];
        match u8::from_str_radix(pair, 16) {
            Ok(b) => bytes.push(b),
            Err(_) => {
                warn!("identity: tag {tag} has an unparseable nonce byte {pair:?}");
                return None;
            }
        }
    }

    Some(bytes)
}
