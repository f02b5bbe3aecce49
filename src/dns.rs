//! DNS wire-format codec.
//!
//! Works directly on raw message buffers: header field access, flag-bit
//! manipulation, label decoding with compression-pointer support, and a
//! generic resource-record scanner used to locate referral data. No full
//! record tree is materialized; only the fields the resolver needs are read.

use std::net::Ipv4Addr;

use thiserror::Error;

/// Size of the fixed DNS header.
pub const HEADER_LEN: usize = 12;
/// Maximum DNS message size handled over UDP.
pub const MAX_MESSAGE_SIZE: usize = 1024;
/// Maximum total length of an encoded domain name (RFC 1035 §2.3.4).
pub const MAX_NAME_LEN: usize = 255;

/// A record (host address).
pub const TYPE_A: u16 = 1;
/// NS record (authoritative nameserver).
pub const TYPE_NS: u16 = 2;
/// Internet class.
pub const CLASS_IN: u16 = 1;

/// Codec-level failures on malformed or adversarial messages.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DnsError {
    #[error("message truncated")]
    Truncated,
    #[error("compression pointer does not point backwards")]
    BadPointer,
    #[error("label length byte uses reserved bits")]
    ReservedLabel,
    #[error("name exceeds {MAX_NAME_LEN} octets")]
    NameTooLong,
    #[error("label is not valid utf-8")]
    BadLabel,
    #[error("no NS record in authority section")]
    NoReferral,
}

/// Transaction ID from the header.
pub fn id(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[0], buf[1]])
}

/// 4-bit response code from the second flag byte.
pub fn rcode(buf: &[u8]) -> u8 {
    buf[3] & 0x0F
}

pub fn qdcount(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[4], buf[5]])
}

pub fn ancount(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[6], buf[7]])
}

pub fn nscount(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[8], buf[9]])
}

pub fn arcount(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[10], buf[11]])
}

/// A referral carries no answers but names a closer nameserver: successful
/// response, empty answer section, non-empty authority section.
pub fn is_referral(buf: &[u8]) -> bool {
    rcode(buf) == 0 && ancount(buf) == 0 && nscount(buf) > 0
}

/// Mark the message as a response (QR = 1).
pub fn set_qr(buf: &mut [u8]) {
    buf[2] |= 0x80;
}

/// Clear the recursion-desired bit.
pub fn clear_rd(buf: &mut [u8]) {
    buf[2] &= !0x01;
}

/// Advertise recursion availability (RA = 1).
pub fn set_ra(buf: &mut [u8]) {
    buf[3] |= 0x80;
}

/// Set the 4-bit RCODE, leaving the other bits of the flag byte untouched.
pub fn set_rcode(buf: &mut [u8], code: u8) {
    buf[3] = (buf[3] & 0xF0) | (code & 0x0F);
}

/// Decode a domain name starting at `offset`.
///
/// Labels are joined with `.` and the trailing dot is dropped (the root name
/// decodes to an empty string). Compression pointers are followed, but the
/// returned cursor never advances past the byte after the first pointer
/// field, so the caller can keep reading the enclosing record.
///
/// Malformed input cannot loop: every pointer must target a strictly earlier
/// offset than the previous one, and the accumulated name is capped at
/// [`MAX_NAME_LEN`] octets.
pub fn decode_name(buf: &[u8], offset: usize) -> Result<(String, usize), DnsError> {
    let mut name = String::new();
    let mut pos = offset;
    // Cursor to hand back: set once, at the first pointer.
    let mut resume = None;
    let mut last_target = usize::MAX;
    let mut name_len = 0usize;

    loop {
        let len = *buf.get(pos).ok_or(DnsError::Truncated)? as usize;

        if len == 0 {
            pos += 1;
            break;
        }

        if len & 0xC0 == 0xC0 {
            let low = *buf.get(pos + 1).ok_or(DnsError::Truncated)? as usize;
            let target = ((len & 0x3F) << 8) | low;
            if target >= pos || target >= last_target {
                return Err(DnsError::BadPointer);
            }
            if resume.is_none() {
                resume = Some(pos + 2);
            }
            last_target = target;
            pos = target;
            continue;
        }

        if len > 63 {
            return Err(DnsError::ReservedLabel);
        }

        name_len += len + 1;
        if name_len > MAX_NAME_LEN {
            return Err(DnsError::NameTooLong);
        }

        let label = buf
            .get(pos + 1..pos + 1 + len)
            .ok_or(DnsError::Truncated)?;
        let label = std::str::from_utf8(label).map_err(|_| DnsError::BadLabel)?;

        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(label);
        pos += 1 + len;
    }

    Ok((name, resume.unwrap_or(pos)))
}

/// Encode a domain name as an uncompressed label sequence.
pub fn encode_name(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + 2);
    if !name.is_empty() {
        for label in name.split('.') {
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
        }
    }
    out.push(0);
    out
}

/// Advance past a (possibly compressed) name without decoding it.
fn skip_name(buf: &[u8], mut pos: usize) -> Result<usize, DnsError> {
    loop {
        let len = *buf.get(pos).ok_or(DnsError::Truncated)? as usize;
        if len == 0 {
            return Ok(pos + 1);
        }
        if len & 0xC0 == 0xC0 {
            if pos + 2 > buf.len() {
                return Err(DnsError::Truncated);
            }
            return Ok(pos + 2);
        }
        if len > 63 {
            return Err(DnsError::ReservedLabel);
        }
        pos += 1 + len;
    }
}

/// Offset of the first resource record, past all questions.
fn question_end(buf: &[u8]) -> Result<usize, DnsError> {
    let mut pos = HEADER_LEN;
    for _ in 0..qdcount(buf) {
        pos = skip_name(buf, pos)?;
        // QTYPE + QCLASS
        pos += 4;
        if pos > buf.len() {
            return Err(DnsError::Truncated);
        }
    }
    Ok(pos)
}

/// Structural view of one resource record, parsed in place.
struct ResourceRecord {
    name_at: usize,
    rtype: u16,
    rclass: u16,
    rdata_at: usize,
    rdata_len: usize,
    end: usize,
}

fn read_record(buf: &[u8], pos: usize) -> Result<ResourceRecord, DnsError> {
    let name_at = pos;
    let fixed = skip_name(buf, pos)?;
    let rdata_at = fixed + 10;
    if rdata_at > buf.len() {
        return Err(DnsError::Truncated);
    }
    let rtype = u16::from_be_bytes([buf[fixed], buf[fixed + 1]]);
    let rclass = u16::from_be_bytes([buf[fixed + 2], buf[fixed + 3]]);
    // TTL at fixed+4..fixed+8 is not needed here.
    let rdata_len = u16::from_be_bytes([buf[fixed + 8], buf[fixed + 9]]) as usize;
    let end = rdata_at + rdata_len;
    if end > buf.len() {
        return Err(DnsError::Truncated);
    }
    Ok(ResourceRecord {
        name_at,
        rtype,
        rclass,
        rdata_at,
        rdata_len,
        end,
    })
}

/// Extract the nameserver name from a referral: the RDATA of the first NS
/// record in the authority section, parsed structurally rather than by a
/// fixed byte offset.
pub fn referral_target(buf: &[u8]) -> Result<String, DnsError> {
    let mut pos = question_end(buf)?;
    for _ in 0..ancount(buf) {
        pos = read_record(buf, pos)?.end;
    }
    for _ in 0..nscount(buf) {
        let record = read_record(buf, pos)?;
        if record.rtype == TYPE_NS {
            return Ok(decode_name(buf, record.rdata_at)?.0);
        }
        pos = record.end;
    }
    Err(DnsError::NoReferral)
}

/// Look up a glue address: the first IN A record in the additional section
/// owned by `name`. Returns `Ok(None)` when the referral carries no usable
/// glue and the caller must resolve the nameserver externally.
pub fn glue_address(buf: &[u8], name: &str) -> Result<Option<Ipv4Addr>, DnsError> {
    let mut pos = question_end(buf)?;
    for _ in 0..ancount(buf) as usize + nscount(buf) as usize {
        pos = read_record(buf, pos)?.end;
    }
    for _ in 0..arcount(buf) {
        let record = read_record(buf, pos)?;
        if record.rtype == TYPE_A && record.rclass == CLASS_IN && record.rdata_len == 4 {
            let (owner, _) = decode_name(buf, record.name_at)?;
            if owner == name {
                let d = &buf[record.rdata_at..record.rdata_at + 4];
                return Ok(Some(Ipv4Addr::new(d[0], d[1], d[2], d[3])));
            }
        }
        pos = record.end;
    }
    Ok(None)
}
