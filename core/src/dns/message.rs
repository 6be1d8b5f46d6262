/*
 * message.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Portolano, a multi-protocol mail server.
 *
 * Portolano is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Portolano is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Portolano.  If not, see <http://www.gnu.org/licenses/>.
 */

//! RFC 1035 wire format: query encoding and answer-section decoding, including
//! compression-pointer name parsing. No third-party DNS crate is used;
//! everything here is a hand-rolled codec over a raw byte buffer.

use super::DnsError;

pub const TYPE_A: u16 = 1;
pub const TYPE_MX: u16 = 15;
pub const CLASS_IN: u16 = 1;

const MAX_POINTER_DEPTH: u32 = 10;

/// One MX answer: numeric preference and exchange hostname.
#[derive(Debug, Clone, PartialEq)]
pub struct MxAnswer {
    pub preference: u16,
    pub host: String,
}

/// Answer-section contents relevant to this resolver: any MX records found,
/// and the first A record's address octets.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ParsedAnswer {
    pub mx: Vec<MxAnswer>,
    pub a: Option<[u8; 4]>,
}

/// Build a query packet: 12-byte header (random-ish `id`, RD flag, QDCOUNT=1)
/// followed by one question for `qname`/`qtype`/IN.
pub fn build_query(id: u16, qname: &str, qtype: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32 + qname.len());
    buf.extend_from_slice(&id.to_be_bytes());
    buf.extend_from_slice(&0x0100u16.to_be_bytes()); // standard query, recursion desired
    buf.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    buf.extend_from_slice(&0u16.to_be_bytes()); // ANCOUNT
    buf.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    buf.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT
    encode_name(qname, &mut buf);
    buf.extend_from_slice(&qtype.to_be_bytes());
    buf.extend_from_slice(&CLASS_IN.to_be_bytes());
    buf
}

fn encode_name(name: &str, buf: &mut Vec<u8>) {
    let trimmed = name.trim_end_matches('.');
    if trimmed.is_empty() {
        buf.push(0);
        return;
    }
    for label in trimmed.split('.') {
        let bytes = &label.as_bytes()[..label.len().min(63)];
        buf.push(bytes.len() as u8);
        buf.extend_from_slice(bytes);
    }
    buf.push(0);
}

/// Parse a (possibly compressed) name starting at `*pos`, advancing `*pos`
/// past the name as the *enclosing* reader should see it: past the inline
/// labels and terminating zero byte, or past a 2-byte pointer the first time
/// one is followed -- never past the full expansion of a pointed-to name.
fn parse_name(buf: &[u8], pos: &mut usize) -> Result<String, DnsError> {
    let mut labels: Vec<String> = Vec::new();
    let mut cursor = *pos;
    let mut jumped = false;
    let mut depth = 0u32;
    loop {
        if cursor >= buf.len() {
            return Err(DnsError::Malformed);
        }
        let len = buf[cursor];
        if len == 0 {
            cursor += 1;
            if !jumped {
                *pos = cursor;
            }
            break;
        }
        if len & 0xC0 == 0xC0 {
            if cursor + 1 >= buf.len() {
                return Err(DnsError::Malformed);
            }
            let offset = (((len as usize) & 0x3F) << 8) | buf[cursor + 1] as usize;
            if !jumped {
                *pos = cursor + 2;
                jumped = true;
            }
            depth += 1;
            if depth > MAX_POINTER_DEPTH {
                return Err(DnsError::Malformed);
            }
            if offset >= buf.len() {
                return Err(DnsError::Malformed);
            }
            cursor = offset;
            continue;
        }
        if len & 0xC0 != 0 {
            return Err(DnsError::Malformed);
        }
        let start = cursor + 1;
        let end = start + len as usize;
        if end > buf.len() {
            return Err(DnsError::Malformed);
        }
        labels.push(String::from_utf8_lossy(&buf[start..end]).into_owned());
        cursor = end;
    }
    Ok(labels.join("."))
}

/// Parse a received response, checking the transaction id and walking past
/// the echoed question, then collecting MX and A data from the answer
/// section. `rtype` filters which kind of RDATA is decoded; records of the
/// other type are skipped using RDLENGTH without attempting to parse them.
pub fn parse_response(buf: &[u8], expected_id: u16) -> Result<ParsedAnswer, DnsError> {
    if buf.len() < 12 {
        return Err(DnsError::Malformed);
    }
    let id = u16::from_be_bytes([buf[0], buf[1]]);
    if id != expected_id {
        return Err(DnsError::Malformed);
    }
    let qdcount = u16::from_be_bytes([buf[4], buf[5]]) as usize;
    let ancount = u16::from_be_bytes([buf[6], buf[7]]) as usize;
    let mut pos = 12;

    for _ in 0..qdcount {
        parse_name(buf, &mut pos)?;
        pos += 4; // QTYPE + QCLASS
        if pos > buf.len() {
            return Err(DnsError::Malformed);
        }
    }

    let mut answer = ParsedAnswer::default();
    for _ in 0..ancount {
        parse_name(buf, &mut pos)?;
        if pos + 10 > buf.len() {
            return Err(DnsError::Malformed);
        }
        let rtype = u16::from_be_bytes([buf[pos], buf[pos + 1]]);
        let rdlength = u16::from_be_bytes([buf[pos + 8], buf[pos + 9]]) as usize;
        pos += 10;
        if pos + rdlength > buf.len() {
            return Err(DnsError::Malformed);
        }
        let rdata_start = pos;
        match rtype {
            TYPE_MX if rdlength >= 2 => {
                let preference = u16::from_be_bytes([buf[rdata_start], buf[rdata_start + 1]]);
                let mut name_pos = rdata_start + 2;
                let host = parse_name(buf, &mut name_pos)?;
                answer.mx.push(MxAnswer { preference, host });
            }
            TYPE_A if rdlength == 4 && answer.a.is_none() => {
                answer.a = Some([
                    buf[rdata_start],
                    buf[rdata_start + 1],
                    buf[rdata_start + 2],
                    buf[rdata_start + 3],
                ]);
            }
            _ => {}
        }
        pos = rdata_start + rdlength;
    }
    Ok(answer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(id: u16, ancount: u16) -> Vec<u8> {
        let mut h = Vec::new();
        h.extend_from_slice(&id.to_be_bytes());
        h.extend_from_slice(&0x8180u16.to_be_bytes());
        h.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
        h.extend_from_slice(&ancount.to_be_bytes());
        h.extend_from_slice(&0u16.to_be_bytes());
        h.extend_from_slice(&0u16.to_be_bytes());
        h
    }

    #[test]
    fn build_query_encodes_labels_and_terminator() {
        let packet = build_query(0x1234, "example.com", TYPE_A);
        assert_eq!(&packet[0..2], &0x1234u16.to_be_bytes());
        // question starts right after the 12-byte header
        assert_eq!(packet[12], 7); // "example"
        assert_eq!(&packet[13..20], b"example");
        assert_eq!(packet[20], 3); // "com"
        assert_eq!(&packet[21..24], b"com");
        assert_eq!(packet[24], 0); // terminator
    }

    #[test]
    fn parse_response_picks_lowest_preference_mx() {
        let id = 0x55AA;
        let mut buf = header(id, 2);
        encode_name("example.", &mut buf);
        buf.extend_from_slice(&TYPE_MX.to_be_bytes());
        buf.extend_from_slice(&CLASS_IN.to_be_bytes());

        // Answer 1: b.example, preference 20
        encode_name("example.", &mut buf);
        buf.extend_from_slice(&TYPE_MX.to_be_bytes());
        buf.extend_from_slice(&CLASS_IN.to_be_bytes());
        buf.extend_from_slice(&300u32.to_be_bytes());
        let mut rdata1 = Vec::new();
        rdata1.extend_from_slice(&20u16.to_be_bytes());
        encode_name("b.example.", &mut rdata1);
        buf.extend_from_slice(&(rdata1.len() as u16).to_be_bytes());
        buf.extend_from_slice(&rdata1);

        // Answer 2: a.example, preference 10
        encode_name("example.", &mut buf);
        buf.extend_from_slice(&TYPE_MX.to_be_bytes());
        buf.extend_from_slice(&CLASS_IN.to_be_bytes());
        buf.extend_from_slice(&300u32.to_be_bytes());
        let mut rdata2 = Vec::new();
        rdata2.extend_from_slice(&10u16.to_be_bytes());
        encode_name("a.example.", &mut rdata2);
        buf.extend_from_slice(&(rdata2.len() as u16).to_be_bytes());
        buf.extend_from_slice(&rdata2);

        let answer = parse_response(&buf, id).unwrap();
        let best = answer.mx.iter().min_by_key(|m| m.preference).unwrap();
        assert_eq!(best.host, "a.example");
    }

    #[test]
    fn parse_response_decodes_a_record() {
        let id = 0xBEEF;
        let mut buf = header(id, 1);
        encode_name("example.com.", &mut buf);
        buf.extend_from_slice(&TYPE_A.to_be_bytes());
        buf.extend_from_slice(&CLASS_IN.to_be_bytes());

        encode_name("example.com.", &mut buf);
        buf.extend_from_slice(&TYPE_A.to_be_bytes());
        buf.extend_from_slice(&CLASS_IN.to_be_bytes());
        buf.extend_from_slice(&60u32.to_be_bytes());
        buf.extend_from_slice(&4u16.to_be_bytes());
        buf.extend_from_slice(&[93, 184, 216, 34]);

        let answer = parse_response(&buf, id).unwrap();
        assert_eq!(answer.a, Some([93, 184, 216, 34]));
    }

    #[test]
    fn mismatched_transaction_id_is_malformed() {
        let buf = header(0x1111, 0);
        assert!(parse_response(&buf, 0x2222).is_err());
    }

    #[test]
    fn name_with_compression_pointer_advances_cursor_past_pointer_only() {
        // Packet: [header][12 bytes]"example"+0 at offset 12..20,
        // then at offset 20 a name that is just a pointer back to offset 12.
        let id = 1;
        let mut buf = header(id, 0);
        let base = buf.len();
        buf.extend_from_slice(b"\x07example\x00"); // offset `base`
        let pointer_offset = buf.len();
        let ptr = 0xC000u16 | (base as u16);
        buf.extend_from_slice(&ptr.to_be_bytes());
        buf.push(0xFF); // sentinel byte right after the pointer

        let mut pos = pointer_offset;
        let name = parse_name(&buf, &mut pos).unwrap();
        assert_eq!(name, "example");
        // cursor must stop right after the 2-byte pointer, not after "example"
        assert_eq!(pos, pointer_offset + 2);
    }

    #[test]
    fn pointer_chain_deeper_than_cap_is_rejected() {
        // Build a chain of pointers each pointing to the previous one, 11 deep.
        let mut buf = header(1, 0);
        let mut prev_offset = buf.len();
        buf.extend_from_slice(b"\x01a\x00");
        for _ in 0..11 {
            let ptr_offset = buf.len();
            let ptr = 0xC000u16 | (prev_offset as u16);
            buf.extend_from_slice(&ptr.to_be_bytes());
            prev_offset = ptr_offset;
        }
        let mut pos = prev_offset;
        assert!(parse_name(&buf, &mut pos).is_err());
    }
}
