/*
 * dns_integration.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * Integration test for the raw-UDP DNS codec. Builds MX and A queries and
 * decodes hand-crafted response packets (including a compressed name
 * pointing back into the question section), without opening a socket.
 *
 * Run with:
 *   cargo test -p portolano_core --test dns_integration
 */

use portolano_core::dns::message::{build_query, parse_response, CLASS_IN, TYPE_A, TYPE_MX};

/// Append a DNS name in label-length-prefixed wire form, terminated by a
/// zero-length label.
fn encode_name(name: &str, out: &mut Vec<u8>) {
    for label in name.split('.') {
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
}

/// Build a complete DNS response packet with `id`, echoing one question for
/// `qname`/`qtype`, followed by `answers` raw answer-record bytes.
fn build_response(id: u16, qname: &str, qtype: u16, ancount: u16, answers: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(&0x8180u16.to_be_bytes()); // QR=1, RD=1, RA=1, RCODE=0
    out.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    out.extend_from_slice(&ancount.to_be_bytes()); // ANCOUNT
    out.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    out.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT
    encode_name(qname, &mut out);
    out.extend_from_slice(&qtype.to_be_bytes());
    out.extend_from_slice(&CLASS_IN.to_be_bytes());
    out.extend_from_slice(answers);
    out
}

#[test]
fn mx_query_round_trips_through_a_compressed_response() {
    let query = build_query(42, "example.com", TYPE_MX);
    assert_eq!(&query[0..2], &42u16.to_be_bytes());

    // MX answer: name is a compression pointer (0xC0 0x0C) back to the
    // question's qname, rdata is PREFERENCE + an uncompressed exchange name.
    let mut answer = Vec::new();
    answer.extend_from_slice(&[0xC0, 0x0C]); // pointer to offset 12 (start of qname)
    answer.extend_from_slice(&TYPE_MX.to_be_bytes());
    answer.extend_from_slice(&CLASS_IN.to_be_bytes());
    answer.extend_from_slice(&300u32.to_be_bytes()); // TTL
    let mut rdata = Vec::new();
    rdata.extend_from_slice(&10u16.to_be_bytes()); // preference
    encode_name("mail.example.com", &mut rdata);
    answer.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
    answer.extend_from_slice(&rdata);

    let packet = build_response(42, "example.com", TYPE_MX, 1, &answer);
    let parsed = parse_response(&packet, 42).unwrap();
    assert_eq!(parsed.mx.len(), 1);
    assert_eq!(parsed.mx[0].preference, 10);
    assert_eq!(parsed.mx[0].host, "mail.example.com");
    assert!(parsed.a.is_none());
}

#[test]
fn a_query_round_trips_and_id_mismatch_is_rejected() {
    let query = build_query(7, "mail.example.com", TYPE_A);
    assert_eq!(&query[0..2], &7u16.to_be_bytes());

    let mut answer = Vec::new();
    answer.extend_from_slice(&[0xC0, 0x0C]);
    answer.extend_from_slice(&TYPE_A.to_be_bytes());
    answer.extend_from_slice(&CLASS_IN.to_be_bytes());
    answer.extend_from_slice(&60u32.to_be_bytes());
    answer.extend_from_slice(&4u16.to_be_bytes()); // RDLENGTH
    answer.extend_from_slice(&[192, 0, 2, 10]);

    let packet = build_response(7, "mail.example.com", TYPE_A, 1, &answer);
    let parsed = parse_response(&packet, 7).unwrap();
    assert_eq!(parsed.a, Some([192, 0, 2, 10]));

    // A response whose id doesn't match the query we sent must be rejected,
    // guarding against off-path spoofed UDP replies.
    assert!(parse_response(&packet, 99).is_err());
}
