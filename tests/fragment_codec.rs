//! Fragment-protocol message formats: strict layouts, fail-closed parsing.

use xbmesh::protocol::codec::{
    self, FragmentHeader, TYPE_DATA, TYPE_DONE, TYPE_NACK,
};
use xbmesh::protocol::crc;
use xbmesh::LinkError;

#[test]
fn data_wire_layout_is_exact() {
    let header = FragmentHeader {
        msg_id: 0x0102,
        total_len: 0x0000_0103,
        frag_index: 8,
        frag_count: 9,
        payload_len: 3,
    };
    let wire = codec::encode_data(&header, b"xyz");
    assert_eq!(wire.len(), 18);
    assert_eq!(wire[0], 0x01); // protocol version
    assert_eq!(wire[1], TYPE_DATA);
    assert_eq!(&wire[2..4], &[0x01, 0x02]); // msg id, big-endian
    assert_eq!(&wire[4..8], &[0x00, 0x00, 0x01, 0x03]); // total length
    assert_eq!(&wire[8..10], &[0x00, 0x08]); // fragment index
    assert_eq!(&wire[10..12], &[0x00, 0x09]); // fragment count
    assert_eq!(wire[12], 3); // payload length
    assert_eq!(&wire[13..16], b"xyz");
    assert!(crc::verify(&wire));
}

#[test]
fn unknown_version_is_rejected_after_crc() {
    let header = FragmentHeader {
        msg_id: 1,
        total_len: 1,
        frag_index: 0,
        frag_count: 1,
        payload_len: 1,
    };
    let mut wire = codec::encode_data(&header, b"z");
    wire[0] = 0x02;
    // Re-seal so only the version is wrong.
    wire.truncate(wire.len() - 2);
    crc::append(&mut wire);
    assert!(matches!(
        codec::parse_data(&wire),
        Err(LinkError::Parse(_))
    ));
}

#[test]
fn short_buffers_are_parse_errors_not_crc_errors() {
    assert!(matches!(
        codec::parse_data(&[0x01, TYPE_DATA, 0x00]),
        Err(LinkError::Parse(_))
    ));
    assert!(matches!(
        codec::parse_nack(&[0x01, TYPE_NACK]),
        Err(LinkError::Parse(_))
    ));
    assert!(matches!(
        codec::parse_done(&[0x01, TYPE_DONE]),
        Err(LinkError::Parse(_))
    ));
}

#[test]
fn payload_length_mismatch_is_rejected() {
    let header = FragmentHeader {
        msg_id: 5,
        total_len: 4,
        frag_index: 0,
        frag_count: 1,
        payload_len: 4,
    };
    let mut wire = codec::encode_data(&header, b"abcd");
    // Claim a shorter payload than the message carries.
    wire[12] = 3;
    wire.truncate(wire.len() - 2);
    crc::append(&mut wire);
    assert!(matches!(
        codec::parse_data(&wire),
        Err(LinkError::Parse(_))
    ));
}

#[test]
fn nack_wire_layout_and_empty_list() {
    let wire = codec::encode_nack(0x0A0B, &[]);
    assert_eq!(wire.len(), 7);
    assert_eq!(wire[1], TYPE_NACK);
    assert_eq!(wire[4], 0); // index count
    let (msg_id, missing) = codec::parse_nack(&wire).unwrap();
    assert_eq!(msg_id, 0x0A0B);
    assert!(missing.is_empty());

    let wire = codec::encode_nack(7, &[0, 2, 341]);
    assert_eq!(wire.len(), 7 + 6);
    let (_, missing) = codec::parse_nack(&wire).unwrap();
    assert_eq!(missing, vec![0, 2, 341]);
}

#[test]
fn nack_with_flipped_bit_fails_crc() {
    let mut wire = codec::encode_nack(7, &[1]);
    wire[5] ^= 0x80;
    assert!(matches!(codec::parse_nack(&wire), Err(LinkError::Crc)));
}

#[test]
fn nack_count_field_must_match_length() {
    let mut wire = codec::encode_nack(7, &[1, 2]);
    wire[4] = 1;
    wire.truncate(wire.len() - 2);
    crc::append(&mut wire);
    assert!(matches!(
        codec::parse_nack(&wire),
        Err(LinkError::Parse(_))
    ));
}

#[test]
fn done_round_trip_and_type_confusion() {
    let wire = codec::encode_done(0x00FF);
    assert_eq!(codec::parse_done(&wire).unwrap(), 0x00FF);
    // A NACK is not a DONE even at the right length.
    let mut nack_like = codec::encode_nack(0x00FF, &[]);
    nack_like.truncate(6);
    assert!(codec::parse_done(&nack_like).is_err());
}

#[test]
fn peek_type_distinguishes_the_three_messages() {
    let header = FragmentHeader {
        msg_id: 1,
        total_len: 0,
        frag_index: 0,
        frag_count: 1,
        payload_len: 0,
    };
    assert_eq!(
        codec::peek_type(&codec::encode_data(&header, b"")),
        Some(TYPE_DATA)
    );
    assert_eq!(codec::peek_type(&codec::encode_nack(1, &[])), Some(TYPE_NACK));
    assert_eq!(codec::peek_type(&codec::encode_done(1)), Some(TYPE_DONE));
    assert_eq!(codec::peek_type(&[0x01]), None);
}
