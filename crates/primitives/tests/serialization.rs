use spv_consensus::{bytes_to_hex, hash256_from_hex, hash256_to_hex, hex_to_bytes, Hash256};
use spv_primitives::encoding::{decode, encode, DecodeError};
use spv_primitives::{BlockHeader, OutPoint, TxIn};

const GENESIS_HEX: &str = "010000000000000000000000000000000000000000000000000000000000000000000000cff763175904c6cedff80a31fc686ab943fa58223105ebbba6fb22c8cfcacb07dc766a5af0ff0f1ea1594401";

fn seq_hash(start: u8) -> Hash256 {
    std::array::from_fn(|i| start.wrapping_add(i as u8))
}

#[test]
fn serialize_block_header() {
    let header = BlockHeader {
        version: 4,
        prev_block: seq_hash(0x00),
        merkle_root: seq_hash(0x20),
        time: 0x01020304,
        bits: 0x0a0b0c0d,
        nonce: 0x11223344,
    };

    let encoded = header.to_bytes();
    let mut expected = Vec::new();
    expected.extend_from_slice(&4i32.to_le_bytes());
    expected.extend_from_slice(&seq_hash(0x00));
    expected.extend_from_slice(&seq_hash(0x20));
    expected.extend_from_slice(&0x01020304u32.to_le_bytes());
    expected.extend_from_slice(&0x0a0b0c0du32.to_le_bytes());
    expected.extend_from_slice(&0x11223344u32.to_le_bytes());
    assert_eq!(encoded.to_vec(), expected);

    let decoded = BlockHeader::from_bytes(&encoded).expect("decode header");
    assert_eq!(decoded, header);
}

#[test]
fn genesis_header_fields() {
    let bytes = hex_to_bytes(GENESIS_HEX).expect("hex");
    let header = BlockHeader::from_bytes(&bytes).expect("decode genesis");
    assert_eq!(header.version, 1);
    assert_eq!(header.prev_block, [0u8; 32]);
    assert_eq!(header.time, 1_516_926_684);
    assert_eq!(header.bits, 0x1e0f_fff0);
    assert_eq!(header.to_bytes().to_vec(), bytes);
}

#[test]
fn header_rejects_wrong_length() {
    let bytes = hex_to_bytes(GENESIS_HEX).expect("hex");
    assert!(BlockHeader::from_bytes(&bytes[..79]).is_err());
    let mut long = bytes.clone();
    long.push(0);
    assert!(BlockHeader::from_bytes(&long).is_err());
}

#[test]
fn txin_wire_and_text_form() {
    let txid = "27c7c43cfde0943d2397b9fd5106d0a1f6927074a5fa6dfcf7fe50a2cb6b8d10";
    let txin = TxIn::new(OutPoint {
        hash: hash256_from_hex(txid).expect("txid"),
        index: 0,
    });
    assert_eq!(txin.to_string(), format!("CTxIn(COutPoint({txid}, 0), scriptSig=)"));

    let encoded = encode(&txin);
    assert_eq!(encoded.len(), 32 + 4 + 1 + 4);
    assert_eq!(hash256_to_hex(&encoded[..32].try_into().expect("hash")), txid);
    assert_eq!(bytes_to_hex(&encoded[36..]), "00ffffffff");
    assert_eq!(decode::<TxIn>(&encoded).expect("decode"), txin);
}

#[test]
fn decode_rejects_trailing_bytes() {
    let mut encoded = encode(&TxIn::new(OutPoint::null()));
    encoded.push(0);
    assert_eq!(decode::<TxIn>(&encoded), Err(DecodeError::TrailingBytes));
}
