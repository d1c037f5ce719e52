use base64::Engine;
use spv_consensus::{chain_params, Network};
use spv_primitives::{pubkey_to_address, wif_to_secret_key};
use spv_script::{pubkey_from_secret, sign_message, verify_message_address};

const MASTERNODE_WIF: &str = "7sqv1jqC6vbysyLZr2CeECoGa2syaf2T5RRTQGWcRAsN3Ez9RR9h";

fn ping_text() -> String {
    format!(
        "CTxIn(COutPoint({}, 0), scriptSig=){}{}",
        "0".repeat(64),
        "f".repeat(64),
        1_461_858_375
    )
}

#[test]
fn masternode_key_derives_known_address() {
    let params = chain_params(Network::Mainnet);
    let (secret, compressed) = wif_to_secret_key(MASTERNODE_WIF, &params).expect("wif");
    let pubkey = pubkey_from_secret(&secret, compressed).expect("pubkey");
    assert_eq!(
        spv_consensus::bytes_to_hex(&pubkey),
        "03b9c1d8b9d76ee0ff1247d6e36c1b34399c61fa168e65f83ea4c73b5c34e629ce"
    );
    assert_eq!(
        pubkey_to_address(&pubkey, &params),
        "GaToqaVr9GDZEUQ8xdxNXesFoiMUntNbSw"
    );
}

#[test]
fn deterministic_signature_matches_known_vector() {
    let params = chain_params(Network::Mainnet);
    let (secret, compressed) = wif_to_secret_key(MASTERNODE_WIF, &params).expect("wif");
    let sig = sign_message(&secret, compressed, ping_text().as_bytes()).expect("sign");
    assert_eq!(
        base64::engine::general_purpose::STANDARD.encode(sig),
        "H6RJ/CNWtTgLEyHO4W+FY0NtKESt0tpg3kwG9aZJatWPVauwhYq7RfW01+4Ny6NlRJpE5i6ywgA9Ry3XC31BAXs="
    );
    verify_message_address(
        "GaToqaVr9GDZEUQ8xdxNXesFoiMUntNbSw",
        &sig,
        ping_text().as_bytes(),
        &params,
    )
    .expect("verify");
}
