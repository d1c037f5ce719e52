use std::sync::Arc;

use serde_json::json;
use spv_chainstate::{deserialize_header, Blockchain, ChainHeader, ChainRegistry};
use spv_consensus::constants::{COIN, MASTERNODE_COLLATERAL};
use spv_consensus::{
    bytes_to_hex, chain_params, hash256_from_hex, hash256_to_hex, hex_to_bytes, ChainParams,
    Network,
};
use spv_masternode::{
    parse_masternode_conf, Masternode, MasternodeAnnounce, MasternodeError, MasternodeManager,
    SpendableOutput,
};
use spv_pow::check_proof_of_work;
use spv_primitives::{sha256d, BlockHeader, OutPoint};
use spv_storage::memory::MemoryStore;

const TXID: &str = "830c4be5153638a8fbee5782f4d08d81d9fb30e2c7256643fc78765f0bdf44e6";
const OTHER_TXID: &str = "27c7c43cfde0943d2397b9fd5106d0a1f6927074a5fa6dfcf7fe50a2cb6b8d10";
const MASTERNODE_WIF: &str = "7sqv1jqC6vbysyLZr2CeECoGa2syaf2T5RRTQGWcRAsN3Ez9RR9h";
const COLLATERAL_WIF: &str = "p2pkh:7usrUZignVHMLXbUTBTViYwKFhCu2T37DPsJSX5YPzmbKcmgBJev";
const COLLATERAL_PUB: &str = "02a6eeee0b2ec1bea855d555f8a5c78cb4854fb95d7034d1f0150d69965f8eb866";
const NOW: i64 = 1_700_000_000;

fn mainnet() -> ChainParams {
    chain_params(Network::Mainnet)
}

fn open_manager(store: &Arc<MemoryStore>) -> MasternodeManager<Arc<MemoryStore>> {
    MasternodeManager::open(Arc::clone(store), mainnet()).expect("open manager")
}

fn import(manager: &mut MasternodeManager<Arc<MemoryStore>>, lines: &[String]) -> usize {
    let parsed = parse_masternode_conf(lines, &mainnet()).expect("parse conf");
    manager.import_conf_lines(&parsed).expect("import")
}

fn conf_line(alias: &str, addr: &str, txid: &str) -> String {
    format!("{alias} {addr} {MASTERNODE_WIF} {txid} 0")
}

/// Regtest chain of `count` mined headers on top of genesis.
fn regtest_chain(dir: &std::path::Path, count: i32) -> Blockchain {
    let params = chain_params(Network::Regtest);
    let registry = ChainRegistry::open_with_params(dir, params.clone()).expect("open registry");
    let chain = registry.best_chain();
    let mut tip = deserialize_header(&params.genesis_header, 0).expect("genesis");
    for height in 1..=count {
        let mut header = BlockHeader {
            version: 4,
            prev_block: tip.hash(),
            merkle_root: sha256d(&height.to_le_bytes()),
            time: 1_600_000_000 + height as u32,
            bits: 0x207f_ffff,
            nonce: 0,
        };
        while check_proof_of_work(&header.hash(), header.bits, &params.pow_limit).is_err() {
            header.nonce += 1;
        }
        let next = ChainHeader::new(header, height);
        chain.save_header(&next).expect("save header");
        tip = next;
    }
    chain
}

fn ready_manager(store: &Arc<MemoryStore>) -> MasternodeManager<Arc<MemoryStore>> {
    let mut manager = open_manager(store);
    import(&mut manager, &[conf_line("mn1", "192.168.1.100:9333", TXID)]);
    manager
        .set_collateral(
            "mn1",
            hex_to_bytes(COLLATERAL_PUB).expect("pub"),
            MASTERNODE_COLLATERAL,
            5,
        )
        .expect("set collateral");
    manager
}

#[test]
fn imported_masternodes_survive_reopen() {
    let store = Arc::new(MemoryStore::new());
    let mut manager = open_manager(&store);
    let imported = import(
        &mut manager,
        &[
            conf_line("mn1", "192.168.1.100:9333", TXID),
            conf_line("mn1", "192.168.1.101:9333", OTHER_TXID),
            conf_line("mn2", "192.168.1.102:9333", TXID),
            conf_line("mn3", "192.168.1.103:9333", OTHER_TXID),
        ],
    );
    assert_eq!(imported, 2);
    assert_eq!(import(&mut manager, &[conf_line("mn1", "10.0.0.1:9333", TXID)]), 0);

    let mn1 = manager.get("mn1").expect("mn1");
    assert_eq!(mn1.private_key.as_deref(), Some(MASTERNODE_WIF));
    assert_eq!(
        bytes_to_hex(&mn1.announce.masternode_pubkey),
        "03b9c1d8b9d76ee0ff1247d6e36c1b34399c61fa168e65f83ea4c73b5c34e629ce"
    );
    assert!(mn1.announce.collateral_key.is_empty());
    assert!(!mn1.announced);

    let reopened = open_manager(&store);
    assert_eq!(reopened.masternodes().len(), 2);
    for mn in manager.masternodes() {
        assert_eq!(reopened.get(&mn.alias), Some(mn));
    }
}

#[test]
fn add_and_remove_check_aliases() {
    let store = Arc::new(MemoryStore::new());
    let mut manager = ready_manager(&store);
    let duplicate = Masternode::new("mn1", manager.get("mn1").expect("mn1").announce.clone());
    assert!(matches!(
        manager.add(duplicate),
        Err(MasternodeError::AlreadyExists(alias)) if alias == "mn1"
    ));

    let removed = manager.remove("mn1").expect("remove");
    assert_eq!(removed.alias, "mn1");
    assert!(matches!(
        manager.remove("mn1"),
        Err(MasternodeError::NotFound(_))
    ));
    assert!(open_manager(&store).masternodes().is_empty());

    manager.add(removed.clone()).expect("add back");
    assert_eq!(open_manager(&store).get("mn1"), Some(&removed));
}

#[test]
fn signing_prerequisites_are_reported() {
    let store = Arc::new(MemoryStore::new());
    let mut manager = open_manager(&store);
    import(
        &mut manager,
        &[
            conf_line("mn1", "192.168.1.100:9333", TXID),
            conf_line("mn2", "0.0.0.0:9333", OTHER_TXID),
        ],
    );

    assert!(matches!(
        manager.check_can_sign("mn1", 20),
        Err(MasternodeError::NotReady(reason)) if reason.contains("Collateral key")
    ));
    assert!(matches!(
        manager.check_can_sign("missing", 20),
        Err(MasternodeError::NotFound(_))
    ));

    let collateral = hex_to_bytes(COLLATERAL_PUB).expect("pub");
    manager
        .set_collateral("mn1", collateral.clone(), MASTERNODE_COLLATERAL - COIN, 5)
        .expect("collateral");
    manager
        .set_collateral("mn2", collateral.clone(), MASTERNODE_COLLATERAL, 5)
        .expect("collateral");
    assert!(matches!(
        manager.check_can_sign("mn1", 14),
        Err(MasternodeError::NotReady(reason)) if reason.contains("at least 15 confirmations")
    ));
    assert!(matches!(
        manager.check_can_sign("mn1", 15),
        Err(MasternodeError::NotReady(reason))
            if reason == "Masternode requires a collateral 2500 coin output."
    ));
    assert_eq!(
        open_manager(&store).get("mn1").expect("mn1").collateral_value,
        Some(MASTERNODE_COLLATERAL - COIN)
    );
    manager
        .set_collateral("mn1", collateral, MASTERNODE_COLLATERAL, 5)
        .expect("collateral");
    manager.check_can_sign("mn1", 15).expect("ready");
    assert!(matches!(
        manager.check_can_sign("mn2", 15),
        Err(MasternodeError::NotReady(reason)) if reason.contains("IP address")
    ));
}

#[test]
fn collateral_outputs_exclude_wrong_amounts_and_used_outpoints() {
    let store = Arc::new(MemoryStore::new());
    let manager = ready_manager(&store);
    let outpoint = |txid: &str, index: u32| OutPoint {
        hash: hash256_from_hex(txid).expect("txid"),
        index,
    };
    let coins = vec![
        SpendableOutput {
            outpoint: outpoint(TXID, 0),
            value: MASTERNODE_COLLATERAL,
        },
        SpendableOutput {
            outpoint: outpoint(TXID, 1),
            value: MASTERNODE_COLLATERAL,
        },
        SpendableOutput {
            outpoint: outpoint(OTHER_TXID, 0),
            value: MASTERNODE_COLLATERAL + 1,
        },
        SpendableOutput {
            outpoint: outpoint(OTHER_TXID, 1),
            value: 100 * COIN,
        },
    ];

    let eligible = manager.masternode_outputs(coins);
    assert_eq!(
        eligible,
        vec![SpendableOutput {
            outpoint: outpoint(TXID, 1),
            value: MASTERNODE_COLLATERAL,
        }]
    );
    assert!(open_manager(&Arc::new(MemoryStore::new()))
        .masternode_outputs(Vec::new())
        .is_empty());
}

#[test]
fn sign_announce_uses_the_ping_depth_header() {
    let dir = tempfile::tempdir().expect("tempdir");
    let chain = regtest_chain(dir.path(), 20);
    let store = Arc::new(MemoryStore::new());
    let mut manager = ready_manager(&store);

    let announce = manager
        .sign_announce("mn1", COLLATERAL_WIF, &chain, NOW)
        .expect("sign");
    let ping_header = chain.read_header(8).expect("read").expect("header");
    assert_eq!(announce.last_ping.block_hash, ping_header.hash());
    assert_eq!(announce.sig_time, NOW);
    assert_eq!(announce.last_ping.sig_time, NOW);
    assert_eq!(announce.last_ping.vin, announce.vin);
    announce.verify_collateral(&mainnet()).expect("announce signature");
    announce
        .last_ping
        .verify(&announce.masternode_pubkey)
        .expect("ping signature");

    let payload = manager.broadcast_payload("mn1").expect("payload");
    assert_eq!(
        MasternodeAnnounce::from_broadcast_hex(&payload).expect("decode payload"),
        announce
    );
    assert_eq!(open_manager(&store).get("mn1").expect("mn1").announce, announce);
}

#[test]
fn young_collateral_leaves_the_record_unsigned() {
    let dir = tempfile::tempdir().expect("tempdir");
    let chain = regtest_chain(dir.path(), 18);
    let store = Arc::new(MemoryStore::new());
    let mut manager = ready_manager(&store);

    assert!(matches!(
        manager.sign_announce("mn1", COLLATERAL_WIF, &chain, NOW),
        Err(MasternodeError::NotReady(reason)) if reason.contains("current: 14")
    ));
    let mn = manager.get("mn1").expect("mn1");
    assert!(mn.announce.sig.is_empty());
    assert_eq!(mn.announce.sig_time, 0);
}

#[test]
fn wrong_collateral_key_is_refused() {
    let dir = tempfile::tempdir().expect("tempdir");
    let chain = regtest_chain(dir.path(), 20);
    let store = Arc::new(MemoryStore::new());
    let mut manager = ready_manager(&store);

    assert!(matches!(
        manager.sign_announce("mn1", MASTERNODE_WIF, &chain, NOW),
        Err(MasternodeError::KeyMismatch)
    ));
    assert!(manager.get("mn1").expect("mn1").announce.sig.is_empty());
}

#[test]
fn broadcast_responses_and_statuses() {
    let dir = tempfile::tempdir().expect("tempdir");
    let chain = regtest_chain(dir.path(), 20);
    let store = Arc::new(MemoryStore::new());
    let mut manager = ready_manager(&store);
    let announce = manager
        .sign_announce("mn1", COLLATERAL_WIF, &chain, NOW)
        .expect("sign");
    let hash = hash256_to_hex(&announce.get_hash());

    let rejected = [
        json!({"error": "server busy"}),
        json!({"result": {"00": {"00": "successful"}}}),
        json!({"result": {hash.clone(): {"errorMessage": "Invalid signature"}}}),
        json!({"result": {hash.clone(): {"errorMessage": ""}}}),
    ];
    for response in &rejected {
        assert!(matches!(
            manager.on_broadcast_response("mn1", response),
            Err(MasternodeError::Rejected(_))
        ));
    }
    assert!(matches!(
        manager.on_broadcast_response("mn1", &rejected[2]),
        Err(MasternodeError::Rejected(reason)) if reason == "Invalid signature"
    ));
    assert!(!manager.get("mn1").expect("mn1").announced);

    let accepted = json!({"result": {hash.clone(): {hash.clone(): "successful"}}});
    manager
        .on_broadcast_response("mn1", &accepted)
        .expect("accepted");
    assert!(manager.get("mn1").expect("mn1").announced);

    // Announced but not yet seen by the network: re-signing is still allowed.
    manager.check_can_sign("mn1", 16).expect("not active yet");

    let collateral = announce.get_collateral_str();
    let updated = manager
        .on_status_response(&json!([
            {"vin": collateral, "status": "ENABLED"},
            {"vin": format!("{OTHER_TXID}-0"), "status": "ENABLED"},
            {"status": "MISSING"},
        ]))
        .expect("statuses");
    assert_eq!(updated, 1);
    assert_eq!(manager.status("mn1"), Some("ENABLED"));
    assert!(matches!(
        manager.check_can_sign("mn1", 16),
        Err(MasternodeError::NotReady(reason)) if reason.contains("already been activated")
    ));

    let reopened = open_manager(&store);
    assert_eq!(reopened.status("mn1"), Some("ENABLED"));
    assert!(reopened.get("mn1").expect("mn1").announced);

    // Collateral details are frozen once announced.
    manager
        .set_collateral("mn1", vec![2; 33], COIN, 1)
        .expect("ignored");
    assert_eq!(
        manager.get("mn1").expect("mn1").announce.collateral_key,
        hex_to_bytes(COLLATERAL_PUB).expect("pub")
    );
}
