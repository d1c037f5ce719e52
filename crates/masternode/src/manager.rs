//! Locally configured masternodes: persistence, signing and broadcast bookkeeping.

use std::collections::BTreeMap;

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use spv_chainstate::{Blockchain, ChainError};
use spv_consensus::constants::{
    COIN, MASTERNODE_COLLATERAL, MASTERNODE_MIN_CONFIRMATIONS, MASTERNODE_PING_DEPTH,
};
use spv_consensus::{bytes_to_hex, hash256_from_hex, hash256_to_hex, hex_to_bytes, ChainParams};
use spv_log::{log_info, log_warn};
use spv_primitives::{NetworkAddress, OutPoint, TxIn};
use spv_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::announce::MasternodeAnnounce;
use crate::conf::MasternodeConfLine;
use crate::error::MasternodeError;
use crate::keys::SigningKey;
use crate::ping::MasternodePing;

const ACTIVE_STATUSES: [&str; 2] = ["PRE_ENABLED", "ENABLED"];

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Masternode {
    pub alias: String,
    pub announce: MasternodeAnnounce,
    /// WIF of the masternode (delegate) key that signs pings.
    pub private_key: Option<String>,
    /// Value in base units of the collateral output.
    pub collateral_value: Option<i64>,
    /// Height of the transaction that created the collateral output.
    pub collateral_height: Option<i32>,
    pub announced: bool,
}

/// Unspent wallet output offered as masternode collateral.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SpendableOutput {
    pub outpoint: OutPoint,
    pub value: i64,
}

impl Masternode {
    pub fn new(alias: impl Into<String>, announce: MasternodeAnnounce) -> Self {
        Self {
            alias: alias.into(),
            announce,
            private_key: None,
            collateral_value: None,
            collateral_height: None,
            announced: false,
        }
    }

    fn to_stored(&self) -> StoredMasternode {
        let announce = &self.announce;
        StoredMasternode {
            alias: self.alias.clone(),
            prevout_hash: hash256_to_hex(&announce.vin.prevout.hash),
            prevout_n: announce.vin.prevout.index,
            script_sig: bytes_to_hex(&announce.vin.script_sig),
            sequence: announce.vin.sequence,
            addr: announce.addr.to_string(),
            collateral_key: bytes_to_hex(&announce.collateral_key),
            masternode_pubkey: bytes_to_hex(&announce.masternode_pubkey),
            sig: base64_encode(&announce.sig),
            sig_time: announce.sig_time,
            protocol_version: announce.protocol_version,
            last_ping: StoredPing {
                block_hash: hash256_to_hex(&announce.last_ping.block_hash),
                sig: base64_encode(&announce.last_ping.sig),
                sig_time: announce.last_ping.sig_time,
            },
            last_dsq: announce.last_dsq,
            announced: self.announced,
            private_key: self.private_key.clone(),
            collateral_value: self.collateral_value,
            collateral_height: self.collateral_height,
        }
    }

    fn from_stored(stored: StoredMasternode) -> Result<Self, MasternodeError> {
        let alias = stored.alias;
        let corrupt = |field: &str| {
            MasternodeError::Store(StoreError::Backend(format!(
                "invalid {field} in stored masternode {alias}"
            )))
        };
        let vin = TxIn {
            prevout: OutPoint {
                hash: hash256_from_hex(&stored.prevout_hash).map_err(|_| corrupt("prevout_hash"))?,
                index: stored.prevout_n,
            },
            script_sig: hex_to_bytes(&stored.script_sig).map_err(|_| corrupt("script_sig"))?,
            sequence: stored.sequence,
        };
        let last_ping = MasternodePing {
            vin: vin.clone(),
            block_hash: hash256_from_hex(&stored.last_ping.block_hash)
                .map_err(|_| corrupt("last_ping.block_hash"))?,
            sig_time: stored.last_ping.sig_time,
            sig: base64_decode(&stored.last_ping.sig).ok_or_else(|| corrupt("last_ping.sig"))?,
        };
        let announce = MasternodeAnnounce {
            vin,
            addr: stored
                .addr
                .parse::<NetworkAddress>()
                .map_err(|_| corrupt("addr"))?,
            collateral_key: hex_to_bytes(&stored.collateral_key)
                .map_err(|_| corrupt("collateral_key"))?,
            masternode_pubkey: hex_to_bytes(&stored.masternode_pubkey)
                .map_err(|_| corrupt("masternode_pubkey"))?,
            sig: base64_decode(&stored.sig).ok_or_else(|| corrupt("sig"))?,
            sig_time: stored.sig_time,
            protocol_version: stored.protocol_version,
            last_ping,
            last_dsq: stored.last_dsq,
        };
        Ok(Self {
            alias,
            announce,
            private_key: stored.private_key,
            collateral_value: stored.collateral_value,
            collateral_height: stored.collateral_height,
            announced: stored.announced,
        })
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct StoredMasternode {
    alias: String,
    prevout_hash: String,
    prevout_n: u32,
    script_sig: String,
    sequence: u32,
    addr: String,
    collateral_key: String,
    masternode_pubkey: String,
    sig: String,
    sig_time: i64,
    protocol_version: i32,
    last_ping: StoredPing,
    last_dsq: i64,
    announced: bool,
    private_key: Option<String>,
    #[serde(default)]
    collateral_value: Option<i64>,
    collateral_height: Option<i32>,
}

#[derive(Debug, Deserialize, Serialize)]
struct StoredPing {
    block_hash: String,
    sig: String,
    sig_time: i64,
}

fn base64_encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn base64_decode(raw: &str) -> Option<Vec<u8>> {
    base64::engine::general_purpose::STANDARD.decode(raw).ok()
}

/// Confirmations of a transaction mined at `tx_height`; zero while unconfirmed.
pub fn confirmations(chain: &Blockchain, tx_height: i32) -> Result<i32, ChainError> {
    if tx_height <= 0 {
        return Ok(0);
    }
    Ok((chain.height()? - tx_height + 1).max(0))
}

pub struct MasternodeManager<S> {
    store: S,
    params: ChainParams,
    masternodes: Vec<Masternode>,
    statuses: BTreeMap<String, String>,
}

impl<S: KeyValueStore> MasternodeManager<S> {
    pub fn open(store: S, params: ChainParams) -> Result<Self, MasternodeError> {
        let mut masternodes = Vec::new();
        for (key, value) in store.scan_prefix(Column::Masternode, b"")? {
            let stored: StoredMasternode = serde_json::from_slice(&value).map_err(|err| {
                StoreError::Backend(format!(
                    "invalid masternode record {}: {err}",
                    String::from_utf8_lossy(&key)
                ))
            })?;
            masternodes.push(Masternode::from_stored(stored)?);
        }
        let mut statuses = BTreeMap::new();
        for (key, value) in store.scan_prefix(Column::MasternodeStatus, b"")? {
            statuses.insert(
                String::from_utf8_lossy(&key).into_owned(),
                String::from_utf8_lossy(&value).into_owned(),
            );
        }
        Ok(Self {
            store,
            params,
            masternodes,
            statuses,
        })
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn masternodes(&self) -> &[Masternode] {
        &self.masternodes
    }

    pub fn get(&self, alias: &str) -> Option<&Masternode> {
        self.masternodes.iter().find(|mn| mn.alias == alias)
    }

    fn get_mut(&mut self, alias: &str) -> Result<&mut Masternode, MasternodeError> {
        self.masternodes
            .iter_mut()
            .find(|mn| mn.alias == alias)
            .ok_or_else(|| MasternodeError::NotFound(alias.to_string()))
    }

    fn require(&self, alias: &str) -> Result<&Masternode, MasternodeError> {
        self.get(alias)
            .ok_or_else(|| MasternodeError::NotFound(alias.to_string()))
    }

    /// Last status the network reported for the masternode's collateral.
    pub fn status(&self, alias: &str) -> Option<&str> {
        let collateral = self.get(alias)?.announce.get_collateral_str();
        self.statuses.get(&collateral).map(String::as_str)
    }

    fn put_record(batch: &mut WriteBatch, mn: &Masternode) -> Result<(), MasternodeError> {
        let value = serde_json::to_vec(&mn.to_stored())
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        batch.put(Column::Masternode, mn.alias.as_bytes(), value);
        Ok(())
    }

    fn persist(&self, alias: &str) -> Result<(), MasternodeError> {
        let mn = self.require(alias)?;
        let mut batch = WriteBatch::new();
        Self::put_record(&mut batch, mn)?;
        self.store.write_batch(&batch)?;
        Ok(())
    }

    pub fn add(&mut self, mn: Masternode) -> Result<(), MasternodeError> {
        if self.get(&mn.alias).is_some() {
            return Err(MasternodeError::AlreadyExists(mn.alias));
        }
        let mut batch = WriteBatch::new();
        Self::put_record(&mut batch, &mn)?;
        self.store.write_batch(&batch)?;
        self.masternodes.push(mn);
        Ok(())
    }

    pub fn remove(&mut self, alias: &str) -> Result<Masternode, MasternodeError> {
        let index = self
            .masternodes
            .iter()
            .position(|mn| mn.alias == alias)
            .ok_or_else(|| MasternodeError::NotFound(alias.to_string()))?;
        self.store.delete(Column::Masternode, alias.as_bytes())?;
        Ok(self.masternodes.remove(index))
    }

    /// Records the collateral output's public key, value and confirmation height.
    pub fn set_collateral(
        &mut self,
        alias: &str,
        collateral_key: Vec<u8>,
        value: i64,
        tx_height: i32,
    ) -> Result<(), MasternodeError> {
        let mn = self.get_mut(alias)?;
        if mn.announced {
            return Ok(());
        }
        mn.announce.collateral_key = collateral_key;
        mn.collateral_value = Some(value);
        mn.collateral_height = Some(tx_height);
        self.persist(alias)
    }

    /// Outputs worth exactly the collateral amount that no configured masternode uses.
    pub fn masternode_outputs(
        &self,
        coins: impl IntoIterator<Item = SpendableOutput>,
    ) -> Vec<SpendableOutput> {
        coins
            .into_iter()
            .filter(|coin| coin.value == MASTERNODE_COLLATERAL)
            .filter(|coin| {
                !self
                    .masternodes
                    .iter()
                    .any(|mn| mn.announce.vin.prevout == coin.outpoint)
            })
            .collect()
    }

    /// Adds every line whose alias and collateral are not configured yet; returns how many.
    pub fn import_conf_lines(
        &mut self,
        lines: &[MasternodeConfLine],
    ) -> Result<usize, MasternodeError> {
        let mut batch = WriteBatch::new();
        let mut imported = Vec::new();
        for line in lines {
            let prevout = OutPoint {
                hash: line.txid,
                index: line.output_index,
            };
            let collides = self
                .masternodes
                .iter()
                .chain(imported.iter())
                .any(|mn: &Masternode| mn.alias == line.alias || mn.announce.vin.prevout == prevout);
            if collides {
                continue;
            }

            let delegate = SigningKey::from_wif(&line.wif, &self.params)?;
            let vin = TxIn::new(prevout);
            let ping = MasternodePing::new(vin.clone(), [0u8; 32]);
            let announce = MasternodeAnnounce::new(
                vin,
                line.addr,
                Vec::new(),
                delegate.pubkey().to_vec(),
                ping,
            );
            let mut mn = Masternode::new(line.alias.clone(), announce);
            mn.private_key = Some(line.wif.clone());
            Self::put_record(&mut batch, &mn)?;
            imported.push(mn);
        }
        if !batch.is_empty() {
            self.store.write_batch(&batch)?;
        }
        let count = imported.len();
        self.masternodes.extend(imported);
        log_info!("Imported {} masternode(s) from configuration", count);
        Ok(count)
    }

    /// Fails with the first reason `alias` cannot be announced yet.
    pub fn check_can_sign(&self, alias: &str, confirmations: i32) -> Result<(), MasternodeError> {
        let mn = self.require(alias)?;
        let announce = &mn.announce;
        if announce.vin.prevout.hash == [0u8; 32] {
            return Err(MasternodeError::NotReady(
                "Collateral payment is not specified".to_string(),
            ));
        }
        if announce.collateral_key.is_empty() {
            return Err(MasternodeError::NotReady(
                "Collateral key is not specified".to_string(),
            ));
        }
        if mn.private_key.is_none() {
            return Err(MasternodeError::NotReady(
                "Masternode private key is not specified".to_string(),
            ));
        }
        if announce.addr.ip.is_unspecified() {
            return Err(MasternodeError::NotReady(
                "Masternode has no IP address".to_string(),
            ));
        }
        if confirmations < MASTERNODE_MIN_CONFIRMATIONS {
            return Err(MasternodeError::NotReady(format!(
                "Collateral payment must have at least {MASTERNODE_MIN_CONFIRMATIONS} confirmations (current: {confirmations})"
            )));
        }
        if mn.collateral_value != Some(MASTERNODE_COLLATERAL) {
            return Err(MasternodeError::NotReady(format!(
                "Masternode requires a collateral {} coin output.",
                MASTERNODE_COLLATERAL / COIN
            )));
        }
        if mn.announced {
            let status = self.statuses.get(&announce.get_collateral_str());
            if status.is_some_and(|status| ACTIVE_STATUSES.contains(&status.as_str())) {
                return Err(MasternodeError::NotReady(
                    "Masternode has already been activated".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Refreshes the ping against `chain` and signs both records at time `now`.
    pub fn sign_announce(
        &mut self,
        alias: &str,
        collateral_wif: &str,
        chain: &Blockchain,
        now: i64,
    ) -> Result<MasternodeAnnounce, MasternodeError> {
        let mn = self.require(alias)?;
        let confirmations = confirmations(chain, mn.collateral_height.unwrap_or(0))?;
        self.check_can_sign(alias, confirmations)?;

        let ping_height = chain.height()? - MASTERNODE_PING_DEPTH;
        let header = chain.read_header(ping_height)?.ok_or_else(|| {
            MasternodeError::NotReady(format!("missing header at height {ping_height}"))
        })?;
        let delegate_wif = mn.private_key.as_deref().ok_or_else(|| {
            MasternodeError::NotReady("Masternode private key is not specified".to_string())
        })?;
        let delegate = SigningKey::from_wif(delegate_wif, &self.params)?;
        let collateral = SigningKey::from_wif(collateral_wif, &self.params)?;

        let mut announce = mn.announce.clone();
        announce.masternode_pubkey = delegate.pubkey().to_vec();
        announce.last_ping.vin = announce.vin.clone();
        announce.last_ping.block_hash = header.hash();
        announce.last_ping.sign(&delegate, now)?;
        announce.sign(&collateral, now)?;

        self.get_mut(alias)?.announce = announce.clone();
        self.persist(alias)?;
        log_info!(
            "Signed announce for masternode {} (ping block {})",
            alias,
            hash256_to_hex(&announce.last_ping.block_hash)
        );
        Ok(announce)
    }

    pub fn broadcast_payload(&self, alias: &str) -> Result<String, MasternodeError> {
        Ok(self.require(alias)?.announce.to_broadcast_hex())
    }

    /// Interprets the server's answer to a broadcast of `alias`.
    pub fn on_broadcast_response(
        &mut self,
        alias: &str,
        response: &Value,
    ) -> Result<(), MasternodeError> {
        if let Some(err) = response.get("error").filter(|err| !err.is_null()) {
            return Err(MasternodeError::Rejected(format!("Error response: {err}")));
        }
        let hash = hash256_to_hex(&self.require(alias)?.announce.get_hash());
        let result = response.get("result").unwrap_or(&Value::Null);
        let Some(entry) = result.get(&hash) else {
            return Err(MasternodeError::Rejected(format!(
                "No result for expected masternode hash. Got {result}"
            )));
        };
        if let Some(message) = entry
            .get("errorMessage")
            .and_then(Value::as_str)
            .filter(|message| !message.is_empty())
        {
            return Err(MasternodeError::Rejected(message.to_string()));
        }
        if entry.get(&hash).and_then(Value::as_str) != Some("successful") {
            return Err(MasternodeError::Rejected(
                "no error message specified".to_string(),
            ));
        }

        self.get_mut(alias)?.announced = true;
        self.persist(alias)?;
        log_info!("Masternode {} announced as {}", alias, hash);
        Ok(())
    }

    /// Records statuses from a masternode list answer; returns how many were updated.
    pub fn on_status_response(&mut self, response: &Value) -> Result<usize, MasternodeError> {
        let Some(entries) = response.as_array() else {
            log_warn!("Ignoring masternode status response that is not a list");
            return Ok(0);
        };
        let mut batch = WriteBatch::new();
        let mut updates = Vec::new();
        for entry in entries {
            let Some(collateral) = entry.get("vin").and_then(Value::as_str) else {
                continue;
            };
            let known = self
                .masternodes
                .iter()
                .any(|mn| mn.announce.get_collateral_str() == collateral);
            if !known {
                continue;
            }
            let status = entry
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            batch.put(
                Column::MasternodeStatus,
                collateral.as_bytes(),
                status.as_bytes(),
            );
            updates.push((collateral.to_string(), status));
        }
        if !batch.is_empty() {
            self.store.write_batch(&batch)?;
        }
        let count = updates.len();
        self.statuses.extend(updates);
        Ok(count)
    }
}
