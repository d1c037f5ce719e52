//! `masternode.conf` lines: `alias ip:port masternode_wif collateral_txid output_index`.

use spv_consensus::{hash256_from_hex, ChainParams, Hash256};
use spv_primitives::NetworkAddress;

use crate::error::MasternodeError;
use crate::keys::SigningKey;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MasternodeConfLine {
    pub alias: String,
    pub addr: NetworkAddress,
    pub wif: String,
    pub txid: Hash256,
    pub output_index: u32,
}

pub fn parse_masternode_conf<I, S>(
    lines: I,
    params: &ChainParams,
) -> Result<Vec<MasternodeConfLine>, MasternodeError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = Vec::new();
    for line in lines {
        let line = line.as_ref().trim();
        if line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            continue;
        }
        let alias = fields[0];

        SigningKey::from_wif(fields[2], params).map_err(|_| {
            MasternodeError::Conf(format!("Invalid masternode private key of alias \"{alias}\""))
        })?;
        let addr = fields[1].parse::<NetworkAddress>().map_err(|_| {
            MasternodeError::Conf(format!("Invalid address of alias \"{alias}\": {}", fields[1]))
        })?;
        if fields[3].len() != 64 {
            return Err(MasternodeError::Conf(format!(
                "Transaction ID of alias \"{alias}\" must be 64 hex characters."
            )));
        }
        let txid = hash256_from_hex(fields[3]).map_err(|_| {
            MasternodeError::Conf(format!(
                "Transaction ID of alias \"{alias}\" must be 64 hex characters."
            ))
        })?;
        let output_index = fields[4].parse::<u32>().map_err(|_| {
            MasternodeError::Conf(format!(
                "Transaction output index of alias \"{alias}\" must be an integer."
            ))
        })?;

        out.push(MasternodeConfLine {
            alias: alias.to_string(),
            addr,
            wif: fields[2].to_string(),
            txid,
            output_index,
        });
    }
    Ok(out)
}
