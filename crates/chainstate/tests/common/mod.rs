#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use spv_chainstate::{deserialize_header, Blockchain, ChainHeader, ChainRegistry};
use spv_consensus::params::{chain_params, ChainParams, Network};
use spv_consensus::Hash256;
use spv_pow::check_proof_of_work;
use spv_primitives::{sha256d, BlockHeader};

pub const REGTEST_BITS: u32 = 0x207f_ffff;

pub fn regtest() -> ChainParams {
    chain_params(Network::Regtest)
}

pub fn genesis() -> ChainHeader {
    deserialize_header(&regtest().genesis_header, 0).expect("genesis header")
}

/// Grinds the nonce until the header meets the regtest target.
pub fn mine(prev: &Hash256, height: i32, seed: u32) -> ChainHeader {
    let pow_limit = regtest().pow_limit;
    let mut header = BlockHeader {
        version: 4,
        prev_block: *prev,
        merkle_root: sha256d(&seed.to_le_bytes()),
        time: 1_600_000_000 + seed,
        bits: REGTEST_BITS,
        nonce: 0,
    };
    while check_proof_of_work(&header.hash(), header.bits, &pow_limit).is_err() {
        header.nonce += 1;
    }
    ChainHeader::new(header, height)
}

/// Mines `count` headers on top of `prev`.
pub fn mine_run(prev: &ChainHeader, count: usize, seed: u32) -> Vec<ChainHeader> {
    let mut out = Vec::with_capacity(count);
    let mut tip = prev.clone();
    for offset in 0..count {
        let next = mine(&tip.hash(), tip.height + 1, seed + offset as u32);
        out.push(next.clone());
        tip = next;
    }
    out
}

/// Lettered header tree:
///
/// ```text
/// A-B-C-D-E-F-O-P-Q-R-S-T-U      heights 0..12
///             \
///              G-H-I-J-K-L        heights 6..11
///                   \
///                    M-N-X-Y-Z    heights 9..13
/// ```
///
/// The topology matches the reference header tree, including the last common
/// heights 5 (U/L) and 8 (L/Z). Headers are mined here because the reference
/// fixtures link by a different header hash.
pub struct HeaderTree {
    headers: HashMap<char, ChainHeader>,
}

impl HeaderTree {
    pub fn new() -> Self {
        let mut headers = HashMap::new();
        headers.insert('A', genesis());
        let mut seed = 1u32;
        for (base, letters) in [('A', "BCDEF"), ('F', "OPQRSTU"), ('F', "GHIJKL"), ('I', "MNXYZ")] {
            let mut prev = headers[&base].clone();
            for letter in letters.chars() {
                let header = mine(&prev.hash(), prev.height + 1, seed);
                seed += 1;
                headers.insert(letter, header.clone());
                prev = header;
            }
        }
        Self { headers }
    }

    pub fn get(&self, letter: char) -> &ChainHeader {
        &self.headers[&letter]
    }

    pub fn hash(&self, letter: char) -> Hash256 {
        self.get(letter).hash()
    }
}

pub fn open_regtest(dir: &Path) -> Arc<ChainRegistry> {
    ChainRegistry::open_with_params(dir, regtest()).expect("open registry")
}

pub fn append(chain: &Blockchain, tree: &HeaderTree, letters: &str) {
    for letter in letters.chars() {
        chain
            .save_header(tree.get(letter))
            .unwrap_or_else(|err| panic!("save header {letter}: {err}"));
    }
}

pub fn file_len(chain: &Blockchain) -> u64 {
    std::fs::metadata(chain.path().expect("path"))
        .expect("metadata")
        .len()
}

pub fn fork_file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir.join("forks"))
        .expect("forks dir")
        .count()
}
