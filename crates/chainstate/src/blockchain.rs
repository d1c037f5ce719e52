//! Chain segments: header queries, fork creation, and best-chain swaps.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use spv_consensus::constants::{CHUNK_SIZE, HEADER_SIZE};
use spv_consensus::{hash256_to_hex, Hash256};
use spv_log::{log_info, log_trace, log_warn};
use spv_pow::check_proof_of_work;
use spv_primitives::sha256d;

use crate::error::ChainError;
use crate::header::{deserialize_header, ChainHeader};
use crate::registry::{ChainRegistry, RegistryInner, Segment, SegmentId};
use crate::store::SwapFiles;

impl RegistryInner {
    pub(crate) fn read_header(
        &self,
        id: SegmentId,
        height: i32,
    ) -> Result<Option<ChainHeader>, ChainError> {
        let segment = self.segment(id)?;
        if height < 0 {
            return Ok(None);
        }
        if height < segment.forkpoint {
            return match segment.parent {
                Some(parent) => self.read_header(parent, height),
                None => Ok(None),
            };
        }
        if height > segment.height() {
            return Ok(None);
        }
        let path = self.path_of(segment);
        let Some(bytes) = self
            .store
            .read_header_bytes(&path, height - segment.forkpoint)?
        else {
            return Ok(None);
        };
        if bytes == [0u8; HEADER_SIZE] {
            return Ok(None);
        }
        Ok(Some(deserialize_header(&bytes, height)?))
    }

    pub(crate) fn get_hash(&self, id: SegmentId, height: i32) -> Result<Hash256, ChainError> {
        if height == -1 {
            return Ok([0u8; 32]);
        }
        if height == 0 {
            return Ok(self.genesis_hash);
        }
        if let Some(checkpoint) = self.params.checkpoint_at(height) {
            return Ok(checkpoint.hash);
        }
        match self.read_header(id, height)? {
            Some(header) => Ok(header.hash()),
            None => Err(ChainError::MissingHeader(height)),
        }
    }

    pub(crate) fn check_hash(&self, id: SegmentId, height: i32, hash: &Hash256) -> bool {
        matches!(self.get_hash(id, height), Ok(found) if &found == hash)
    }

    /// Full connection check; `Ok` means `header` may be stored at its height.
    pub(crate) fn check_connect(
        &self,
        id: SegmentId,
        header: &ChainHeader,
        check_height: bool,
    ) -> Result<(), ChainError> {
        let height = header.height;
        let hash = header.hash();
        if check_height && height != self.segment(id)?.height() + 1 {
            return Err(ChainError::CannotConnect { height });
        }
        if height == 0 {
            return if hash == self.genesis_hash {
                Ok(())
            } else {
                Err(ChainError::CannotConnect { height })
            };
        }
        let prev = match self.get_hash(id, height - 1) {
            Ok(prev) => prev,
            Err(ChainError::MissingHeader(_)) => return Err(ChainError::CannotConnect { height }),
            Err(err) => return Err(err),
        };
        if &prev != header.prev_hash() {
            return Err(ChainError::CannotConnect { height });
        }
        if let Some(checkpoint) = self.params.checkpoint_at(height) {
            if checkpoint.hash != hash {
                return Err(ChainError::CannotConnect { height });
            }
        }
        check_proof_of_work(&hash, header.header.bits, &self.params.pow_limit)
            .map_err(|err| ChainError::from_pow(err, height))
    }

    pub(crate) fn save_header(
        &mut self,
        id: SegmentId,
        header: &ChainHeader,
    ) -> Result<(), ChainError> {
        let segment = self.segment(id)?;
        let delta = header.height - segment.forkpoint;
        if delta != segment.size {
            return Err(ChainError::NonContiguousWrite {
                expected: segment.forkpoint + segment.size,
                got: header.height,
            });
        }
        self.check_connect(id, header, true)?;
        let path = self.path_of(segment);
        self.store
            .write_at(&path, delta, &header.serialize(), true)?;
        self.segment_mut(id)?.size = delta + 1;
        log_trace!("Saved header {} at height {}", hash256_to_hex(&header.hash()), header.height);
        self.promote(id, header.height)
    }

    /// Runs swap evaluation for a segment whose headers are already on disk.
    fn promote(&mut self, id: SegmentId, height: i32) -> Result<(), ChainError> {
        self.swap_with_parent(id)
            .map_err(|err| ChainError::PromotionFailed {
                height,
                source: Box::new(err),
            })
    }

    /// Segment whose own file stores `height`, walking up from `id`.
    pub(crate) fn owner_of(&self, id: SegmentId, height: i32) -> Result<SegmentId, ChainError> {
        let mut current = id;
        loop {
            let segment = self.segment(current)?;
            match segment.parent {
                Some(parent) if height < segment.forkpoint => current = parent,
                _ => return Ok(current),
            }
        }
    }

    /// Starts a segment at `header`, attached to the segment that stores its predecessor.
    pub(crate) fn fork(
        &mut self,
        from: SegmentId,
        header: &ChainHeader,
    ) -> Result<SegmentId, ChainError> {
        let forkpoint = header.height;
        if forkpoint <= self.params.max_checkpoint() {
            return Err(ChainError::ForkBelowCheckpoint { height: forkpoint });
        }
        let parent = self.owner_of(from, forkpoint - 1)?;
        if forkpoint == self.segment(parent)?.height() + 1 {
            return Err(ChainError::ForkAtTip { height: forkpoint });
        }
        let hash = header.hash();
        if self.check_hash(from, forkpoint, &hash)
            || self.check_hash(parent, forkpoint, &hash)
            || self.by_hash.contains_key(&hash)
        {
            return Err(ChainError::DuplicateFork(hash));
        }
        self.check_connect(parent, header, false)?;
        let prev_hash = self.get_hash(parent, forkpoint - 1)?;

        let segment = Segment {
            forkpoint,
            forkpoint_hash: hash,
            prev_hash,
            parent: Some(parent),
            size: 0,
        };
        let path = self.path_of(&segment);
        if let Err(err) = self.store.write_at(&path, 0, &header.serialize(), true) {
            let _ = self.store.remove(&path);
            return Err(err.into());
        }
        let id = self.insert_segment(Segment { size: 1, ..segment });
        log_info!(
            "Created fork {} at height {} off chain {}",
            hash256_to_hex(&hash),
            forkpoint,
            parent
        );
        self.promote(id, forkpoint)?;
        Ok(id)
    }

    /// Verifies and stores one retargeting chunk; `Ok(false)` when verification fails.
    pub(crate) fn connect_chunk(
        &mut self,
        id: SegmentId,
        index: i32,
        data: &[u8],
    ) -> Result<bool, ChainError> {
        if data.is_empty()
            || data.len() % HEADER_SIZE != 0
            || data.len() / HEADER_SIZE > CHUNK_SIZE as usize
            || index < 0
        {
            log_warn!("Rejected chunk {}: {} bytes", index, data.len());
            return Ok(false);
        }
        let count = (data.len() / HEADER_SIZE) as i32;
        let Some((start, end)) = index
            .checked_mul(CHUNK_SIZE)
            .and_then(|start| Some((start, start.checked_add(count)?)))
        else {
            log_warn!("Rejected chunk {}: index out of range", index);
            return Ok(false);
        };
        let mut prev = match self.get_hash(id, start - 1) {
            Ok(prev) => prev,
            Err(ChainError::MissingHeader(_)) => {
                log_warn!("Rejected chunk {}: previous header missing", index);
                return Ok(false);
            }
            Err(err) => return Err(err),
        };

        let tip = self.segment(id)?.height();
        for (offset, raw) in data.chunks_exact(HEADER_SIZE).enumerate() {
            let height = start + offset as i32;
            let header = deserialize_header(raw, height)?;
            let hash = header.hash();
            let valid = if height == 0 {
                hash == self.genesis_hash
            } else {
                &prev == header.prev_hash()
                    && self
                        .params
                        .checkpoint_at(height)
                        .map_or(true, |checkpoint| checkpoint.hash == hash)
                    && check_proof_of_work(&hash, header.header.bits, &self.params.pow_limit)
                        .is_ok()
            };
            if !valid {
                log_warn!("Rejected chunk {}: header at height {} does not verify", index, height);
                return Ok(false);
            }
            if height <= tip {
                if let Some(existing) = self.read_header(id, height)? {
                    if existing.hash() != hash {
                        log_warn!("Rejected chunk {}: conflicts at height {}", index, height);
                        return Ok(false);
                    }
                }
            }
            prev = hash;
        }

        let segment = self.segment(id)?;
        let write_from = start.max(segment.forkpoint);
        if write_from - segment.forkpoint > segment.size {
            return Ok(false);
        }
        if write_from < end {
            let skip = (write_from - start) as usize * HEADER_SIZE;
            let path = self.path_of(segment);
            self.store
                .write_at(&path, write_from - segment.forkpoint, &data[skip..], false)?;
            let segment = self.segment_mut(id)?;
            segment.size = segment.size.max(end - segment.forkpoint);
        }
        self.promote(id, end - 1)?;
        Ok(true)
    }

    pub(crate) fn direct_children(&self, id: SegmentId) -> Vec<SegmentId> {
        self.segments
            .iter()
            .filter(|(_, segment)| segment.parent == Some(id))
            .map(|(child, _)| *child)
            .collect()
    }

    /// Promotes `id` over its ancestors for as long as it is the taller chain.
    pub(crate) fn swap_with_parent(&mut self, id: SegmentId) -> Result<(), ChainError> {
        let limit = self.segments.len();
        let mut swaps = 0usize;
        loop {
            let Some(old_parent) = self.segment(id)?.parent else {
                break;
            };
            if !self.swap_once(id)? {
                break;
            }
            swaps += 1;
            if swaps > limit {
                return Err(ChainError::SwapLimitExceeded);
            }
            for sibling in self.direct_children(old_parent) {
                let (forkpoint, prev_hash) = {
                    let segment = self.segment(sibling)?;
                    (segment.forkpoint, segment.prev_hash)
                };
                if self.check_hash(id, forkpoint - 1, &prev_hash) {
                    self.segment_mut(sibling)?.parent = Some(id);
                }
            }
        }
        Ok(())
    }

    fn swap_once(&mut self, id: SegmentId) -> Result<bool, ChainError> {
        let child = self.segment(id)?.clone();
        let Some(parent_id) = child.parent else {
            return Ok(false);
        };
        let parent = self.segment(parent_id)?.clone();
        if parent.height() >= child.height() {
            return Ok(false);
        }
        let branch = parent.height() - child.forkpoint + 1;
        if branch <= 0 {
            return Ok(false);
        }

        let child_path = self.path_of(&child);
        let parent_path = self.path_of(&parent);
        let parent_offset = child.forkpoint - parent.forkpoint;
        if parent_offset <= 0 {
            log_warn!(
                "Chain {} starts at or below its parent {}; not swapping",
                id,
                parent_id
            );
            return Ok(false);
        }
        let child_data = self.store.read_range(&child_path, 0, child.size)?;
        let parent_tail = self.store.read_range(&parent_path, parent_offset, branch)?;
        if child_data.len() != child.size as usize * HEADER_SIZE {
            return Err(ChainError::MissingHeader(child.height()));
        }
        if parent_tail.len() != branch as usize * HEADER_SIZE {
            return Err(ChainError::MissingHeader(parent.height()));
        }

        let demoted_hash = sha256d(&parent_tail[..HEADER_SIZE]);
        let demoted = Segment {
            forkpoint: child.forkpoint,
            forkpoint_hash: demoted_hash,
            prev_hash: child.prev_hash,
            parent: Some(id),
            size: branch,
        };
        let promoted = Segment {
            forkpoint: parent.forkpoint,
            forkpoint_hash: parent.forkpoint_hash,
            prev_hash: parent.prev_hash,
            parent: parent.parent,
            size: parent_offset + child.size,
        };
        let demoted_path = self.path_of(&demoted);

        self.store.swap_files(&SwapFiles {
            child_path,
            parent_path,
            demoted_path,
            parent_offset,
            parent_tail,
            child_data,
        })?;

        self.by_hash.remove(&child.forkpoint_hash);
        self.by_hash.insert(promoted.forkpoint_hash, id);
        self.by_hash.insert(demoted_hash, parent_id);
        if promoted.parent.is_none() {
            self.best = id;
        }
        self.segments.insert(id, promoted);
        self.segments.insert(parent_id, demoted);
        log_info!(
            "Chain {} overtook chain {} at height {}",
            id,
            parent_id,
            child.forkpoint
        );
        Ok(true)
    }

    pub(crate) fn parent_heights(&self, id: SegmentId) -> Result<BTreeMap<SegmentId, i32>, ChainError> {
        let mut heights = BTreeMap::new();
        heights.insert(id, self.segment(id)?.height());
        let mut current = id;
        while let Some(parent) = self.segment(current)?.parent {
            heights.insert(parent, self.segment(current)?.forkpoint - 1);
            current = parent;
        }
        Ok(heights)
    }

    /// Drops a fork and everything forked from it.
    pub(crate) fn unregister(&mut self, id: SegmentId) -> Result<(), ChainError> {
        if self.segment(id)?.parent.is_none() {
            return Err(ChainError::BestChainRemoval);
        }
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            pending.extend(self.direct_children(current));
            let path = self.path(current)?;
            self.store.remove(&path)?;
            self.remove_segment(current);
            log_info!("Removed chain {}", current);
        }
        Ok(())
    }
}

/// Handle to one chain segment inside a `ChainRegistry`.
///
/// Handles stay valid across swaps: a swap exchanges the segments' files and
/// forkpoints but never their ids.
#[derive(Clone)]
pub struct Blockchain {
    registry: Arc<ChainRegistry>,
    id: SegmentId,
}

impl Blockchain {
    pub(crate) fn new(registry: Arc<ChainRegistry>, id: SegmentId) -> Self {
        Self { registry, id }
    }

    fn handle(&self, id: SegmentId) -> Blockchain {
        Blockchain::new(Arc::clone(&self.registry), id)
    }

    fn segment(&self) -> Result<Segment, ChainError> {
        self.registry.read().segment(self.id).cloned()
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn registry(&self) -> &Arc<ChainRegistry> {
        &self.registry
    }

    pub fn forkpoint(&self) -> Result<i32, ChainError> {
        Ok(self.segment()?.forkpoint)
    }

    pub fn forkpoint_hash(&self) -> Result<Hash256, ChainError> {
        Ok(self.segment()?.forkpoint_hash)
    }

    /// Hash of the header before the forkpoint; `None` for the chain rooted at genesis.
    pub fn prev_hash(&self) -> Result<Option<Hash256>, ChainError> {
        let segment = self.segment()?;
        Ok((segment.forkpoint > 0).then_some(segment.prev_hash))
    }

    pub fn parent(&self) -> Result<Option<Blockchain>, ChainError> {
        Ok(self.segment()?.parent.map(|parent| self.handle(parent)))
    }

    pub fn size(&self) -> Result<i32, ChainError> {
        Ok(self.segment()?.size)
    }

    pub fn height(&self) -> Result<i32, ChainError> {
        Ok(self.segment()?.height())
    }

    pub fn is_best(&self) -> Result<bool, ChainError> {
        Ok(self.segment()?.parent.is_none())
    }

    pub fn path(&self) -> Result<PathBuf, ChainError> {
        self.registry.read().path(self.id)
    }

    pub fn read_header(&self, height: i32) -> Result<Option<ChainHeader>, ChainError> {
        self.registry.read().read_header(self.id, height)
    }

    pub fn header_at_tip(&self) -> Result<Option<ChainHeader>, ChainError> {
        let inner = self.registry.read();
        let height = inner.segment(self.id)?.height();
        inner.read_header(self.id, height)
    }

    pub fn get_hash(&self, height: i32) -> Result<Hash256, ChainError> {
        self.registry.read().get_hash(self.id, height)
    }

    pub fn check_hash(&self, height: i32, hash: &Hash256) -> bool {
        self.registry.read().check_hash(self.id, height, hash)
    }

    pub fn check_header(&self, header: &ChainHeader) -> bool {
        self.check_hash(header.height, &header.hash())
    }

    /// Like `can_connect`, but reports why the header was refused.
    pub fn check_connect(&self, header: &ChainHeader, check_height: bool) -> Result<(), ChainError> {
        self.registry
            .read()
            .check_connect(self.id, header, check_height)
    }

    pub fn can_connect(&self, header: &ChainHeader, check_height: bool) -> bool {
        self.check_connect(header, check_height).is_ok()
    }

    /// Appends `header` at the tip, then promotes this chain if it became the tallest.
    pub fn save_header(&self, header: &ChainHeader) -> Result<(), ChainError> {
        self.registry.write().save_header(self.id, header)
    }

    /// Starts a new chain at `header`, which must connect below this chain's tip.
    pub fn fork(&self, header: &ChainHeader) -> Result<Blockchain, ChainError> {
        let id = self.registry.write().fork(self.id, header)?;
        Ok(self.handle(id))
    }

    pub fn connect_chunk(&self, index: i32, data: &[u8]) -> Result<bool, ChainError> {
        self.registry.write().connect_chunk(self.id, index, data)
    }

    pub fn swap_with_parent(&self) -> Result<(), ChainError> {
        self.registry.write().swap_with_parent(self.id)
    }

    /// For this chain and each ancestor, the highest height it shares with this chain.
    pub fn get_parent_heights(&self) -> Result<BTreeMap<SegmentId, i32>, ChainError> {
        self.registry.read().parent_heights(self.id)
    }

    pub fn get_height_of_last_common_block_with_chain(
        &self,
        other: &Blockchain,
    ) -> Result<i32, ChainError> {
        let (ours, theirs) = {
            let inner = self.registry.read();
            (inner.parent_heights(self.id)?, inner.parent_heights(other.id)?)
        };
        Ok(ours
            .iter()
            .filter_map(|(id, height)| theirs.get(id).map(|other| (*height).min(*other)))
            .max()
            .unwrap_or(0))
    }

    pub fn get_direct_children(&self) -> Vec<Blockchain> {
        let children = self.registry.read().direct_children(self.id);
        children.into_iter().map(|id| self.handle(id)).collect()
    }

    pub fn get_max_forkpoint(&self) -> Result<i32, ChainError> {
        let inner = self.registry.read();
        let own = inner.segment(self.id)?.forkpoint;
        let children = inner.direct_children(self.id);
        let mut max = None;
        for child in children {
            let forkpoint = inner.segment(child)?.forkpoint;
            max = Some(max.map_or(forkpoint, |current: i32| current.max(forkpoint)));
        }
        Ok(max.unwrap_or(own))
    }

    pub fn get_branch_size(&self) -> Result<i32, ChainError> {
        Ok(self.height()? - self.get_max_forkpoint()? + 1)
    }

    /// Short display name: the leading significant hex digits of the hash at the max forkpoint.
    pub fn get_name(&self) -> Result<String, ChainError> {
        let hash = self.get_hash(self.get_max_forkpoint()?)?;
        let hex = hash256_to_hex(&hash);
        Ok(hex.trim_start_matches('0').chars().take(10).collect())
    }

    /// Fork-choice weight up to `height` (the tip when `None`).
    pub fn get_chainwork(&self, height: Option<i32>) -> Result<i32, ChainError> {
        let tip = self.height()?;
        let height = height.unwrap_or(tip);
        if height > tip {
            return Err(ChainError::MissingHeader(height));
        }
        Ok(height)
    }

    /// Deletes this fork and its descendants, including their files.
    pub fn unregister(self) -> Result<(), ChainError> {
        self.registry.write().unregister(self.id)
    }
}

impl PartialEq for Blockchain {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.registry, &other.registry)
    }
}

impl Eq for Blockchain {}

impl fmt::Debug for Blockchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blockchain").field("id", &self.id).finish()
    }
}
