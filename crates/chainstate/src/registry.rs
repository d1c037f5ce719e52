//! Process-wide set of chain segments backed by one headers directory.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use spv_consensus::constants::HEADER_SIZE;
use spv_consensus::{chain_params, hash256_to_hex, ChainParams, Hash256};
use spv_log::{log_debug, log_info, log_warn};
use spv_primitives::sha256d;

use crate::blockchain::Blockchain;
use crate::config::HeaderStoreConfig;
use crate::error::ChainError;
use crate::header::ChainHeader;
use crate::lock::{lock_headers_dir, DirLock};
use crate::store::{ChainStore, ForkFile};

/// Stable identity of a segment; survives swaps, unlike its forkpoint hash.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SegmentId(pub(crate) u64);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Segment {
    pub(crate) forkpoint: i32,
    pub(crate) forkpoint_hash: Hash256,
    /// All zeros for the segment rooted at genesis.
    pub(crate) prev_hash: Hash256,
    pub(crate) parent: Option<SegmentId>,
    pub(crate) size: i32,
}

impl Segment {
    pub(crate) fn height(&self) -> i32 {
        self.forkpoint + self.size - 1
    }
}

pub(crate) struct RegistryInner {
    pub(crate) params: ChainParams,
    pub(crate) store: ChainStore,
    pub(crate) genesis_hash: Hash256,
    pub(crate) segments: BTreeMap<SegmentId, Segment>,
    pub(crate) by_hash: HashMap<Hash256, SegmentId>,
    pub(crate) best: SegmentId,
    next_id: u64,
}

impl RegistryInner {
    pub(crate) fn segment(&self, id: SegmentId) -> Result<&Segment, ChainError> {
        self.segments.get(&id).ok_or(ChainError::UnknownChain(id))
    }

    pub(crate) fn segment_mut(&mut self, id: SegmentId) -> Result<&mut Segment, ChainError> {
        self.segments.get_mut(&id).ok_or(ChainError::UnknownChain(id))
    }

    pub(crate) fn path_of(&self, segment: &Segment) -> PathBuf {
        match segment.parent {
            None => self.store.main_path(),
            Some(_) => self.store.fork_path(
                segment.forkpoint,
                &segment.prev_hash,
                &segment.forkpoint_hash,
            ),
        }
    }

    pub(crate) fn path(&self, id: SegmentId) -> Result<PathBuf, ChainError> {
        Ok(self.path_of(self.segment(id)?))
    }

    pub(crate) fn insert_segment(&mut self, segment: Segment) -> SegmentId {
        let id = SegmentId(self.next_id);
        self.next_id += 1;
        self.by_hash.insert(segment.forkpoint_hash, id);
        self.segments.insert(id, segment);
        id
    }

    pub(crate) fn remove_segment(&mut self, id: SegmentId) -> Option<Segment> {
        let segment = self.segments.remove(&id)?;
        if self.by_hash.get(&segment.forkpoint_hash) == Some(&id) {
            self.by_hash.remove(&segment.forkpoint_hash);
        }
        Some(segment)
    }

    fn load(params: ChainParams, store: ChainStore) -> Result<Self, ChainError> {
        let genesis_hash = sha256d(&params.genesis_header);
        let main_path = store.main_path();
        let max_checkpoint = params.max_checkpoint();

        store.truncate_partial_record(&main_path)?;
        if let Some(first) = store.read_header_bytes(&main_path, 0)? {
            let prefilled = !params.checkpoints.is_empty() && first == [0u8; HEADER_SIZE];
            if !prefilled && sha256d(&first) != genesis_hash {
                log_warn!(
                    "Header file {} does not start at genesis; discarding it",
                    main_path.display()
                );
                store.truncate(&main_path, 0)?;
            }
        }
        if !params.checkpoints.is_empty() {
            store.prefill(&main_path, max_checkpoint + 1)?;
        }

        let mut inner = Self {
            params,
            store,
            genesis_hash,
            segments: BTreeMap::new(),
            by_hash: HashMap::new(),
            best: SegmentId(0),
            next_id: 0,
        };
        let size = inner.store.header_count(&main_path)?;
        inner.best = inner.insert_segment(Segment {
            forkpoint: 0,
            forkpoint_hash: genesis_hash,
            prev_hash: [0u8; 32],
            parent: None,
            size,
        });
        inner.check_main_after_checkpoint()?;

        let (forks, invalid) = inner.store.list_forks()?;
        for path in invalid {
            inner.delete_fork_file(&path, "unparseable fork file name")?;
        }
        let mut loaded = Vec::new();
        for fork in forks {
            if let Some(id) = inner.instantiate_fork(&fork)? {
                loaded.push(id);
            }
        }
        for id in loaded {
            if inner.segments.contains_key(&id) {
                inner.swap_with_parent(id)?;
            }
        }

        let best = inner.segment(inner.best)?.height();
        log_info!(
            "Loaded {} chain(s) from {}; best height {}",
            inner.segments.len(),
            inner.store.headers_dir().display(),
            best
        );
        Ok(inner)
    }

    fn check_main_after_checkpoint(&mut self) -> Result<(), ChainError> {
        let best = self.best;
        let max_checkpoint = self.params.max_checkpoint();
        if self.segment(best)?.height() <= max_checkpoint {
            return Ok(());
        }
        let connects = match self.read_header(best, max_checkpoint + 1)? {
            Some(header) => self.check_connect(best, &header, false).is_ok(),
            None => false,
        };
        if !connects {
            log_warn!(
                "Header after height {} does not connect; truncating the main header file",
                max_checkpoint
            );
            let path = self.store.main_path();
            self.store.truncate(&path, max_checkpoint + 1)?;
            let size = self.store.header_count(&path)?;
            self.segment_mut(best)?.size = size;
        }
        Ok(())
    }

    fn delete_fork_file(&self, path: &Path, reason: &str) -> Result<(), ChainError> {
        log_warn!("Deleting fork file {}: {}", path.display(), reason);
        self.store.remove(path)?;
        Ok(())
    }

    fn instantiate_fork(&mut self, fork: &ForkFile) -> Result<Option<SegmentId>, ChainError> {
        if fork.forkpoint <= self.params.max_checkpoint() {
            self.delete_fork_file(&fork.path, "fork at or below the last checkpoint")?;
            return Ok(None);
        }
        let parent = self
            .segments
            .iter()
            .filter(|(_, segment)| segment.forkpoint < fork.forkpoint)
            .map(|(id, _)| *id)
            .find(|id| self.check_hash(*id, fork.forkpoint - 1, &fork.prev_hash));
        let Some(parent) = parent else {
            self.delete_fork_file(&fork.path, "no chain contains its parent header")?;
            return Ok(None);
        };

        let Some(first) = self.store.read_header_bytes(&fork.path, 0)? else {
            self.delete_fork_file(&fork.path, "fork file is empty")?;
            return Ok(None);
        };
        if sha256d(&first) != fork.forkpoint_hash {
            self.delete_fork_file(&fork.path, "first header does not match the file name")?;
            return Ok(None);
        }
        if self.by_hash.contains_key(&fork.forkpoint_hash) {
            self.delete_fork_file(&fork.path, "duplicate fork")?;
            return Ok(None);
        }
        let first = crate::header::deserialize_header(&first, fork.forkpoint)?;
        if self.check_connect(parent, &first, false).is_err() {
            self.delete_fork_file(&fork.path, "first header does not connect to its parent")?;
            return Ok(None);
        }

        self.store.truncate_partial_record(&fork.path)?;
        let size = self.store.header_count(&fork.path)?;
        let last_height = fork.forkpoint + size - 1;
        if let Some(last) = self.store.read_header_bytes(&fork.path, size - 1)? {
            if self.check_hash(parent, last_height, &sha256d(&last)) {
                self.delete_fork_file(&fork.path, "parent already contains every header")?;
                return Ok(None);
            }
        }

        let parent_height = self.segment(parent)?.height();
        if fork.forkpoint > parent_height {
            self.merge_into_parent(parent, fork, size)?;
            return Ok(None);
        }

        let id = self.insert_segment(Segment {
            forkpoint: fork.forkpoint,
            forkpoint_hash: fork.forkpoint_hash,
            prev_hash: fork.prev_hash,
            parent: Some(parent),
            size,
        });
        log_debug!(
            "Loaded fork {} at height {} with {} header(s)",
            hash256_to_hex(&fork.forkpoint_hash),
            fork.forkpoint,
            size
        );
        Ok(Some(id))
    }

    /// Appends a fork that starts right after its parent's tip to the parent itself.
    fn merge_into_parent(
        &mut self,
        parent: SegmentId,
        fork: &ForkFile,
        size: i32,
    ) -> Result<(), ChainError> {
        let data = self.store.read_range(&fork.path, 0, size)?;
        let parent_segment = self.segment(parent)?.clone();
        let parent_path = self.path_of(&parent_segment);
        self.store.write_at(
            &parent_path,
            fork.forkpoint - parent_segment.forkpoint,
            &data,
            true,
        )?;
        self.segment_mut(parent)?.size += size;
        log_info!(
            "Merged fork {} into its parent at height {}",
            hash256_to_hex(&fork.forkpoint_hash),
            fork.forkpoint
        );
        self.store.remove(&fork.path)?;
        Ok(())
    }
}

/// Owner of every chain segment and of the headers directory lock.
///
/// `Blockchain` handles refer back to the registry by `SegmentId`; every
/// operation takes the registry lock once and never re-enters it.
pub struct ChainRegistry {
    inner: RwLock<RegistryInner>,
    _lock: DirLock,
}

impl ChainRegistry {
    pub fn open(config: &HeaderStoreConfig) -> Result<Arc<Self>, ChainError> {
        Self::open_with_params(config.headers_dir(), chain_params(config.network))
    }

    pub fn open_with_params(
        headers_dir: impl Into<PathBuf>,
        params: ChainParams,
    ) -> Result<Arc<Self>, ChainError> {
        let headers_dir = headers_dir.into();
        std::fs::create_dir_all(&headers_dir)?;
        let lock = lock_headers_dir(&headers_dir)?;
        let store = ChainStore::open(&headers_dir)?;

        let (promoted, discarded) = store.recover_staged()?;
        for path in &promoted {
            log_info!("Completed interrupted swap into {}", path.display());
        }
        for path in &discarded {
            log_warn!("Discarded incomplete staging file {}", path.display());
        }

        let inner = RegistryInner::load(params, store)?;
        Ok(Arc::new(Self {
            inner: RwLock::new(inner),
            _lock: lock,
        }))
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().expect("chain registry lock")
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().expect("chain registry lock")
    }

    pub fn params(&self) -> ChainParams {
        self.read().params.clone()
    }

    pub fn headers_dir(&self) -> PathBuf {
        self.read().store.headers_dir().to_path_buf()
    }

    pub fn best_chain(self: &Arc<Self>) -> Blockchain {
        let best = self.read().best;
        Blockchain::new(Arc::clone(self), best)
    }

    pub fn get(self: &Arc<Self>, id: SegmentId) -> Option<Blockchain> {
        let known = self.read().segments.contains_key(&id);
        known.then(|| Blockchain::new(Arc::clone(self), id))
    }

    /// Looks up a chain by the hash of its first header.
    pub fn get_by_hash(self: &Arc<Self>, forkpoint_hash: &Hash256) -> Option<Blockchain> {
        let id = self.read().by_hash.get(forkpoint_hash).copied()?;
        Some(Blockchain::new(Arc::clone(self), id))
    }

    pub fn chains(self: &Arc<Self>) -> Vec<Blockchain> {
        let ids: Vec<SegmentId> = self.read().segments.keys().copied().collect();
        ids.into_iter()
            .map(|id| Blockchain::new(Arc::clone(self), id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().segments.is_empty()
    }

    /// The first chain that already stores `header` at its height.
    pub fn check_header(self: &Arc<Self>, header: &ChainHeader) -> Option<Blockchain> {
        let hash = header.hash();
        let id = {
            let inner = self.read();
            inner
                .segments
                .keys()
                .copied()
                .find(|id| inner.check_hash(*id, header.height, &hash))
        }?;
        Some(Blockchain::new(Arc::clone(self), id))
    }

    /// The first chain whose tip `header` extends.
    pub fn can_connect(self: &Arc<Self>, header: &ChainHeader) -> Option<Blockchain> {
        let id = {
            let inner = self.read();
            inner
                .segments
                .keys()
                .copied()
                .find(|id| inner.check_connect(*id, header, true).is_ok())
        }?;
        Some(Blockchain::new(Arc::clone(self), id))
    }
}

impl fmt::Debug for ChainRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.read();
        f.debug_struct("ChainRegistry")
            .field("headers_dir", &inner.store.headers_dir())
            .field("chains", &inner.segments.len())
            .field("best", &inner.best)
            .finish()
    }
}
