//! In-memory section cache backed by meta files
//!
//! Writes never touch the disk: they update the loaded source or queue up
//! until the section is next loaded. Disk writes only happen on flush.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use log::{debug, info, warn};

use super::loader_registry::LoaderRegistry;
use super::meta_file::{decode_file, encode_file, join_error, path_for, write_atomic, MetaFile, EXTENSION};
use crate::core::config::{Compression, LodConfig};
use crate::core::error::{LodError, Result};
use crate::math::QuadPos;
use crate::source::{LodSource, SourceContext, TerrainChunk};

/// What a loaded source was read from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileStamp {
    pub modified: Option<SystemTime>,
    pub version: Option<u8>,
}

/// Shared handle to a loaded source
pub struct SourceHandle<S> {
    pos: QuadPos,
    source: RwLock<S>,
    stamp: Mutex<FileStamp>,
}

impl<S: LodSource> SourceHandle<S> {
    fn new(source: S, stamp: FileStamp) -> Self {
        Self {
            pos: source.pos(),
            source: RwLock::new(source),
            stamp: Mutex::new(stamp),
        }
    }

    pub fn pos(&self) -> QuadPos {
        self.pos
    }

    pub fn read(&self) -> RwLockReadGuard<'_, S> {
        self.source.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, S> {
        self.source.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_valid(&self) -> bool {
        self.read().is_valid()
    }

    pub fn is_dirty(&self) -> bool {
        self.read().lifecycle().is_dirty()
    }

    pub fn stamp(&self) -> FileStamp {
        *self.stamp.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_stamp(&self, stamp: FileStamp) {
        *self.stamp.lock().unwrap_or_else(PoisonError::into_inner) = stamp;
    }
}

struct SectionEntry<S> {
    source: Option<Arc<SourceHandle<S>>>,
    /// Updates for a section that is not loaded, in issue order
    pending: Vec<Arc<dyn TerrainChunk>>,
    /// Changes whenever the loaded source is replaced or dropped
    epoch: u64,
}

impl<S: LodSource> SectionEntry<S> {
    fn new(epoch: u64) -> Self {
        Self {
            source: None,
            pending: Vec::new(),
            epoch,
        }
    }

    fn loaded(&self) -> Option<&Arc<SourceHandle<S>>> {
        self.source.as_ref().filter(|handle| handle.is_valid())
    }

    /// What saving this section involves
    ///
    /// Superseded or disposed sources have nothing left to save.
    fn flush_target(&self) -> FlushTarget<S> {
        match self.loaded() {
            Some(handle) if handle.is_dirty() => FlushTarget::Loaded(Arc::clone(handle)),
            Some(_) => FlushTarget::Clean,
            None if !self.pending.is_empty() => FlushTarget::NeedsLoad,
            None => FlushTarget::Clean,
        }
    }

    fn needs_flush(&self) -> bool {
        !matches!(self.flush_target(), FlushTarget::Clean)
    }
}

enum ReadStart<S> {
    Hit(Arc<SourceHandle<S>>),
    Miss(u64),
}

enum FlushTarget<S> {
    Clean,
    Loaded(Arc<SourceHandle<S>>),
    NeedsLoad,
}

pub struct FileProvider<S: LodSource> {
    root: PathBuf,
    compression: Compression,
    ctx: SourceContext,
    registry: LoaderRegistry<S>,
    sections: Mutex<HashMap<QuadPos, SectionEntry<S>>>,
    /// Serializes saves of one section; entries live while a save runs
    flush_locks: Mutex<HashMap<QuadPos, Arc<tokio::sync::Mutex<()>>>>,
    /// Files found on disk or written by this provider
    files: Mutex<HashMap<QuadPos, PathBuf>>,
    next_epoch: AtomicU64,
}

impl<S: LodSource> FileProvider<S> {
    pub fn new(
        root: impl Into<PathBuf>,
        compression: Compression,
        ctx: SourceContext,
        registry: LoaderRegistry<S>,
    ) -> Self {
        Self {
            root: root.into(),
            compression,
            ctx,
            registry,
            sections: Mutex::new(HashMap::new()),
            flush_locks: Mutex::new(HashMap::new()),
            files: Mutex::new(HashMap::new()),
            next_epoch: AtomicU64::new(1),
        }
    }

    /// Provider with only the current loader registered
    pub fn from_config(config: &LodConfig, ctx: SourceContext) -> Self {
        Self::new(
            config.storage_dir.clone(),
            config.compression,
            ctx,
            LoaderRegistry::with_current(),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn context(&self) -> &SourceContext {
        &self.ctx
    }

    pub fn registry(&self) -> &LoaderRegistry<S> {
        &self.registry
    }

    fn sections(&self) -> MutexGuard<'_, HashMap<QuadPos, SectionEntry<S>>> {
        self.sections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn files(&self) -> MutexGuard<'_, HashMap<QuadPos, PathBuf>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fresh_epoch(&self) -> u64 {
        self.next_epoch.fetch_add(1, Ordering::Relaxed)
    }

    fn file_path(&self, pos: QuadPos) -> PathBuf {
        self.files()
            .get(&pos)
            .cloned()
            .unwrap_or_else(|| path_for(&self.root, S::KIND, pos))
    }

    /// Loaded, still valid source of `pos`
    pub fn get_loaded(&self, pos: QuadPos) -> Option<Arc<SourceHandle<S>>> {
        let sections = self.sections();
        sections
            .get(&pos)
            .and_then(|entry| entry.source.as_ref())
            .filter(|handle| handle.is_valid())
            .cloned()
    }

    pub fn is_loaded(&self, pos: QuadPos) -> bool {
        self.get_loaded(pos).is_some()
    }

    pub fn loaded_count(&self) -> usize {
        self.sections().values().filter(|entry| entry.source.is_some()).count()
    }

    /// Whether `pos` is known to have a file on disk
    pub fn has_file(&self, pos: QuadPos) -> bool {
        self.files().contains_key(&pos)
    }

    /// Sections with a known file, sorted
    pub fn known_files(&self) -> Vec<QuadPos> {
        let mut out: Vec<QuadPos> = self.files().keys().copied().collect();
        out.sort();
        out
    }

    /// Whether `pos` holds changes that are not on disk yet
    pub fn is_dirty(&self, pos: QuadPos) -> bool {
        let sections = self.sections();
        sections.get(&pos).is_some_and(SectionEntry::needs_flush)
    }

    /// Dirty sections in Morton order
    pub fn dirty_positions(&self) -> Vec<QuadPos> {
        let sections = self.sections();
        let mut out: Vec<QuadPos> = sections
            .iter()
            .filter(|(_, entry)| entry.needs_flush())
            .map(|(pos, _)| *pos)
            .collect();
        out.sort_by_key(|pos| (pos.detail, pos.morton_key()));
        out
    }

    /// Sections that are not loaded but have updates queued, in Morton order
    pub fn queued_positions(&self) -> Vec<QuadPos> {
        let sections = self.sections();
        let mut out: Vec<QuadPos> = sections
            .iter()
            .filter(|(_, entry)| matches!(entry.flush_target(), FlushTarget::NeedsLoad))
            .map(|(pos, _)| *pos)
            .collect();
        out.sort_by_key(|pos| (pos.detail, pos.morton_key()));
        out
    }

    fn begin_read(&self, pos: QuadPos) -> ReadStart<S> {
        let mut sections = self.sections();
        let entry = sections
            .entry(pos)
            .or_insert_with(|| SectionEntry::new(self.fresh_epoch()));
        match &entry.source {
            Some(handle) if handle.is_valid() => ReadStart::Hit(Arc::clone(handle)),
            _ => ReadStart::Miss(entry.epoch),
        }
    }

    /// Read and decode the file at `path`, off the async threads
    async fn load_file(&self, path: &Path, pos: QuadPos) -> Result<(S, FileStamp)> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(LodError::NotFound(pos)),
            Err(e) => return Err(e.into()),
        };
        let modified = tokio::fs::metadata(path)
            .await
            .ok()
            .and_then(|meta| meta.modified().ok());

        let registry = self.registry.clone();
        let ctx = self.ctx.clone();
        let file = path.to_path_buf();
        let source = tokio::task::spawn_blocking(move || decode_file(&bytes, &file, pos, &registry, &ctx))
            .await
            .map_err(join_error)??;

        let stamp = FileStamp {
            modified,
            version: Some(source.version()),
        };
        Ok((source, stamp))
    }

    /// Apply queued updates in issue order
    fn apply_pending(&self, pos: QuadPos, source: &mut S, pending: Vec<Arc<dyn TerrainChunk>>) {
        for chunk in pending {
            if let Err(e) = source.update(chunk.as_ref(), &self.ctx) {
                warn!("Dropping queued update of chunk {} for {}: {}", chunk.chunk_pos(), pos, e);
            }
        }
    }

    fn finish_load(&self, pos: QuadPos, epoch: u64, mut source: S, stamp: FileStamp) -> Result<Arc<SourceHandle<S>>> {
        let mut sections = self.sections();
        let entry = match sections.get_mut(&pos) {
            Some(entry) if entry.epoch == epoch => entry,
            _ => {
                source.lifecycle().invalidate();
                debug!("Discarding stale load of {}", pos);
                return Err(LodError::StaleSource(pos));
            }
        };
        if let Some(existing) = &entry.source {
            if existing.is_valid() {
                return Ok(Arc::clone(existing));
            }
        }
        let pending = std::mem::take(&mut entry.pending);
        self.apply_pending(pos, &mut source, pending);
        let handle = Arc::new(SourceHandle::new(source, stamp));
        entry.source = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Loaded source of `pos`, reading its file if needed
    ///
    /// Fails with `NotFound`, `CorruptFile` or `VersionMismatch` for file
    /// problems and `StaleSource` when the section was unloaded or replaced
    /// while the read was in flight.
    pub async fn read(&self, pos: QuadPos) -> Result<Arc<SourceHandle<S>>> {
        let epoch = match self.begin_read(pos) {
            ReadStart::Hit(handle) => return Ok(handle),
            ReadStart::Miss(epoch) => epoch,
        };
        let path = self.file_path(pos);
        let (source, stamp) = self.load_file(&path, pos).await?;
        debug!("Loaded {:?} section {} from {:?}", S::KIND, pos, path);
        self.finish_load(pos, epoch, source, stamp)
    }

    /// Like [`read`](Self::read), but a missing or unreadable file yields an empty source
    pub async fn read_or_create(&self, pos: QuadPos) -> Result<Arc<SourceHandle<S>>> {
        match self.read(pos).await {
            Ok(handle) => Ok(handle),
            Err(LodError::NotFound(_)) => Ok(self.install(pos, S::create_empty(pos, &self.ctx))),
            Err(e) if e.is_recoverable_file_error() => {
                warn!("Regenerating {:?} section {}: {}", S::KIND, pos, e);
                let empty = S::create_empty(pos, &self.ctx);
                // the unreadable file gets overwritten on the next flush
                empty.lifecycle().mark_dirty();
                Ok(self.install(pos, empty))
            }
            Err(e) => Err(e),
        }
    }

    /// Make `source` the loaded source of its section, superseding any other
    ///
    /// Queued updates are applied to it first.
    pub fn install(&self, pos: QuadPos, mut source: S) -> Arc<SourceHandle<S>> {
        let mut sections = self.sections();
        let epoch = self.fresh_epoch();
        let entry = sections.entry(pos).or_insert_with(|| SectionEntry::new(epoch));
        if let Some(old) = entry.source.take() {
            old.read().lifecycle().invalidate();
        }
        entry.epoch = epoch;
        let pending = std::mem::take(&mut entry.pending);
        self.apply_pending(pos, &mut source, pending);
        let stamp = FileStamp {
            modified: None,
            version: Some(source.version()),
        };
        let handle = Arc::new(SourceHandle::new(source, stamp));
        entry.source = Some(Arc::clone(&handle));
        handle
    }

    /// Apply a terrain update to `pos`
    ///
    /// Loaded sources are updated right away, otherwise the update is queued
    /// for the next load. Updates to one section apply in call order.
    pub fn write(&self, pos: QuadPos, chunk: Arc<dyn TerrainChunk>) -> Result<bool> {
        let mut sections = self.sections();
        let entry = sections
            .entry(pos)
            .or_insert_with(|| SectionEntry::new(self.fresh_epoch()));
        match &entry.source {
            Some(handle) if handle.is_valid() => {
                let mut source = handle.write();
                source.update(chunk.as_ref(), &self.ctx)
            }
            _ => {
                entry.pending.push(chunk);
                Ok(true)
            }
        }
    }

    fn flush_target(&self, pos: QuadPos) -> FlushTarget<S> {
        let sections = self.sections();
        match sections.get(&pos) {
            Some(entry) => entry.flush_target(),
            None => FlushTarget::Clean,
        }
    }

    fn flush_lock(&self, pos: QuadPos) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.flush_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(pos).or_default())
    }

    fn release_flush_lock(&self, pos: QuadPos, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.flush_locks.lock().unwrap_or_else(PoisonError::into_inner);
        // only the map and `lock` hold it: no other save is running or waiting
        let idle = locks.get(&pos).is_some_and(|held| Arc::ptr_eq(held, &lock))
            && Arc::strong_count(&lock) == 2;
        if idle {
            locks.remove(&pos);
        }
    }

    /// Save `pos` if it has unsaved changes; returns whether a file was written
    ///
    /// Saves of one section run one at a time, so the file always ends up
    /// holding the newest encoding.
    pub async fn flush_section(&self, pos: QuadPos) -> Result<bool> {
        let lock = self.flush_lock(pos);
        let result = {
            let _guard = lock.lock().await;
            self.flush_locked(pos).await
        };
        self.release_flush_lock(pos, lock);
        result
    }

    async fn flush_locked(&self, pos: QuadPos) -> Result<bool> {
        let handle = match self.flush_target(pos) {
            FlushTarget::Clean => return Ok(false),
            FlushTarget::Loaded(handle) => handle,
            FlushTarget::NeedsLoad => self.read_or_create(pos).await?,
        };

        let compression = self.compression;
        let encoding = Arc::clone(&handle);
        let encoded = tokio::task::spawn_blocking(move || -> Result<Option<(Vec<u8>, u64)>> {
            let source = encoding.read();
            if !source.is_valid() || !source.lifecycle().is_dirty() {
                return Ok(None);
            }
            // writers need the write lock, so the bytes match this revision
            let revision = source.lifecycle().revision();
            let bytes = encode_file(&*source, compression)?;
            Ok(Some((bytes, revision)))
        })
        .await
        .map_err(join_error)??;

        let Some((bytes, revision)) = encoded else {
            return Ok(false);
        };
        let path = path_for(&self.root, S::KIND, pos);
        write_atomic(&path, bytes).await?;
        handle.read().lifecycle().mark_saved(revision);

        let modified = tokio::fs::metadata(&path)
            .await
            .ok()
            .and_then(|meta| meta.modified().ok());
        handle.set_stamp(FileStamp {
            modified,
            version: Some(S::CURRENT_VERSION),
        });
        debug!("Saved {:?} section {} to {:?}", S::KIND, pos, path);
        self.files().insert(pos, path);
        Ok(true)
    }

    /// Save every dirty section, loading sections that only have queued updates
    ///
    /// Keeps going past failures and reports the first one.
    pub async fn flush_and_save(&self) -> Result<usize> {
        let mut saved = 0;
        let mut first_error = None;
        for pos in self.dirty_positions() {
            match self.flush_section(pos).await {
                Ok(true) => saved += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to save {:?} section {}: {}", S::KIND, pos, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        if saved > 0 {
            info!("Saved {} {:?} sections", saved, S::KIND);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(saved),
        }
    }

    /// Drop the loaded source of `pos` and dispose it
    ///
    /// Queued updates survive; loads in flight for `pos` become stale.
    pub fn unload(&self, pos: QuadPos) -> Option<Arc<SourceHandle<S>>> {
        let mut sections = self.sections();
        let (handle, keep) = {
            let entry = sections.get_mut(&pos)?;
            let handle = entry.source.take();
            let keep = !entry.pending.is_empty();
            if keep {
                entry.epoch = self.fresh_epoch();
            }
            (handle, keep)
        };
        if !keep {
            sections.remove(&pos);
        }
        drop(sections);

        if let Some(handle) = &handle {
            let source = handle.read();
            if source.lifecycle().is_dirty() {
                warn!("Unloading {:?} section {} with unsaved changes", S::KIND, pos);
            }
            source.dispose();
        }
        handle
    }

    fn unload_if_clean(&self, pos: QuadPos) -> bool {
        let mut sections = self.sections();
        match sections.get(&pos) {
            None => return true,
            Some(entry) if entry.needs_flush() => return false,
            Some(_) => {}
        }
        if let Some(handle) = sections.remove(&pos).and_then(|entry| entry.source) {
            handle.read().dispose();
        }
        true
    }

    /// Save `pos` and drop it from memory without losing concurrent writes
    ///
    /// Writes that land between saving and unloading trigger another save.
    pub async fn evict(&self, pos: QuadPos) -> Result<()> {
        loop {
            self.flush_section(pos).await?;
            if self.unload_if_clean(pos) {
                debug!("Evicted {:?} section {}", S::KIND, pos);
                return Ok(());
            }
            tokio::task::yield_now().await;
        }
    }

    /// Register existing files by their headers
    ///
    /// Unreadable files and files of the other source kind are skipped.
    pub async fn add_scanned_files(&self, paths: Vec<PathBuf>) -> usize {
        let mut added = 0;
        for path in paths {
            match MetaFile::open(path.clone()).await {
                Ok(meta) if meta.header.kind == S::KIND => {
                    self.files().insert(meta.pos(), path);
                    added += 1;
                }
                Ok(meta) => warn!("Skipping {:?}: holds a {:?} section", path, meta.header.kind),
                Err(e) => warn!("Skipping {:?}: {}", path, e),
            }
        }
        added
    }

    /// Register every section file under this provider's directory
    pub async fn scan_directory(&self) -> Result<usize> {
        let kind_dir = self.root.join(S::KIND.dir_name());
        let mut levels = match tokio::fs::read_dir(&kind_dir).await {
            Ok(levels) => levels,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        while let Some(level) = levels.next_entry().await? {
            if !level.file_type().await?.is_dir() {
                continue;
            }
            let mut files = tokio::fs::read_dir(level.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let path = file.path();
                if path.extension().is_some_and(|ext| ext == EXTENSION) {
                    paths.push(path);
                }
            }
        }
        paths.sort();
        let added = self.add_scanned_files(paths).await;
        info!("Found {} {:?} section files in {:?}", added, S::KIND, kind_dir);
        Ok(added)
    }

    fn current_epoch(&self, handle: &Arc<SourceHandle<S>>) -> Option<u64> {
        let sections = self.sections();
        let entry = sections.get(&handle.pos())?;
        match &entry.source {
            Some(current) if Arc::ptr_eq(current, handle) => Some(entry.epoch),
            _ => None,
        }
    }

    /// Reload `handle`'s section if its file changed since it was loaded
    ///
    /// On reload the old source is invalidated and a new handle is installed;
    /// fetch it with [`read`](Self::read).
    pub async fn refresh(&self, handle: &Arc<SourceHandle<S>>) -> Result<bool> {
        let pos = handle.pos();
        if self.current_epoch(handle).is_none() {
            return Err(LodError::StaleSource(pos));
        }

        let path = self.file_path(pos);
        let meta = match MetaFile::open(path.clone()).await {
            Ok(meta) => meta,
            Err(LodError::Io(e)) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        let stamp = handle.stamp();
        if stamp.modified == meta.modified && stamp.version == Some(meta.version()) {
            return Ok(false);
        }

        let (source, new_stamp) = self.load_file(&path, pos).await?;
        let mut sections = self.sections();
        let entry = match sections.get_mut(&pos) {
            Some(entry) if entry.source.as_ref().is_some_and(|h| Arc::ptr_eq(h, handle)) => entry,
            _ => return Err(LodError::StaleSource(pos)),
        };
        {
            let old = handle.read();
            if old.lifecycle().is_dirty() {
                warn!("Reloading {:?} section {} over unsaved changes", S::KIND, pos);
            }
            old.lifecycle().invalidate();
        }
        entry.epoch = self.fresh_epoch();
        entry.source = Some(Arc::new(SourceHandle::new(source, new_stamp)));
        debug!("Refreshed {:?} section {} from {:?}", S::KIND, pos, path);
        Ok(true)
    }
}
