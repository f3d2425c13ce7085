//! Viewer-driven section orchestration
//!
//! Keeps a quad-tree of the sections the viewer should see, drives loads and
//! evictions through the two file providers, and hands rebuilt geometry to
//! the render side. Async work reports back over a channel that [`tick`]
//! drains on the caller's thread.
//!
//! [`tick`]: LodQuadTree::tick

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use glam::{DVec2, IVec2};
use log::{debug, info, warn};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::distance::should_split;
use crate::core::config::LodConfig;
use crate::core::error::{LodError, Result};
use crate::math::QuadPos;
use crate::quadtree::QuadTree;
use crate::render::{RenderBufferHandler, RenderSink};
use crate::source::{
    ColorResolver, DataSource, LevelContext, LodSource, RenderSource, SourceContext, TerrainChunk,
};
use crate::streaming::file_provider::{FileProvider, SourceHandle};
use crate::streaming::meta_file::join_error;

/// Lifecycle stage of a section as seen from outside
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectionState {
    Unloaded,
    Loading,
    Loaded,
    Unloading,
}

enum SlotState {
    /// Wanted, waiting for a load slot
    Queued,
    Loading { epoch: u64 },
    Loaded {
        render: Arc<SourceHandle<RenderSource>>,
        needs_rebuild: bool,
    },
    /// Load failed for a reason regenerating could not fix
    Failed,
}

struct SectionSlot {
    state: SlotState,
}

impl SectionSlot {
    fn queued() -> Self {
        Self { state: SlotState::Queued }
    }
}

enum LodEvent {
    Loaded {
        pos: QuadPos,
        epoch: u64,
        result: Result<Arc<SourceHandle<RenderSource>>>,
    },
    Evicted {
        pos: QuadPos,
        epoch: u64,
        result: Result<()>,
    },
    Drained {
        pos: QuadPos,
        result: Result<()>,
    },
}

pub struct LodQuadTree {
    config: LodConfig,
    level: LevelContext,
    tree: QuadTree<SectionSlot>,
    data: Arc<FileProvider<DataSource>>,
    render: Arc<FileProvider<RenderSource>>,
    handler: Arc<RenderBufferHandler>,
    sink: Arc<dyn RenderSink>,
    runtime: Handle,
    events_tx: mpsc::UnboundedSender<LodEvent>,
    events_rx: mpsc::UnboundedReceiver<LodEvent>,
    /// Evictions in flight, by position
    unloading: HashMap<QuadPos, u64>,
    /// Saves of sections that only had queued updates
    draining: HashSet<QuadPos>,
    in_flight: usize,
    viewer: Option<DVec2>,
    next_epoch: u64,
}

impl LodQuadTree {
    /// Create an orchestrator storing its sections under `config.storage_dir`
    ///
    /// Async work is spawned on `runtime`.
    pub fn new(
        config: LodConfig,
        colors: Arc<dyn ColorResolver>,
        sink: Arc<dyn RenderSink>,
        runtime: Handle,
    ) -> Result<Self> {
        config.validate()?;
        let level = LevelContext::new(config.level_min_y, config.level_height)?;
        let ctx = SourceContext::new(level, colors);
        let data = Arc::new(FileProvider::from_config(&config, ctx.clone()));
        let render = Arc::new(FileProvider::from_config(&config, ctx));
        Self::with_providers(config, data, render, sink, runtime)
    }

    /// Create an orchestrator over existing providers
    pub fn with_providers(
        config: LodConfig,
        data: Arc<FileProvider<DataSource>>,
        render: Arc<FileProvider<RenderSource>>,
        sink: Arc<dyn RenderSink>,
        runtime: Handle,
    ) -> Result<Self> {
        config.validate()?;
        let level = render.context().level;
        let width = (config.render_distance * 2.0).ceil() as i32;
        let tree = QuadTree::new(
            IVec2::ZERO,
            width.max(1),
            config.min_section_detail,
            config.max_section_detail,
        )?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            level,
            tree,
            data,
            render,
            handler: Arc::new(RenderBufferHandler::new()),
            sink,
            runtime,
            events_tx,
            events_rx,
            unloading: HashMap::new(),
            draining: HashSet::new(),
            in_flight: 0,
            viewer: None,
            next_epoch: 1,
        })
    }

    pub fn config(&self) -> &LodConfig {
        &self.config
    }

    pub fn handler(&self) -> &Arc<RenderBufferHandler> {
        &self.handler
    }

    pub fn data_provider(&self) -> &Arc<FileProvider<DataSource>> {
        &self.data
    }

    pub fn render_provider(&self) -> &Arc<FileProvider<RenderSource>> {
        &self.render
    }

    pub fn storage_dir(&self) -> &Path {
        self.render.root()
    }

    fn epoch(&mut self) -> u64 {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        epoch
    }

    /// Register the section files already on disk with both providers
    pub async fn scan_storage(&self) -> Result<usize> {
        let data = self.data.scan_directory().await?;
        let render = self.render.scan_directory().await?;
        Ok(data + render)
    }

    /// Sections the viewer at `viewer` should see, finest near the viewer
    fn desired_sections(&self, viewer: DVec2) -> BTreeSet<QuadPos> {
        let unit = self.config.lod_distance_unit;
        let min = self.config.min_section_detail;
        let max = self.config.max_section_detail;

        let mut out = BTreeSet::new();
        let mut stack = self.tree.root_positions();
        while let Some(pos) = stack.pop() {
            if pos.distance_to(viewer) > self.config.render_distance {
                continue;
            }
            if should_split(pos, viewer, unit, min, max) {
                for index in self.tree.child_indices(pos, true) {
                    if let Ok(child) = pos.convert_down_child(index) {
                        stack.push(child);
                    }
                }
            } else {
                out.insert(pos);
            }
        }
        out
    }

    /// Move the viewer, queueing loads and starting evictions
    ///
    /// Calling this again with the same position does nothing.
    pub fn update_viewer(&mut self, viewer: DVec2) {
        if self.viewer == Some(viewer) {
            return;
        }
        self.viewer = Some(viewer);

        let center = IVec2::new(viewer.x.floor() as i32, viewer.y.floor() as i32);
        for (pos, _) in self.tree.set_center(center) {
            self.evict(pos);
        }

        let desired = self.desired_sections(viewer);
        let stale: Vec<QuadPos> = self
            .tree
            .iter()
            .map(|(pos, _)| pos)
            .filter(|pos| !desired.contains(pos))
            .collect();
        for pos in stale {
            if self.tree.remove(pos).is_some() {
                self.evict(pos);
            }
        }

        let mut queued = 0;
        for pos in desired {
            if self.tree.contains(pos) {
                continue;
            }
            match self.tree.set(pos, SectionSlot::queued()) {
                Ok(_) => queued += 1,
                Err(e) => warn!("Cannot track section {}: {}", pos, e),
            }
        }
        if queued > 0 {
            debug!("Viewer at ({:.1}, {:.1}): {} sections queued", viewer.x, viewer.y, queued);
        }
        self.start_loads();
    }

    /// Start queued loads, closest first, up to the concurrency limit
    fn start_loads(&mut self) {
        let capacity = self.config.max_concurrent_loads.saturating_sub(self.in_flight);
        if capacity == 0 {
            return;
        }
        let viewer = self.viewer.unwrap_or(DVec2::ZERO);
        let mut queued: Vec<(f64, QuadPos)> = self
            .tree
            .iter()
            .filter(|(pos, slot)| {
                matches!(slot.state, SlotState::Queued)
                    && !self.unloading.contains_key(pos)
                    && !self.draining.contains(pos)
            })
            .map(|(pos, _)| (pos.distance_to(viewer), pos))
            .collect();
        queued.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        for (_, pos) in queued.into_iter().take(capacity) {
            let epoch = self.epoch();
            if let Some(slot) = self.tree.get_mut(pos) {
                slot.state = SlotState::Loading { epoch };
            }
            self.in_flight += 1;

            let data = Arc::clone(&self.data);
            let render = Arc::clone(&self.render);
            let tx = self.events_tx.clone();
            self.runtime.spawn(async move {
                let result = load_section(&data, &render, pos).await;
                let _ = tx.send(LodEvent::Loaded { pos, epoch, result });
            });
        }
    }

    /// Take `pos` off screen and save it through both providers
    fn evict(&mut self, pos: QuadPos) {
        let previous = self.handler.remove(pos);
        self.sink.on_unload(pos, previous);

        if self.unloading.contains_key(&pos) {
            return;
        }
        let epoch = self.epoch();
        self.unloading.insert(pos, epoch);

        let data = Arc::clone(&self.data);
        let render = Arc::clone(&self.render);
        let tx = self.events_tx.clone();
        self.runtime.spawn(async move {
            let result = async {
                data.evict(pos).await?;
                render.evict(pos).await
            }
            .await;
            let _ = tx.send(LodEvent::Evicted { pos, epoch, result });
        });
    }

    /// Save sections that only hold queued updates, a few per tick
    ///
    /// Render sections the viewer tracks are left to their load; data
    /// sections are saved wherever they are.
    fn start_drains(&mut self) {
        let mut budget = self.config.max_concurrent_loads.saturating_sub(self.draining.len());
        if budget == 0 {
            return;
        }
        let data_queued: BTreeSet<QuadPos> = self.data.queued_positions().into_iter().collect();
        let render_queued: BTreeSet<QuadPos> = self
            .render
            .queued_positions()
            .into_iter()
            .filter(|pos| !self.tree.contains(*pos))
            .collect();

        for pos in data_queued.union(&render_queued).copied() {
            if budget == 0 {
                break;
            }
            if self.unloading.contains_key(&pos) || self.draining.contains(&pos) {
                continue;
            }
            budget -= 1;
            self.draining.insert(pos);

            let data = data_queued.contains(&pos).then(|| Arc::clone(&self.data));
            let render = render_queued.contains(&pos).then(|| Arc::clone(&self.render));
            let tx = self.events_tx.clone();
            self.runtime.spawn(async move {
                let result = async {
                    if let Some(data) = data {
                        data.evict(pos).await?;
                    }
                    if let Some(render) = render {
                        render.evict(pos).await?;
                    }
                    Ok::<(), LodError>(())
                }
                .await;
                let _ = tx.send(LodEvent::Drained { pos, result });
            });
        }
    }

    /// Forward a terrain granule to every level's containing section
    ///
    /// Loaded sections are rebuilt on the next [`tick`](Self::tick).
    pub fn apply_chunk_update(&mut self, chunk: Arc<dyn TerrainChunk>) -> Result<()> {
        // a level that rejects the granule does not stop the others
        let base = QuadPos::from_chunk(chunk.chunk_pos());
        let mut first_error = None;
        for detail in self.config.min_section_detail..=self.config.max_section_detail {
            let pos = match base.convert_up(detail) {
                Ok(pos) => pos,
                Err(e) => {
                    first_error.get_or_insert(e);
                    continue;
                }
            };
            let data = self.data.write(pos, Arc::clone(&chunk));
            let render = self.render.write(pos, Arc::clone(&chunk));
            if render.is_ok() {
                if let Some(SectionSlot {
                    state: SlotState::Loaded { needs_rebuild, .. },
                }) = self.tree.get_mut(pos)
                {
                    *needs_rebuild = true;
                }
            }
            for result in [data, render] {
                if let Err(e) = result {
                    warn!("Chunk {} rejected by section {}: {}", chunk.chunk_pos(), pos, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn handle_event(&mut self, event: LodEvent) {
        match event {
            LodEvent::Loaded { pos, epoch, result } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                let current = self
                    .tree
                    .get_mut(pos)
                    .filter(|slot| matches!(slot.state, SlotState::Loading { epoch: e } if e == epoch));
                let Some(slot) = current else {
                    debug!("Discarding stale load of {}", pos);
                    let orphaned = result.is_ok() && !self.tree.contains(pos);
                    if orphaned && !self.unloading.contains_key(&pos) {
                        self.evict(pos);
                    }
                    return;
                };
                slot.state = match result {
                    Ok(render) if render.is_valid() => SlotState::Loaded {
                        render,
                        needs_rebuild: true,
                    },
                    Ok(_) | Err(LodError::StaleSource(_)) => SlotState::Queued,
                    Err(e) => {
                        warn!("Failed to load section {}: {}", pos, e);
                        SlotState::Failed
                    }
                };
            }
            LodEvent::Evicted { pos, epoch, result } => {
                if self.unloading.get(&pos) == Some(&epoch) {
                    self.unloading.remove(&pos);
                }
                if let Err(e) = result {
                    warn!("Failed to evict section {}: {}", pos, e);
                }
            }
            LodEvent::Drained { pos, result } => {
                self.draining.remove(&pos);
                if let Err(e) = result {
                    warn!("Failed to save queued updates of section {}: {}", pos, e);
                }
            }
        }
    }

    /// Drain finished async work, rebuild changed sections and publish their buffers
    ///
    /// Returns the number of buffer swaps applied.
    pub fn tick(&mut self) -> usize {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }

        let loaded: Vec<(QuadPos, Arc<SourceHandle<RenderSource>>, bool)> = self
            .tree
            .iter()
            .filter_map(|(pos, slot)| match &slot.state {
                SlotState::Loaded { render, needs_rebuild } => Some((pos, Arc::clone(render), *needs_rebuild)),
                _ => None,
            })
            .collect();

        let mut applied = 0;
        for (pos, render, needs_rebuild) in loaded {
            if !render.is_valid() {
                // superseded by a refresh or unloaded underneath us
                if let Some(slot) = self.tree.get_mut(pos) {
                    slot.state = SlotState::Queued;
                }
                continue;
            }
            if needs_rebuild {
                let staged = {
                    let source = render.read();
                    let pair = source.build_buffers(&self.level);
                    source.try_swap_render_buffer(pair.opaque, pair.transparent)
                };
                if staged {
                    if let Some(SectionSlot {
                        state: SlotState::Loaded { needs_rebuild, .. },
                    }) = self.tree.get_mut(pos)
                    {
                        *needs_rebuild = false;
                    }
                } else {
                    debug!("Swap already pending for {}, retrying next tick", pos);
                }
            }
            let swapped = self.handler.apply_pending_swap(&render.read());
            if let Some(swapped) = swapped {
                self.sink.on_swap(swapped.pos, swapped.previous);
                applied += 1;
            }
        }

        self.start_loads();
        self.start_drains();
        applied
    }

    fn is_busy(&self) -> bool {
        self.in_flight > 0
            || !self.unloading.is_empty()
            || !self.draining.is_empty()
            || self.tree.iter().any(|(_, slot)| matches!(slot.state, SlotState::Queued))
    }

    /// Wait until every queued load and eviction has finished and been applied
    pub async fn settle(&mut self) {
        loop {
            self.tick();
            if !self.is_busy() {
                break;
            }
            match self.events_rx.recv().await {
                Some(event) => self.handle_event(event),
                None => break,
            }
        }
        self.tick();
    }

    /// Reload loaded sections whose render files changed on disk
    pub async fn refresh(&mut self) -> Result<usize> {
        let loaded: Vec<(QuadPos, Arc<SourceHandle<RenderSource>>)> = self
            .tree
            .iter()
            .filter_map(|(pos, slot)| match &slot.state {
                SlotState::Loaded { render, .. } => Some((pos, Arc::clone(render))),
                _ => None,
            })
            .collect();

        let mut refreshed = 0;
        for (pos, handle) in loaded {
            if !self.render.refresh(&handle).await? {
                continue;
            }
            let fresh = self.render.read(pos).await?;
            if let Some(slot) = self.tree.get_mut(pos) {
                slot.state = SlotState::Loaded {
                    render: fresh,
                    needs_rebuild: true,
                };
                refreshed += 1;
            }
        }
        Ok(refreshed)
    }

    /// Finish outstanding work, take everything off screen and save all dirty sections
    pub async fn shutdown(&mut self) -> Result<()> {
        self.settle().await;
        for pos in self.handler.sections() {
            let previous = self.handler.remove(pos);
            self.sink.on_unload(pos, previous);
        }
        let data = self.data.flush_and_save().await?;
        let render = self.render.flush_and_save().await?;
        info!("LOD shutdown: saved {} data and {} render sections", data, render);
        Ok(())
    }

    pub fn section_state(&self, pos: QuadPos) -> SectionState {
        if self.unloading.contains_key(&pos) {
            return SectionState::Unloading;
        }
        match self.tree.get(pos).map(|slot| &slot.state) {
            Some(SlotState::Queued) | Some(SlotState::Loading { .. }) => SectionState::Loading,
            Some(SlotState::Loaded { .. }) => SectionState::Loaded,
            Some(SlotState::Failed) | None => SectionState::Unloaded,
        }
    }

    pub fn loaded_count(&self) -> usize {
        self.tree
            .iter()
            .filter(|(_, slot)| matches!(slot.state, SlotState::Loaded { .. }))
            .count()
    }

    /// Sections currently wanted by the viewer, loaded or not
    pub fn tracked_sections(&self) -> Vec<QuadPos> {
        self.tree.iter().map(|(pos, _)| pos).collect()
    }
}

/// Load the render source of `pos`, regenerating it when its file is unusable
///
/// A missing, corrupt or outdated render file is rebuilt from the data
/// source; if that fails too the section starts out empty.
async fn load_section(
    data: &FileProvider<DataSource>,
    render: &FileProvider<RenderSource>,
    pos: QuadPos,
) -> Result<Arc<SourceHandle<RenderSource>>> {
    match render.read(pos).await {
        Ok(handle) => return Ok(handle),
        Err(LodError::NotFound(_)) => {}
        Err(e) if e.is_recoverable_file_error() => {
            warn!("Rebuilding render section {} from data: {}", pos, e);
        }
        Err(e) => return Err(e),
    }

    let derived = match derive_render(data, render, pos).await {
        Ok(source) => source,
        Err(LodError::StaleSource(p)) => return Err(LodError::StaleSource(p)),
        Err(e) => {
            warn!("Starting section {} empty: {}", pos, e);
            RenderSource::create_empty(pos, render.context())
        }
    };
    Ok(render.install(pos, derived))
}

async fn derive_render(
    data: &FileProvider<DataSource>,
    render: &FileProvider<RenderSource>,
    pos: QuadPos,
) -> Result<RenderSource> {
    let handle = data.read_or_create(pos).await?;
    let colors = Arc::clone(&render.context().colors);
    tokio::task::spawn_blocking(move || {
        let source = handle.read();
        RenderSource::from_data_source(&source, colors.as_ref())
    })
    .await
    .map_err(join_error)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Compression;
    use crate::source::{BufferPair, ChunkUpdate, PaletteColors};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSink {
        swaps: Mutex<Vec<QuadPos>>,
        unloads: Mutex<Vec<QuadPos>>,
    }

    impl RenderSink for RecordingSink {
        fn on_swap(&self, pos: QuadPos, _previous: Option<Arc<BufferPair>>) {
            self.swaps.lock().unwrap().push(pos);
        }

        fn on_unload(&self, pos: QuadPos, _previous: Option<Arc<BufferPair>>) {
            self.unloads.lock().unwrap().push(pos);
        }
    }

    fn config(dir: &Path) -> LodConfig {
        LodConfig {
            storage_dir: dir.to_path_buf(),
            compression: Compression::Lz4,
            render_distance: 96.0,
            min_section_detail: 4,
            max_section_detail: 6,
            lod_distance_unit: 32.0,
            max_concurrent_loads: 4,
            ..LodConfig::default()
        }
    }

    fn colors() -> Arc<dyn ColorResolver> {
        Arc::new(PaletteColors::new().with_color("grass", 0xFF30_A030))
    }

    fn orchestrator(dir: &Path, sink: Arc<RecordingSink>) -> LodQuadTree {
        LodQuadTree::new(config(dir), colors(), sink, Handle::current()).unwrap()
    }

    fn grass(chunk: IVec2) -> Arc<dyn TerrainChunk> {
        let mut update = ChunkUpdate::full_height(chunk, &LevelContext::default());
        update.fill("grass", 63, 1, 0xF0);
        update.fill("stone", 0, 63, 0);
        Arc::new(update)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_viewer_loads_fine_sections_near_and_coarse_far() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let mut lod = orchestrator(dir.path(), Arc::clone(&sink));

        lod.update_viewer(DVec2::new(8.0, 8.0));
        lod.settle().await;

        let tracked = lod.tracked_sections();
        assert!(!tracked.is_empty());
        assert_eq!(lod.loaded_count(), tracked.len());
        assert_eq!(lod.section_state(QuadPos::new(4, 0, 0)), SectionState::Loaded);
        // sections never overlap
        for a in &tracked {
            for b in &tracked {
                assert!(a == b || !a.overlaps(b), "{} overlaps {}", a, b);
            }
        }
        // coarser sections further out
        assert!(tracked.iter().any(|p| p.detail > 4));
        let near = tracked.iter().filter(|p| p.distance_to(DVec2::new(8.0, 8.0)) == 0.0);
        assert!(near.into_iter().all(|p| p.detail == 4));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_repeated_viewer_update_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut lod = orchestrator(dir.path(), Arc::new(RecordingSink::default()));
        lod.update_viewer(DVec2::new(8.0, 8.0));
        lod.settle().await;
        let before = lod.tracked_sections();

        lod.update_viewer(DVec2::new(8.0, 8.0));
        assert_eq!(lod.in_flight, 0);
        assert!(lod.unloading.is_empty());
        assert_eq!(lod.tracked_sections(), before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_chunk_update_rebuilds_and_swaps() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let mut lod = orchestrator(dir.path(), Arc::clone(&sink));
        lod.update_viewer(DVec2::new(8.0, 8.0));
        lod.settle().await;

        let pos = QuadPos::new(4, 0, 0);
        let before = lod.handler().current(pos).unwrap();
        assert_eq!(before.span_count(), 0);

        lod.apply_chunk_update(grass(IVec2::ZERO)).unwrap();
        assert_eq!(lod.tick(), 1);

        let after = lod.handler().current(pos).unwrap();
        assert_eq!(after.opaque.len(), 512);
        assert!(after.transparent.is_empty());
        assert!(sink.swaps.lock().unwrap().contains(&pos));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_eviction_saves_and_reload_restores() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let pos = QuadPos::new(4, 0, 0);
        {
            let mut lod = orchestrator(dir.path(), Arc::clone(&sink));
            lod.update_viewer(DVec2::new(8.0, 8.0));
            lod.settle().await;
            lod.apply_chunk_update(grass(IVec2::ZERO)).unwrap();
            lod.tick();

            // far away: the origin section leaves the tracked set
            lod.update_viewer(DVec2::new(5000.0, 5000.0));
            assert_eq!(lod.section_state(pos), SectionState::Unloading);
            lod.settle().await;
            assert_eq!(lod.section_state(pos), SectionState::Unloaded);
            assert!(sink.unloads.lock().unwrap().contains(&pos));
            assert!(!lod.render_provider().is_loaded(pos));
            lod.shutdown().await.unwrap();
        }

        let mut lod = orchestrator(dir.path(), Arc::new(RecordingSink::default()));
        assert!(lod.scan_storage().await.unwrap() > 0);
        lod.update_viewer(DVec2::new(8.0, 8.0));
        lod.settle().await;
        let pair = lod.handler().current(pos).unwrap();
        assert_eq!(pair.opaque.len(), 512);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_missing_render_file_rebuilds_from_data() {
        let dir = TempDir::new().unwrap();
        let pos = QuadPos::new(4, 0, 0);
        {
            let mut lod = orchestrator(dir.path(), Arc::new(RecordingSink::default()));
            lod.apply_chunk_update(grass(IVec2::ZERO)).unwrap();
            lod.shutdown().await.unwrap();
        }
        let render_file = crate::streaming::path_for(dir.path(), crate::source::SourceKind::Render, pos);
        std::fs::remove_file(&render_file).unwrap();

        let mut lod = orchestrator(dir.path(), Arc::new(RecordingSink::default()));
        lod.update_viewer(DVec2::new(8.0, 8.0));
        lod.settle().await;
        assert_eq!(lod.section_state(pos), SectionState::Loaded);
        assert_eq!(lod.handler().current(pos).unwrap().opaque.len(), 512);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_rejected_level_does_not_block_others() {
        let dir = TempDir::new().unwrap();
        let mut lod = orchestrator(dir.path(), Arc::new(RecordingSink::default()));
        lod.update_viewer(DVec2::new(8.0, 8.0));
        lod.settle().await;

        // only the finest level samples the broken corner column
        let mut update = ChunkUpdate::full_height(IVec2::ZERO, &LevelContext::default());
        for z in 0..16 {
            for x in 0..16 {
                let depth = if (x, z) == (15, 15) { 0 } else { 2 };
                update.push_span(x, z, "sand", 30, depth, 0);
            }
        }
        assert!(lod.apply_chunk_update(Arc::new(update)).is_err());

        let fine = QuadPos::new(4, 0, 0);
        assert!(!lod.data_provider().is_dirty(fine));
        for coarse in [QuadPos::new(5, 0, 0), QuadPos::new(6, 0, 0)] {
            assert!(lod.data_provider().is_dirty(coarse));
            assert!(lod.render_provider().is_dirty(coarse));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_queued_updates_are_saved_in_background() {
        let dir = TempDir::new().unwrap();
        let mut lod = orchestrator(dir.path(), Arc::new(RecordingSink::default()));
        for x in 0..4 {
            lod.apply_chunk_update(grass(IVec2::new(x, 0))).unwrap();
        }
        assert!(!lod.data_provider().queued_positions().is_empty());

        lod.tick();
        lod.settle().await;

        assert!(lod.draining.is_empty());
        assert!(lod.data_provider().queued_positions().is_empty());
        assert!(lod.render_provider().queued_positions().is_empty());
        assert!(lod.data_provider().dirty_positions().is_empty());
        for pos in [QuadPos::new(4, 3, 0), QuadPos::new(5, 1, 0), QuadPos::new(6, 0, 0)] {
            assert!(lod.data_provider().has_file(pos));
            assert!(lod.render_provider().has_file(pos));
            assert!(!lod.render_provider().is_loaded(pos));
        }
    }
}
