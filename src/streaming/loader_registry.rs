//! Version tag to loader lookup
//!
//! Built once at startup and handed to the provider; nothing registers
//! loaders globally.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::Path;

use crate::core::error::{LodError, Result};
use crate::math::QuadPos;
use crate::source::{LodSource, SourceContext, SourceLoader};

pub struct LoaderRegistry<S: LodSource> {
    loaders: BTreeMap<u8, SourceLoader<S>>,
}

impl<S: LodSource> LoaderRegistry<S> {
    /// Registry without any loader
    pub fn empty() -> Self {
        Self { loaders: BTreeMap::new() }
    }

    /// Registry that knows the current on-disk version
    pub fn with_current() -> Self {
        let mut registry = Self::empty();
        registry.register(S::CURRENT_VERSION, S::current_loader());
        registry
    }

    /// Add or replace the loader for `version`
    pub fn register(&mut self, version: u8, loader: SourceLoader<S>) -> &mut Self {
        self.loaders.insert(version, loader);
        self
    }

    pub fn get(&self, version: u8) -> Option<SourceLoader<S>> {
        self.loaders.get(&version).copied()
    }

    pub fn supported_versions(&self) -> Vec<u8> {
        self.loaders.keys().copied().collect()
    }

    /// Run the loader for `version`; unknown versions are a mismatch against `path`
    pub fn load(
        &self,
        version: u8,
        input: &mut dyn Read,
        pos: QuadPos,
        ctx: &SourceContext,
        path: &Path,
    ) -> Result<S> {
        let loader = self.get(version).ok_or_else(|| LodError::VersionMismatch {
            path: path.to_path_buf(),
            found: version,
            supported: self.supported_versions(),
        })?;
        loader(input, pos, ctx)
    }
}

impl<S: LodSource> Clone for LoaderRegistry<S> {
    fn clone(&self) -> Self {
        Self { loaders: self.loaders.clone() }
    }
}

impl<S: LodSource> Default for LoaderRegistry<S> {
    fn default() -> Self {
        Self::with_current()
    }
}

impl<S: LodSource> fmt::Debug for LoaderRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("versions", &self.supported_versions())
            .finish()
    }
}
