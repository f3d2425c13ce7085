//! Material colours for render sources

use std::collections::HashMap;

use crate::column::MaterialKey;

/// Resolves a material to an ARGB colour; alpha 0 means invisible
pub trait ColorResolver: Send + Sync {
    fn color(&self, material: &MaterialKey) -> u32;
}

/// Table of known colours with a stable hashed fallback for unknown materials
#[derive(Clone, Debug, Default)]
pub struct PaletteColors {
    colors: HashMap<MaterialKey, u32>,
}

impl PaletteColors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_color(mut self, material: &str, argb: u32) -> Self {
        self.colors.insert(MaterialKey::new(material), argb);
        self
    }

    pub fn insert(&mut self, material: &str, argb: u32) {
        self.colors.insert(MaterialKey::new(material), argb);
    }
}

impl ColorResolver for PaletteColors {
    fn color(&self, material: &MaterialKey) -> u32 {
        if material.is_air() {
            return 0;
        }
        if let Some(&argb) = self.colors.get(material) {
            return argb;
        }
        0xFF00_0000 | (fnv1a(material.as_str().as_bytes()) & 0x00FF_FFFF)
    }
}

/// 32-bit FNV-1a; fallback colours end up in render files so the hash must never change
fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811C_9DC5;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}
