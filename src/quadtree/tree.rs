//! Sparse quad-tree over a movable square area

use std::collections::BTreeMap;

use glam::IVec2;

use super::node::QuadNode;
use crate::core::error::{LodError, Result};
use crate::math::{BlockRect, QuadPos, MAX_DETAIL};

/// Sparse 4-ary tree keyed by [`QuadPos`]
///
/// The covered area is a square of `width` blocks centred on `center`, tiled by
/// root nodes at `max_detail`. Nodes below `max_detail` exist only once
/// something was stored at or beneath them; nodes at `min_detail` never get
/// children.
pub struct QuadTree<T> {
    roots: BTreeMap<QuadPos, QuadNode<T>>,
    center: IVec2,
    width: i32,
    min_detail: u8,
    max_detail: u8,
}

impl<T> QuadTree<T> {
    /// Create an empty tree
    ///
    /// # Arguments
    /// * `center` - Centre of the covered area in blocks
    /// * `width` - Side length of the covered area in blocks
    /// * `min_detail` - Leaf detail level
    /// * `max_detail` - Root detail level
    pub fn new(center: IVec2, width: i32, min_detail: u8, max_detail: u8) -> Result<Self> {
        if min_detail > max_detail || max_detail > MAX_DETAIL {
            return Err(LodError::InvalidLevel(format!(
                "tree levels {}..={} are not ordered within 0..={}",
                min_detail, max_detail, MAX_DETAIL
            )));
        }
        if width <= 0 {
            return Err(LodError::InvalidLevel(format!("tree width {} must be positive", width)));
        }
        Ok(Self {
            roots: BTreeMap::new(),
            center,
            width,
            min_detail,
            max_detail,
        })
    }

    pub fn min_detail(&self) -> u8 {
        self.min_detail
    }

    pub fn max_detail(&self) -> u8 {
        self.max_detail
    }

    pub fn center(&self) -> IVec2 {
        self.center
    }

    /// Covered area in blocks
    pub fn bounds(&self) -> BlockRect {
        BlockRect::centered(self.center, self.width)
    }

    /// True if `pos` is a valid node position: detail within range and footprint inside the area
    pub fn is_in_bounds(&self, pos: QuadPos) -> bool {
        pos.detail >= self.min_detail
            && pos.detail <= self.max_detail
            && pos.block_rect().intersects(&self.bounds())
    }

    /// Root positions tiling the covered area, in ascending order
    pub fn root_positions(&self) -> Vec<QuadPos> {
        let bounds = self.bounds();
        let lo = QuadPos::from_block(self.max_detail, bounds.min.x, bounds.min.y);
        let hi = QuadPos::from_block(self.max_detail, bounds.max.x - 1, bounds.max.y - 1);

        let mut out = Vec::new();
        for x in lo.x..=hi.x {
            for z in lo.z..=hi.z {
                out.push(QuadPos::new(self.max_detail, x, z));
            }
        }
        out
    }

    fn check(&self, pos: QuadPos) -> Result<()> {
        if pos.detail < self.min_detail || pos.detail > self.max_detail {
            return Err(LodError::InvalidLevel(format!(
                "{} is outside tree levels {}..={}",
                pos, self.min_detail, self.max_detail
            )));
        }
        if !pos.block_rect().intersects(&self.bounds()) {
            return Err(LodError::OutOfBounds(pos));
        }
        Ok(())
    }

    /// Materialized node at `pos`
    pub fn node(&self, pos: QuadPos) -> Option<&QuadNode<T>> {
        self.check(pos).ok()?;
        let root_pos = pos.convert_up(self.max_detail).ok()?;
        let mut node = self.roots.get(&root_pos)?;
        for detail in (pos.detail..self.max_detail).rev() {
            let step = pos.convert_up(detail).ok()?;
            node = node.child(step.child_index_within_parent())?;
        }
        Some(node)
    }

    fn node_mut(&mut self, pos: QuadPos) -> Option<&mut QuadNode<T>> {
        self.check(pos).ok()?;
        let root_pos = pos.convert_up(self.max_detail).ok()?;
        let mut node = self.roots.get_mut(&root_pos)?;
        for detail in (pos.detail..self.max_detail).rev() {
            let step = pos.convert_up(detail).ok()?;
            node = node.child_mut(step.child_index_within_parent())?;
        }
        Some(node)
    }

    pub fn get(&self, pos: QuadPos) -> Option<&T> {
        self.node(pos)?.value()
    }

    pub fn get_mut(&mut self, pos: QuadPos) -> Option<&mut T> {
        self.node_mut(pos)?.value_mut()
    }

    pub fn contains(&self, pos: QuadPos) -> bool {
        self.get(pos).is_some()
    }

    /// Store a value, materializing the path from the root; returns the previous value
    pub fn set(&mut self, pos: QuadPos, value: T) -> Result<Option<T>> {
        self.check(pos)?;
        let root_pos = pos.convert_up(self.max_detail)?;
        let mut node = self
            .roots
            .entry(root_pos)
            .or_insert_with(|| QuadNode::new(root_pos));
        for detail in (pos.detail..self.max_detail).rev() {
            let step = pos.convert_up(detail)?;
            node = node.child_or_create(step.child_index_within_parent(), step);
        }
        Ok(node.replace_value(Some(value)))
    }

    /// Remove a value, pruning nodes left empty
    pub fn remove(&mut self, pos: QuadPos) -> Option<T> {
        let removed = self.node_mut(pos)?.replace_value(None);
        if let Ok(root_pos) = pos.convert_up(self.max_detail) {
            if self.roots.get_mut(&root_pos).is_some_and(|root| root.prune()) {
                self.roots.remove(&root_pos);
            }
        }
        removed
    }

    /// Child slots of `pos` that lie inside the covered area
    ///
    /// With `include_empty` every in-bounds slot is returned, otherwise only
    /// slots holding a materialized node. Nodes at `min_detail` have none.
    pub fn child_indices(&self, pos: QuadPos, include_empty: bool) -> Vec<u8> {
        if pos.detail <= self.min_detail || self.check(pos).is_err() {
            return Vec::new();
        }
        let node = self.node(pos);
        (0..4u8)
            .filter(|&i| {
                let in_bounds = pos
                    .convert_down_child(i)
                    .map(|child| self.is_in_bounds(child))
                    .unwrap_or(false);
                in_bounds && (include_empty || node.is_some_and(|n| n.has_child(i)))
            })
            .collect()
    }

    /// Depth-first iteration over every stored value
    pub fn iter(&self) -> Iter<'_, T> {
        self.iter_to_detail(self.min_detail)
    }

    /// Depth-first iteration that does not descend below `lowest_detail`
    pub fn iter_to_detail(&self, lowest_detail: u8) -> Iter<'_, T> {
        let mut stack: Vec<&QuadNode<T>> = self.roots.values().collect();
        stack.reverse();
        Iter {
            stack,
            bounds: self.bounds(),
            lowest_detail: lowest_detail.max(self.min_detail),
        }
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Move the covered area, returning every value that fell outside it
    pub fn set_center(&mut self, center: IVec2) -> Vec<(QuadPos, T)> {
        let mut removed = Vec::new();
        if center == self.center {
            return removed;
        }
        self.center = center;
        let bounds = self.bounds();

        let outside: Vec<QuadPos> = self
            .roots
            .keys()
            .filter(|p| !p.block_rect().intersects(&bounds))
            .copied()
            .collect();
        for pos in outside {
            if let Some(root) = self.roots.remove(&pos) {
                root.drain_into(&mut removed);
            }
        }

        let mut emptied = Vec::new();
        for (pos, root) in self.roots.iter_mut() {
            drain_outside(root, &bounds, &mut removed);
            if root.prune() {
                emptied.push(*pos);
            }
        }
        for pos in emptied {
            self.roots.remove(&pos);
        }

        removed
    }
}

fn drain_outside<T>(node: &mut QuadNode<T>, bounds: &BlockRect, out: &mut Vec<(QuadPos, T)>) {
    for i in 0..4u8 {
        let inside = match node.child(i) {
            Some(child) => child.pos().block_rect().intersects(bounds),
            None => continue,
        };
        if inside {
            if let Some(child) = node.child_mut(i) {
                drain_outside(child, bounds, out);
            }
        } else if let Some(child) = node.take_child(i) {
            child.drain_into(out);
        }
    }
}

/// Depth-first iterator over `(position, value)` pairs
pub struct Iter<'a, T> {
    stack: Vec<&'a QuadNode<T>>,
    bounds: BlockRect,
    lowest_detail: u8,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (QuadPos, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            if node.pos().detail > self.lowest_detail {
                for i in (0..4u8).rev() {
                    if let Some(child) = node.child(i) {
                        if child.pos().block_rect().intersects(&self.bounds) {
                            self.stack.push(child);
                        }
                    }
                }
            }
            if let Some(value) = node.value() {
                return Some((node.pos(), value));
            }
        }
        None
    }
}
