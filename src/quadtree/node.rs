//! Quad-tree node

use crate::math::QuadPos;

/// A single node; children are materialized lazily
#[derive(Debug)]
pub struct QuadNode<T> {
    pos: QuadPos,
    value: Option<T>,
    children: Option<Box<[Option<QuadNode<T>>; 4]>>,
}

impl<T> QuadNode<T> {
    pub(crate) fn new(pos: QuadPos) -> Self {
        Self {
            pos,
            value: None,
            children: None,
        }
    }

    pub fn pos(&self) -> QuadPos {
        self.pos
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn value_mut(&mut self) -> Option<&mut T> {
        self.value.as_mut()
    }

    pub(crate) fn replace_value(&mut self, value: Option<T>) -> Option<T> {
        std::mem::replace(&mut self.value, value)
    }

    /// Materialized child in slot `index`
    pub fn child(&self, index: u8) -> Option<&QuadNode<T>> {
        self.children.as_ref()?.get(index as usize)?.as_ref()
    }

    pub(crate) fn child_mut(&mut self, index: u8) -> Option<&mut QuadNode<T>> {
        self.children.as_mut()?.get_mut(index as usize)?.as_mut()
    }

    /// True if slot `index` holds a node
    pub fn has_child(&self, index: u8) -> bool {
        self.child(index).is_some()
    }

    pub fn has_children(&self) -> bool {
        self.children
            .as_ref()
            .is_some_and(|c| c.iter().any(Option::is_some))
    }

    /// Child in slot `index`, created on first access
    ///
    /// The caller guarantees `self.pos.detail > 0` and that the child is in bounds.
    pub(crate) fn child_or_create(&mut self, index: u8, child_pos: QuadPos) -> &mut QuadNode<T> {
        let children = self.children.get_or_insert_with(|| Box::new([None, None, None, None]));
        children[index as usize].get_or_insert_with(|| QuadNode::new(child_pos))
    }

    pub(crate) fn take_child(&mut self, index: u8) -> Option<QuadNode<T>> {
        self.children.as_mut()?.get_mut(index as usize)?.take()
    }

    /// Remove empty child subtrees; returns true if this node holds nothing
    pub(crate) fn prune(&mut self) -> bool {
        if let Some(children) = self.children.as_mut() {
            for slot in children.iter_mut() {
                if slot.as_mut().is_some_and(|c| c.prune()) {
                    *slot = None;
                }
            }
            if children.iter().all(Option::is_none) {
                self.children = None;
            }
        }
        self.value.is_none() && self.children.is_none()
    }

    /// Move every value of this subtree into `out`
    pub(crate) fn drain_into(mut self, out: &mut Vec<(QuadPos, T)>) {
        if let Some(value) = self.value.take() {
            out.push((self.pos, value));
        }
        if let Some(children) = self.children.take() {
            let children: [Option<QuadNode<T>>; 4] = *children;
            for child in children.into_iter().flatten() {
                child.drain_into(out);
            }
        }
    }
}
