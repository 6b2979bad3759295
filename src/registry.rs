//! Window Record Store
//!
//! Ordered registry of the windows the compositor mirrors from the X
//! server, bottom-to-top in sibling stacking order (first child = bottom,
//! matching XQueryTree). Records live in an arena indexed by a stable
//! handle with a side map from window id, so the frequent restack
//! operations (ConfigureNotify, CirculateNotify) only move handles in the
//! order vector and never invalidate a record.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Server-assigned window id (an X11 XID).
pub type WindowId = u32;
/// Offscreen pixmap id, created via Composite NameWindowPixmap.
pub type PixmapId = u32;
/// GPU-side handle for the pixmap, a GLXPixmap on the live backend.
pub type TextureId = u64;

/// X11 encodes "no sibling below" as id 0; ConfigureNotify uses it to
/// report a window at the bottom of the stack.
pub const SIBLING_NONE: WindowId = 0;

/// The pair of handles linking a window's offscreen contents to a
/// GPU-sampleable texture. Either both exist or neither does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub pixmap: PixmapId,
    pub texture: TextureId,
}

/// Binding state of a tracked window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindingState {
    #[default]
    Unbound,
    Bound(Binding),
}

impl BindingState {
    pub fn is_bound(&self) -> bool {
        matches!(self, BindingState::Bound(_))
    }
}

/// One tracked window. Identity is `window` alone; the registry never
/// holds two records with the same id.
#[derive(Debug)]
pub struct WindowRecord {
    pub window: WindowId,
    pub parent: WindowId,
    pub binding: BindingState,
}

impl WindowRecord {
    fn new(window: WindowId, parent: WindowId) -> Self {
        Self {
            window,
            parent,
            binding: BindingState::Unbound,
        }
    }
}

/// Stable index into the record arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Handle(usize);

/// Where to place a newly inserted record in the stacking order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Topmost (end of the order).
    Top,
    /// Bottommost (front of the order).
    Bottom,
    /// Directly above the named sibling.
    Above(WindowId),
    /// Directly below the named sibling.
    Below(WindowId),
}

/// Circulate placement, mirroring X11's PlaceOnTop/PlaceOnBottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Place {
    Top,
    Bottom,
}

/// The ordered window registry.
#[derive(Debug, Default)]
pub struct WindowRegistry {
    slots: Vec<Option<WindowRecord>>,
    free: Vec<usize>,
    /// Stacking order, bottom to top.
    order: Vec<Handle>,
    by_window: HashMap<WindowId, Handle>,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, window: WindowId) -> bool {
        self.by_window.contains_key(&window)
    }

    /// Insert a new unbound record at the given position.
    pub fn insert(&mut self, window: WindowId, parent: WindowId, position: Position) -> Result<()> {
        if self.contains(window) {
            return Err(Error::DuplicateWindow(window));
        }
        let index = match position {
            Position::Top => self.order.len(),
            Position::Bottom => 0,
            Position::Above(sibling) => self.order_index(sibling)? + 1,
            Position::Below(sibling) => self.order_index(sibling)?,
        };
        let handle = self.alloc(WindowRecord::new(window, parent));
        self.order.insert(index, handle);
        self.by_window.insert(window, handle);
        Ok(())
    }

    /// Look up a record by window id. Absence is a normal outcome.
    pub fn get(&self, window: WindowId) -> Option<&WindowRecord> {
        self.by_window.get(&window).map(|&h| self.record(h))
    }

    pub fn get_mut(&mut self, window: WindowId) -> Option<&mut WindowRecord> {
        match self.by_window.get(&window).copied() {
            Some(handle) => self.slots[handle.0].as_mut(),
            None => None,
        }
    }

    /// Remove a record, returning it (and so ownership of any resources
    /// still recorded in its binding state) to the caller.
    pub fn remove(&mut self, window: WindowId) -> Result<WindowRecord> {
        let handle = self
            .by_window
            .remove(&window)
            .ok_or(Error::UnknownWindow(window))?;
        self.order.retain(|&h| h != handle);
        self.free.push(handle.0);
        let record = self.slots[handle.0].take();
        Ok(record.expect("registry maps window id to an occupied slot"))
    }

    /// Move a record directly above `sibling` in the stacking order.
    /// `SIBLING_NONE` means the server reported the window at the bottom
    /// of the stack.
    pub fn restack_above(&mut self, window: WindowId, sibling: WindowId) -> Result<()> {
        let handle = self.handle(window).ok_or(Error::UnknownWindow(window))?;
        if sibling == SIBLING_NONE {
            let position = self.position(handle);
            self.order.remove(position);
            self.order.insert(0, handle);
            return Ok(());
        }
        let anchor = self
            .handle(sibling)
            .ok_or(Error::UnknownWindowReference(sibling))?;
        if anchor == handle {
            return Ok(());
        }
        let position = self.position(handle);
        self.order.remove(position);
        let anchor_position = self.position(anchor);
        self.order.insert(anchor_position + 1, handle);
        Ok(())
    }

    /// Move a record to the top or bottom of its sibling group (records
    /// sharing its parent), preserving the relative order of every other
    /// record. With no siblings left the order is unchanged.
    pub fn circulate(&mut self, window: WindowId, place: Place) -> Result<()> {
        let handle = self.handle(window).ok_or(Error::UnknownWindow(window))?;
        let parent = self.record(handle).parent;
        let position = self.position(handle);
        self.order.remove(position);
        // A window already above (or below) its whole sibling group stays
        // where it is, so repeated circulates are stable.
        let target = match place {
            Place::Top => self
                .order
                .iter()
                .rposition(|&h| self.record(h).parent == parent)
                .map(|i| (i + 1).max(position)),
            Place::Bottom => self
                .order
                .iter()
                .position(|&h| self.record(h).parent == parent)
                .map(|i| i.min(position)),
        };
        self.order.insert(target.unwrap_or(position), handle);
        Ok(())
    }

    /// Update the parent id only; stacking order is untouched.
    pub fn set_parent(&mut self, window: WindowId, parent: WindowId) -> Result<()> {
        let record = self.get_mut(window).ok_or(Error::UnknownWindow(window))?;
        record.parent = parent;
        Ok(())
    }

    /// Tracked records, bottom to top.
    pub fn iter(&self) -> impl Iterator<Item = &WindowRecord> {
        self.order.iter().map(|&h| self.record(h))
    }

    /// Mutable access to every record, in arena order (not stacking
    /// order). Used for whole-registry sweeps such as shutdown.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut WindowRecord> {
        self.slots.iter_mut().filter_map(|slot| slot.as_mut())
    }

    fn alloc(&mut self, record: WindowRecord) -> Handle {
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(record);
                Handle(index)
            }
            None => {
                self.slots.push(Some(record));
                Handle(self.slots.len() - 1)
            }
        }
    }

    fn handle(&self, window: WindowId) -> Option<Handle> {
        self.by_window.get(&window).copied()
    }

    fn record(&self, handle: Handle) -> &WindowRecord {
        self.slots[handle.0]
            .as_ref()
            .expect("order only holds handles to occupied slots")
    }

    fn position(&self, handle: Handle) -> usize {
        self.order
            .iter()
            .position(|&h| h == handle)
            .expect("tracked handle is present in the order")
    }

    fn order_index(&self, sibling: WindowId) -> Result<usize> {
        let handle = self.handle(sibling).ok_or(Error::UnknownWindow(sibling))?;
        Ok(self.position(handle))
    }
}
