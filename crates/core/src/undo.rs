//! Undo log of image edits.

use imgview_render::{DynamicImage, Orientation};

/// A reversible edit of a decoded image.
pub trait ImageOperation: Send {
    /// Short description for undo/redo menus.
    fn text(&self) -> String;

    /// Apply the edit.
    fn redo(&mut self, image: &mut DynamicImage);

    /// Revert the edit.
    fn undo(&mut self, image: &mut DynamicImage);

    /// The orientation change this edit performs, when it is nothing but
    /// a rotation or flip. Such edits can be saved losslessly for JPEG.
    fn orientation_change(&self) -> Option<Orientation> {
        None
    }
}

/// Linear undo history with a clean (last-saved) marker.
///
/// Entries below `index` are applied; entries at and above it can be redone.
pub struct UndoStack {
    entries: Vec<Box<dyn ImageOperation>>,
    index: usize,
    clean_index: Option<usize>,
}

impl UndoStack {
    /// Empty stack, clean.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: 0,
            clean_index: Some(0),
        }
    }

    /// Record an operation that was already applied. Drops redo entries.
    pub fn push(&mut self, operation: Box<dyn ImageOperation>) {
        self.entries.truncate(self.index);
        if self.clean_index.is_some_and(|clean| clean > self.index) {
            // The saved state was in the dropped redo branch.
            self.clean_index = None;
        }
        self.entries.push(operation);
        self.index += 1;
    }

    /// Step back and return the operation to revert.
    pub fn undo_entry(&mut self) -> Option<&mut Box<dyn ImageOperation>> {
        if self.index == 0 {
            return None;
        }
        self.index -= 1;
        self.entries.get_mut(self.index)
    }

    /// Step forward and return the operation to reapply.
    pub fn redo_entry(&mut self) -> Option<&mut Box<dyn ImageOperation>> {
        let entry = self.entries.get_mut(self.index)?;
        self.index += 1;
        Some(entry)
    }

    pub fn can_undo(&self) -> bool {
        self.index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.index < self.entries.len()
    }

    /// Text of the operation [`UndoStack::undo_entry`] would return.
    pub fn undo_text(&self) -> Option<String> {
        self.index.checked_sub(1).and_then(|i| self.entries.get(i)).map(|op| op.text())
    }

    /// Text of the operation [`UndoStack::redo_entry`] would return.
    pub fn redo_text(&self) -> Option<String> {
        self.entries.get(self.index).map(|op| op.text())
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `true` when the current state is the last-saved one.
    pub fn is_clean(&self) -> bool {
        self.clean_index == Some(self.index)
    }

    /// Mark the current state as saved.
    pub fn set_clean(&mut self) {
        self.clean_index = Some(self.index);
    }

    /// Drop every entry and mark the empty state clean.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index = 0;
        self.clean_index = Some(0);
    }

    /// Net orientation change between the state at `from` and the current
    /// state. `None` if a non-orientation edit lies in between or `from` is
    /// no longer reachable.
    pub fn orientation_since(&self, from: usize) -> Option<Orientation> {
        if from > self.entries.len() {
            return None;
        }
        let mut net = Orientation::Normal;
        if from <= self.index {
            for entry in &self.entries[from..self.index] {
                net = net.then(entry.orientation_change()?);
            }
        } else {
            for entry in self.entries[self.index..from].iter().rev() {
                net = net.then(entry.orientation_change()?.inverse());
            }
        }
        Some(net)
    }
}

impl Default for UndoStack {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for UndoStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoStack")
            .field("len", &self.entries.len())
            .field("index", &self.index)
            .field("clean_index", &self.clean_index)
            .finish()
    }
}
