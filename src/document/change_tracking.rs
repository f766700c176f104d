//! Undo/redo over an editable slide document.
//!
//! Every edit is recorded as a [`Change`] carrying the forward state
//! (`data`) and enough prior state to revert it (`previous_data`). The
//! history is linear: tracking a change while the cursor is behind the
//! tail discards the redo branch.
//!
//! Elements are identified by their durable `id` attribute. The CSS path
//! recorded with each change is only consulted when the id no longer
//! resolves, and the selection marker after that.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::dom::{Document, NodeId};
use super::edit_scripts::{create_enhanced_iframe_content_from_html, extract_modified_content};
use super::protocol::{ElementData, FrameMessage, HostMessage};
use crate::now_ms;

/// Marker class on the currently selected element.
pub const SELECTED_CLASS: &str = "element-selected";

const ID_PREFIX: &str = "el";

// ---------------------------------------------------------------------------
// Changes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Text,
    Position,
    Style,
    Delete,
    Duplicate,
}

impl ChangeKind {
    pub fn label(self) -> &'static str {
        match self {
            ChangeKind::Text => "text",
            ChangeKind::Position => "position",
            ChangeKind::Style => "style",
            ChangeKind::Delete => "delete",
            ChangeKind::Duplicate => "duplicate",
        }
    }
}

/// Where an element sat in the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub id: Option<String>,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeData {
    Text {
        html: String,
    },
    Position {
        x: f64,
        y: f64,
    },
    ZIndex {
        z_index: Option<String>,
    },
    Removed {
        outer_html: String,
        parent: Anchor,
        next_sibling: Option<Anchor>,
    },
    Clone {
        clone_id: String,
        clone_html: String,
        offset_x: f64,
        offset_y: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub id: String,
    pub element_id: String,
    pub element_path: Option<String>,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub data: Option<ChangeData>,
    pub previous_data: Option<ChangeData>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EditError {
    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("{kind:?} change {change_id} has no usable {field}")]
    MissingData {
        change_id: String,
        kind: ChangeKind,
        field: &'static str,
    },

    #[error("nothing to undo")]
    NothingToUndo,

    #[error("nothing to redo")]
    NothingToRedo,

    #[error("editing mode is off")]
    NotEditing,
}

// ---------------------------------------------------------------------------
// Outbound events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    Success,
    Error,
}

/// Side effects for the host UI, drained with
/// [`ChangeTracker::drain_events`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EditorEvent {
    Toast { level: ToastLevel, message: String },
    ElementSelected { data: ElementData },
    SelectionCleared,
    Frame { message: HostMessage },
}

// ---------------------------------------------------------------------------
// Keyboard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FocusTarget {
    #[default]
    Document,
    TextInput,
    TextArea,
    ContentEditable,
}

impl FocusTarget {
    fn accepts_text(self) -> bool {
        !matches!(self, FocusTarget::Document)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: String,
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
    pub target: FocusTarget,
}

impl KeyEvent {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn meta(mut self) -> Self {
        self.meta = true;
        self
    }

    pub fn shift(mut self) -> Self {
        self.shift = true;
        self
    }

    pub fn in_target(mut self, target: FocusTarget) -> Self {
        self.target = target;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortcut {
    Undo,
    Redo,
}

/// Ctrl/Cmd+Z and Ctrl/Cmd+Shift+Z, only in editing mode and never while
/// a text field has focus.
pub fn shortcut_for(event: &KeyEvent, editing: bool) -> Option<Shortcut> {
    if !editing || event.target.accepts_text() || !(event.ctrl || event.meta) {
        return None;
    }
    if !event.key.eq_ignore_ascii_case("z") {
        return None;
    }
    Some(if event.shift { Shortcut::Redo } else { Shortcut::Undo })
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Undo,
    Redo,
}

#[derive(Debug)]
pub struct ChangeTracker {
    doc: Document,
    history: Vec<Change>,
    /// Number of changes currently applied; the cursor is `applied - 1`.
    applied: usize,
    editing: bool,
    selected: Option<ElementData>,
    outbox: Vec<EditorEvent>,
}

impl ChangeTracker {
    pub fn new(doc: Document) -> Self {
        Self {
            doc,
            history: Vec::new(),
            applied: 0,
            editing: false,
            selected: None,
            outbox: Vec::new(),
        }
    }

    /// Tracker over the frame document built from backend slide HTML.
    pub fn from_backend_html(html: &str) -> Self {
        Self::new(Document::parse(&create_enhanced_iframe_content_from_html(html)))
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Direct access for mutations made outside the tracker (they are not
    /// recorded).
    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    /// Clean markup for persistence.
    pub fn extract_content(&self) -> String {
        extract_modified_content(&self.doc)
    }

    pub fn history(&self) -> &[Change] {
        &self.history
    }

    /// `-1` when nothing is applied.
    pub fn current_history_index(&self) -> isize {
        self.applied as isize - 1
    }

    pub fn can_undo(&self) -> bool {
        self.applied > 0
    }

    pub fn can_redo(&self) -> bool {
        self.applied < self.history.len()
    }

    pub fn is_editing(&self) -> bool {
        self.editing
    }

    pub fn selected(&self) -> Option<&ElementData> {
        self.selected.as_ref()
    }

    pub fn drain_events(&mut self) -> Vec<EditorEvent> {
        std::mem::take(&mut self.outbox)
    }

    pub fn enter_editing(&mut self) {
        self.editing = true;
        let assigned = self.doc.ensure_ids(ID_PREFIX);
        debug!(assigned, "editing mode on");
        self.outbox.push(EditorEvent::Frame {
            message: HostMessage::ToggleEditMode { enabled: true },
        });
    }

    /// Leave editing mode. History is discarded and the selection cleared.
    pub fn exit_editing(&mut self) {
        self.editing = false;
        self.history.clear();
        self.applied = 0;
        self.clear_selection();
        self.outbox.push(EditorEvent::Frame {
            message: HostMessage::ToggleEditMode { enabled: false },
        });
        debug!("editing mode off");
    }

    /// Record a change that has already been applied to the document.
    pub fn track_new_change(
        &mut self,
        element_id: &str,
        kind: ChangeKind,
        data: Option<ChangeData>,
        previous_data: Option<ChangeData>,
    ) -> String {
        if self.history.len() > self.applied {
            debug!(
                discarded = self.history.len() - self.applied,
                "dropping redo branch"
            );
            self.history.truncate(self.applied);
        }
        let element_path = self.doc.find_by_id(element_id).map(|n| self.doc.structural_path(n));
        let change = Change {
            id: format!("change-{}", Uuid::new_v4()),
            element_id: element_id.to_string(),
            element_path,
            kind,
            data,
            previous_data,
            timestamp: now_ms(),
        };
        let id = change.id.clone();
        self.history.push(change);
        self.applied = self.history.len();
        id
    }

    // -- selection ----------------------------------------------------------

    pub fn select_element(&mut self, element_id: &str) -> Result<ElementData, EditError> {
        let node = self
            .doc
            .find_by_id(element_id)
            .ok_or_else(|| EditError::ElementNotFound(element_id.to_string()))?;
        Ok(self.select_node(node))
    }

    /// Apply a message posted by the frame.
    pub fn handle_frame_message(&mut self, message: FrameMessage) {
        match message {
            FrameMessage::ElementSelected { data } => {
                let node = data
                    .id
                    .as_deref()
                    .and_then(|id| self.doc.find_by_id(id))
                    .or_else(|| self.doc.query_path(&data.element_path));
                if let Some(n) = node {
                    self.mark_selected(n);
                }
                self.selected = Some(data);
            }
        }
    }

    fn select_node(&mut self, node: NodeId) -> ElementData {
        self.mark_selected(node);
        let data = ElementData::snapshot(&self.doc, node);
        self.selected = Some(data.clone());
        self.outbox.push(EditorEvent::ElementSelected { data: data.clone() });
        self.outbox.push(EditorEvent::Frame {
            message: HostMessage::SelectElement {
                element_path: data.element_path.clone(),
            },
        });
        data
    }

    fn mark_selected(&mut self, node: NodeId) {
        for el in self.doc.elements() {
            self.doc.remove_class(el, SELECTED_CLASS);
        }
        self.doc.add_class(node, SELECTED_CLASS);
    }

    fn clear_selection(&mut self) {
        for el in self.doc.elements() {
            self.doc.remove_class(el, SELECTED_CLASS);
        }
        self.selected = None;
        self.outbox.push(EditorEvent::SelectionCleared);
    }

    fn sync_selection(&mut self, element_id: &str) {
        match self.doc.find_by_id(element_id) {
            Some(node) => {
                self.select_node(node);
            }
            None => {
                debug!(element_id, "selection target gone; clearing");
                self.clear_selection();
            }
        }
    }

    // -- forward edits ------------------------------------------------------

    fn require_editing(&self) -> Result<(), EditError> {
        if self.editing {
            Ok(())
        } else {
            Err(EditError::NotEditing)
        }
    }

    fn element(&self, element_id: &str) -> Result<NodeId, EditError> {
        self.doc
            .find_by_id(element_id)
            .ok_or_else(|| EditError::ElementNotFound(element_id.to_string()))
    }

    fn anchor(&self, node: NodeId) -> Anchor {
        Anchor {
            id: self.doc.element_id(node).map(str::to_string),
            path: self.doc.structural_path(node),
        }
    }

    pub fn edit_text(&mut self, element_id: &str, html: &str) -> Result<String, EditError> {
        self.require_editing()?;
        let node = self.element(element_id)?;
        let previous = self.doc.inner_html(node);
        self.doc.set_inner_html(node, html);
        let id = self.track_new_change(
            element_id,
            ChangeKind::Text,
            Some(ChangeData::Text { html: html.to_string() }),
            Some(ChangeData::Text { html: previous }),
        );
        self.sync_selection(element_id);
        Ok(id)
    }

    pub fn move_element(&mut self, element_id: &str, x: f64, y: f64) -> Result<String, EditError> {
        self.require_editing()?;
        let node = self.element(element_id)?;
        let prev_x = self.doc.style_px(node, "left").unwrap_or(0.0);
        let prev_y = self.doc.style_px(node, "top").unwrap_or(0.0);
        apply_position(&mut self.doc, node, x, y);
        let id = self.track_new_change(
            element_id,
            ChangeKind::Position,
            Some(ChangeData::Position { x, y }),
            Some(ChangeData::Position { x: prev_x, y: prev_y }),
        );
        self.sync_selection(element_id);
        Ok(id)
    }

    pub fn set_z_index(&mut self, element_id: &str, z_index: Option<&str>) -> Result<String, EditError> {
        self.require_editing()?;
        let node = self.element(element_id)?;
        let previous = self.doc.style(node, "z-index");
        self.doc.set_style(node, "z-index", z_index);
        let id = self.track_new_change(
            element_id,
            ChangeKind::Style,
            Some(ChangeData::ZIndex { z_index: z_index.map(str::to_string) }),
            Some(ChangeData::ZIndex { z_index: previous }),
        );
        self.sync_selection(element_id);
        Ok(id)
    }

    pub fn delete_element(&mut self, element_id: &str) -> Result<String, EditError> {
        self.require_editing()?;
        let node = self.element(element_id)?;
        let parent = self
            .doc
            .parent(node)
            .ok_or_else(|| EditError::ElementNotFound(format!("parent of {element_id}")))?;
        let removed = ChangeData::Removed {
            outer_html: self.doc.outer_html(node),
            parent: self.anchor(parent),
            next_sibling: self.doc.next_element_sibling(node).map(|s| self.anchor(s)),
        };
        let id = self.track_new_change(element_id, ChangeKind::Delete, None, Some(removed));
        self.doc.detach(node);
        self.sync_selection(element_id);
        Ok(id)
    }

    /// Clone an element next to itself, shifted by the given pixel offset.
    /// Returns the clone's id.
    pub fn duplicate_element(
        &mut self,
        element_id: &str,
        offset_x: f64,
        offset_y: f64,
    ) -> Result<String, EditError> {
        self.require_editing()?;
        let node = self.element(element_id)?;
        let outer = self.doc.outer_html(node);
        let clone = self
            .doc
            .create_element_from_html(&outer)
            .ok_or_else(|| EditError::ElementNotFound(element_id.to_string()))?;
        let clone_id = self.doc.unique_id(ID_PREFIX);
        self.doc.set_attr(clone, "id", &clone_id);
        for inner in self.doc.descendant_elements(clone) {
            if self.doc.element_id(inner).is_some() {
                let fresh = self.doc.unique_id(ID_PREFIX);
                self.doc.set_attr(inner, "id", &fresh);
            }
        }
        for el in std::iter::once(clone).chain(self.doc.descendant_elements(clone)) {
            self.doc.remove_class(el, SELECTED_CLASS);
        }
        let clone_html = self.doc.outer_html(clone);

        self.doc.insert_after(node, clone);
        place_with_offset(&mut self.doc, node, clone, offset_x, offset_y);
        self.track_new_change(
            element_id,
            ChangeKind::Duplicate,
            Some(ChangeData::Clone {
                clone_id: clone_id.clone(),
                clone_html,
                offset_x,
                offset_y,
            }),
            None,
        );
        self.sync_selection(&clone_id);
        Ok(clone_id)
    }

    // -- undo / redo --------------------------------------------------------

    /// Revert the change at the cursor. On failure nothing is mutated, the
    /// cursor stays put and an error toast is queued.
    pub fn undo(&mut self) -> Result<(), EditError> {
        if !self.can_undo() {
            return Err(EditError::NothingToUndo);
        }
        let change = self.history[self.applied - 1].clone();
        if let Err(e) = self.revert(&change) {
            return Err(self.report("Undo", &change, e));
        }
        self.applied -= 1;
        info!(change_id = %change.id, kind = ?change.kind, "undo");
        self.toast(ToastLevel::Success, format!("Undid {} change", change.kind.label()));
        self.sync_selection(&selection_target(&change, Direction::Undo));
        Ok(())
    }

    /// Reapply the change after the cursor.
    pub fn redo(&mut self) -> Result<(), EditError> {
        if !self.can_redo() {
            return Err(EditError::NothingToRedo);
        }
        let change = self.history[self.applied].clone();
        if let Err(e) = self.reapply(&change) {
            return Err(self.report("Redo", &change, e));
        }
        self.applied += 1;
        info!(change_id = %change.id, kind = ?change.kind, "redo");
        self.toast(ToastLevel::Success, format!("Redid {} change", change.kind.label()));
        self.sync_selection(&selection_target(&change, Direction::Redo));
        Ok(())
    }

    /// Route a key press. `None` when it is not a shortcut here.
    pub fn handle_key(&mut self, event: &KeyEvent) -> Option<Result<(), EditError>> {
        match shortcut_for(event, self.editing)? {
            Shortcut::Undo => Some(self.undo()),
            Shortcut::Redo => Some(self.redo()),
        }
    }

    fn report(&mut self, op: &str, change: &Change, e: EditError) -> EditError {
        error!(change_id = %change.id, kind = ?change.kind, error = %e, "{op} failed");
        self.toast(ToastLevel::Error, format!("{op} failed: {e}"));
        e
    }

    fn toast(&mut self, level: ToastLevel, message: String) {
        self.outbox.push(EditorEvent::Toast { level, message });
    }

    fn resolve(&self, change: &Change) -> Result<NodeId, EditError> {
        self.doc
            .find_by_id(&change.element_id)
            .or_else(|| change.element_path.as_deref().and_then(|p| self.doc.query_path(p)))
            .or_else(|| self.doc.find_by_class(SELECTED_CLASS))
            .ok_or_else(|| EditError::ElementNotFound(change.element_id.clone()))
    }

    fn resolve_anchor(&self, anchor: &Anchor) -> Option<NodeId> {
        anchor
            .id
            .as_deref()
            .and_then(|id| self.doc.find_by_id(id))
            .or_else(|| self.doc.query_path(&anchor.path))
    }

    fn revert(&mut self, change: &Change) -> Result<(), EditError> {
        let missing = |field| EditError::MissingData {
            change_id: change.id.clone(),
            kind: change.kind,
            field,
        };
        match change.kind {
            ChangeKind::Text => {
                let Some(ChangeData::Text { html }) = &change.previous_data else {
                    return Err(missing("previous html"));
                };
                let node = self.resolve(change)?;
                self.doc.set_inner_html(node, html);
            }
            ChangeKind::Position => {
                let Some(ChangeData::Position { x, y }) = change.previous_data else {
                    return Err(missing("previous position"));
                };
                let node = self.resolve(change)?;
                apply_position(&mut self.doc, node, x, y);
            }
            ChangeKind::Style => {
                let Some(ChangeData::ZIndex { z_index }) = &change.previous_data else {
                    return Err(missing("previous z-index"));
                };
                let node = self.resolve(change)?;
                self.doc.set_style(node, "z-index", z_index.as_deref());
            }
            ChangeKind::Delete => {
                let Some(ChangeData::Removed {
                    outer_html,
                    parent,
                    next_sibling,
                }) = &change.previous_data
                else {
                    return Err(missing("removed element"));
                };
                let parent = self.resolve_anchor(parent).unwrap_or_else(|| self.doc.body());
                let reference = next_sibling
                    .as_ref()
                    .and_then(|a| self.resolve_anchor(a))
                    .filter(|s| self.doc.parent(*s) == Some(parent));
                let restored = self
                    .doc
                    .create_element_from_html(outer_html)
                    .ok_or_else(|| missing("outer html"))?;
                self.doc.insert_before(parent, restored, reference);
            }
            ChangeKind::Duplicate => {
                let Some(ChangeData::Clone { clone_id, .. }) = &change.data else {
                    return Err(missing("clone"));
                };
                let clone = self
                    .doc
                    .find_by_id(clone_id)
                    .ok_or_else(|| EditError::ElementNotFound(clone_id.clone()))?;
                self.doc.detach(clone);
            }
        }
        Ok(())
    }

    fn reapply(&mut self, change: &Change) -> Result<(), EditError> {
        let missing = |field| EditError::MissingData {
            change_id: change.id.clone(),
            kind: change.kind,
            field,
        };
        match change.kind {
            ChangeKind::Text => {
                let Some(ChangeData::Text { html }) = &change.data else {
                    return Err(missing("html"));
                };
                let node = self.resolve(change)?;
                self.doc.set_inner_html(node, html);
            }
            ChangeKind::Position => {
                let Some(ChangeData::Position { x, y }) = change.data else {
                    return Err(missing("position"));
                };
                let node = self.resolve(change)?;
                apply_position(&mut self.doc, node, x, y);
            }
            ChangeKind::Style => {
                let Some(ChangeData::ZIndex { z_index }) = &change.data else {
                    return Err(missing("z-index"));
                };
                let node = self.resolve(change)?;
                self.doc.set_style(node, "z-index", z_index.as_deref());
            }
            ChangeKind::Delete => {
                let node = self.resolve(change)?;
                self.doc.detach(node);
            }
            ChangeKind::Duplicate => {
                let Some(ChangeData::Clone {
                    clone_html,
                    offset_x,
                    offset_y,
                    ..
                }) = &change.data
                else {
                    return Err(missing("clone"));
                };
                let original = self.resolve(change)?;
                let clone = self
                    .doc
                    .create_element_from_html(clone_html)
                    .ok_or_else(|| missing("clone html"))?;
                self.doc.insert_after(original, clone);
                place_with_offset(&mut self.doc, original, clone, *offset_x, *offset_y);
            }
        }
        Ok(())
    }
}

fn selection_target(change: &Change, direction: Direction) -> String {
    match (change.kind, direction, &change.data) {
        (ChangeKind::Duplicate, Direction::Redo, Some(ChangeData::Clone { clone_id, .. })) => {
            clone_id.clone()
        }
        _ => change.element_id.clone(),
    }
}

fn px(v: f64) -> String {
    format!("{v}px")
}

fn apply_position(doc: &mut Document, node: NodeId, x: f64, y: f64) {
    doc.set_style(node, "transform", None);
    doc.set_style(node, "left", Some(&px(x)));
    doc.set_style(node, "top", Some(&px(y)));
}

fn place_with_offset(doc: &mut Document, original: NodeId, clone: NodeId, dx: f64, dy: f64) {
    let x = doc.style_px(original, "left").unwrap_or(0.0) + dx;
    let y = doc.style_px(original, "top").unwrap_or(0.0) + dy;
    doc.set_style(clone, "left", Some(&px(x)));
    doc.set_style(clone, "top", Some(&px(y)));
}
