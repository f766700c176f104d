//! # Editable slide documents
//!
//! An in-memory document model for slide HTML plus the undo/redo engine
//! that edits it.
//!
//! - [`dom`]: arena DOM, tolerant parser, serializer and CSS paths
//! - [`edit_scripts`]: frame document preparation and clean extraction
//! - [`protocol`]: host/frame messages
//! - [`change_tracking`]: change history, undo/redo and keyboard routing

pub mod change_tracking;
pub mod dom;
pub mod edit_scripts;
pub mod protocol;

pub use change_tracking::{
    shortcut_for, Anchor, Change, ChangeData, ChangeKind, ChangeTracker, EditError, EditorEvent,
    FocusTarget, KeyEvent, Shortcut, ToastLevel, SELECTED_CLASS,
};
pub use dom::{Document, NodeId, NodeKind, EDITOR_CLASS_PREFIX};
pub use edit_scripts::{
    create_enhanced_iframe_content, create_enhanced_iframe_content_from_html,
    extract_modified_content, parse_backend_html, BackendHtml,
};
pub use protocol::{ElementData, ElementRect, FrameMessage, HostMessage};
