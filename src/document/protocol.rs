//! Messages exchanged between the host and the sandboxed slide frame.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::dom::{Document, NodeId};

/// Inline style properties reported with a selection.
pub const SELECTION_STYLE_PROPERTIES: &[&str] = &[
    "position",
    "left",
    "top",
    "width",
    "height",
    "z-index",
    "transform",
    "color",
    "background-color",
    "font-size",
    "font-family",
    "font-weight",
    "text-align",
    "opacity",
    "display",
];

/// Host → frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostMessage {
    ToggleEditMode {
        enabled: bool,
    },
    SelectElement {
        #[serde(rename = "elementPath")]
        element_path: String,
    },
}

/// Frame → host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameMessage {
    ElementSelected { data: ElementData },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Snapshot of a selected element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub element_path: String,
    pub tag_name: String,
    pub outer_html: String,
    pub inner_html: String,
    pub text_content: String,
    pub rect: ElementRect,
    #[serde(default)]
    pub computed_styles: BTreeMap<String, String>,
}

impl ElementData {
    /// Snapshot `node`. Geometry comes from inline pixel styles; missing
    /// values read as zero.
    pub fn snapshot(doc: &Document, node: NodeId) -> Self {
        let rect = ElementRect {
            x: doc.style_px(node, "left").unwrap_or(0.0),
            y: doc.style_px(node, "top").unwrap_or(0.0),
            width: doc.style_px(node, "width").unwrap_or(0.0),
            height: doc.style_px(node, "height").unwrap_or(0.0),
        };
        let computed_styles = SELECTION_STYLE_PROPERTIES
            .iter()
            .filter_map(|p| doc.style(node, p).map(|v| (p.to_string(), v)))
            .collect();
        Self {
            id: doc.element_id(node).map(str::to_string),
            element_path: doc.css_path(node),
            tag_name: doc.tag(node).unwrap_or_default().to_ascii_uppercase(),
            outer_html: doc.outer_html(node),
            inner_html: doc.inner_html(node),
            text_content: doc.text_content(node),
            rect,
            computed_styles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn host_messages_use_screaming_tags() {
        let toggle = serde_json::to_value(HostMessage::ToggleEditMode { enabled: true }).unwrap();
        assert_eq!(toggle, json!({"type": "TOGGLE_EDIT_MODE", "enabled": true}));

        let select = serde_json::to_value(HostMessage::SelectElement {
            element_path: "div#a".into(),
        })
        .unwrap();
        assert_eq!(select, json!({"type": "SELECT_ELEMENT", "elementPath": "div#a"}));
    }

    #[test]
    fn element_selected_parses_from_frame_json() {
        let raw = json!({
            "type": "ELEMENT_SELECTED",
            "data": {
                "id": "title",
                "elementPath": "h1#title",
                "tagName": "H1",
                "outerHtml": "<h1 id=\"title\">Hi</h1>",
                "innerHtml": "Hi",
                "textContent": "Hi",
                "rect": {"x": 1.0, "y": 2.0, "width": 3.0, "height": 4.0}
            }
        });
        let FrameMessage::ElementSelected { data } = serde_json::from_value(raw).unwrap();
        assert_eq!(data.id.as_deref(), Some("title"));
        assert_eq!(data.rect.height, 4.0);
        assert!(data.computed_styles.is_empty());
    }

    #[test]
    fn snapshot_reads_inline_geometry() {
        let doc = Document::parse(
            r#"<body><div id="box" style="left: 40px; top: 12px; width: 100px; color: red">Hi</div></body>"#,
        );
        let node = doc.find_by_id("box").unwrap();
        let snap = ElementData::snapshot(&doc, node);
        assert_eq!(snap.tag_name, "DIV");
        assert_eq!(snap.element_path, "div#box");
        assert_eq!(snap.rect, ElementRect { x: 40.0, y: 12.0, width: 100.0, height: 0.0 });
        assert_eq!(snap.computed_styles.get("color").map(String::as_str), Some("red"));
        assert!(!snap.computed_styles.contains_key("font-size"));
    }
}
