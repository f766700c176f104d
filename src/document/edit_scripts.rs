//! Preparing backend slide HTML for in-place editing, and turning the
//! edited document back into clean markup.

use tracing::warn;

use super::dom::{Document, NodeId, EDITOR_CLASS_PREFIX};

pub const EDITOR_STYLES_ID: &str = "editor-styles";
pub const EDITOR_SCRIPT_ID: &str = "editor-script";

/// Outline treatments for hovered, selected and in-edit elements.
pub const EDITOR_STYLES: &str = r#"
.element-hover { outline: 2px dashed #60a5fa !important; outline-offset: 2px; cursor: pointer; }
.element-selected { outline: 2px solid #2563eb !important; outline-offset: 2px; }
.element-editing { outline: 2px solid #16a34a !important; outline-offset: 2px; cursor: text; }
body.element-edit-mode * { user-select: none; }
body.element-edit-mode .element-editing { user-select: text; }
"#;

/// In-frame script: hover highlighting, click-to-select, id assignment and
/// a path generator that ignores `element-*` classes.
pub const EDITOR_SCRIPT: &str = r#"
(function () {
  var editMode = false;
  var seq = 0;

  function ensureId(el) {
    if (!el.id) {
      do { seq += 1; } while (document.getElementById('el-' + seq));
      el.id = 'el-' + seq;
    }
    return el.id;
  }

  function cssPath(el) {
    var parts = [];
    while (el && el.nodeType === 1 && el.tagName.toLowerCase() !== 'html') {
      var tag = el.tagName.toLowerCase();
      if (tag === 'body') { parts.unshift('body'); break; }
      if (el.id) { parts.unshift(tag + '#' + el.id); break; }
      var seg = tag;
      Array.prototype.forEach.call(el.classList, function (c) {
        if (c.indexOf('element-') !== 0) { seg += '.' + c; }
      });
      var parent = el.parentElement;
      if (parent) {
        var idx = Array.prototype.indexOf.call(parent.children, el) + 1;
        seg += ':nth-child(' + idx + ')';
      }
      parts.unshift(seg);
      el = parent;
    }
    return parts.join(' > ');
  }

  var STYLE_KEYS = ['position', 'left', 'top', 'width', 'height', 'z-index', 'transform',
    'color', 'background-color', 'font-size', 'font-family', 'font-weight', 'text-align',
    'opacity', 'display'];

  function snapshot(el) {
    var r = el.getBoundingClientRect();
    var cs = window.getComputedStyle(el);
    var styles = {};
    STYLE_KEYS.forEach(function (k) { styles[k] = cs.getPropertyValue(k); });
    return {
      id: el.id || undefined,
      elementPath: cssPath(el),
      tagName: el.tagName,
      outerHtml: el.outerHTML,
      innerHtml: el.innerHTML,
      textContent: el.textContent,
      rect: { x: r.x, y: r.y, width: r.width, height: r.height },
      computedStyles: styles
    };
  }

  function select(el) {
    document.querySelectorAll('.element-selected').forEach(function (n) {
      n.classList.remove('element-selected');
    });
    el.classList.add('element-selected');
    window.parent.postMessage({ type: 'ELEMENT_SELECTED', data: snapshot(el) }, '*');
  }

  document.addEventListener('mouseover', function (e) {
    if (editMode && e.target !== document.body) { e.target.classList.add('element-hover'); }
  });
  document.addEventListener('mouseout', function (e) {
    e.target.classList && e.target.classList.remove('element-hover');
  });
  document.addEventListener('click', function (e) {
    if (!editMode || e.target === document.body) { return; }
    e.preventDefault();
    ensureId(e.target);
    select(e.target);
  }, true);

  window.addEventListener('message', function (e) {
    var msg = e.data || {};
    if (msg.type === 'TOGGLE_EDIT_MODE') {
      editMode = !!msg.enabled;
      document.body.classList.toggle('element-edit-mode', editMode);
      if (editMode) { document.querySelectorAll('body *').forEach(ensureId); }
    } else if (msg.type === 'SELECT_ELEMENT' && msg.elementPath) {
      var el = document.querySelector(msg.elementPath);
      if (el) { select(el); }
    }
  });
})();
"#;

/// Pieces of a backend-rendered slide document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendHtml {
    pub body_content: String,
    pub styles: Vec<String>,
    pub meta_tags: Vec<String>,
    pub link_tags: Vec<String>,
}

/// Split a full HTML document. Input without a `<body>` is taken whole as
/// body content.
pub fn parse_backend_html(full_html: &str) -> BackendHtml {
    let doc = Document::parse(full_html);
    let Some(body) = doc.find_tag("body") else {
        warn!("backend html has no <body>; using input as body content");
        return BackendHtml {
            body_content: full_html.trim().to_string(),
            ..Default::default()
        };
    };

    let mut parts = BackendHtml {
        body_content: doc.inner_html(body).trim().to_string(),
        ..Default::default()
    };
    for el in doc.elements() {
        if is_inside(&doc, el, body) {
            continue;
        }
        match doc.tag(el) {
            Some("style") => parts.styles.push(doc.outer_html(el)),
            Some("meta") => parts.meta_tags.push(doc.outer_html(el)),
            Some("link") => parts.link_tags.push(doc.outer_html(el)),
            _ => {}
        }
    }
    parts
}

fn is_inside(doc: &Document, node: NodeId, ancestor: NodeId) -> bool {
    let mut cur = doc.parent(node);
    while let Some(n) = cur {
        if n == ancestor {
            return true;
        }
        cur = doc.parent(n);
    }
    false
}

/// Build the frame document: backend head tags, the editor stylesheet and
/// the editor script.
pub fn create_enhanced_iframe_content(parts: &BackendHtml) -> String {
    let mut html = String::from("<!DOCTYPE html><html><head><meta charset=\"utf-8\">");
    for tag in parts
        .meta_tags
        .iter()
        .filter(|m| !m.to_ascii_lowercase().contains("charset"))
        .chain(&parts.link_tags)
        .chain(&parts.styles)
    {
        html.push_str(tag);
    }
    html.push_str(&format!("<style id=\"{EDITOR_STYLES_ID}\">{EDITOR_STYLES}</style>"));
    html.push_str("</head><body>");
    html.push_str(&parts.body_content);
    html.push_str(&format!("<script id=\"{EDITOR_SCRIPT_ID}\">{EDITOR_SCRIPT}</script>"));
    html.push_str("</body></html>");
    html
}

pub fn create_enhanced_iframe_content_from_html(full_html: &str) -> String {
    create_enhanced_iframe_content(&parse_backend_html(full_html))
}

/// Clean standalone markup from an edited document: editor classes,
/// stylesheet and script removed.
pub fn extract_modified_content(doc: &Document) -> String {
    let mut clean = doc.clone();
    for el in clean.elements() {
        clean.retain_classes(el, |c| !c.starts_with(EDITOR_CLASS_PREFIX));
    }
    for el in clean.elements() {
        let injected = match clean.tag(el) {
            Some("style") => clean.element_id(el) == Some(EDITOR_STYLES_ID),
            Some("script") => clean.element_id(el) == Some(EDITOR_SCRIPT_ID),
            _ => false,
        };
        if injected {
            clean.detach(el);
        }
    }

    match clean.find_tag("html") {
        Some(html) => format!("<!DOCTYPE html>{}", clean.outer_html(html)),
        None => format!(
            "<!DOCTYPE html><html><head></head><body>{}</body></html>",
            clean.to_html()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BACKEND: &str = r#"<!DOCTYPE html><html><head><meta charset="utf-8"><meta name="viewport" content="width=1280"><link rel="stylesheet" href="theme.css"><style>.slide { width: 1280px; }</style></head><body><div class="slide"><h1>Title</h1></div></body></html>"#;

    #[test]
    fn splits_backend_document() {
        let parts = parse_backend_html(BACKEND);
        assert_eq!(parts.body_content, r#"<div class="slide"><h1>Title</h1></div>"#);
        assert_eq!(parts.styles, vec!["<style>.slide { width: 1280px; }</style>"]);
        assert_eq!(parts.meta_tags.len(), 2);
        assert_eq!(parts.link_tags, vec![r#"<link rel="stylesheet" href="theme.css">"#]);
    }

    #[test]
    fn fragment_falls_back_to_body_content() {
        let parts = parse_backend_html("  <div>just a fragment</div> ");
        assert_eq!(parts.body_content, "<div>just a fragment</div>");
        assert!(parts.styles.is_empty());
    }

    #[test]
    fn enhanced_content_carries_editor_assets() {
        let html = create_enhanced_iframe_content_from_html(BACKEND);
        assert!(html.contains(r#"<style id="editor-styles">"#));
        assert!(html.contains(r#"<script id="editor-script">"#));
        assert!(html.contains(r#"<link rel="stylesheet" href="theme.css">"#));
        assert!(html.contains("<h1>Title</h1>"));
        assert_eq!(html.matches("charset").count(), 1);
    }

    #[test]
    fn extract_strips_editor_artifacts() {
        let html = create_enhanced_iframe_content_from_html(BACKEND);
        let mut doc = Document::parse(&html);
        let h1 = doc.find_tag("h1").unwrap();
        doc.add_class(h1, "element-selected");
        let body = doc.body();
        doc.add_class(body, "element-edit-mode");

        let out = extract_modified_content(&doc);
        assert!(out.starts_with("<!DOCTYPE html>"));
        assert!(!out.contains("element-"));
        assert!(!out.contains("editor-styles"));
        assert!(!out.contains("editor-script"));
        assert!(out.contains(".slide { width: 1280px; }"));
        assert!(out.contains("<body><div class=\"slide\"><h1>Title</h1></div></body>"));
    }
}
