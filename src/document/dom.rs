//! Arena-backed HTML document.
//!
//! Nodes live in a `Vec` and are addressed by [`NodeId`]; detached nodes
//! stay in the arena so a handle never dangles. Elements are also indexed
//! by their `id` attribute, which is the primary identity for edits.
//! Structural CSS paths exist for interop with markup produced elsewhere.
//!
//! The parser is tolerant: it never fails, keeps attribute values and text
//! verbatim (no entity decoding), and closes unbalanced tags at the end.

use std::collections::HashMap;

/// Prefix of classes injected by the editor. Stripped from paths and from
/// persisted markup.
pub const EDITOR_CLASS_PREFIX: &str = "element-";

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea", "title"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Document,
    Doctype(String),
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    ids: HashMap<String, NodeId>,
    id_seq: u64,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Document,
                parent: None,
                children: Vec::new(),
            }],
            root: NodeId(0),
            ids: HashMap::new(),
            id_seq: 0,
        }
    }

    pub fn parse(html: &str) -> Self {
        let mut doc = Self::new();
        let root = doc.root;
        let nodes = doc.parse_fragment(html);
        for n in nodes {
            doc.append_child(root, n);
        }
        doc
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    // -----------------------------------------------------------------------
    // Node access
    // -----------------------------------------------------------------------

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.0].kind {
            NodeKind::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.tag(id).is_some()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn element_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id).iter().copied().filter(|c| self.is_element(*c))
    }

    pub fn next_element_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|c| *c == id)?;
        siblings[pos + 1..].iter().copied().find(|c| self.is_element(*c))
    }

    /// Reachable from the document root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut cur = Some(id);
        while let Some(n) = cur {
            if n == self.root {
                return true;
            }
            cur = self.parent(n);
        }
        false
    }

    /// Attached elements in document order.
    pub fn elements(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_elements(self.root, &mut out);
        out
    }

    /// Elements below `id` in document order, attached or not.
    pub fn descendant_elements(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_elements(id, &mut out);
        out
    }

    fn collect_elements(&self, id: NodeId, out: &mut Vec<NodeId>) {
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(n) = stack.pop() {
            if self.is_element(n) {
                out.push(n);
            }
            stack.extend(self.children(n).iter().rev());
        }
    }

    pub fn find_tag(&self, tag: &str) -> Option<NodeId> {
        self.elements().into_iter().find(|e| self.tag(*e) == Some(tag))
    }

    /// The `<body>` element, or the root for fragments.
    pub fn body(&self) -> NodeId {
        self.find_tag("body").unwrap_or(self.root)
    }

    pub fn head(&self) -> Option<NodeId> {
        self.find_tag("head")
    }

    // -----------------------------------------------------------------------
    // Attributes, classes and inline styles
    // -----------------------------------------------------------------------

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        match &self.nodes[id.0].kind {
            NodeKind::Element { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let NodeKind::Element { attrs, .. } = &mut self.nodes[id.0].kind {
            match attrs.iter_mut().find(|(k, _)| k == name) {
                Some(slot) => slot.1 = value.to_string(),
                None => attrs.push((name.to_string(), value.to_string())),
            }
        }
        if name == "id" {
            self.ids.insert(value.to_string(), id);
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) {
        if let NodeKind::Element { attrs, .. } = &mut self.nodes[id.0].kind {
            attrs.retain(|(k, _)| k != name);
        }
    }

    pub fn element_id(&self, id: NodeId) -> Option<&str> {
        self.attr(id, "id").filter(|s| !s.is_empty())
    }

    pub fn classes(&self, id: NodeId) -> Vec<String> {
        self.attr(id, "class")
            .map(|c| c.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.classes(id).iter().any(|c| c == class)
    }

    pub fn add_class(&mut self, id: NodeId, class: &str) {
        let mut classes = self.classes(id);
        if !classes.iter().any(|c| c == class) {
            classes.push(class.to_string());
            self.set_attr(id, "class", &classes.join(" "));
        }
    }

    pub fn remove_class(&mut self, id: NodeId, class: &str) {
        self.retain_classes(id, |c| c != class);
    }

    /// Keep only classes matching `keep`; drops the attribute when empty.
    pub fn retain_classes(&mut self, id: NodeId, keep: impl Fn(&str) -> bool) {
        if self.attr(id, "class").is_none() {
            return;
        }
        let classes: Vec<String> = self.classes(id).into_iter().filter(|c| keep(c)).collect();
        if classes.is_empty() {
            self.remove_attr(id, "class");
        } else {
            self.set_attr(id, "class", &classes.join(" "));
        }
    }

    fn style_decls(&self, id: NodeId) -> Vec<(String, String)> {
        self.attr(id, "style")
            .map(|s| {
                s.split(';')
                    .filter_map(|decl| {
                        let (k, v) = decl.split_once(':')?;
                        let k = k.trim().to_ascii_lowercase();
                        let v = v.trim();
                        (!k.is_empty() && !v.is_empty()).then(|| (k, v.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Inline style property value.
    pub fn style(&self, id: NodeId, prop: &str) -> Option<String> {
        self.style_decls(id)
            .into_iter()
            .rev()
            .find(|(k, _)| k == prop)
            .map(|(_, v)| v)
    }

    /// Set (`Some`) or clear (`None`) an inline style property. An existing
    /// declaration keeps its place; a new one is appended.
    pub fn set_style(&mut self, id: NodeId, prop: &str, value: Option<&str>) {
        let mut decls = self.style_decls(id);
        match value {
            Some(v) => match decls.iter_mut().find(|(k, _)| k == prop) {
                Some(slot) => slot.1 = v.to_string(),
                None => decls.push((prop.to_string(), v.to_string())),
            },
            None => decls.retain(|(k, _)| k != prop),
        }
        if decls.is_empty() {
            self.remove_attr(id, "style");
        } else {
            let s = decls
                .iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect::<Vec<_>>()
                .join("; ");
            self.set_attr(id, "style", &format!("{s};"));
        }
    }

    /// Pixel value of an inline style property (`"12.5px"` → 12.5).
    pub fn style_px(&self, id: NodeId, prop: &str) -> Option<f64> {
        let v = self.style(id, prop)?;
        v.trim().trim_end_matches("px").trim().parse().ok()
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// Attached element with the given `id` attribute.
    pub fn find_by_id(&self, element_id: &str) -> Option<NodeId> {
        if let Some(&n) = self.ids.get(element_id) {
            if self.element_id(n) == Some(element_id) && self.is_attached(n) {
                return Some(n);
            }
        }
        self.elements()
            .into_iter()
            .find(|e| self.element_id(*e) == Some(element_id))
    }

    /// First attached element carrying `class`.
    pub fn find_by_class(&self, class: &str) -> Option<NodeId> {
        self.elements().into_iter().find(|e| self.has_class(*e, class))
    }

    /// Give every element under `<body>` that lacks an id a unique one.
    pub fn ensure_ids(&mut self, prefix: &str) -> usize {
        let body = self.body();
        let mut targets = Vec::new();
        self.collect_elements(body, &mut targets);
        let mut assigned = 0;
        for e in targets {
            if self.element_id(e).is_none() && !matches!(self.tag(e), Some("script" | "style")) {
                let new_id = self.unique_id(prefix);
                self.set_attr(e, "id", &new_id);
                assigned += 1;
            }
        }
        assigned
    }

    /// An id not used by any element.
    pub fn unique_id(&mut self, prefix: &str) -> String {
        loop {
            self.id_seq += 1;
            let candidate = format!("{prefix}-{}", self.id_seq);
            // Every id attribute ever set or parsed is in the index.
            if !self.ids.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Tree mutation
    // -----------------------------------------------------------------------

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    /// Remove `id` from its parent. The node and its subtree stay in the arena.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|c| *c != id);
        }
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    /// Insert `child` before `reference`, or append when `reference` is not
    /// a child of `parent`.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        self.detach(child);
        let pos = reference.and_then(|r| self.nodes[parent.0].children.iter().position(|c| *c == r));
        self.nodes[child.0].parent = Some(parent);
        match pos {
            Some(p) => self.nodes[parent.0].children.insert(p, child),
            None => self.nodes[parent.0].children.push(child),
        }
    }

    /// Insert `child` immediately after `node`. Returns false when `node`
    /// has no parent.
    pub fn insert_after(&mut self, node: NodeId, child: NodeId) -> bool {
        let Some(parent) = self.parent(node) else {
            return false;
        };
        self.detach(child);
        let pos = self.nodes[parent.0]
            .children
            .iter()
            .position(|c| *c == node)
            .map(|p| p + 1)
            .unwrap_or(self.nodes[parent.0].children.len());
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.insert(pos, child);
        true
    }

    /// Parse HTML into the arena without attaching it.
    pub fn parse_fragment(&mut self, html: &str) -> Vec<NodeId> {
        let holder = self.alloc(NodeKind::Document);
        Parser::new(self, holder, html).run();
        let children = self.nodes[holder.0].children.clone();
        for c in &children {
            self.nodes[c.0].parent = None;
        }
        self.nodes[holder.0].children.clear();
        children
    }

    /// First element parsed from `html`, detached.
    pub fn create_element_from_html(&mut self, html: &str) -> Option<NodeId> {
        self.parse_fragment(html).into_iter().find(|n| self.is_element(*n))
    }

    pub fn set_inner_html(&mut self, id: NodeId, html: &str) {
        let old: Vec<NodeId> = self.nodes[id.0].children.clone();
        for c in old {
            self.detach(c);
        }
        for n in self.parse_fragment(html) {
            self.append_child(id, n);
        }
    }

    // -----------------------------------------------------------------------
    // Serialization
    // -----------------------------------------------------------------------

    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out);
        out
    }

    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        for &c in self.children(id) {
            self.write_node(c, &mut out);
        }
        out
    }

    pub fn to_html(&self) -> String {
        self.inner_html(self.root)
    }

    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_text(id, &mut out);
        out
    }

    fn write_text(&self, id: NodeId, out: &mut String) {
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            match &self.nodes[n.0].kind {
                NodeKind::Text(t) => out.push_str(t),
                _ => stack.extend(self.children(n).iter().rev()),
            }
        }
    }

    /// Serialize with an explicit stack so deeply nested input cannot
    /// overflow the call stack.
    fn write_node(&self, id: NodeId, out: &mut String) {
        enum Step<'a> {
            Open(NodeId),
            Close(&'a str),
        }
        let mut stack = vec![Step::Open(id)];
        while let Some(step) = stack.pop() {
            let n = match step {
                Step::Close(tag) => {
                    out.push_str("</");
                    out.push_str(tag);
                    out.push('>');
                    continue;
                }
                Step::Open(n) => n,
            };
            match &self.nodes[n.0].kind {
                NodeKind::Document => {
                    stack.extend(self.children(n).iter().rev().map(|c| Step::Open(*c)));
                }
                NodeKind::Doctype(d) => {
                    out.push_str("<!");
                    out.push_str(d);
                    out.push('>');
                }
                NodeKind::Text(t) => out.push_str(t),
                NodeKind::Comment(c) => {
                    out.push_str("<!--");
                    out.push_str(c);
                    out.push_str("-->");
                }
                NodeKind::Element { tag, attrs } => {
                    out.push('<');
                    out.push_str(tag);
                    for (k, v) in attrs {
                        out.push(' ');
                        out.push_str(k);
                        out.push_str("=\"");
                        out.push_str(&v.replace('"', "&quot;"));
                        out.push('"');
                    }
                    out.push('>');
                    if VOID_ELEMENTS.contains(&tag.as_str()) {
                        continue;
                    }
                    stack.push(Step::Close(tag));
                    stack.extend(self.children(n).iter().rev().map(|c| Step::Open(*c)));
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // CSS paths
    // -----------------------------------------------------------------------

    /// Selector path from `<body>` (or the nearest ancestor with an id) to
    /// `id`. Editor classes are left out so the path stays valid outside
    /// the editor.
    pub fn css_path(&self, id: NodeId) -> String {
        self.build_path(id, true)
    }

    /// Like [`css_path`](Self::css_path) but never anchored on the element's
    /// own id, so it still resolves after that id is changed or removed.
    pub fn structural_path(&self, id: NodeId) -> String {
        self.build_path(id, false)
    }

    fn build_path(&self, id: NodeId, anchor_on_self: bool) -> String {
        let mut segments = Vec::new();
        let mut cur = Some(id);
        while let Some(n) = cur {
            let Some(tag) = self.tag(n) else { break };
            if tag == "html" {
                break;
            }
            if tag == "body" {
                segments.push("body".to_string());
                break;
            }
            if let Some(eid) = self.element_id(n).filter(|_| anchor_on_self || n != id) {
                segments.push(format!("{tag}#{eid}"));
                break;
            }
            let mut seg = tag.to_string();
            for class in self.classes(n) {
                if !class.starts_with(EDITOR_CLASS_PREFIX) {
                    seg.push('.');
                    seg.push_str(&class);
                }
            }
            if let Some(parent) = self.parent(n) {
                let index = self
                    .element_children(parent)
                    .position(|c| c == n)
                    .map(|p| p + 1)
                    .unwrap_or(1);
                seg.push_str(&format!(":nth-child({index})"));
            }
            segments.push(seg);
            cur = self.parent(n);
        }
        segments.reverse();
        segments.join(" > ")
    }

    /// Resolve a path produced by [`css_path`](Self::css_path) (child
    /// combinators, tag, `#id`, `.class` and `:nth-child(n)`).
    pub fn query_path(&self, path: &str) -> Option<NodeId> {
        let compounds: Vec<Compound> = path
            .split('>')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Compound::parse)
            .collect::<Option<_>>()?;
        let (first, rest) = compounds.split_first()?;

        let starts: Vec<NodeId> = match &first.id {
            Some(eid) => self.find_by_id(eid).into_iter().collect(),
            None => self.elements(),
        };
        starts
            .into_iter()
            .filter(|s| self.matches(*s, first))
            .find_map(|s| self.descend(s, rest))
    }

    /// Depth-first match of `rest` below `node`, first hit in document order.
    fn descend(&self, node: NodeId, rest: &[Compound]) -> Option<NodeId> {
        let mut stack = vec![(node, 0usize)];
        while let Some((n, depth)) = stack.pop() {
            let Some(head) = rest.get(depth) else {
                return Some(n);
            };
            let hits: Vec<NodeId> = self.element_children(n).filter(|c| self.matches(*c, head)).collect();
            stack.extend(hits.into_iter().rev().map(|c| (c, depth + 1)));
        }
        None
    }

    fn matches(&self, node: NodeId, c: &Compound) -> bool {
        let Some(tag) = self.tag(node) else { return false };
        if c.tag.as_deref().is_some_and(|t| t != tag) {
            return false;
        }
        if c.id.as_deref().is_some_and(|i| self.element_id(node) != Some(i)) {
            return false;
        }
        if !c.classes.iter().all(|cl| self.has_class(node, cl)) {
            return false;
        }
        if let Some(nth) = c.nth_child {
            let Some(parent) = self.parent(node) else { return false };
            let index = self.element_children(parent).position(|x| x == node).map(|p| p + 1);
            if index != Some(nth) {
                return false;
            }
        }
        true
    }
}

/// One compound selector of a path.
#[derive(Debug, Default, PartialEq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    nth_child: Option<usize>,
}

impl Compound {
    fn parse(s: &str) -> Option<Self> {
        let mut c = Compound::default();
        let (main, nth) = match s.find(":nth-child(") {
            Some(pos) => {
                let rest = &s[pos + ":nth-child(".len()..];
                let end = rest.find(')')?;
                (&s[..pos], Some(rest[..end].trim().parse().ok()?))
            }
            None => (s, None),
        };
        c.nth_child = nth;

        let mut token = String::new();
        let mut mode = 't';
        let flush = |mode: char, token: &mut String, c: &mut Compound| {
            if token.is_empty() {
                return;
            }
            let t = std::mem::take(token);
            match mode {
                '#' => c.id = Some(t),
                '.' => c.classes.push(t),
                _ => c.tag = Some(t.to_ascii_lowercase()),
            }
        };
        for ch in main.chars() {
            match ch {
                '#' | '.' => {
                    flush(mode, &mut token, &mut c);
                    mode = ch;
                }
                _ => token.push(ch),
            }
        }
        flush(mode, &mut token, &mut c);
        if c.tag.as_deref() == Some("*") {
            c.tag = None;
        }
        Some(c)
    }
}

// ---------------------------------------------------------------------------
// Tolerant parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    doc: &'a mut Document,
    input: &'a str,
    pos: usize,
    stack: Vec<NodeId>,
}

impl<'a> Parser<'a> {
    fn new(doc: &'a mut Document, holder: NodeId, input: &'a str) -> Self {
        Self {
            doc,
            input,
            pos: 0,
            stack: vec![holder],
        }
    }

    fn current(&self) -> NodeId {
        *self.stack.last().unwrap_or(&self.doc.root)
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn push_node(&mut self, kind: NodeKind) -> NodeId {
        let id = self.doc.alloc(kind);
        let parent = self.current();
        self.doc.nodes[id.0].parent = Some(parent);
        self.doc.nodes[parent.0].children.push(id);
        id
    }

    fn text(&mut self, t: &str) {
        if t.is_empty() {
            return;
        }
        let parent = self.current();
        if let Some(&last) = self.doc.nodes[parent.0].children.last() {
            if let NodeKind::Text(existing) = &mut self.doc.nodes[last.0].kind {
                existing.push_str(t);
                return;
            }
        }
        self.push_node(NodeKind::Text(t.to_string()));
    }

    fn run(mut self) {
        while self.pos < self.input.len() {
            let rest = self.rest();
            if let Some(after) = rest.strip_prefix("<!--") {
                let end = after.find("-->").unwrap_or(after.len());
                self.push_node(NodeKind::Comment(after[..end].to_string()));
                self.pos += 4 + end + if end < after.len() { 3 } else { 0 };
            } else if rest.starts_with("<!") || rest.starts_with("<?") {
                let end = rest.find('>').unwrap_or(rest.len());
                self.push_node(NodeKind::Doctype(rest.get(2..end).unwrap_or("").to_string()));
                self.pos += (end + 1).min(rest.len());
            } else if rest.starts_with("</") {
                self.end_tag();
            } else if rest.starts_with('<')
                && rest[1..].chars().next().is_some_and(|c| c.is_ascii_alphabetic())
            {
                self.start_tag();
            } else {
                let first = rest.chars().next().map(char::len_utf8).unwrap_or(1);
                let next = rest[first..].find('<').map(|p| p + first).unwrap_or(rest.len());
                self.text(&rest[..next]);
                self.pos += next;
            }
        }
    }

    fn end_tag(&mut self) {
        let rest = self.rest();
        let end = rest.find('>').unwrap_or(rest.len());
        let name = rest.get(2..end).unwrap_or("").trim().to_ascii_lowercase();
        self.pos += (end + 1).min(rest.len());
        if let Some(depth) = self
            .stack
            .iter()
            .skip(1)
            .rposition(|n| self.doc.tag(*n) == Some(name.as_str()))
        {
            self.stack.truncate(depth + 1);
        }
    }

    fn start_tag(&mut self) {
        let bytes = self.input.as_bytes();
        let mut i = self.pos + 1;
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' && bytes[i] != b'/' {
            i += 1;
        }
        let tag = self.input[self.pos + 1..i].to_ascii_lowercase();
        let mut attrs: Vec<(String, String)> = Vec::new();
        let mut self_closing = false;

        loop {
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if i >= bytes.len() {
                break;
            }
            match bytes[i] {
                b'>' => {
                    i += 1;
                    break;
                }
                b'/' => {
                    self_closing = true;
                    i += 1;
                    continue;
                }
                _ => {}
            }
            let name_start = i;
            while i < bytes.len()
                && !bytes[i].is_ascii_whitespace()
                && !matches!(bytes[i], b'=' | b'>' | b'/')
            {
                i += 1;
            }
            let name = self.input[name_start..i].to_ascii_lowercase();
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            let mut value = String::new();
            if i < bytes.len() && bytes[i] == b'=' {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                if i < bytes.len() && (bytes[i] == b'"' || bytes[i] == b'\'') {
                    let quote = bytes[i];
                    let start = i + 1;
                    let end = self.input[start..]
                        .bytes()
                        .position(|b| b == quote)
                        .map(|p| start + p)
                        .unwrap_or(bytes.len());
                    value = self.input[start..end].replace("&quot;", "\"");
                    i = (end + 1).min(bytes.len());
                } else {
                    let start = i;
                    while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                        i += 1;
                    }
                    value = self.input[start..i].to_string();
                }
            }
            if !name.is_empty() && !attrs.iter().any(|(k, _)| *k == name) {
                attrs.push((name, value));
            }
        }
        self.pos = i;

        let id_attr = attrs.iter().find(|(k, _)| k == "id").map(|(_, v)| v.clone());
        let node = self.push_node(NodeKind::Element {
            tag: tag.clone(),
            attrs,
        });
        if let Some(eid) = id_attr.filter(|v| !v.is_empty()) {
            self.doc.ids.insert(eid, node);
        }

        if VOID_ELEMENTS.contains(&tag.as_str()) || self_closing {
            return;
        }
        if RAW_TEXT_ELEMENTS.contains(&tag.as_str()) {
            let close = format!("</{tag}");
            let rest = self.rest();
            let end = rest.to_ascii_lowercase().find(&close).unwrap_or(rest.len());
            if end > 0 {
                let id = self.doc.alloc(NodeKind::Text(rest[..end].to_string()));
                self.doc.nodes[id.0].parent = Some(node);
                self.doc.nodes[node.0].children.push(id);
            }
            self.pos += end;
            if self.pos < self.input.len() {
                let tail = self.rest();
                let gt = tail.find('>').map(|p| p + 1).unwrap_or(tail.len());
                self.pos += gt;
            }
            return;
        }
        self.stack.push(node);
    }
}
