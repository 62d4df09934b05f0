use std::cell::RefCell;
use std::collections::HashMap;

use ego_tree::iter::Edge;
use ego_tree::NodeId;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::warn;

use super::{DomEvent, NodeHandle, Page};

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "li", "pre", "br", "h1", "h2", "h3", "h4", "h5", "h6", "tr",
    "blockquote", "section", "article", "ul", "ol", "table",
];

const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template"];

#[derive(Default)]
struct Overlay {
    values: HashMap<NodeHandle, String>,
    contents: HashMap<NodeHandle, String>,
    focused: Option<NodeHandle>,
    events: Vec<(NodeHandle, DomEvent)>,
}

/// A [`Page`] backed by a parsed HTML snapshot.
///
/// Reads come from the parsed tree; writes land in an overlay and every
/// dispatched event is logged, which is what lets the injection engine be
/// checked without a browser.
pub struct HtmlPage {
    url: RefCell<String>,
    html: Html,
    elements: Vec<NodeId>,
    index: HashMap<NodeId, usize>,
    overlay: RefCell<Overlay>,
}

impl HtmlPage {
    pub fn parse(url: &str, source: &str) -> Self {
        let html = Html::parse_document(source);
        let elements: Vec<NodeId> = html
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .map(|el| (*el).id())
            .collect();
        let index = elements.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        Self {
            url: RefCell::new(url.to_string()),
            html,
            elements,
            index,
            overlay: RefCell::new(Overlay::default()),
        }
    }

    /// Changes the URL without touching the document, as client-side
    /// routing does.
    pub fn navigate(&self, url: &str) {
        self.url.replace(url.to_string());
    }

    /// Current content of a compose control: the natively-set value for form
    /// fields, the replaced content for editors, else the parsed text.
    pub fn control_text(&self, node: NodeHandle) -> String {
        let overlay = self.overlay.borrow();
        if let Some(value) = overlay.values.get(&node) {
            return value.clone();
        }
        if let Some(content) = overlay.contents.get(&node) {
            return content.clone();
        }
        drop(overlay);
        self.text(node)
    }

    pub fn inner_html(&self, node: NodeHandle) -> String {
        if let Some(content) = self.overlay.borrow().contents.get(&node) {
            return format!("<p>{}</p>", escape_html(content));
        }
        self.element(node).map(|el| el.inner_html()).unwrap_or_default()
    }

    pub fn focused(&self) -> Option<NodeHandle> {
        self.overlay.borrow().focused
    }

    /// Every event dispatched so far, in order.
    pub fn events(&self) -> Vec<(NodeHandle, DomEvent)> {
        self.overlay.borrow().events.clone()
    }

    pub fn events_for(&self, node: NodeHandle) -> Vec<DomEvent> {
        self.overlay
            .borrow()
            .events
            .iter()
            .filter(|(target, _)| *target == node)
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub fn click_count(&self, node: NodeHandle) -> usize {
        self.events_for(node)
            .iter()
            .filter(|e| matches!(e, DomEvent::Click))
            .count()
    }

    fn element(&self, node: NodeHandle) -> Option<ElementRef<'_>> {
        let id = *self.elements.get(node.0)?;
        self.html.tree.get(id).and_then(ElementRef::wrap)
    }

    fn handle(&self, el: ElementRef<'_>) -> Option<NodeHandle> {
        self.index.get(&(*el).id()).map(|i| NodeHandle(*i))
    }

    fn selector(&self, selector: &str) -> Option<Selector> {
        match Selector::parse(selector) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(selector, error = ?e, "ignoring unparsable selector");
                None
            }
        }
    }
}

impl Page for HtmlPage {
    fn url(&self) -> String {
        self.url.borrow().clone()
    }

    fn query_all(&self, selector: &str) -> Vec<NodeHandle> {
        let Some(parsed) = self.selector(selector) else {
            return Vec::new();
        };
        self.html
            .select(&parsed)
            .filter_map(|el| self.handle(el))
            .collect()
    }

    fn query_within(&self, scope: NodeHandle, selector: &str) -> Option<NodeHandle> {
        let parsed = self.selector(selector)?;
        let scope_el = self.element(scope)?;
        scope_el
            .select(&parsed)
            .filter(|el| (**el).id() != (*scope_el).id())
            .find_map(|el| self.handle(el))
    }

    fn matches(&self, node: NodeHandle, selector: &str) -> bool {
        match (self.selector(selector), self.element(node)) {
            (Some(parsed), Some(el)) => parsed.matches(&el),
            _ => false,
        }
    }

    fn attr(&self, node: NodeHandle, name: &str) -> Option<String> {
        self.element(node)
            .and_then(|el| el.value().attr(name).map(str::to_string))
    }

    fn tag_name(&self, node: NodeHandle) -> String {
        self.element(node)
            .map(|el| el.value().name().to_ascii_lowercase())
            .unwrap_or_default()
    }

    fn text(&self, node: NodeHandle) -> String {
        if let Some(content) = self.overlay.borrow().contents.get(&node) {
            return content.clone();
        }
        let Some(el) = self.element(node) else {
            return String::new();
        };

        let mut raw = String::new();
        let mut skip_depth = 0usize;
        for edge in el.traverse() {
            match edge {
                Edge::Open(n) => match n.value() {
                    Node::Element(e) if SKIPPED_TAGS.contains(&e.name()) => skip_depth += 1,
                    Node::Text(t) if skip_depth == 0 => raw.push_str(t),
                    _ => {}
                },
                Edge::Close(n) => {
                    if let Node::Element(e) = n.value() {
                        if SKIPPED_TAGS.contains(&e.name()) {
                            skip_depth = skip_depth.saturating_sub(1);
                        } else if BLOCK_TAGS.contains(&e.name()) {
                            raw.push('\n');
                        }
                    }
                }
            }
        }
        normalize_lines(&raw)
    }

    // Snapshots carry no layout. A measured offset comes from
    // `data-offset-top`; an unmeasured element sits with the nearest measured
    // element before it, or at the top.
    fn vertical_position(&self, node: NodeHandle) -> f64 {
        (0..=node.0)
            .rev()
            .find_map(|i| {
                self.attr(NodeHandle(i), "data-offset-top")
                    .and_then(|v| v.trim().parse::<f64>().ok())
            })
            .unwrap_or(0.0)
    }

    fn set_value_native(&self, node: NodeHandle, value: &str) {
        self.overlay
            .borrow_mut()
            .values
            .insert(node, value.to_string());
    }

    fn replace_content(&self, node: NodeHandle, text: &str) {
        self.overlay
            .borrow_mut()
            .contents
            .insert(node, text.to_string());
    }

    fn focus(&self, node: NodeHandle) {
        let mut overlay = self.overlay.borrow_mut();
        overlay.focused = Some(node);
        overlay.events.push((node, DomEvent::Focus));
    }

    fn dispatch(&self, node: NodeHandle, event: DomEvent) {
        self.overlay.borrow_mut().events.push((node, event));
    }

    fn click(&self, node: NodeHandle) {
        self.overlay.borrow_mut().events.push((node, DomEvent::Click));
    }
}

fn normalize_lines(raw: &str) -> String {
    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
