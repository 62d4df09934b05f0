//! The live host document, as seen from the in-page agent.
//!
//! Everything that scrapes or writes into a chat page goes through [`Page`], so
//! the transcript scraper and the injection engine can run against a parsed
//! fixture as easily as against a real browser binding.

pub mod html;

pub use html::HtmlPage;

/// Opaque handle to an element of a [`Page`]. Only meaningful for the page that
/// produced it; handles of one page order by document position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(pub(crate) usize);

/// Synthetic events the injection engine dispatches at page elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomEvent {
    Input {
        input_type: Option<String>,
        data: Option<String>,
    },
    Change,
    KeyDown {
        key: String,
        code: String,
        key_code: u32,
    },
    Focus,
    Click,
}

impl DomEvent {
    pub fn enter() -> Self {
        DomEvent::KeyDown {
            key: "Enter".to_string(),
            code: "Enter".to_string(),
            key_code: 13,
        }
    }

    pub fn insert_text(text: &str) -> Self {
        DomEvent::Input {
            input_type: Some("insertText".to_string()),
            data: Some(text.to_string()),
        }
    }
}

pub trait Page {
    fn url(&self) -> String;

    fn hostname(&self) -> Option<String> {
        reqwest::Url::parse(&self.url())
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }

    /// All elements matching `selector`, in document order. An unparsable
    /// selector matches nothing.
    fn query_all(&self, selector: &str) -> Vec<NodeHandle>;

    fn query(&self, selector: &str) -> Option<NodeHandle> {
        self.query_all(selector).into_iter().next()
    }

    fn query_within(&self, scope: NodeHandle, selector: &str) -> Option<NodeHandle>;

    fn matches(&self, node: NodeHandle, selector: &str) -> bool;

    fn attr(&self, node: NodeHandle, name: &str) -> Option<String>;

    /// Lower-case tag name.
    fn tag_name(&self, node: NodeHandle) -> String;

    /// Rendered text of the element, block boundaries as newlines.
    fn text(&self, node: NodeHandle) -> String;

    /// Distance from the top of the document in pixels. Callers break ties
    /// with document order, see [`NodeHandle`].
    fn vertical_position(&self, node: NodeHandle) -> f64;

    fn is_disabled(&self, node: NodeHandle) -> bool {
        self.attr(node, "disabled").is_some()
            || self.attr(node, "aria-disabled").as_deref() == Some("true")
    }

    /// Writes `value` through the element's native value setter, bypassing any
    /// property interception installed by the hosting framework.
    fn set_value_native(&self, node: NodeHandle, value: &str);

    /// Replaces the element's children with a single paragraph holding `text`.
    fn replace_content(&self, node: NodeHandle, text: &str);

    fn focus(&self, node: NodeHandle);

    fn dispatch(&self, node: NodeHandle, event: DomEvent);

    fn click(&self, node: NodeHandle);
}
