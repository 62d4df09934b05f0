use once_cell::sync::Lazy;
use regex::Regex;

// Compiled once, like the scraper selectors.
static SCRIPT_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("Failed to compile script pattern")
});

static STYLE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").expect("Failed to compile style pattern")
});

static TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<[^>]*>").expect("Failed to compile tag pattern")
});

static SCRIPT_URI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:java|vb)script\s*:").expect("Failed to compile script uri pattern")
});

// Only `on*=` followed by a quoted value or a call counts as a handler, so
// prose and code like `one = 1` survive. Group 1 is the value start, kept.
static EVENT_HANDLER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bon[a-z]+\s*=\s*(["'`]|[a-z_$][\w$.]*\s*\()"#)
        .expect("Failed to compile event handler pattern")
});

/// Strips markup, script/style blocks, script URIs and inline event handler
/// fragments from page text, then trims it.
///
/// Passes repeat until nothing changes, so fragments that only form after an
/// inner removal are caught and `sanitize(sanitize(x)) == sanitize(x)`.
pub fn sanitize(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = sanitize_once(&current);
        if next == current {
            return next;
        }
        current = next;
    }
}

fn sanitize_once(text: &str) -> String {
    let text = SCRIPT_BLOCK.replace_all(text, "");
    let text = STYLE_BLOCK.replace_all(&text, "");
    let text = TAG.replace_all(&text, "");
    let text = SCRIPT_URI.replace_all(&text, "");
    let text = EVENT_HANDLER.replace_all(&text, "${1}");
    text.trim().to_string()
}
