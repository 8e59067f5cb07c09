/// uiautomator hierarchy summary.
///
/// Turns the XML from `uiautomator dump` into a flat list of the clickable
/// and scrollable nodes, each tagged with the grid cell under its center so
/// the model can cross-check what it sees against what the framework reports.
use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::perception::som_grid::{cell_at, GridSpec};
use crate::perception::types::UiElement;

static NODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<node\b([^>]*?)/?>").unwrap_or_else(|e| panic!("node regex: {e}")));
static ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([\w:-]+)="([^"]*)""#).unwrap_or_else(|e| panic!("attr regex: {e}")));
static BOUNDS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(\d+),(\d+)\]\[(\d+),(\d+)\]$").unwrap_or_else(|e| panic!("bounds regex: {e}"))
});

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#10;", " ")
        .replace("&amp;", "&")
}

/// Parse "[0,42][1080,177]" into `[x1, y1, x2, y2]`.
pub fn parse_bounds(bounds: &str) -> Option<[u32; 4]> {
    let caps = BOUNDS_RE.captures(bounds)?;
    let mut out = [0u32; 4];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = caps[i + 1].parse().ok()?;
    }
    Some(out)
}

/// Collect interactive nodes (clickable or scrollable, with valid bounds) in document order.
pub fn parse_ui_elements(xml: &str) -> Vec<UiElement> {
    NODE_RE
        .captures_iter(xml)
        .filter_map(|node| {
            let attrs: HashMap<&str, String> = ATTR_RE
                .captures_iter(node.get(1)?.as_str())
                .filter_map(|a| Some((a.get(1)?.as_str(), unescape(a.get(2)?.as_str()))))
                .collect();
            let flag = |name: &str| attrs.get(name).is_some_and(|v| v == "true");
            let clickable = flag("clickable");
            let scrollable = flag("scrollable");
            if !clickable && !scrollable {
                return None;
            }
            let bounds = parse_bounds(attrs.get("bounds")?)?;
            let text = |name: &str| attrs.get(name).cloned().unwrap_or_default();
            let class_name = text("class");
            Some(UiElement {
                class_name: class_name.rsplit('.').next().unwrap_or("View").to_string(),
                text: text("text"),
                content_desc: text("content-desc"),
                resource_id: text("resource-id"),
                clickable,
                scrollable,
                bounds,
            })
        })
        .collect()
}

/// One line per element: `{ [Button] "OK" id="ok" position="E10" }`.
pub fn summarize(elements: &[UiElement], device_size: (u32, u32), grid: GridSpec) -> String {
    let lines: Vec<String> = elements
        .iter()
        .filter_map(|el| {
            let (cx, cy) = el.center();
            let cell = cell_at(cx, cy, device_size, grid)?;
            let mut parts = vec![format!("[{}]", el.class_name)];
            if !el.text.is_empty() {
                parts.push(format!("\"{}\"", el.text));
            } else if !el.content_desc.is_empty() {
                parts.push(format!("desc=\"{}\"", el.content_desc));
            }
            if !el.resource_id.is_empty() {
                let short = el.resource_id.rsplit('/').next().unwrap_or(&el.resource_id);
                parts.push(format!("id=\"{short}\""));
            }
            parts.push(format!("position=\"{cell}\""));
            if el.scrollable {
                parts.push("(scrollable)".to_string());
            }
            Some(format!("{{ {} }}", parts.join(" ")))
        })
        .collect();

    if lines.is_empty() {
        "No interactive elements found".to_string()
    } else {
        lines.join("\n")
    }
}
