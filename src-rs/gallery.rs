//! Standalone HTML gallery export.

use std::fmt::Write as _;

use anyhow::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::collection::Collection;

pub const DEFAULT_TITLE: &str = "My Image Collection";

const STYLE: &str = r#"
body {
    font-family: 'Segoe UI', Tahoma, Geneva, Verdana, sans-serif;
    margin: auto;
    padding: 0;
    color: #333;
    max-width: 1000px;
    box-sizing: border-box;
}
h1 { text-align: center; font-size: 24px; margin-top: 50px; }
table { width: 100%; border-collapse: collapse; margin-top: 20px; margin-bottom: 50px; }
table, th, td { border: 1px solid #ddd; }
th, td { text-align: left; padding: 8px; }
tr:nth-child(even) { background-color: #f2f2f2; }
img { width: 100px; height: auto; object-fit: contain; cursor: pointer; }
.selectable { user-select: all; cursor: pointer; }
@media print {
    body { color: #000; }
    table, th, td { border: 1px solid #000; }
    th, td { padding: 10px; }
}
@media only screen and (max-width: 600px) {
    body { max-width: 100%; padding: 10px; font-size: 16px; }
    h1 { font-size: 20px; margin-top: 20px; }
    table { margin-top: 10px; margin-bottom: 20px; }
    img { width: 80px; }
    th, td { padding: 5px; }
    .selectable { font-size: 14px; }
}
"#;

const SCRIPT: &str = r#"
function copyToClipboard(text) {
    navigator.clipboard.writeText(text).then(function() {
        alert('Copied to clipboard: ' + text);
    }).catch(function(error) {
        console.log('Copy to clipboard failed: ' + error);
    });
}
"#;

#[derive(Debug, Clone)]
pub struct GalleryRow {
    pub thumbnail_png: Vec<u8>,
    pub description: String,
    pub job_id: String,
}

/// One row per entry, thumbnails encoded on the way.
pub fn rows_from_collection(collection: &Collection) -> Result<Vec<GalleryRow>> {
    collection
        .entries
        .iter()
        .map(|entry| {
            Ok(GalleryRow {
                thumbnail_png: entry.thumbnail_png()?,
                description: entry.description.clone(),
                job_id: entry.job_id_or_default().to_string(),
            })
        })
        .collect()
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Escapes for a single-quoted JS string literal; the result still needs
/// HTML escaping when it goes into an attribute.
pub fn escape_js(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '<' => out.push_str("\\x3C"),
            _ => out.push(ch),
        }
    }
    out
}

fn copy_handler(value: &str) -> String {
    escape_html(&format!("copyToClipboard('{}')", escape_js(value)))
}

pub fn render_html(title: &str, rows: &[GalleryRow]) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    let _ = writeln!(html, "<title>{}</title>", escape_html(title));
    let _ = writeln!(html, "<style>{STYLE}</style>");
    let _ = writeln!(html, "<script>{SCRIPT}</script>");
    html.push_str("</head>\n<body>\n");
    let _ = writeln!(html, "<h1>{}</h1>", escape_html(title));
    html.push_str("<table>\n");

    for row in rows {
        let _ = writeln!(
            html,
            "<tr>\n  <td><img src=\"data:image/png;base64,{}\" alt=\"{}\" onclick=\"{}\"/></td>\n  <td class=\"selectable\" onclick=\"{}\">{}</td>\n</tr>",
            STANDARD.encode(&row.thumbnail_png),
            escape_html(&row.job_id),
            copy_handler(&row.job_id),
            copy_handler(&row.description),
            escape_html(&row.description),
        );
    }

    html.push_str("</table>\n</body>\n</html>\n");
    html
}
