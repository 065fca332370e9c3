use crate::calc::format::{PaginatedReport, ReportRow};
use anyhow::Context;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const REPORT_ENTRY: &str = "report.html";
const FILTERS_ENTRY: &str = "filters.json";
pub const BUNDLE_FORMAT_V1: &str = "resultd-report-v1";

/// Reports wider than this many value columns are laid out landscape.
pub const PORTRAIT_MAX_COLUMNS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    Landscape,
}

impl Orientation {
    pub fn for_columns(value_columns: usize) -> Self {
        if value_columns > PORTRAIT_MAX_COLUMNS {
            Orientation::Landscape
        } else {
            Orientation::Portrait
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportMeta {
    pub title: String,
    pub filters: Value,
}

/// Hand-off payload for the PDF renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub html: String,
    pub filters: Value,
    pub file_name: String,
    pub orientation: Orientation,
}

#[derive(Debug, Clone)]
pub struct BundleSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub html_sha256: String,
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
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

fn filter_line(filters: &Value) -> String {
    let Some(map) = filters.as_object() else {
        return String::new();
    };
    map.iter()
        .map(|(k, v)| match v {
            Value::String(s) => format!("{}: {}", k, s),
            other => format!("{}: {}", k, other),
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

fn push_row(html: &mut String, row: &ReportRow, class: &str) {
    html.push_str(&format!("<tr class=\"{}\">", class));
    let roll = row.roll_number.map(|r| r.to_string()).unwrap_or_default();
    html.push_str(&format!("<td>{}</td>", escape_html(&roll)));
    html.push_str(&format!("<td class=\"name\">{}</td>", escape_html(&row.name)));
    for cell in &row.cells {
        html.push_str(&format!("<td>{}</td>", escape_html(cell)));
    }
    html.push_str("</tr>\n");
}

fn push_header(html: &mut String, report: &PaginatedReport) {
    html.push_str("<thead>\n<tr><th rowspan=\"2\">Roll No.</th><th rowspan=\"2\">Name</th>");
    for group in &report.groups {
        html.push_str(&format!(
            "<th colspan=\"{}\">{}</th>",
            group.columns.len(),
            escape_html(&group.label)
        ));
    }
    html.push_str("</tr>\n<tr>");
    for column in report.columns() {
        html.push_str(&format!("<th>{}</th>", escape_html(&column.label)));
    }
    html.push_str("</tr>\n</thead>\n");
}

/// Self-contained HTML document: one table per page, the footer row on the
/// last page only.
pub fn render_html(report: &PaginatedReport, meta: &ReportMeta) -> String {
    let pages = report.pages();
    let last = pages.len().saturating_sub(1);

    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str(&format!("<title>{}</title>\n", escape_html(&meta.title)));
    html.push_str(
        "<style>\
         table{border-collapse:collapse;width:100%;font-size:11px}\
         th,td{border:1px solid #444;padding:2px 4px;text-align:center}\
         td.name{text-align:left}\
         tr.summary td{font-weight:bold}\
         .page-break{page-break-after:always}\
         </style>\n</head>\n<body>\n",
    );
    html.push_str(&format!("<h1>{}</h1>\n", escape_html(&meta.title)));
    let filters = filter_line(&meta.filters);
    if !filters.is_empty() {
        html.push_str(&format!("<p class=\"filters\">{}</p>\n", escape_html(&filters)));
    }

    for (i, page) in pages.iter().enumerate() {
        html.push_str("<table>\n");
        push_header(&mut html, report);
        html.push_str("<tbody>\n");
        for row in page {
            push_row(&mut html, row, "student");
        }
        if i == last {
            if let Some(footer) = &report.footer {
                push_row(&mut html, footer, "summary");
            }
        }
        html.push_str("</tbody>\n</table>\n");
        if i != last {
            html.push_str("<div class=\"page-break\"></div>\n");
        }
    }
    html.push_str("</body>\n</html>\n");
    html
}

fn file_name_for(title: &str) -> String {
    let mut slug = String::new();
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "result.pdf".to_string()
    } else {
        format!("{}.pdf", slug)
    }
}

pub fn export_request(report: &PaginatedReport, meta: &ReportMeta) -> ExportRequest {
    ExportRequest {
        html: render_html(report, meta),
        filters: meta.filters.clone(),
        file_name: file_name_for(&meta.title),
        orientation: Orientation::for_columns(report.column_count()),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn write_bundle(req: &ExportRequest, out_path: &Path) -> anyhow::Result<BundleSummary> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let html_sha256 = sha256_hex(req.html.as_bytes());
    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": chrono::Utc::now().to_rfc3339(),
        "fileName": req.file_name,
        "orientation": req.orientation,
        "htmlSha256": html_sha256,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(REPORT_ENTRY, opts)
        .context("failed to start report entry")?;
    zip.write_all(req.html.as_bytes())
        .context("failed to write report entry")?;

    zip.start_file(FILTERS_ENTRY, opts)
        .context("failed to start filters entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&req.filters)
            .context("failed to serialize filters")?
            .as_bytes(),
    )
    .context("failed to write filters entry")?;

    zip.finish().context("failed to finalize zip bundle")?;
    tracing::info!(path = %out_path.display(), "report bundle written");

    Ok(BundleSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: 3,
        html_sha256,
    })
}
