//! Single-file report page with data, styles, and script inlined.

use anyhow::{Context, Result};

use crate::render::report::ReportData;

const PAGE_TEMPLATE: &str = include_str!("page.html");

/// Render the leaderboard page with the report data embedded as a JSON
/// literal. The output is one self-contained HTML file.
pub fn render_page(data: &ReportData) -> Result<String> {
    let json = serde_json::to_string(data).context("serializing report data")?;
    Ok(PAGE_TEMPLATE.replace("__REPO__", &data.repo).replace("__DATA__", &json))
}
