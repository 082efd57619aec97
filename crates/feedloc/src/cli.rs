//! CLI helpers for inspecting the cache and replaying feeds
//!
//! Formatting lives here so `main.rs` only wires commands to the core.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color, ContentArrangement, Row, Table};
use feedloc_core::{CacheSnapshot, Document, EnrichmentScanner, MemoryDocument, StaticFetcher};
use std::collections::HashMap;
use std::path::Path;

// ============================================================================
// Inputs
// ============================================================================

/// Load a `{"handle": "location"}` map into a fixed fetcher
pub fn load_static_fetcher(path: &Path) -> Result<StaticFetcher> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read locations file: {}", path.display()))?;
    let locations: HashMap<String, String> = serde_json::from_str(&content)
        .with_context(|| format!("Invalid locations file: {}", path.display()))?;
    Ok(StaticFetcher::new(locations))
}

// ============================================================================
// Formatters
// ============================================================================

/// Format cache records as table (human) or JSON
pub fn format_cache_table(records: &CacheSnapshot, json: bool, no_color: bool) -> String {
    if json {
        return serde_json::to_string_pretty(records).unwrap_or_else(|_| "{}".to_string());
    }

    if records.is_empty() {
        return "Cache is empty.".to_string();
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    set_header(&mut table, &["Handle", "Status", "Location", "Updated"], no_color);

    let mut handles: Vec<&String> = records.keys().collect();
    handles.sort();

    for handle in handles {
        let record = &records[handle];
        let location = if record.location.is_empty() {
            "-".to_string()
        } else {
            truncate(&record.location, 40)
        };
        table.add_row(Row::from(vec![
            format!("@{}", handle),
            record.status.to_string(),
            location,
            format_updated(record.updated_at),
        ]));
    }

    table.to_string()
}

/// One feed unit after a replay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitLine {
    pub handle: Option<String>,
    pub annotation: Option<String>,
}

/// Collect every unit of `doc` with its handle and annotation text
pub fn collect_units(doc: &MemoryDocument, scanner: &EnrichmentScanner) -> Vec<UnitLine> {
    let class = &scanner.contract().annotation_class;
    let root = doc.root();

    doc.query_all(root, |d, n| scanner.is_unit(d, n))
        .into_iter()
        .map(|unit| UnitLine {
            handle: scanner.owner_handle(doc, unit),
            annotation: doc
                .query_first(unit, |d, n| d.has_class(n, class))
                .map(|n| doc.text_content(n).trim_start_matches(" . ").to_string()),
        })
        .collect()
}

/// Format replayed units
pub fn format_units(units: &[UnitLine], no_color: bool) -> String {
    if units.is_empty() {
        return "No posts in feed.".to_string();
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    set_header(&mut table, &["#", "Author", "Location"], no_color);

    for (i, unit) in units.iter().enumerate() {
        let author = unit
            .handle
            .as_ref()
            .map(|h| format!("@{}", h))
            .unwrap_or_else(|| "?".to_string());
        let location = unit.annotation.clone().unwrap_or_else(|| "-".to_string());
        table.add_row(Row::from(vec![(i + 1).to_string(), author, location]));
    }

    table.to_string()
}

/// Show only the edges of a secret
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.is_empty() {
        return "(not set)".to_string();
    }
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{} ({} chars)", head, tail, chars.len())
}

fn set_header(table: &mut Table, columns: &[&str], no_color: bool) {
    if no_color {
        table.set_header(columns.to_vec());
    } else {
        table.set_header(
            columns
                .iter()
                .map(|c| Cell::new(c).fg(Color::Cyan))
                .collect::<Vec<_>>(),
        );
    }
}

fn format_updated(updated_at: Option<DateTime<Utc>>) -> String {
    updated_at
        .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Truncate to `max` chars, marking the cut with an ellipsis
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max).collect();
    format!("{}…", kept)
}
