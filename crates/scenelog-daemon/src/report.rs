//! Terminal rendering for the one-shot `report` and `dates` commands.

use scenelog_core::types::SourceDayRow;

/// Format whole seconds as `h:mm:ss`, or `m:ss` under an hour.
fn format_duration(total_secs: i64) -> String {
    let secs = total_secs.max(0);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

/// Display label for a source: its configured title when present, otherwise
/// the raw source name.
fn display_name(row: &SourceDayRow) -> &str {
    match row.title.as_deref() {
        Some(title) if !title.is_empty() => title,
        _ => row.source_name.as_str(),
    }
}

/// Format the full report output for `scenelog report`.
///
/// Example output:
/// ```text
/// Source visibility for 2026-08-27
/// ─────────────────────────────────────────────────────────────
/// Main camera        camera    2 shows   0:57   last 12:03:47
/// Overlay            —         1 show    0:12   last 11:58:02
/// ```
pub fn format_report(date: &str, rows: &[SourceDayRow]) -> String {
    let mut out = String::new();

    out.push_str(&format!("Source visibility for {date}\n"));
    out.push_str("─────────────────────────────────────────────────────────────\n");

    if rows.is_empty() {
        out.push_str("  No sources recorded.\n");
        return out;
    }

    let name_width = rows
        .iter()
        .map(|r| display_name(r).chars().count())
        .max()
        .unwrap_or(0)
        .max(6);

    for row in rows {
        let category = row.category.as_deref().filter(|c| !c.is_empty()).unwrap_or("—");
        let shows = if row.visible_count == 1 { "show" } else { "shows" };
        let last = row
            .last_visible_at
            .as_deref()
            .map(|ts| format!("last {}", ts.get(11..19).unwrap_or(ts)))
            .unwrap_or_default();

        out.push_str(&format!(
            "{:<name_width$}  {:<9} {:>3} {:<6} {:>8}   {}\n",
            display_name(row),
            category,
            row.visible_count,
            shows,
            format_duration(row.total_duration),
            last,
        ));
    }

    out
}

/// Format the recorded-day list for `scenelog dates`.
pub fn format_dates(dates: &[String]) -> String {
    if dates.is_empty() {
        return "No recorded days.\n".to_string();
    }
    let mut out = String::new();
    for date in dates {
        out.push_str(date);
        out.push('\n');
    }
    out
}
