//! Terminal rendering for sections, stats and verify reports.
//!
//! Keeps CLI output bounded and readable; JSON output goes through serde.

use crate::core::format::Section;
use crate::core::reader::{ReadStats, VerifyReport};
use colored::Colorize;

const VALUE_PREVIEW_CHARS: usize = 160;

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Render one section as a header line plus indented fields.
pub fn render_section(section: &Section) -> String {
    let record = &section.record;
    let mut out = format!(
        "{} {} {}\n",
        format!("@{}:{}", record.kind, record.id).bold(),
        format!("[{}..{}]", section.start_line, section.end_line).dimmed(),
        record.timestamp.dimmed()
    );
    for (key, value) in &record.fields {
        out.push_str(&format!(
            "  {} {}\n",
            format!("{}:", key).cyan(),
            compact_line(value, VALUE_PREVIEW_CHARS)
        ));
    }
    for (key, value) in &record.metadata {
        out.push_str(&format!(
            "  {} {}\n",
            format!("meta.{}:", key).dimmed(),
            compact_line(value, VALUE_PREVIEW_CHARS)
        ));
    }
    out
}

pub fn render_sections(sections: &[Section]) -> String {
    if sections.is_empty() {
        return format!("{}\n", "no matching records".dimmed());
    }
    sections
        .iter()
        .map(render_section)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_stats(label: &str, stats: &ReadStats) -> String {
    format!(
        "{:<14} {:>8} sections {:>10} lines {:>12} bytes  mode={}  skipped={}  integrity_failures={}\n",
        label.bold(),
        stats.sections,
        stats.lines,
        stats.bytes_read,
        stats.mode,
        stats.skipped_lines,
        stats.integrity_failures
    )
}

pub fn render_verify(report: &VerifyReport) -> String {
    let name = report
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| report.path.display().to_string());
    if report.is_clean() {
        return format!(
            "{} {} ({} sections)\n",
            "ok".green().bold(),
            name,
            report.stats.sections
        );
    }
    let mut out = format!(
        "{} {} ({} issues)\n",
        "FAIL".red().bold(),
        name,
        report.issues.len()
    );
    for issue in &report.issues {
        out.push_str(&format!(
            "  line {:>6}  {:<18} {}\n",
            issue.physical_line,
            format!("{:?}", issue.kind).yellow(),
            compact_line(&issue.detail, VALUE_PREVIEW_CHARS)
        ));
    }
    out
}
