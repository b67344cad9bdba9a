//! Markdown and JSON rendering of the contribution report.

use crate::config::ReportFormat;
use crate::models::{ProjectReport, Report, ReportMetadata, ReportNode};
use anyhow::{Context, Result};
use std::path::Path;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    output.push_str("# Repocensus Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_summary_section(report));
    output.push_str(&generate_projects_section(&report.projects));
    output.push_str(&generate_footer());

    output
}

fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    if !metadata.description.is_empty() {
        section.push_str(&format!("{}\n\n", metadata.description));
    }
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Analyzer:** `{}`\n", metadata.analyzer));

    if let Some(params) = metadata.parameters.as_object() {
        let mut set: Vec<String> = params
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| match value.as_str() {
                Some(s) => format!("{}={}", key, s),
                None => format!("{}={}", key, value),
            })
            .collect();
        set.sort();
        if !set.is_empty() {
            section.push_str(&format!("- **Parameters:** `{}`\n", set.join(" ")));
        }
    }
    section.push('\n');

    section
}

fn generate_summary_section(report: &Report) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str("| Projects | Repositories | Failed | Lines of code |\n");
    section.push_str("|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | **{}** |\n\n",
        report.projects.len(),
        report.repository_count,
        report.failed_count,
        report.total_loc
    ));

    if !report.projects.is_empty() {
        section.push_str("| Project | Repositories | Failed | Lines of code |\n");
        section.push_str("|:---|:---:|:---:|---:|\n");
        for project in &report.projects {
            section.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                escape_cell(&project.project_name),
                project.repositories.len(),
                project.failed_count(),
                project.total_loc()
            ));
        }
        section.push('\n');
    }

    section
}

fn generate_projects_section(projects: &[ProjectReport]) -> String {
    let mut section = String::new();

    section.push_str("## Projects\n\n");
    for project in projects {
        section.push_str(&format!("### {}\n\n", project.project_name));

        if project.repositories.is_empty() {
            section.push_str("_No local repositories._\n\n");
            continue;
        }

        for node in &project.repositories {
            section.push_str(&generate_repository_block(node));
        }
    }

    section
}

fn generate_repository_block(node: &ReportNode) -> String {
    let mut block = String::new();

    block.push_str(&format!("#### {}\n\n", node.repository_name));

    if let Some(error) = node.error() {
        block.push_str(&format!("> ❌ **Analysis failed:** {}\n\n", error));
        return block;
    }

    let Some(stats) = node.stats() else {
        return block;
    };

    block.push_str(&format!(
        "**Total:** {} lines, {} commits, {} files\n\n",
        stats.total.loc, stats.total.commits, stats.total.files
    ));

    if !stats.per_author.is_empty() {
        block.push_str("| Author | Lines | Commits | Files |\n");
        block.push_str("|:---|---:|---:|---:|\n");

        let mut authors: Vec<_> = stats.per_author.iter().collect();
        authors.sort_by_key(|(_, counts)| std::cmp::Reverse(counts.loc));
        for (author, counts) in authors {
            block.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                escape_cell(author),
                counts.loc,
                counts.commits,
                counts.files
            ));
        }
        block.push('\n');
    }

    block
}

/// Make text safe inside a Markdown table cell.
fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\r', '\n'], " ")
}

fn generate_footer() -> String {
    "---\n\n*Generated by repocensus*\n".to_string()
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Render the report in `format` and write it to `path`, creating parent
/// directories as needed.
pub fn write_report(report: &Report, format: ReportFormat, path: &Path) -> Result<()> {
    let content = match format {
        ReportFormat::Json => generate_json_report(report)?,
        ReportFormat::Markdown => generate_markdown_report(report),
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}
