use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::fs;
use uuid::Uuid;

use crate::enrich::EnrichSummary;

pub struct BriefInput<'a> {
    pub run_id: Uuid,
    pub stage: &'a str,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: &'a EnrichSummary,
    pub keywords: &'a BTreeMap<String, Vec<String>>,
}

pub fn render_analysis_brief(input: &BriefInput<'_>) -> String {
    let summary = input.summary;
    let mut sections = Vec::new();

    for (source, insights) in &summary.per_source {
        let means = insights
            .mean_score_by_rating
            .iter()
            .map(|(rating, mean)| format!("  - {rating}★: {mean:.3}"))
            .collect::<Vec<_>>()
            .join("\n");
        let labels = insights
            .label_counts
            .iter()
            .map(|(label, count)| format!("{label}={count}"))
            .collect::<Vec<_>>()
            .join(", ");
        let themes = insights
            .theme_counts
            .iter()
            .map(|(theme, count)| format!("  - {theme}: {count}"))
            .collect::<Vec<_>>()
            .join("\n");
        let keywords = input
            .keywords
            .get(source)
            .filter(|k| !k.is_empty())
            .map(|k| k.join(", "))
            .unwrap_or_else(|| "(not enough reviews)".to_string());

        sections.push(format!(
            "## {source}\n\n- Reviews: {}\n- Labels: {labels}\n- Mean sentiment by rating:\n{means}\n- Themes:\n{themes}\n- Top keywords: {keywords}\n",
            insights.reviews
        ));
    }

    let warnings = summary
        .sparse_theme_sources
        .iter()
        .map(|s| format!("- {s} has fewer than 3 themes configured"))
        .collect::<Vec<_>>();

    format!(
        "# Bank Review Analysis Brief\n\n- Run ID: `{}`\n- Stage: {}\n- Started: {}\n- Finished: {}\n- Reviews: {}\n- Sentiment coverage: {:.1}%\n{}\n{}",
        input.run_id,
        input.stage,
        input.started_at,
        input.finished_at,
        summary.records,
        summary.coverage * 100.0,
        if warnings.is_empty() {
            String::new()
        } else {
            format!("\n## Warnings\n{}\n", warnings.join("\n"))
        },
        sections.join("\n")
    )
}

/// Write `reports/<run_id>/analysis_brief.md` under `workspace_root`.
pub async fn write_analysis_brief(workspace_root: &Path, input: &BriefInput<'_>) -> Result<PathBuf> {
    let reports_dir = workspace_root.join("reports").join(input.run_id.to_string());
    fs::create_dir_all(&reports_dir)
        .await
        .with_context(|| format!("creating {}", reports_dir.display()))?;
    let path = reports_dir.join("analysis_brief.md");
    fs::write(&path, render_analysis_brief(input))
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}
