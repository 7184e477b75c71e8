// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Reporting sinks for per-fold score collections
//!
//! Each report is a title plus the four metric columns. Sinks turn it into a
//! text summary (mean ± population std in percent) or a bar chart.

use crate::metrics::{MetricSummary, ScoreCollection, METRIC_NAMES};
use crate::pipeline::CrossValidationResults;
use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Destination for one titled score collection
pub trait ReportSink {
    fn consume(&mut self, title: &str, scores: &ScoreCollection) -> Result<()>;
}

/// Send every label report, then the macro report, to each sink
pub fn publish(results: &CrossValidationResults, sinks: &mut [&mut dyn ReportSink]) -> Result<()> {
    for (title, scores) in results.report_entries() {
        for sink in sinks.iter_mut() {
            sink.consume(title, scores)?;
        }
    }
    Ok(())
}

/// `Precision: 71.23 +- 2.10` lines under the title
pub fn format_summary(title: &str, scores: &ScoreCollection) -> String {
    let mut out = format!("{}\n", title);
    for (name, summary) in METRIC_NAMES.iter().zip(scores.summary()) {
        let _ = writeln!(
            out,
            "{}: {:.2} +- {:.2}",
            name,
            summary.mean * 100.0,
            summary.std * 100.0
        );
    }
    out
}

fn prepare_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create report dir {}", dir.display()))
}

/// Writes `<dir>/<title>.txt` and optionally echoes it to stdout
#[derive(Debug, Clone)]
pub struct TextSummarySink {
    dir: PathBuf,
    echo: bool,
    written: Vec<PathBuf>,
}

impl TextSummarySink {
    pub fn new(dir: impl Into<PathBuf>, echo: bool) -> Self {
        Self {
            dir: dir.into(),
            echo,
            written: Vec::new(),
        }
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl ReportSink for TextSummarySink {
    fn consume(&mut self, title: &str, scores: &ScoreCollection) -> Result<()> {
        prepare_dir(&self.dir)?;
        let summary = format_summary(title, scores);
        if self.echo {
            println!("{}", summary);
        }

        let path = self.dir.join(format!("{}.txt", title));
        std::fs::write(&path, &summary)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("Report written to {}", path.display());
        self.written.push(path);
        Ok(())
    }
}

const WIDTH: f64 = 480.0;
const HEIGHT: f64 = 360.0;
const MARGIN: f64 = 48.0;

/// Bar chart of the four metric means with std error bars, as `<dir>/<title>.svg`
#[derive(Debug, Clone)]
pub struct SvgChartSink {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl SvgChartSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            written: Vec::new(),
        }
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

fn chart_caption(title: &str) -> String {
    if title == "macro" {
        "mean and standard deviation of scores over all classes".to_string()
    } else {
        format!("scores of the {} classifier", title)
    }
}

/// Map a score in [0, 1] to the chart's y pixel
fn y_pos(value: f64) -> f64 {
    let plot = HEIGHT - 2.0 * MARGIN;
    HEIGHT - MARGIN - value.clamp(0.0, 1.0) * plot
}

pub fn render_svg(title: &str, summaries: &[MetricSummary; 4]) -> String {
    let plot_width = WIDTH - 2.0 * MARGIN;
    let slot = plot_width / summaries.len() as f64;
    let bar = slot * 0.6;

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = WIDTH,
        h = HEIGHT
    );
    let _ = writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#);
    let _ = writeln!(
        svg,
        r#"<text x="{}" y="{}" text-anchor="middle" font-size="14">{}</text>"#,
        WIDTH / 2.0,
        MARGIN / 2.0,
        chart_caption(title)
    );

    for tick in 0..=5 {
        let value = f64::from(tick) / 5.0;
        let y = y_pos(value);
        let _ = writeln!(
            svg,
            r#"<line x1="{x1}" y1="{y:.1}" x2="{x2}" y2="{y:.1}" stroke="lightgray"/><text x="{tx}" y="{ty:.1}" text-anchor="end" font-size="10">{value:.1}</text>"#,
            x1 = MARGIN,
            x2 = WIDTH - MARGIN,
            tx = MARGIN - 4.0,
            ty = y + 3.0,
        );
    }

    for (i, (name, summary)) in METRIC_NAMES.iter().zip(summaries).enumerate() {
        let center = MARGIN + slot * (i as f64 + 0.5);
        let top = y_pos(summary.mean);
        let _ = writeln!(
            svg,
            r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="steelblue"/>"#,
            center - bar / 2.0,
            top,
            bar,
            y_pos(0.0) - top
        );

        let low = y_pos(summary.mean - summary.std);
        let high = y_pos(summary.mean + summary.std);
        let _ = writeln!(
            svg,
            r#"<line x1="{c:.1}" y1="{low:.1}" x2="{c:.1}" y2="{high:.1}" stroke="black"/><line x1="{l:.1}" y1="{low:.1}" x2="{r:.1}" y2="{low:.1}" stroke="black"/><line x1="{l:.1}" y1="{high:.1}" x2="{r:.1}" y2="{high:.1}" stroke="black"/>"#,
            c = center,
            l = center - bar / 6.0,
            r = center + bar / 6.0,
        );
        let _ = writeln!(
            svg,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="middle" font-size="12">{}</text>"#,
            center,
            HEIGHT - MARGIN + 16.0,
            name
        );
    }

    svg.push_str("</svg>\n");
    svg
}

impl ReportSink for SvgChartSink {
    fn consume(&mut self, title: &str, scores: &ScoreCollection) -> Result<()> {
        prepare_dir(&self.dir)?;
        let path = self.dir.join(format!("{}.svg", title));
        std::fs::write(&path, render_svg(title, &scores.summary()))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::debug!("Chart written to {}", path.display());
        self.written.push(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ScoreRecord;

    fn collection() -> ScoreCollection {
        let mut scores = ScoreCollection::default();
        scores.push(ScoreRecord {
            precision: 0.7,
            recall: 0.6,
            f1: 0.65,
            auc: 0.8,
        });
        scores.push(ScoreRecord {
            precision: 0.8,
            recall: 0.6,
            f1: 0.7,
            auc: 0.9,
        });
        scores
    }

    #[test]
    fn test_format_summary() {
        let text = format_summary("toxic", &collection());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "toxic");
        assert_eq!(lines[1], "Precision: 75.00 +- 5.00");
        assert_eq!(lines[2], "Recall: 60.00 +- 0.00");
        assert_eq!(lines[3], "F1: 67.50 +- 2.50");
        assert_eq!(lines[4], "AUC: 85.00 +- 5.00");
    }

    #[test]
    fn test_text_sink_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = TextSummarySink::new(dir.path().join("results"), false);
        sink.consume("fact-claiming", &collection()).unwrap();

        let path = dir.path().join("results").join("fact-claiming.txt");
        assert_eq!(sink.written(), &[path.clone()]);
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.starts_with("fact-claiming\nPrecision: 75.00"));
    }

    #[test]
    fn test_svg_sink_draws_four_bars() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = SvgChartSink::new(dir.path());
        sink.consume("macro", &collection()).unwrap();

        let svg = std::fs::read_to_string(dir.path().join("macro.svg")).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("over all classes"));
        assert_eq!(svg.matches("fill=\"steelblue\"").count(), 4);
        for name in METRIC_NAMES {
            assert!(svg.contains(&format!(">{}</text>", name)));
        }
    }

    #[test]
    fn test_bars_stay_inside_the_plot() {
        assert_eq!(y_pos(0.0), HEIGHT - MARGIN);
        assert_eq!(y_pos(1.0), MARGIN);
        assert_eq!(y_pos(1.4), MARGIN);
        assert_eq!(y_pos(-0.2), HEIGHT - MARGIN);
    }
}
