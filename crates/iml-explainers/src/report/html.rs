//! Self-contained HTML report: one section per result, each holding its
//! table and an inline plotly chart.
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use maud::{html, Markup, PreEscaped, DOCTYPE};
use plotly::Plot;

use crate::experiment::Present;
use crate::table::ResultTable;

const PLOTLY_CDN: &str = "https://cdn.plot.ly/plotly-2.12.1.min.js";

const STYLE: &str = "
body { font-family: sans-serif; margin: 2em; color: #222; }
header { border-bottom: 2px solid #444; margin-bottom: 1.5em; }
section { margin-bottom: 3em; }
table { border-collapse: collapse; font-size: 0.9em; }
th, td { border: 1px solid #ccc; padding: 4px 8px; text-align: right; }
th { background-color: #f0f0f0; }
.code-container { background-color: #f5f5f5; padding: 10px; border-radius: 5px; overflow-x: auto; font-family: monospace; white-space: pre-wrap; }
";

pub struct ReportSection {
    title: String,
    content: Vec<Markup>,
}

impl ReportSection {
    pub fn new(title: &str) -> Self {
        ReportSection {
            title: title.to_string(),
            content: Vec::new(),
        }
    }

    /// Section with the table and chart of an experiment result.
    pub fn from_result(result: &dyn Present) -> Self {
        let mut section = ReportSection::new(&result.title());
        section.add_plot(result.plot());
        section.add_table(&result.table());
        section
    }

    pub fn add_content(&mut self, content: Markup) {
        self.content.push(content);
    }

    pub fn add_plot(&mut self, plot: Plot) {
        let id = format!("plot-{}-{}", slug(&self.title), self.content.len());
        self.content
            .push(html! { div class="plot" { (PreEscaped(plot.to_inline_html(Some(id.as_str())))) } });
    }

    /// Tables longer than this are cut in the report; the CSV keeps every row.
    const MAX_TABLE_ROWS: usize = 200;

    pub fn add_table(&mut self, table: &ResultTable) {
        let shown = table.rows.len().min(Self::MAX_TABLE_ROWS);
        self.content.push(html! {
            table {
                thead { tr { @for column in &table.columns { th { (column) } } } }
                tbody {
                    @for row in &table.rows[..shown] {
                        tr { @for cell in row { td { (cell.to_string()) } } }
                    }
                }
            }
            @if shown < table.rows.len() {
                p { "Showing " (shown) " of " (table.rows.len()) " rows." }
            }
        });
    }

    fn render(&self) -> Markup {
        html! {
            section {
                h2 { (self.title) }
                @for block in &self.content { (block) }
            }
        }
    }
}

pub struct Report {
    tool: String,
    version: String,
    title: String,
    sections: Vec<ReportSection>,
}

impl Report {
    pub fn new(tool: &str, version: &str, title: &str) -> Self {
        Report {
            tool: tool.to_string(),
            version: version.to_string(),
            title: title.to_string(),
            sections: Vec::new(),
        }
    }

    pub fn add_section(&mut self, section: ReportSection) {
        self.sections.push(section);
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn render(&self) -> String {
        let generated = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let markup = html! {
            (DOCTYPE)
            html lang="en" {
                head {
                    meta charset="utf-8";
                    title { (self.title) }
                    script src=(PLOTLY_CDN) {}
                    style { (PreEscaped(STYLE)) }
                }
                body {
                    header {
                        h1 { (self.title) }
                        p { (self.tool) " v" (self.version) " | generated " (generated) }
                    }
                    @for section in &self.sections { (section.render()) }
                }
            }
        };
        markup.into_string()
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.render()).with_context(|| format!("Failed to write report to {}", path.display()))?;
        log::info!("Report written to {}", path.display());
        Ok(())
    }
}

fn slug(title: &str) -> String {
    title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::plots::{horizontal_bars, BarSeries};
    use crate::table::Cell;

    struct Fixed;

    impl Present for Fixed {
        fn title(&self) -> String {
            "Fixed result".to_string()
        }

        fn table(&self) -> ResultTable {
            let mut t = ResultTable::new(vec!["feature", "value"]);
            t.push(vec![Cell::from("a"), Cell::from(1.5)]);
            t
        }

        fn plot(&self) -> Plot {
            horizontal_bars(
                vec![BarSeries {
                    name: "value".to_string(),
                    values: vec![1.5],
                    labels: vec!["a".to_string()],
                }],
                "Fixed result",
                "value",
                "feature",
            )
        }
    }

    #[test]
    fn test_report_renders_and_saves() {
        let mut report = Report::new("iml", "0.1.0", "Interpretation report");
        report.add_section(ReportSection::from_result(&Fixed));
        let mut notes = ReportSection::new("Notes");
        notes.add_content(html! { p { "free text" } });
        report.add_section(notes);
        assert_eq!(report.len(), 2);

        let html = report.render();
        assert!(html.contains("<h2>Fixed result</h2>"));
        assert!(html.contains("<td>1.5000</td>"));
        assert!(html.contains("free text"));
        assert!(html.contains("plot-fixed-result-0"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.html");
        report.save_to_file(&path).unwrap();
        assert!(std::fs::read_to_string(path).unwrap().starts_with("<!DOCTYPE html>"));
    }
}
