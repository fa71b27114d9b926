use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rust_xlsxwriter::{Chart, ChartType, Workbook, Worksheet};
use serde::Serialize;
use tracing::info;

use crate::adjacency::AdjacencyStack;
use crate::clustering::Clustering;
use crate::diagnostics::ConvergenceReport;
use crate::evaluation::{ComparisonRow, Evaluation};
use crate::registry::TeamRegistry;

/// Everything the workbook renders. The registry fixes row/column order for
/// every matrix sheet.
pub struct ReportInput<'a> {
    pub registry: &'a TeamRegistry,
    pub stack: &'a AdjacencyStack,
    pub meeting: usize,
    pub probabilities: &'a [Vec<f64>],
    pub evaluation: &'a Evaluation,
    pub clustering: &'a Clustering,
    pub diagnostics: &'a ConvergenceReport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub sheets: Vec<String>,
    pub cells: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Text(String),
    Number(f64),
    Empty,
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        if value.is_finite() {
            Cell::Number(value)
        } else {
            Cell::Empty
        }
    }
}

impl From<usize> for Cell {
    fn from(value: usize) -> Self {
        Cell::Number(value as f64)
    }
}

impl From<u8> for Cell {
    fn from(value: u8) -> Self {
        Cell::Number(f64::from(value))
    }
}

fn header(names: &[&str]) -> Vec<Cell> {
    names.iter().map(|n| Cell::from(*n)).collect()
}

pub fn write_report(path: &Path, input: &ReportInput<'_>) -> Result<ReportSummary> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create report dir {}", parent.display()))?;
    }

    let mut sheets: Vec<(String, Vec<Vec<Cell>>)> = Vec::new();
    sheets.push(("Teams".to_string(), teams_rows(input.registry)));
    for (idx, matrix) in input.stack.matrices().iter().enumerate() {
        let rows = matrix_rows(
            input.registry,
            matrix.rows().iter().map(|r| r.iter().map(|v| Cell::from(*v)).collect()),
        );
        sheets.push((format!("Adjacency_{}", idx + 1), rows));
    }
    sheets.push((
        "EdgeProbabilities".to_string(),
        matrix_rows(
            input.registry,
            input
                .probabilities
                .iter()
                .map(|r| r.iter().map(|v| Cell::from(*v)).collect()),
        ),
    ));
    sheets.push(("Comparison".to_string(), comparison_rows(&input.evaluation.rows)));
    sheets.push((
        "Classification".to_string(),
        classification_rows(input.evaluation, input.meeting),
    ));
    sheets.push(("Reliability".to_string(), reliability_rows(input.evaluation)));
    sheets.push(("Clusters".to_string(), cluster_rows(input.clustering)));
    sheets.push(("Diagnostics".to_string(), diagnostic_rows(input.diagnostics)));

    let mut workbook = Workbook::new();
    let mut cells = 0usize;
    for (name, rows) in &sheets {
        let sheet = workbook.add_worksheet();
        sheet.set_name(name)?;
        cells += write_rows(sheet, rows)?;
        match name.as_str() {
            "Reliability" => insert_reliability_chart(sheet, input.evaluation.bins.len())?,
            "Clusters" => insert_cluster_chart(sheet, input.clustering)?,
            _ => {}
        }
    }

    workbook
        .save(path)
        .with_context(|| format!("failed writing workbook to {}", path.display()))?;

    let names: Vec<String> = sheets.into_iter().map(|(name, _)| name).collect();
    info!(path = %path.display(), sheets = names.len(), cells, "wrote report workbook");
    Ok(ReportSummary {
        sheets: names,
        cells,
    })
}

/// Pretty-printed JSON next to the workbook.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create output dir {}", parent.display()))?;
    }
    let raw = serde_json::to_string_pretty(value).context("serialize json")?;
    fs::write(path, raw).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn teams_rows(registry: &TeamRegistry) -> Vec<Vec<Cell>> {
    let mut rows = vec![header(&["Index", "Team"])];
    rows.extend(
        registry
            .iter()
            .map(|(idx, name)| vec![Cell::from(idx + 1), Cell::from(name)]),
    );
    rows
}

fn matrix_rows(
    registry: &TeamRegistry,
    values: impl Iterator<Item = Vec<Cell>>,
) -> Vec<Vec<Cell>> {
    let mut head = vec![Cell::Empty];
    head.extend(registry.names().iter().map(|n| Cell::from(n.as_str())));
    let mut rows = vec![head];
    for (idx, row) in values.enumerate() {
        let label = registry.name(idx).unwrap_or_default();
        let mut out = vec![Cell::from(label)];
        out.extend(row);
        rows.push(out);
    }
    rows
}

fn comparison_rows(rows: &[ComparisonRow]) -> Vec<Vec<Cell>> {
    let mut out = vec![header(&[
        "Team A",
        "Team B",
        "Probability",
        "Actual",
        "Observed",
    ])];
    out.extend(rows.iter().map(|r| {
        vec![
            Cell::from(r.team_a.as_str()),
            Cell::from(r.team_b.as_str()),
            Cell::from(r.probability),
            Cell::from(r.actual),
            Cell::from(if r.observed { "yes" } else { "no" }),
        ]
    }));
    out
}

fn classification_rows(evaluation: &Evaluation, meeting: usize) -> Vec<Vec<Cell>> {
    let c = &evaluation.classification;
    let m = &evaluation.metrics;
    let mut rows = vec![
        header(&["Metric", "Value"]),
        vec![Cell::from("Meeting"), Cell::from(meeting)],
        vec![
            Cell::from("Observed pairs only"),
            Cell::from(if evaluation.observed_only { "yes" } else { "no" }),
        ],
        vec![Cell::from("Threshold"), Cell::from(c.threshold)],
        vec![Cell::from("Samples"), Cell::from(c.samples)],
        vec![Cell::from("True positives"), Cell::from(c.true_pos)],
        vec![Cell::from("False positives"), Cell::from(c.false_pos)],
        vec![Cell::from("True negatives"), Cell::from(c.true_neg)],
        vec![Cell::from("False negatives"), Cell::from(c.false_neg)],
        vec![Cell::from("Accuracy"), Cell::from(c.accuracy)],
        vec![Cell::from("Precision"), Cell::from(c.precision)],
        vec![Cell::from("Recall"), Cell::from(c.recall)],
        vec![Cell::from("Brier"), Cell::from(m.brier)],
        vec![Cell::from("Log loss"), Cell::from(m.log_loss)],
        vec![Cell::from("Base rate"), Cell::from(m.base_rate)],
        Vec::new(),
        header(&["Pick", "Team A", "Team B", "Probability", "Actual"]),
    ];
    let picks = evaluation
        .picks
        .over
        .iter()
        .map(|r| ("over", r))
        .chain(evaluation.picks.under.iter().map(|r| ("under", r)));
    for (side, r) in picks {
        rows.push(vec![
            Cell::from(side),
            Cell::from(r.team_a.as_str()),
            Cell::from(r.team_b.as_str()),
            Cell::from(r.probability),
            Cell::from(r.actual),
        ]);
    }
    rows
}

fn reliability_rows(evaluation: &Evaluation) -> Vec<Vec<Cell>> {
    let mut rows = vec![header(&[
        "Bucket Start",
        "Bucket End",
        "Count",
        "Avg Predicted",
        "Actual Rate",
    ])];
    rows.extend(evaluation.bins.iter().map(|b| {
        vec![
            Cell::from(b.bucket_start),
            Cell::from(b.bucket_end),
            Cell::from(b.count),
            Cell::from(b.avg_pred),
            Cell::from(b.actual_rate),
        ]
    }));
    rows
}

fn cluster_rows(clustering: &Clustering) -> Vec<Vec<Cell>> {
    let dims = clustering
        .assignments
        .first()
        .map(|a| a.coordinates.len())
        .unwrap_or(0);
    let mut head = header(&["Team", "Cluster"]);
    head.extend((1..=dims).map(|d| Cell::from(format!("Coord {d}"))));
    let mut rows = vec![head];
    rows.extend(clustering.assignments.iter().map(|a| {
        let mut row = vec![Cell::from(a.team.as_str()), Cell::from(a.cluster + 1)];
        row.extend(a.coordinates.iter().map(|v| Cell::from(*v)));
        row
    }));
    rows
}

fn diagnostic_rows(report: &ConvergenceReport) -> Vec<Vec<Cell>> {
    let mut rows = vec![header(&["Parameter", "Mean", "SD", "R-hat", "ESS", "Flagged"])];
    rows.extend(report.parameters.iter().map(|p| {
        vec![
            Cell::from(p.name.as_str()),
            Cell::from(p.mean),
            Cell::from(p.sd),
            Cell::from(p.rhat),
            Cell::from(p.ess),
            Cell::from(if p.flagged { "yes" } else { "" }),
        ]
    }));
    rows
}

fn insert_reliability_chart(sheet: &mut Worksheet, bins: usize) -> Result<()> {
    if bins == 0 {
        return Ok(());
    }
    let last = bins as u32;
    let mut chart = Chart::new(ChartType::Scatter);
    chart
        .add_series()
        .set_name("Observed")
        .set_categories(("Reliability", 1, 3, last, 3))
        .set_values(("Reliability", 1, 4, last, 4));
    chart.title().set_name("Predicted vs actual");
    chart.x_axis().set_name("Average predicted");
    chart.y_axis().set_name("Actual rate");
    sheet
        .insert_chart(1, 7, &chart)
        .context("insert reliability chart")?;
    Ok(())
}

fn insert_cluster_chart(sheet: &mut Worksheet, clustering: &Clustering) -> Result<()> {
    let teams = clustering.assignments.len() as u32;
    let dims = clustering
        .assignments
        .first()
        .map(|a| a.coordinates.len())
        .unwrap_or(0);
    if teams == 0 || dims < 2 {
        return Ok(());
    }
    let mut chart = Chart::new(ChartType::Scatter);
    chart
        .add_series()
        .set_name("Teams")
        .set_categories(("Clusters", 1, 2, teams, 2))
        .set_values(("Clusters", 1, 3, teams, 3));
    chart.title().set_name("Team coordinates");
    sheet
        .insert_chart(1, (dims + 3) as u16, &chart)
        .context("insert cluster chart")?;
    Ok(())
}

fn write_rows(worksheet: &mut Worksheet, rows: &[Vec<Cell>]) -> Result<usize> {
    let mut written = 0usize;
    for (row_idx, row) in rows.iter().enumerate() {
        for (col_idx, value) in row.iter().enumerate() {
            let (r, c) = (row_idx as u32, col_idx as u16);
            match value {
                Cell::Text(text) => {
                    worksheet
                        .write_string(r, c, text)
                        .with_context(|| format!("write cell ({row_idx},{col_idx})"))?;
                }
                Cell::Number(number) => {
                    worksheet
                        .write_number(r, c, *number)
                        .with_context(|| format!("write cell ({row_idx},{col_idx})"))?;
                }
                Cell::Empty => continue,
            }
            written += 1;
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_finite_numbers_become_empty_cells() {
        assert_eq!(Cell::from(f64::NAN), Cell::Empty);
        assert_eq!(Cell::from(f64::INFINITY), Cell::Empty);
        assert_eq!(Cell::from(0.25), Cell::Number(0.25));
    }

    #[test]
    fn matrix_rows_are_labelled_by_registry_order() {
        let registry = TeamRegistry::from_names(["Bears", "Ants"]);
        let values = vec![
            vec![Cell::from(0u8), Cell::from(1u8)],
            vec![Cell::from(1u8), Cell::from(0u8)],
        ];
        let rows = matrix_rows(&registry, values.into_iter());
        assert_eq!(rows[0], vec![Cell::Empty, Cell::from("Ants"), Cell::from("Bears")]);
        assert_eq!(rows[1][0], Cell::from("Ants"));
        assert_eq!(rows[2][1], Cell::Number(1.0));
    }

    #[test]
    fn writes_json_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("summary.json");
        write_json(&path, &serde_json::json!({ "teams": 3 })).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"teams\": 3"));
    }
}
