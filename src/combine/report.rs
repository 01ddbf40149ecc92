//! Per-file voxel value summaries and their tabular rendering.

use ndarray::ArrayD;
use std::fmt;

/// Distinct voxel values and shape of one volume, captured once.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelSummary {
    unique_values: Vec<f64>,
    shape: Vec<usize>,
}

impl VoxelSummary {
    /// Summarise an array: sorted distinct values (NaN last, once) plus shape.
    ///
    /// Signed zeros report as `0` and every NaN payload collapses to one NaN.
    pub fn of(data: &ArrayD<f64>) -> Self {
        let mut unique_values: Vec<f64> = data.iter().copied().map(canonical).collect();
        unique_values.sort_unstable_by(f64::total_cmp);
        unique_values.dedup_by(|a, b| a.to_bits() == b.to_bits());
        Self {
            unique_values,
            shape: data.shape().to_vec(),
        }
    }

    /// Sorted distinct values.
    pub fn unique_values(&self) -> &[f64] {
        &self.unique_values
    }

    /// Array shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }
}

/// Positive zero and positive quiet NaN stand in for their variants, so
/// `total_cmp` puts NaN last.
fn canonical(v: f64) -> f64 {
    if v.is_nan() {
        f64::NAN
    } else if v == 0.0 {
        0.0
    } else {
        v
    }
}

/// One row of a [`SummaryTable`].
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    /// File the summary belongs to.
    pub filename: String,
    /// Captured summary.
    pub summary: VoxelSummary,
}

/// Filename-keyed summaries in first-seen order.
///
/// Inserting an existing filename replaces that row's summary without moving it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryTable {
    rows: Vec<SummaryRow>,
}

impl SummaryTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the summary for `filename`.
    pub fn insert(&mut self, filename: impl Into<String>, summary: VoxelSummary) {
        let filename = filename.into();
        match self.rows.iter_mut().find(|row| row.filename == filename) {
            Some(row) => row.summary = summary,
            None => self.rows.push(SummaryRow { filename, summary }),
        }
    }

    /// Summary recorded for `filename`.
    pub fn get(&self, filename: &str) -> Option<&VoxelSummary> {
        self.rows
            .iter()
            .find(|row| row.filename == filename)
            .map(|row| &row.summary)
    }

    /// Rows in insertion order.
    pub fn rows(&self) -> &[SummaryRow] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when no rows were recorded.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

const HEADINGS: [&str; 3] = ["Filename", "Unique Values", "Image Shape"];

fn format_values(values: &[f64]) -> String {
    let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(", "))
}

fn format_shape(shape: &[usize]) -> String {
    match shape {
        [single] => format!("({single},)"),
        _ => {
            let parts: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
            format!("({})", parts.join(", "))
        }
    }
}

impl fmt::Display for SummaryTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells: Vec<[String; 3]> = self
            .rows
            .iter()
            .map(|row| {
                [
                    row.filename.clone(),
                    format_values(row.summary.unique_values()),
                    format_shape(row.summary.shape()),
                ]
            })
            .collect();

        let mut widths = HEADINGS.map(str::len);
        for row in &cells {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        writeln!(
            f,
            "{:<w0$}  {:<w1$}  {}",
            HEADINGS[0],
            HEADINGS[1],
            HEADINGS[2],
            w0 = widths[0],
            w1 = widths[1]
        )?;
        for row in &cells {
            writeln!(
                f,
                "{:<w0$}  {:<w1$}  {}",
                row[0],
                row[1],
                row[2],
                w0 = widths[0],
                w1 = widths[1]
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    fn array(values: Vec<f64>, shape: &[usize]) -> ArrayD<f64> {
        ArrayD::from_shape_vec(IxDyn(shape), values).unwrap()
    }

    #[test]
    fn test_summary_sorts_and_dedups() {
        let summary = VoxelSummary::of(&array(vec![5.0, 0.0, 5.0, -0.0, 2.5, 0.0], &[3, 2, 1]));
        assert_eq!(summary.unique_values().len(), 3);
        assert_eq!(summary.unique_values()[1..], [2.5, 5.0]);
        assert_eq!(summary.shape(), &[3, 2, 1]);
    }

    #[test]
    fn test_summary_collapses_nan() {
        let summary =
            VoxelSummary::of(&array(vec![f64::NAN, 1.0, f64::NAN, 0.0], &[2, 2, 1]));
        assert_eq!(summary.unique_values().len(), 3);
        assert_eq!(summary.unique_values()[..2], [0.0, 1.0]);
        assert!(summary.unique_values()[2].is_nan());
    }

    #[test]
    fn test_summary_collapses_negative_nan() {
        let negative_nan = -f64::NAN;
        assert!(negative_nan.is_sign_negative());

        let summary = VoxelSummary::of(&array(vec![negative_nan, 1.0, f64::NAN], &[3, 1, 1]));
        assert_eq!(summary.unique_values().len(), 2);
        assert_eq!(summary.unique_values()[0], 1.0);
        assert!(summary.unique_values()[1].is_nan());
    }

    #[test]
    fn test_summary_reports_positive_zero() {
        let summary = VoxelSummary::of(&array(vec![-0.0, 3.0, 0.0, -0.0], &[2, 2, 1]));
        assert_eq!(summary.unique_values(), &[0.0, 3.0]);
        assert!(summary.unique_values()[0].is_sign_positive());
        assert_eq!(format_values(summary.unique_values()), "[0, 3]");
    }

    #[test]
    fn test_table_keeps_first_seen_order() {
        let a = VoxelSummary::of(&array(vec![0.0, 1.0], &[2, 1, 1]));
        let b = VoxelSummary::of(&array(vec![0.0, 2.0], &[2, 1, 1]));
        let c = VoxelSummary::of(&array(vec![0.0, 3.0], &[2, 1, 1]));

        let mut table = SummaryTable::new();
        table.insert("a.nii", a);
        table.insert("b.nii", b.clone());
        table.insert("a.nii", c.clone());

        let names: Vec<&str> = table.rows().iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, ["a.nii", "b.nii"]);
        assert_eq!(table.get("a.nii"), Some(&c));
        assert_eq!(table.get("b.nii"), Some(&b));
    }

    #[test]
    fn test_table_display() {
        let mut table = SummaryTable::new();
        table.insert(
            "A.nii.gz",
            VoxelSummary::of(&array(vec![0.0, 0.0, 0.0, 5.0], &[2, 2, 1])),
        );
        let rendered = table.to_string();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Filename"));
        assert!(lines[0].contains("Unique Values"));
        assert!(lines[1].contains("[0, 5]"));
        assert!(lines[1].ends_with("(2, 2, 1)"));
    }
}
