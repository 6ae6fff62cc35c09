use std::fmt::Write;

use delaycast_forecast::{
    features::SCALED_FEATURES,
    report::{RowStyle, PREDICTION_COLUMNS},
    PredictionTable, ScoredFrame,
};

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// Color is on unless disabled by flag or by a `NO_COLOR` environment variable.
pub fn use_color(no_color: bool) -> bool {
    !no_color && std::env::var_os("NO_COLOR").is_none()
}

/// Bordered table with one colored line per prediction: green for on time,
/// red for delayed, plain otherwise.
pub fn prediction_table(table: &PredictionTable, color: bool) -> String {
    let cells: Vec<[&str; 3]> = table
        .rows()
        .iter()
        .map(|row| {
            [
                row.activity_id.as_str(),
                row.activity_name.as_str(),
                row.predicted_delay_status.as_str(),
            ]
        })
        .collect();
    let mut widths = PREDICTION_COLUMNS.map(|header| header.chars().count());
    for line in &cells {
        for (width, cell) in widths.iter_mut().zip(line) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let rule = widths
        .iter()
        .map(|width| "-".repeat(width + 2))
        .collect::<Vec<_>>()
        .join("+");
    let mut out = String::new();
    let _ = writeln!(out, "+{rule}+");
    let _ = writeln!(out, "{}", format_line(&PREDICTION_COLUMNS, &widths));
    let _ = writeln!(out, "+{rule}+");
    for (line, row) in cells.iter().zip(table.rows()) {
        let text = format_line(line, &widths);
        let paint = match (color, row.style()) {
            (true, RowStyle::OnTime) => Some(GREEN),
            (true, RowStyle::Delayed) => Some(RED),
            _ => None,
        };
        let _ = match paint {
            Some(code) => writeln!(out, "{code}{text}{RESET}"),
            None => writeln!(out, "{text}"),
        };
    }
    let _ = writeln!(out, "+{rule}+");
    let summary = table.summary();
    let _ = writeln!(
        out,
        "{} activities: {} delayed, {} on time",
        table.len(),
        summary.delayed,
        summary.on_time
    );
    out
}

fn format_line(cells: &[&str; 3], widths: &[usize; 3]) -> String {
    let body = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!(" {cell:<width$} "))
        .collect::<Vec<_>>()
        .join("|");
    format!("|{body}|")
}

/// Per-row scores and scaled inputs, duplicates included.
pub fn explain(scored: &ScoredFrame) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<12} {:>8}  {:<8}  {}",
        "Activity ID",
        "score",
        "label",
        SCALED_FEATURES.join(", ")
    );
    for activity in &scored.activities {
        let scaled = activity
            .scaled
            .iter()
            .map(|value| value.map_or_else(|| "-".to_string(), |value| format!("{value:.3}")))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(
            out,
            "{:<12} {:>8.4}  {:<8}  {scaled}",
            activity.row.activity_id,
            activity.score,
            activity.status.label()
        );
    }
    let stats = scored.stats;
    let _ = writeln!(
        out,
        "input rows {}, joined {}, dropped unmatched {}, unknown status {}",
        stats.input_rows, stats.joined_rows, stats.unmatched_rows, stats.unknown_status
    );
    out
}

#[cfg(test)]
mod tests {
    use delaycast_forecast::{DelayStatus, PredictionRow};

    use super::*;

    fn table() -> PredictionTable {
        PredictionTable::from_rows([
            PredictionRow::new("A100", "Pour slab", DelayStatus::Delayed),
            PredictionRow::new("A300", "Cure slab", DelayStatus::OnTime),
            PredictionRow {
                activity_id: "A400".into(),
                activity_name: "Strip forms".into(),
                predicted_delay_status: "Pending".into(),
            },
        ])
    }

    #[test]
    fn colors_rows_by_status() {
        let out = prediction_table(&table(), true);
        let delayed = out.lines().find(|line| line.contains("A100")).unwrap();
        let on_time = out.lines().find(|line| line.contains("A300")).unwrap();
        let other = out.lines().find(|line| line.contains("A400")).unwrap();
        assert!(delayed.starts_with(RED) && delayed.ends_with(RESET));
        assert!(on_time.starts_with(GREEN));
        assert!(other.starts_with('|'));
        assert!(out.contains("3 activities: 1 delayed, 1 on time"));
    }

    #[test]
    fn plain_output_has_no_escapes() {
        let out = prediction_table(&table(), false);
        assert!(!out.contains('\x1b'));
        assert!(out.contains("| Activity ID | Activity Name | Predicted_Delay_Status |"));
    }

    #[test]
    fn flag_disables_color() {
        assert!(!use_color(true));
    }
}
