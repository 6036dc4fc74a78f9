use std::fmt::Write as _;
use std::str::FromStr;

use chrono::NaiveDateTime;
use log::debug;
use strum::IntoEnumIterator;
use tabled::{
    builder::Builder,
    settings::{object::Rows, Alignment, Style},
};

use crate::aggregate::{
    breakdown_summary, daily_series, insights, trend_summary, zero_filled, Breakdown, Kpis,
};
use crate::error::TicketPulseError;
use crate::filter::{FilterOptions, Selections, FILTER_COLUMNS};
use crate::loader::{DataSource, DatasetLoadResult};
use crate::tickets::{Ticket, TicketTable, DETAIL_COLUMNS};

const NO_DATA: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Table,
    Csv,
}

impl FromStr for ReportFormat {
    type Err = TicketPulseError;
    fn from_str(s: &str) -> Result<Self, TicketPulseError> {
        match s.to_lowercase().as_str() {
            "table" => Ok(ReportFormat::Table),
            "csv" => Ok(ReportFormat::Csv),
            _ => Err(TicketPulseError::Error("Invalid format specified.".to_string())),
        }
    }
}

pub struct Reports {
    // No fields
}

impl Reports {
    /// Dashboard-style summary of a filtered view. With `fill_gaps` the daily
    /// trend lists quiet days as zero. Insights always describe the whole
    /// combined table, not the filtered view.
    pub fn summary(
        bundle: &DatasetLoadResult,
        options: &FilterOptions,
        selections: &Selections,
        filtered: &TicketTable,
        now: NaiveDateTime,
        fill_gaps: bool,
    ) -> String {
        let mut out = String::new();

        Self::section(&mut out, "Overview");
        for line in Self::overview_lines(bundle) {
            let _ = writeln!(out, "  {}", line);
        }

        if bundle.combined.is_empty() {
            Self::section(&mut out, "No data to display");
            let _ = writeln!(
                out,
                "  Use the datasets commands to include an existing CSV or upload a new one."
            );
            Self::append_errors(&mut out, bundle);
            return out;
        }

        Self::section(&mut out, "Filters");
        for col in FILTER_COLUMNS {
            let available = options.for_column(col).len();
            let selected = selections.selected(col).map_or(0, |s| s.len());
            let _ = writeln!(out, "  {}: {} of {} selected", col, selected, available);
        }
        match selections.date_range() {
            Some(range) => {
                let _ = writeln!(out, "  Open Date: {} to {}", range.start(), range.end());
            }
            None => {
                let _ = writeln!(out, "  Open Date: any");
            }
        }

        Self::section(&mut out, "Key metrics");
        let kpis = Kpis::from_table(filtered);
        let _ = writeln!(out, "{}", Self::kpi_table(&kpis, now));

        Self::section(&mut out, "Charts");
        if filtered.is_empty() {
            let _ = writeln!(out, "  No records. Refine or clear filters to visualise tickets.");
        } else {
            for breakdown in Breakdown::iter() {
                let counts = breakdown.counts(filtered);
                let header = [breakdown.column().name(), "Tickets"];
                let rows = counts
                    .iter()
                    .map(|(value, count)| vec![value.clone(), count.to_string()]);
                let _ = writeln!(out, "{}", breakdown);
                let _ = writeln!(out, "{}", Self::render_table(&header, rows));
                let _ = writeln!(out, "  {}\n", breakdown_summary(breakdown, &counts));
            }

            let series = daily_series(filtered);
            let shown = if fill_gaps {
                zero_filled(&series)
            } else {
                series.clone()
            };
            let rows = shown
                .iter()
                .map(|(day, count)| vec![day.to_string(), count.to_string()]);
            let _ = writeln!(out, "Tickets opened per day");
            let _ = writeln!(out, "{}", Self::render_table(&["Open Date", "Tickets"], rows));
            let _ = writeln!(out, "  {}", trend_summary(&series));
        }

        Self::section(&mut out, "Insights");
        for insight in insights(&bundle.combined) {
            let _ = writeln!(out, "  * {}", insight);
        }

        Self::append_errors(&mut out, bundle);
        out
    }

    /// Headline lines describing the loaded bundle.
    pub fn overview_lines(bundle: &DatasetLoadResult) -> Vec<String> {
        let included = bundle.registry.iter().filter(|(_, meta)| meta.included).count();
        let stored = bundle.registry.len();
        let records = bundle.combined.len();

        let active_line = if included > 0 {
            format!("{} dataset{} active", included, plural(included))
        } else {
            "Activate a dataset to populate insights".to_string()
        };
        let stored_line = if stored > 0 {
            format!("{} dataset{} stored", stored, plural(stored))
        } else {
            "No datasets uploaded yet".to_string()
        };
        let source_line = match bundle.source {
            DataSource::Remote => "Remote storage live",
            DataSource::Local => "Local fallback mode",
        };
        let closure = Kpis::from_table(&bundle.combined)
            .closed_ratio
            .map_or(0, |ratio| ratio.round() as i64);
        let data_line = if included > 0 {
            format!(
                "{} tickets across {} active dataset{}.",
                records,
                included,
                plural(included)
            )
        } else {
            "Upload or enable a dataset to unlock the command center.".to_string()
        };

        vec![
            active_line,
            stored_line,
            source_line.to_string(),
            format!("{}% closure rate", closure),
            data_line,
        ]
    }

    pub fn datasets(bundle: &DatasetLoadResult) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Source: {}", bundle.source);

        if bundle.registry.is_empty() {
            let _ = writeln!(out, "No datasets yet. Upload a CSV to start analysing tickets.");
        } else {
            let rows = bundle.registry.iter().map(|(name, meta)| {
                vec![
                    name.clone(),
                    if meta.included { "Included" } else { "Excluded" }.to_string(),
                    bundle
                        .frames
                        .get(name)
                        .map_or(NO_DATA.to_string(), |table| table.len().to_string()),
                    meta.uploaded_at_label(),
                ]
            });
            let _ = writeln!(
                out,
                "{}",
                Self::render_table(&["Dataset", "Status", "Tickets", "Uploaded"], rows)
            );

            if !bundle.registry.any_included() {
                let _ = writeln!(
                    out,
                    "All datasets excluded. Enable at least one CSV to populate the dashboard."
                );
            }
        }

        Self::append_errors(&mut out, bundle);
        out
    }

    /// The detail view: detail columns, newest Open Date first.
    pub fn tickets(
        filtered: &TicketTable,
        limit: Option<usize>,
        format: ReportFormat,
    ) -> Result<String, TicketPulseError> {
        let mut rows = filtered.detail_rows();
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        debug!("Rendering {} detail row(s) as {:?}", rows.len(), format);

        match format {
            ReportFormat::Csv => Self::detail_csv(&rows),
            ReportFormat::Table => {
                let header: Vec<&str> = DETAIL_COLUMNS.iter().map(|col| col.name()).collect();
                let body = rows.iter().map(|t| Self::detail_record(t));
                Ok(Self::render_table(&header, body))
            }
        }
    }

    fn detail_record(ticket: &Ticket) -> Vec<String> {
        DETAIL_COLUMNS
            .iter()
            .map(|col| ticket.value(*col).to_string())
            .collect()
    }

    fn detail_csv(rows: &[&Ticket]) -> Result<String, TicketPulseError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(DETAIL_COLUMNS.iter().map(|col| col.name()))?;
        for ticket in rows {
            writer.write_record(Self::detail_record(ticket))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| TicketPulseError::Error(format!("Failed to write CSV: {}", e)))?;
        String::from_utf8(bytes).map_err(|e| TicketPulseError::Error(e.to_string()))
    }

    fn kpi_table(kpis: &Kpis, now: NaiveDateTime) -> String {
        let rows = vec![
            vec![
                "Tickets in view".to_string(),
                kpis.total.to_string(),
                "Records after filters".to_string(),
            ],
            vec![
                "Active load".to_string(),
                kpis.open.to_string(),
                format!("Still awaiting closure, {} running >4d", kpis.long_running),
            ],
            vec![
                "Avg days open".to_string(),
                kpis.avg_days_open
                    .map_or(NO_DATA.to_string(), |d| format!("{:.1}d", d)),
                "Mean time to resolve".to_string(),
            ],
            vec![
                "Last update".to_string(),
                kpis.latest_activity
                    .map_or(NO_DATA.to_string(), |d| d.format("%Y-%m-%d %H:%M").to_string()),
                kpis.recency(now).to_string(),
            ],
            vec![
                "Closed".to_string(),
                kpis.closed_ratio
                    .map_or(NO_DATA.to_string(), |r| format!("{:.0}%", r)),
                "Share of tickets with a Closed Date".to_string(),
            ],
            vec![
                "Avg resolution".to_string(),
                kpis.avg_resolution_days
                    .map_or(NO_DATA.to_string(), |d| format!("{:.1}d", d)),
                "Open to close, closed tickets only".to_string(),
            ],
        ];
        Self::render_table(&["Metric", "Value", "Detail"], rows)
    }

    fn render_table<I>(header: &[&str], rows: I) -> String
    where
        I: IntoIterator<Item = Vec<String>>,
    {
        let mut builder = Builder::default();
        builder.push_record(header.iter().map(|h| h.to_string()));
        for row in rows {
            builder.push_record(row);
        }

        let mut table = builder.build();
        table.with(Style::modern());
        table.modify(Rows::first(), Alignment::center());
        table.to_string()
    }

    fn section(out: &mut String, title: &str) {
        let _ = writeln!(out, "\n{}\n{}", title, "=".repeat(title.len()));
    }

    fn append_errors(out: &mut String, bundle: &DatasetLoadResult) {
        if bundle.errors.is_empty() {
            return;
        }
        Self::section(out, "Load issues");
        for error in &bundle.errors {
            let _ = writeln!(out, "  ! {}", error);
        }
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::filter;
    use crate::registry::{DatasetMeta, Registry};
    use crate::tickets::tests::{at, ticket};
    use crate::tickets::TicketColumn;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn bundle(source: DataSource, registry: Registry, combined: TicketTable) -> DatasetLoadResult {
        let mut frames = BTreeMap::new();
        for (name, _) in registry.iter() {
            frames.insert(name.clone(), combined.clone());
        }
        DatasetLoadResult {
            frames,
            combined,
            registry,
            errors: Vec::new(),
            source,
        }
    }

    fn registry(entries: &[(&str, bool)]) -> Registry {
        let mut registry = Registry::new();
        for (name, included) in entries {
            registry
                .insert(name, DatasetMeta::new(*included, None), |_| Ok(()))
                .unwrap();
        }
        registry
    }

    fn sample_table() -> TicketTable {
        let mut closed = ticket("1", "Billing");
        closed.open_date = Some(at(2024, 3, 1, 9));
        closed.closed_date = Some(at(2024, 3, 2, 9));
        closed.is_closed = true;
        let mut newer = ticket("2", "Support");
        newer.open_date = Some(at(2024, 3, 4, 9));
        newer.summary = Some("Printer, again".to_owned());
        TicketTable::new(vec![closed, newer, ticket("3", "Support")])
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!(ReportFormat::from_str("CSV").unwrap(), ReportFormat::Csv);
        assert_eq!(ReportFormat::from_str("table").unwrap(), ReportFormat::Table);
        assert!(ReportFormat::from_str("tree").is_err());
    }

    #[test]
    fn test_overview_lines() {
        let b = bundle(
            DataSource::Remote,
            registry(&[("a.csv", true), ("b.csv", false)]),
            sample_table(),
        );
        assert_eq!(
            Reports::overview_lines(&b),
            vec![
                "1 dataset active",
                "2 datasets stored",
                "Remote storage live",
                "33% closure rate",
                "3 tickets across 1 active dataset.",
            ]
        );
    }

    #[test]
    fn test_overview_lines_with_nothing_loaded() {
        let b = bundle(DataSource::Local, Registry::new(), TicketTable::empty());
        assert_eq!(
            Reports::overview_lines(&b),
            vec![
                "Activate a dataset to populate insights",
                "No datasets uploaded yet",
                "Local fallback mode",
                "0% closure rate",
                "Upload or enable a dataset to unlock the command center.",
            ]
        );
    }

    #[test]
    fn test_detail_csv_is_newest_first() {
        let csv = Reports::tickets(&sample_table(), None, ReportFormat::Csv).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Number,Summary,Assigned To Queue,Support Line"));
        assert!(lines[0].ends_with("Days Open,Source File"));
        assert!(lines[1].starts_with("2,\"Printer, again\",Support"));
        assert!(lines[2].starts_with("1,,Billing"));
        assert!(lines[3].starts_with("3,,Support"));
    }

    #[test]
    fn test_detail_limit() {
        let csv = Reports::tickets(&sample_table(), Some(1), ReportFormat::Csv).unwrap();
        assert_eq!(csv.lines().count(), 2);
    }

    #[test]
    fn test_detail_table_has_headers() {
        let table = Reports::tickets(&sample_table(), None, ReportFormat::Table).unwrap();
        assert!(table.contains("Assigned To Queue"));
        assert!(table.contains("Printer, again"));
    }

    #[test]
    fn test_datasets_listing() {
        let mut b = bundle(
            DataSource::Remote,
            registry(&[("a.csv", false), ("b.csv", false)]),
            TicketTable::empty(),
        );
        b.errors.push("c.csv: Failed to download c.csv".to_string());

        let out = Reports::datasets(&b);
        assert!(out.contains("Source: remote"));
        assert!(out.contains("a.csv"));
        assert!(out.contains("Excluded"));
        assert!(out.contains("All datasets excluded"));
        assert!(out.contains("! c.csv: Failed to download c.csv"));
    }

    #[test]
    fn test_summary_sections() {
        let table = sample_table();
        let b = bundle(DataSource::Remote, registry(&[("a.csv", true)]), table.clone());
        let options = FilterOptions::from_table(&table);
        let selections = Selections::all(&options);

        let out = Reports::summary(&b, &options, &selections, &table, at(2024, 3, 10, 0), false);
        assert!(out.contains("Overview"));
        assert!(out.contains("Assigned To Queue: 2 of 2 selected"));
        assert!(out.contains("Open Date: 2024-03-01 to 2024-03-04"));
        assert!(out.contains("Tickets by queue"));
        assert!(out.contains("Support is carrying 2 tickets (67% of the active workload)."));
        assert!(out.contains("Latest snapshot: 1 tickets opened on Mar 04."));
        assert!(out.contains("No activity logged"));
        assert!(out.contains("Insights"));
    }

    #[test]
    fn test_summary_fill_gaps() {
        let table = sample_table();
        let b = bundle(DataSource::Remote, registry(&[("a.csv", true)]), table.clone());
        let options = FilterOptions::from_table(&table);
        let selections = Selections::all(&options);

        let sparse = Reports::summary(&b, &options, &selections, &table, at(2024, 3, 10, 0), false);
        let filled = Reports::summary(&b, &options, &selections, &table, at(2024, 3, 10, 0), true);
        assert!(!sparse.contains("2024-03-02"));
        assert!(filled.contains("2024-03-02"));
        assert!(filled.contains("2024-03-03"));
    }

    #[test]
    fn test_summary_insights_ignore_filters() {
        let combined = TicketTable::new(vec![
            ticket("1", "Billing"),
            ticket("2", "Billing"),
            ticket("3", "Support"),
        ]);
        let b = bundle(DataSource::Remote, registry(&[("a.csv", true)]), combined.clone());
        let options = FilterOptions::from_table(&combined);
        let mut selections = Selections::all(&options);
        selections.select(TicketColumn::AssignedToQueue, ["Support"]);
        let filtered = filter(&combined, &selections);
        assert_eq!(filtered.len(), 1);

        let out = Reports::summary(&b, &options, &selections, &filtered, at(2024, 3, 10, 0), false);
        assert!(out.contains("Billing is handling 2 of 3 tickets"), "{}", out);
        assert!(!out.contains("Support is handling"));
        // Charts still follow the filter
        assert!(out.contains("Support is carrying 1 tickets"));
    }

    #[test]
    fn test_summary_stops_early_without_data() {
        let mut b = bundle(DataSource::Remote, registry(&[("a.csv", false)]), TicketTable::empty());
        b.errors.push("b.csv: Failed to download b.csv".to_string());
        let options = FilterOptions::from_table(&b.combined);
        let selections = Selections::all(&options);

        let out = Reports::summary(
            &b,
            &options,
            &selections,
            &TicketTable::empty(),
            at(2024, 3, 10, 0),
            false,
        );
        assert!(out.contains("Overview"));
        assert!(out.contains("No data to display"));
        assert!(out.contains("! b.csv: Failed to download b.csv"));
        assert!(!out.contains("Filters"));
        assert!(!out.contains("Key metrics"));
        assert!(!out.contains("Insights"));
    }

    #[test]
    fn test_summary_of_empty_view() {
        let b = bundle(DataSource::Remote, registry(&[("a.csv", true)]), sample_table());
        let options = FilterOptions::from_table(&b.combined);
        let out = Reports::summary(
            &b,
            &options,
            &Selections::default(),
            &TicketTable::empty(),
            at(2024, 3, 10, 0),
            false,
        );
        assert!(out.contains("No records."));
        assert!(out.contains("Assigned To Queue: 0 of 2 selected"));
        assert!(out.contains("Open Date: any"));
    }
}
