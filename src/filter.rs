use std::collections::{BTreeSet, HashSet};

use chrono::NaiveDate;
use log::{debug, Level};
use logging_timer::timer;

use crate::error::TicketPulseError;
use crate::tickets::{TicketColumn, TicketTable};

/// Columns that take an inclusion set, in the order they are applied.
pub const FILTER_COLUMNS: [TicketColumn; 4] = [
    TicketColumn::AssignedToQueue,
    TicketColumn::Status,
    TicketColumn::Category,
    TicketColumn::SupportLine,
];

/// Inclusive range of calendar days on Open Date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, TicketPulseError> {
        if start > end {
            return Err(TicketPulseError::ValidationError(format!(
                "Start date {} is after end date {}",
                start, end
            )));
        }
        Ok(DateRange { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }
}

/// What a table offers to filter on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOptions {
    pub queues: Vec<String>,
    pub statuses: Vec<String>,
    pub categories: Vec<String>,
    pub support_lines: Vec<String>,
    /// First and last Open Date, if any row has one.
    pub open_date_span: Option<DateRange>,
}

impl FilterOptions {
    pub fn from_table(table: &TicketTable) -> Self {
        let open_dates = table.iter().filter_map(|t| t.open_date.map(|d| d.date()));
        let open_date_span = open_dates
            .fold(None, |span: Option<(NaiveDate, NaiveDate)>, day| match span {
                None => Some((day, day)),
                Some((lo, hi)) => Some((lo.min(day), hi.max(day))),
            })
            .map(|(start, end)| DateRange { start, end });

        FilterOptions {
            queues: distinct_values(table, TicketColumn::AssignedToQueue),
            statuses: distinct_values(table, TicketColumn::Status),
            categories: distinct_values(table, TicketColumn::Category),
            support_lines: distinct_values(table, TicketColumn::SupportLine),
            open_date_span,
        }
    }

    pub fn for_column(&self, col: TicketColumn) -> &[String] {
        match col {
            TicketColumn::AssignedToQueue => &self.queues,
            TicketColumn::Status => &self.statuses,
            TicketColumn::Category => &self.categories,
            TicketColumn::SupportLine => &self.support_lines,
            _ => &[],
        }
    }
}

/// Distinct non-missing values, sorted case-insensitively.
fn distinct_values(table: &TicketTable, col: TicketColumn) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut values: Vec<String> = table
        .iter()
        .filter_map(|t| t.category_value(col))
        .filter(|v| seen.insert(*v))
        .map(str::to_owned)
        .collect();
    values.sort_by_key(|v| v.to_lowercase());
    values
}

/// The user's current filter choices. An empty set for a column selects
/// nothing, not everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selections {
    queues: BTreeSet<String>,
    statuses: BTreeSet<String>,
    categories: BTreeSet<String>,
    support_lines: BTreeSet<String>,
    date_range: Option<DateRange>,
}

impl Selections {
    /// Everything selected, and the full Open Date span.
    pub fn all(options: &FilterOptions) -> Self {
        let mut selections = Selections::default();
        for col in FILTER_COLUMNS {
            selections.select(col, options.for_column(col).iter().cloned());
        }
        selections.date_range = options.open_date_span;
        selections
    }

    /// Replace the inclusion set for `col`.
    pub fn select<I, S>(&mut self, col: TicketColumn, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set = values.into_iter().map(Into::into).collect();
        match col {
            TicketColumn::AssignedToQueue => self.queues = set,
            TicketColumn::Status => self.statuses = set,
            TicketColumn::Category => self.categories = set,
            TicketColumn::SupportLine => self.support_lines = set,
            _ => debug!("Ignoring selection for non-filter column {}", col),
        }
    }

    pub fn set_date_range(&mut self, range: Option<DateRange>) {
        self.date_range = range;
    }

    pub fn date_range(&self) -> Option<DateRange> {
        self.date_range
    }

    pub fn selected(&self, col: TicketColumn) -> Option<&BTreeSet<String>> {
        match col {
            TicketColumn::AssignedToQueue => Some(&self.queues),
            TicketColumn::Status => Some(&self.statuses),
            TicketColumn::Category => Some(&self.categories),
            TicketColumn::SupportLine => Some(&self.support_lines),
            _ => None,
        }
    }
}

/// Apply `selections` to `table`.
///
/// Each categorical column is applied in turn as an exact, case-sensitive
/// membership test; rows with a missing value never match. The date range
/// applies only when the input has at least one Open Date and rows remain,
/// and then drops rows without an Open Date.
pub fn filter(table: &TicketTable, selections: &Selections) -> TicketTable {
    let _tmr = timer!(Level::Trace; "filter", "{} rows", table.len());

    let has_open_dates = table.iter().any(|t| t.open_date.is_some());
    let mut filtered = table.clone();

    for col in FILTER_COLUMNS {
        let selected = selections.selected(col).cloned().unwrap_or_default();
        if selected.is_empty() {
            filtered = filtered.into_empty();
            continue;
        }
        filtered = filtered.retain(|t| t.category_value(col).is_some_and(|v| selected.contains(v)));
    }

    if let Some(range) = selections.date_range {
        if has_open_dates && !filtered.is_empty() {
            filtered = filtered.retain(|t| t.open_date.is_some_and(|d| range.contains(d.date())));
        }
    }

    debug!("Filter kept {} of {} rows", filtered.len(), table.len());
    filtered
}
