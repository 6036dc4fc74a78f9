use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{Days, NaiveDate, NaiveDateTime};
use log::Level;
use logging_timer::timer;
use strum::{AsRefStr, Display, EnumIter};

use crate::tickets::{TicketColumn, TicketTable};

/// Category breakdowns keep only this many entries.
pub const TOP_CATEGORIES: usize = 10;
/// Tickets open longer than this many days count as long-running.
pub const LONG_RUNNING_DAYS: f64 = 4.0;
pub const WITH_CUSTOMER_STATUS: &str = "With customer";

/// The grouped-count views.
#[derive(AsRefStr, EnumIter, Display, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Breakdown {
    #[strum(serialize = "Tickets by queue")]
    Queue,
    #[strum(serialize = "Tickets by status")]
    Status,
    #[strum(serialize = "Top categories")]
    Category,
    #[strum(serialize = "Tickets by support line")]
    SupportLine,
}

impl Breakdown {
    pub fn column(&self) -> TicketColumn {
        match self {
            Breakdown::Queue => TicketColumn::AssignedToQueue,
            Breakdown::Status => TicketColumn::Status,
            Breakdown::Category => TicketColumn::Category,
            Breakdown::SupportLine => TicketColumn::SupportLine,
        }
    }

    pub fn counts(&self, table: &TicketTable) -> Vec<(String, usize)> {
        let mut counts = group_counts(table, self.column());
        if *self == Breakdown::Category {
            counts.truncate(TOP_CATEGORIES);
        }
        counts
    }
}

/// Row counts per distinct value of `col`, largest first. Ties keep the order
/// in which values were first seen. Missing values are not counted.
pub fn group_counts(table: &TicketTable, col: TicketColumn) -> Vec<(String, usize)> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut counts: Vec<(String, usize)> = Vec::new();

    for value in table.iter().filter_map(|t| t.category_value(col)) {
        match index.get(value) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(value, counts.len());
                counts.push((value.to_owned(), 1));
            }
        }
    }

    // Stable, so equal counts stay in encounter order
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

/// Tickets opened per calendar day, ascending. Days with no tickets are absent.
pub fn daily_series(table: &TicketTable) -> Vec<(NaiveDate, usize)> {
    let mut days: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for open_date in table.iter().filter_map(|t| t.open_date) {
        *days.entry(open_date.date()).or_default() += 1;
    }
    days.into_iter().collect()
}

/// `series` with every gap between its first and last day filled with zero.
pub fn zero_filled(series: &[(NaiveDate, usize)]) -> Vec<(NaiveDate, usize)> {
    let (Some(&(first, _)), Some(&(last, _))) = (series.first(), series.last()) else {
        return Vec::new();
    };
    let counts: HashMap<NaiveDate, usize> = series.iter().copied().collect();

    let mut filled = Vec::new();
    let mut day = first;
    while day <= last {
        filled.push((day, counts.get(&day).copied().unwrap_or(0)));
        match day.checked_add_days(Days::new(1)) {
            Some(next) => day = next,
            None => break,
        }
    }
    filled
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Headline numbers for a (filtered) table. `None` means there was no data.
#[derive(Debug, Clone, PartialEq)]
pub struct Kpis {
    pub total: usize,
    pub open: usize,
    pub avg_days_open: Option<f64>,
    pub latest_activity: Option<NaiveDateTime>,
    pub long_running: usize,
    /// Percent of tickets closed.
    pub closed_ratio: Option<f64>,
    pub avg_resolution_days: Option<f64>,
}

impl Kpis {
    pub fn from_table(table: &TicketTable) -> Self {
        let _tmr = timer!(Level::Trace; "Kpis::from_table", "{} rows", table.len());

        let total = table.len();
        let closed = table.iter().filter(|t| t.is_closed).count();

        Kpis {
            total,
            open: total - closed,
            avg_days_open: mean(table.iter().filter_map(|t| t.days_open)),
            latest_activity: table.iter().filter_map(|t| t.last_change_date).max(),
            long_running: table
                .iter()
                .filter(|t| t.days_open.is_some_and(|d| d > LONG_RUNNING_DAYS))
                .count(),
            closed_ratio: (total > 0).then(|| closed as f64 / total as f64 * 100.0),
            avg_resolution_days: mean(table.iter().filter_map(|t| t.resolution_time_days)),
        }
    }

    /// Hours from the latest Last Change Date to `now`. Dates are treated as UTC.
    pub fn hours_since_update(&self, now: NaiveDateTime) -> Option<f64> {
        self.latest_activity
            .map(|latest| (now - latest).num_milliseconds() as f64 / 3_600_000.0)
    }

    pub fn recency(&self, now: NaiveDateTime) -> Recency {
        Recency::from_hours(self.hours_since_update(now))
    }
}

/// How long ago the most recent ticket activity was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recency {
    NoActivity,
    UnderAnHour,
    Hours(i64),
    Days(i64),
}

impl Recency {
    pub fn from_hours(hours: Option<f64>) -> Self {
        match hours {
            None => Recency::NoActivity,
            Some(h) if h < 1.0 => Recency::UnderAnHour,
            Some(h) if h < 24.0 => Recency::Hours(h.round_ties_even() as i64),
            Some(h) => Recency::Days((h / 24.0).round_ties_even() as i64),
        }
    }
}

impl fmt::Display for Recency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recency::NoActivity => write!(f, "No activity logged"),
            Recency::UnderAnHour => write!(f, "Updated <1h ago"),
            Recency::Hours(h) => write!(f, "Updated {}h ago", h),
            Recency::Days(d) => write!(f, "Updated {}d ago", d),
        }
    }
}

// ============================================================================
// Summaries
// ============================================================================

fn share(count: usize, counts: &[(String, usize)]) -> f64 {
    let total: usize = counts.iter().map(|(_, n)| n).sum();
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

/// One-line caption for a breakdown.
pub fn breakdown_summary(breakdown: Breakdown, counts: &[(String, usize)]) -> String {
    let Some((leader, count)) = counts.first() else {
        return match breakdown {
            Breakdown::Queue => "No queue distribution available.".to_string(),
            Breakdown::Status => "Ticket status data will appear after ingestion.".to_string(),
            Breakdown::Category => "Categories will populate once datasets are enabled.".to_string(),
            Breakdown::SupportLine => "No support line distribution available.".to_string(),
        };
    };

    match breakdown {
        Breakdown::Queue => format!(
            "{} is carrying {} tickets ({:.0}% of the active workload).",
            leader,
            count,
            share(*count, counts)
        ),
        Breakdown::Status => format!(
            "{} holds {} tickets, commanding {:.0}% of the pipeline.",
            leader,
            count,
            share(*count, counts)
        ),
        Breakdown::Category => format!(
            "{} tops the board with {} cases; revisit knowledge assets there first.",
            leader, count
        ),
        Breakdown::SupportLine => format!(
            "{} handles {} tickets ({:.0}% of the total).",
            leader,
            count,
            share(*count, counts)
        ),
    }
}

pub fn trend_summary(series: &[(NaiveDate, usize)]) -> String {
    match series.last() {
        None => "No daily activity yet; upload more history to unlock the trendline.".to_string(),
        Some((day, count)) => format!(
            "Latest snapshot: {} tickets opened on {}.",
            count,
            day.format("%b %d")
        ),
    }
}

/// Narrative takeaways for a table, most important first.
pub fn insights(table: &TicketTable) -> Vec<String> {
    let kpis = Kpis::from_table(table);
    let mut insights = Vec::new();

    if let Some((queue, count)) = group_counts(table, TicketColumn::AssignedToQueue).first() {
        insights.push(format!(
            "{} is handling {} of {} tickets ({:.0}% of workload), marking it as the primary pressure point.",
            queue,
            count,
            kpis.total,
            *count as f64 / kpis.total as f64 * 100.0
        ));
    }

    if let Some((category, count)) = group_counts(table, TicketColumn::Category).first() {
        insights.push(format!(
            "Category {} leads with {} issues; consider reinforcing knowledge articles around it.",
            category, count
        ));
    }

    if let Some(avg) = kpis.avg_days_open {
        insights.push(format!(
            "Tickets stay active for {:.1} days on average, with {} cases breaching the four-day mark.",
            avg, kpis.long_running
        ));
    }

    if let Some(days) = kpis.avg_resolution_days {
        insights.push(format!(
            "Closed cases resolve in approximately {:.1} days, highlighting room to compress hand-offs.",
            days
        ));
    }

    let with_customer = table
        .iter()
        .filter(|t| t.status.as_deref() == Some(WITH_CUSTOMER_STATUS))
        .count();
    insights.push(format!(
        "{:.0}% of tickets are closed while {} await customer input; follow-ups could unlock extra wins.",
        kpis.closed_ratio.unwrap_or(0.0),
        with_customer
    ));

    insights
}
