use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::{debug, Level};
use logging_timer::timer;
use strum::IntoEnumIterator;

use crate::error::TicketPulseError;
use crate::tickets::{Ticket, TicketColumn, TicketTable, UNASSIGNED, UNCATEGORISED};

/// Cell text that reads as "missing", matching the usual CSV export conventions.
const NA_VALUES: [&str; 19] = [
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

// Month-first throughout. Two-digit year forms come before four-digit ones
// because %Y happily accepts "24" as the year 24.
const DATETIME_FORMATS: [&str; 14] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%y %H:%M:%S",
    "%m/%d/%y %H:%M",
    "%m/%d/%y %I:%M:%S %p",
    "%m/%d/%y %I:%M %p",
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%m-%d-%Y %H:%M:%S",
    "%m-%d-%Y %H:%M",
];

const DATE_FORMATS: [&str; 8] = [
    "%Y-%m-%d",
    "%m/%d/%y",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%d-%b-%Y",
    "%d %b %Y",
    "%b %d %Y",
    "%b %d, %Y",
];

/// A CSV table as read, before any schema is applied.
///
/// Header names are already stripped of surrounding whitespace. A cell is
/// `None` when the source text is one of the recognized missing markers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawTable {
    headers: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        let headers = headers.into_iter().map(|h| h.trim().to_owned()).collect();
        RawTable { headers, rows }
    }

    /// Parse CSV text. Rows shorter than the header are padded with missing
    /// cells; rows longer than the header are a tokenizing error.
    pub fn from_csv_str(text: &str) -> Result<Self, TicketPulseError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_owned()).collect();
        if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
            return Err(TicketPulseError::Error(
                "No columns to parse from file".to_string(),
            ));
        }

        let width = headers.len();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.len() > width {
                let line = record.position().map(|p| p.line()).unwrap_or_default();
                return Err(TicketPulseError::Error(format!(
                    "Error tokenizing data. Expected {} fields in line {}, saw {}",
                    width,
                    line,
                    record.len()
                )));
            }

            let mut row: Vec<Option<String>> = record.iter().map(Self::cell_from_text).collect();
            row.resize(width, None);
            rows.push(row);
        }

        Ok(RawTable::new(headers, rows))
    }

    /// Parse CSV bytes downloaded from the blob store (UTF-8, invalid
    /// sequences replaced).
    pub fn from_utf8_bytes(bytes: &[u8]) -> Result<Self, TicketPulseError> {
        let (text, _, _) = encoding_rs::UTF_8.decode(bytes);
        Self::from_csv_str(&text)
    }

    /// Parse CSV bytes read from the local fallback directory (Windows-1252).
    pub fn from_windows_1252_bytes(bytes: &[u8]) -> Result<Self, TicketPulseError> {
        let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
        Self::from_csv_str(&text)
    }

    /// Turn a canonical table back into raw form, using the canonical header.
    #[cfg(test)]
    pub fn from_tickets(table: &TicketTable) -> Self {
        let headers = TicketColumn::header()
            .into_iter()
            .map(str::to_owned)
            .collect();
        let rows = table
            .iter()
            .map(|ticket| {
                TicketColumn::iter()
                    .map(|col| Self::cell_from_text(&ticket.value(col).to_string()))
                    .collect()
            })
            .collect();
        RawTable { headers, rows }
    }

    fn cell_from_text(text: &str) -> Option<String> {
        if NA_VALUES.contains(&text) {
            None
        } else {
            Some(text.to_owned())
        }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Maps each expected column to its position in a raw header, or `None` when
/// the raw table lacks it.
struct ColumnMap {
    positions: Vec<(TicketColumn, Option<usize>)>,
}

impl ColumnMap {
    fn reconcile(headers: &[String]) -> Self {
        let positions = TicketColumn::expected()
            .map(|col| {
                let pos = headers.iter().position(|h| h == col.name());
                (col, pos)
            })
            .collect();
        ColumnMap { positions }
    }

    fn missing(&self) -> Vec<&'static str> {
        self.positions
            .iter()
            .filter(|(_, pos)| pos.is_none())
            .map(|(col, _)| col.name())
            .collect()
    }

    fn cell<'a>(&self, row: &'a [Option<String>], col: TicketColumn) -> Option<&'a str> {
        self.positions
            .iter()
            .find(|(c, _)| *c == col)
            .and_then(|(_, pos)| *pos)
            .and_then(|pos| row.get(pos))
            .and_then(|cell| cell.as_deref())
    }
}

/// Convert a raw table into the canonical ticket schema.
///
/// Absent expected columns become missing values, dates that do not parse
/// become missing, and the queue, user and category defaults are applied.
/// Any `Source File` column in the input is replaced by `source_name`.
pub fn normalize(raw: &RawTable, source_name: &str) -> TicketTable {
    let _tmr = timer!(Level::Trace; "normalize", "{} rows from {}", raw.len(), source_name);

    let map = ColumnMap::reconcile(raw.headers());
    let missing = map.missing();
    if !missing.is_empty() {
        debug!(
            "{}: synthesizing {} missing column(s): {}",
            source_name,
            missing.len(),
            missing.join(", ")
        );
    }

    let rows = raw
        .rows
        .iter()
        .map(|row| {
            let text = |col: TicketColumn| map.cell(row, col).map(str::to_owned);
            let date = |col: TicketColumn| map.cell(row, col).and_then(parse_ticket_date);

            let open_date = date(TicketColumn::OpenDate);
            let last_change_date = date(TicketColumn::LastChangeDate);
            let closed_date = date(TicketColumn::ClosedDate);

            Ticket {
                number: text(TicketColumn::Number),
                summary: text(TicketColumn::Summary),
                assigned_to_queue: text(TicketColumn::AssignedToQueue)
                    .unwrap_or_else(|| UNASSIGNED.to_owned()),
                support_line: text(TicketColumn::SupportLine),
                assigned_to_user: text(TicketColumn::AssignedToUser)
                    .unwrap_or_else(|| UNASSIGNED.to_owned()),
                status: text(TicketColumn::Status),
                next_status: text(TicketColumn::NextStatus),
                owning_dept: text(TicketColumn::OwningDept),
                owner: text(TicketColumn::Owner),
                person: text(TicketColumn::Person),
                organization: text(TicketColumn::Organization),
                priority: text(TicketColumn::Priority),
                category: text(TicketColumn::Category)
                    .unwrap_or_else(|| UNCATEGORISED.to_owned()),
                open_date,
                opened_by: text(TicketColumn::OpenedBy),
                last_change_date,
                closed_date,
                service: text(TicketColumn::Service),
                resolution_code: text(TicketColumn::ResolutionCode),
                root_cause: text(TicketColumn::RootCause),
                days_open: days_between(open_date, last_change_date),
                resolution_time_days: days_between(open_date, closed_date),
                is_closed: closed_date.is_some(),
                source_file: source_name.to_owned(),
            }
        })
        .collect();

    TicketTable::new(rows)
}

/// Fractional days from `start` to `end`, or `None` if either is missing.
pub fn days_between(start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Option<f64> {
    match (start, end) {
        (Some(start), Some(end)) => {
            Some((end - start).num_milliseconds() as f64 / 86_400_000.0)
        }
        _ => None,
    }
}

/// Parse a ticket date leniently. Ambiguous day/month text is always read
/// month-first; text that fits no known layout yields `None`.
pub fn parse_ticket_date(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt);
        }
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
