use std::fmt;

use chrono::NaiveDateTime;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

pub const UNASSIGNED: &str = "Unassigned";
pub const UNCATEGORISED: &str = "Uncategorised";

/// Format used when a canonical date is written back out as text.
pub const DATE_DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Columns of the canonical ticket table, in canonical order.
///
/// The first twenty variants are the expected raw columns in the order a
/// ticket export lists them. The remaining four are appended by the
/// normalizer. `TicketColumn::iter()` always yields this order, which is what
/// makes tables from different datasets safe to concatenate.
#[derive(AsRefStr, EnumIter, EnumString, IntoStaticStr, Debug, Display, PartialEq, Eq, Hash, Copy, Clone)]
pub enum TicketColumn {
    #[strum(serialize = "Number")]
    Number,
    #[strum(serialize = "Summary")]
    Summary,
    #[strum(serialize = "Assigned To Queue")]
    AssignedToQueue,
    #[strum(serialize = "Support Line")]
    SupportLine,
    #[strum(serialize = "Assigned to User")]
    AssignedToUser,
    #[strum(serialize = "Status")]
    Status,
    #[strum(serialize = "Next Status")]
    NextStatus,
    #[strum(serialize = "Owning Dept")]
    OwningDept,
    #[strum(serialize = "Owner")]
    Owner,
    #[strum(serialize = "Person")]
    Person,
    #[strum(serialize = "Organization")]
    Organization,
    #[strum(serialize = "Priority")]
    Priority,
    #[strum(serialize = "Category")]
    Category,
    #[strum(serialize = "Open Date")]
    OpenDate,
    #[strum(serialize = "Opened By")]
    OpenedBy,
    #[strum(serialize = "Last Change Date")]
    LastChangeDate,
    #[strum(serialize = "Closed Date")]
    ClosedDate,
    #[strum(serialize = "Service")]
    Service,
    #[strum(serialize = "Resolution Code")]
    ResolutionCode,
    #[strum(serialize = "Root Cause")]
    RootCause,

    // Appended by the normalizer, never read from raw input (except Source File)
    #[strum(serialize = "Days Open")]
    DaysOpen,
    #[strum(serialize = "Resolution Time Days")]
    ResolutionTimeDays,
    #[strum(serialize = "Is Closed")]
    IsClosed,
    #[strum(serialize = "Source File")]
    SourceFile,
}

impl TicketColumn {
    /// The raw columns a ticket export is expected to carry.
    pub fn expected() -> impl Iterator<Item = TicketColumn> {
        TicketColumn::iter().filter(|col| !col.is_appended())
    }

    /// Columns the normalizer appends after the expected ones.
    pub fn is_appended(&self) -> bool {
        matches!(
            self,
            TicketColumn::DaysOpen
                | TicketColumn::ResolutionTimeDays
                | TicketColumn::IsClosed
                | TicketColumn::SourceFile
        )
    }

    /// Full canonical header, in order.
    pub fn header() -> Vec<&'static str> {
        TicketColumn::iter().map(|col| col.name()).collect()
    }

    pub fn name(&self) -> &'static str {
        (*self).into()
    }
}

/// The columns shown in the ticket detail view, in display order.
pub const DETAIL_COLUMNS: [TicketColumn; 12] = [
    TicketColumn::Number,
    TicketColumn::Summary,
    TicketColumn::AssignedToQueue,
    TicketColumn::SupportLine,
    TicketColumn::AssignedToUser,
    TicketColumn::Status,
    TicketColumn::Category,
    TicketColumn::OpenDate,
    TicketColumn::LastChangeDate,
    TicketColumn::ClosedDate,
    TicketColumn::DaysOpen,
    TicketColumn::SourceFile,
];

/// A single cell of the canonical table.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue<'a> {
    Missing,
    Text(&'a str),
    Date(NaiveDateTime),
    Number(f64),
    Bool(bool),
}

impl fmt::Display for CellValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Missing => Ok(()),
            CellValue::Text(s) => write!(f, "{}", s),
            CellValue::Date(d) => write!(f, "{}", d.format(DATE_DISPLAY_FORMAT)),
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
        }
    }
}

/// One normalized support ticket.
///
/// Text fields that may be absent in the export are `Option<String>`. The
/// queue, user and category always carry a value because the normalizer
/// substitutes defaults for them.
#[derive(Clone, Debug, PartialEq)]
pub struct Ticket {
    pub number: Option<String>,
    pub summary: Option<String>,
    pub assigned_to_queue: String,
    pub support_line: Option<String>,
    pub assigned_to_user: String,
    pub status: Option<String>,
    pub next_status: Option<String>,
    pub owning_dept: Option<String>,
    pub owner: Option<String>,
    pub person: Option<String>,
    pub organization: Option<String>,
    pub priority: Option<String>,
    pub category: String,
    pub open_date: Option<NaiveDateTime>,
    pub opened_by: Option<String>,
    pub last_change_date: Option<NaiveDateTime>,
    pub closed_date: Option<NaiveDateTime>,
    pub service: Option<String>,
    pub resolution_code: Option<String>,
    pub root_cause: Option<String>,
    pub days_open: Option<f64>,
    pub resolution_time_days: Option<f64>,
    pub is_closed: bool,
    pub source_file: String,
}

impl Ticket {
    pub fn value(&self, col: TicketColumn) -> CellValue<'_> {
        fn text(s: &Option<String>) -> CellValue<'_> {
            s.as_deref().map_or(CellValue::Missing, CellValue::Text)
        }
        fn date(d: &Option<NaiveDateTime>) -> CellValue<'static> {
            d.map_or(CellValue::Missing, CellValue::Date)
        }
        fn number(n: &Option<f64>) -> CellValue<'static> {
            n.map_or(CellValue::Missing, CellValue::Number)
        }

        match col {
            TicketColumn::Number => text(&self.number),
            TicketColumn::Summary => text(&self.summary),
            TicketColumn::AssignedToQueue => CellValue::Text(&self.assigned_to_queue),
            TicketColumn::SupportLine => text(&self.support_line),
            TicketColumn::AssignedToUser => CellValue::Text(&self.assigned_to_user),
            TicketColumn::Status => text(&self.status),
            TicketColumn::NextStatus => text(&self.next_status),
            TicketColumn::OwningDept => text(&self.owning_dept),
            TicketColumn::Owner => text(&self.owner),
            TicketColumn::Person => text(&self.person),
            TicketColumn::Organization => text(&self.organization),
            TicketColumn::Priority => text(&self.priority),
            TicketColumn::Category => CellValue::Text(&self.category),
            TicketColumn::OpenDate => date(&self.open_date),
            TicketColumn::OpenedBy => text(&self.opened_by),
            TicketColumn::LastChangeDate => date(&self.last_change_date),
            TicketColumn::ClosedDate => date(&self.closed_date),
            TicketColumn::Service => text(&self.service),
            TicketColumn::ResolutionCode => text(&self.resolution_code),
            TicketColumn::RootCause => text(&self.root_cause),
            TicketColumn::DaysOpen => number(&self.days_open),
            TicketColumn::ResolutionTimeDays => number(&self.resolution_time_days),
            TicketColumn::IsClosed => CellValue::Bool(self.is_closed),
            TicketColumn::SourceFile => CellValue::Text(&self.source_file),
        }
    }

    /// Text value of one of the categorical filter columns.
    pub fn category_value(&self, col: TicketColumn) -> Option<&str> {
        match self.value(col) {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// A canonical ticket table. The schema is fixed by [`TicketColumn`], so an
/// empty table still has the full column set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TicketTable {
    rows: Vec<Ticket>,
}

impl TicketTable {
    pub fn new(rows: Vec<Ticket>) -> Self {
        TicketTable { rows }
    }

    #[cfg(test)]
    pub fn empty() -> Self {
        TicketTable::default()
    }

    #[cfg(test)]
    pub fn columns(&self) -> Vec<&'static str> {
        TicketColumn::header()
    }

    pub fn rows(&self) -> &[Ticket] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Ticket> {
        self.rows.iter()
    }

    /// Concatenate tables in the given order.
    pub fn concat<'a, I>(tables: I) -> Self
    where
        I: IntoIterator<Item = &'a TicketTable>,
    {
        let rows = tables
            .into_iter()
            .flat_map(|table| table.rows.iter().cloned())
            .collect();
        TicketTable { rows }
    }

    /// Keep only the rows for which `pred` holds.
    pub fn retain<F>(mut self, pred: F) -> Self
    where
        F: FnMut(&Ticket) -> bool,
    {
        self.rows.retain(pred);
        self
    }

    /// Drop every row, keeping the schema.
    pub fn into_empty(mut self) -> Self {
        self.rows.clear();
        self
    }

    /// Rows for the detail view: newest Open Date first, missing dates last.
    pub fn detail_rows(&self) -> Vec<&Ticket> {
        let mut rows: Vec<&Ticket> = self.rows.iter().collect();
        rows.sort_by(|a, b| match (a.open_date, b.open_date) {
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        rows
    }
}

impl<'a> IntoIterator for &'a TicketTable {
    type Item = &'a Ticket;
    type IntoIter = std::slice::Iter<'a, Ticket>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    pub(crate) fn ticket(number: &str, queue: &str) -> Ticket {
        Ticket {
            number: Some(number.to_owned()),
            summary: None,
            assigned_to_queue: queue.to_owned(),
            support_line: Some("1st Line".to_owned()),
            assigned_to_user: UNASSIGNED.to_owned(),
            status: Some("Open".to_owned()),
            next_status: None,
            owning_dept: None,
            owner: None,
            person: None,
            organization: None,
            priority: None,
            category: UNCATEGORISED.to_owned(),
            open_date: None,
            opened_by: None,
            last_change_date: None,
            closed_date: None,
            service: None,
            resolution_code: None,
            root_cause: None,
            days_open: None,
            resolution_time_days: None,
            is_closed: false,
            source_file: "test.csv".to_owned(),
        }
    }

    pub(crate) fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_header_order() {
        let header = TicketColumn::header();
        assert_eq!(header.len(), 24);
        assert_eq!(header[0], "Number");
        assert_eq!(header[13], "Open Date");
        assert_eq!(header[19], "Root Cause");
        assert_eq!(
            &header[20..],
            &["Days Open", "Resolution Time Days", "Is Closed", "Source File"]
        );
    }

    #[test]
    fn test_name_matches_strum_serialization() {
        for col in TicketColumn::iter() {
            assert_eq!(col.name(), col.as_ref());
            assert_eq!(col.name().parse::<TicketColumn>().unwrap(), col);
        }
    }

    #[test]
    fn test_expected_excludes_appended() {
        let expected: Vec<TicketColumn> = TicketColumn::expected().collect();
        assert_eq!(expected.len(), 20);
        assert!(!expected.contains(&TicketColumn::SourceFile));
        assert!(!expected.contains(&TicketColumn::DaysOpen));
    }

    #[test]
    fn test_empty_table_has_full_schema() {
        let table = TicketTable::empty();
        assert!(table.is_empty());
        assert_eq!(table.columns(), TicketColumn::header());
    }

    #[test]
    fn test_detail_rows_sorted_newest_first_missing_last() {
        let mut a = ticket("1", "Billing");
        a.open_date = Some(at(2024, 1, 1, 9));
        let b = ticket("2", "Billing");
        let mut c = ticket("3", "Billing");
        c.open_date = Some(at(2024, 3, 1, 9));

        let table = TicketTable::new(vec![a, b, c]);
        let order: Vec<&str> = table
            .detail_rows()
            .iter()
            .map(|t| t.number.as_deref().unwrap())
            .collect();
        assert_eq!(order, vec!["3", "1", "2"]);
    }

    #[test]
    fn test_cell_display() {
        assert_eq!(CellValue::Missing.to_string(), "");
        assert_eq!(CellValue::Bool(true).to_string(), "True");
        assert_eq!(
            CellValue::Date(at(2024, 2, 3, 4)).to_string(),
            "2024-02-03 04:00:00"
        );
    }
}
