use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use log::{debug, info};

use crate::config::Config;
use crate::error::TicketPulseError;
use crate::filter::{filter, DateRange, FilterOptions, Selections};
use crate::loader::Remote;
use crate::reports::{ReportFormat, Reports};
use crate::session::Session;
use crate::tickets::TicketColumn;

#[derive(Parser)]
#[command(
    name = "ticketpulse",
    version,
    about = "ticketPulse: support-ticket CSV analytics"
)]
pub struct Cli {
    /// Config file (default: config.toml in the app data directory)
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// KPIs, breakdowns, daily trend and insights for the filtered view (default)
    Summary {
        #[command(flatten)]
        filters: FilterArgs,

        /// Show days without tickets in the daily trend as zero
        #[arg(long = "fill-gaps", default_value_t = false)]
        fill_gaps: bool,
    },

    /// Ticket detail view, newest first
    Tickets {
        #[command(flatten)]
        filters: FilterArgs,

        /// Show at most `N` tickets
        #[arg(long = "limit", short = 'n')]
        limit: Option<usize>,

        /// Output format
        #[arg(
            long = "format",
            value_parser = clap::builder::PossibleValuesParser::new(["table", "csv"]),
            default_value = "table"
        )]
        format: String,
    },

    /// List stored datasets with their inclusion state
    Datasets,

    /// Upload a CSV file as a new dataset (max 2 MB)
    Upload {
        /// CSV file to upload
        file: PathBuf,

        /// Dataset name (default: the file name)
        #[arg(long = "name")]
        name: Option<String>,
    },

    /// Include a dataset in analytics
    Include { name: String },

    /// Exclude a dataset from analytics
    Exclude { name: String },

    /// Flip a dataset between included and excluded
    Toggle { name: String },

    /// Delete a dataset from storage
    Delete { name: String },
}

/// Filter flags. A flag that is not given selects every available value.
#[derive(Args, Debug, Default, Clone, PartialEq, Eq)]
pub struct FilterArgs {
    /// Assigned To Queue value to include (repeatable)
    #[arg(long = "queue", value_name = "QUEUE")]
    pub queues: Vec<String>,

    /// Status value to include (repeatable)
    #[arg(long = "status", value_name = "STATUS")]
    pub statuses: Vec<String>,

    /// Category value to include (repeatable)
    #[arg(long = "category", value_name = "CATEGORY")]
    pub categories: Vec<String>,

    /// Support Line value to include (repeatable)
    #[arg(long = "support-line", value_name = "LINE")]
    pub support_lines: Vec<String>,

    /// Earliest Open Date, YYYY-MM-DD (inclusive)
    #[arg(long = "from", value_parser = parse_date)]
    pub from: Option<NaiveDate>,

    /// Latest Open Date, YYYY-MM-DD (inclusive)
    #[arg(long = "to", value_parser = parse_date)]
    pub to: Option<NaiveDate>,
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| format!("invalid date '{}': {}", s, e))
}

impl FilterArgs {
    pub fn selections(&self, options: &FilterOptions) -> Result<Selections, TicketPulseError> {
        let mut selections = Selections::all(options);

        let flags = [
            (TicketColumn::AssignedToQueue, &self.queues),
            (TicketColumn::Status, &self.statuses),
            (TicketColumn::Category, &self.categories),
            (TicketColumn::SupportLine, &self.support_lines),
        ];
        for (col, values) in flags {
            if !values.is_empty() {
                selections.select(col, values.iter().cloned());
            }
        }

        if self.from.is_some() || self.to.is_some() {
            let span = options.open_date_span;
            let start = self.from.or(span.map(|s| s.start()));
            let end = self.to.or(span.map(|s| s.end()));
            let range = match (start, end) {
                (Some(start), Some(end)) => Some(DateRange::new(start, end)?),
                (Some(day), None) | (None, Some(day)) => Some(DateRange::new(day, day)?),
                (None, None) => None,
            };
            selections.set_date_range(range);
        }

        Ok(selections)
    }
}

impl Cli {
    pub fn execute(self, config: &Config) -> Result<(), TicketPulseError> {
        let mut session = Session::new(
            Remote::from_config(&config.storage),
            &config.data.local_dir,
        );

        let command = self.command.unwrap_or(Command::Summary {
            filters: FilterArgs::default(),
            fill_gaps: false,
        });

        match command {
            Command::Summary { filters, fill_gaps } => {
                let bundle = session.bundle()?;
                let options = FilterOptions::from_table(&bundle.combined);
                let selections = filters.selections(&options)?;
                debug!("Selections: {:?}", selections);
                let filtered = filter(&bundle.combined, &selections);
                let now = Utc::now().naive_utc();
                print!(
                    "{}",
                    Reports::summary(&bundle, &options, &selections, &filtered, now, fill_gaps)
                );
            }
            Command::Tickets {
                filters,
                limit,
                format,
            } => {
                let format = ReportFormat::from_str(&format)?;
                let bundle = session.bundle()?;
                let options = FilterOptions::from_table(&bundle.combined);
                let filtered = filter(&bundle.combined, &filters.selections(&options)?);
                print!("{}", Reports::tickets(&filtered, limit, format)?);
            }
            Command::Datasets => {
                let bundle = session.bundle()?;
                print!("{}", Reports::datasets(&bundle));
            }
            Command::Upload { file, name } => {
                let name = name
                    .or_else(|| {
                        file.file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                    })
                    .unwrap_or_default();
                let data = fs::read(&file)?;
                info!("Uploading {} as '{}'", file.display(), name);
                let stored = session.upload_dataset(&name, &data)?;
                println!("Uploaded '{}'.", stored);
            }
            Command::Include { name } => {
                session.set_included(&name, true)?;
                println!("Included '{}' in analytics.", name);
            }
            Command::Exclude { name } => {
                session.set_included(&name, false)?;
                println!("Excluded '{}' from analytics.", name);
            }
            Command::Toggle { name } => {
                if session.toggle_inclusion(&name)? {
                    println!("Included '{}' in analytics.", name);
                } else {
                    println!("Excluded '{}' from analytics.", name);
                }
            }
            Command::Delete { name } => {
                session.delete_dataset(&name)?;
                println!("Deleted '{}'.", name);
            }
        }

        let active = session
            .registry()
            .iter()
            .filter(|(_, meta)| meta.included)
            .count();
        debug!(
            "Finished at token {} with {} active dataset(s)",
            session.token(),
            active
        );

        Ok(())
    }
}
