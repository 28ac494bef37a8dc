use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use chrono_tz::Tz;
use std::time::SystemTime;

/// The calendar day a run works on. Bundles are named after it, and a
/// converted file counts as fresh only if it was written on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingDay {
    date: NaiveDate,
    zone: Option<Tz>,
}

impl ProcessingDay {
    pub fn today(zone_name: Option<&str>) -> Result<Self> {
        let zone = parse_zone(zone_name)?;
        let date = match zone {
            Some(tz) => Utc::now().with_timezone(&tz).date_naive(),
            None => Local::now().date_naive(),
        };
        Ok(Self::new(date, zone))
    }

    pub fn new(date: NaiveDate, zone: Option<Tz>) -> Self {
        Self { date, zone }
    }

    pub fn stamp(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    /// Whether `instant` falls on this day in the configured zone.
    pub fn contains(&self, instant: SystemTime) -> bool {
        let date = match self.zone {
            Some(tz) => DateTime::<Utc>::from(instant).with_timezone(&tz).date_naive(),
            None => DateTime::<Local>::from(instant).date_naive(),
        };
        date == self.date
    }
}

fn parse_zone(zone_name: Option<&str>) -> Result<Option<Tz>> {
    let Some(name) = zone_name else {
        return Ok(None);
    };
    let tz = name
        .parse::<Tz>()
        .map_err(|err| anyhow::anyhow!("{err}"))
        .with_context(|| format!("invalid time zone `{name}`"))?;
    Ok(Some(tz))
}
