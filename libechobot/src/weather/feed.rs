//! Forecast document parsing and scratch copies

use chrono::{NaiveDate, NaiveDateTime};
use roxmltree::{Document, Node};
use std::path::{Path, PathBuf};

use crate::error::{BotError, Result, StorageError};

/// Scratch file name for the hour-by-hour document
pub const HOURLY_FILE: &str = "forecast_hour_by_hour.xml";

/// Scratch file name for the multi-day document
pub const DAILY_FILE: &str = "forecast.xml";

/// Night segment of a day in the multi-day document
pub const PERIOD_NIGHT: u32 = 0;

/// Daytime segment of a day in the multi-day document
pub const PERIOD_DAY: u32 = 2;

/// One `tabular/time` entry
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub from: NaiveDateTime,
    pub period: Option<u32>,
    pub symbol: String,
    pub wind_code: String,
    pub wind_mps: f64,
    pub temperature: f64,
    pub pressure_hpa: f64,
}

fn malformed(what: impl std::fmt::Display) -> BotError {
    BotError::Weather(what.to_string())
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Result<Node<'a, 'input>> {
    node.children()
        .find(|n| n.has_tag_name(name))
        .ok_or_else(|| malformed(format!("missing <{}> in <{}>", name, node.tag_name().name())))
}

fn attr<'a>(node: Node<'a, '_>, name: &str) -> Result<&'a str> {
    node.attribute(name).ok_or_else(|| {
        malformed(format!(
            "missing attribute {} on <{}>",
            name,
            node.tag_name().name()
        ))
    })
}

fn number(node: Node<'_, '_>, name: &str) -> Result<f64> {
    let raw = attr(node, name)?;
    raw.trim()
        .parse()
        .map_err(|_| malformed(format!("{}={:?} is not a number", name, raw)))
}

fn observation(time: Node<'_, '_>) -> Result<Observation> {
    let from_raw = attr(time, "from")?;
    let from = NaiveDateTime::parse_from_str(from_raw, "%Y-%m-%dT%H:%M:%S")
        .map_err(|e| malformed(format!("bad time {:?}: {}", from_raw, e)))?;
    let period = time.attribute("period").and_then(|p| p.parse().ok());

    Ok(Observation {
        from,
        period,
        symbol: attr(child(time, "symbol")?, "number")?.to_string(),
        wind_code: attr(child(time, "windDirection")?, "code")?.to_string(),
        wind_mps: number(child(time, "windSpeed")?, "mps")?,
        temperature: number(child(time, "temperature")?, "value")?,
        pressure_hpa: number(child(time, "pressure")?, "value")?,
    })
}

/// Every `weatherdata/forecast/tabular/time` entry in document order
pub fn parse(xml: &str) -> Result<Vec<Observation>> {
    let doc = Document::parse(xml).map_err(malformed)?;
    let root = doc.root_element();
    if !root.has_tag_name("weatherdata") {
        return Err(malformed(format!(
            "unexpected root <{}>",
            root.tag_name().name()
        )));
    }
    let tabular = child(child(root, "forecast")?, "tabular")?;

    tabular
        .children()
        .filter(|n| n.has_tag_name("time"))
        .map(observation)
        .collect()
}

/// The first entry, i.e. the current conditions
pub fn parse_current(xml: &str) -> Result<Observation> {
    parse(xml)?
        .into_iter()
        .next()
        .ok_or_else(|| malformed("no <time> entries"))
}

/// The entry for `period` of `date`
pub fn select(observations: &[Observation], date: NaiveDate, period: u32) -> Option<&Observation> {
    observations
        .iter()
        .find(|o| o.from.date() == date && o.period == Some(period))
}

/// Keep a copy of the last downloaded document for inspection
pub async fn save_copy(dir: &Path, name: &str, body: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| StorageError::io(dir, e))?;
    let path = dir.join(name);
    tokio::fs::write(&path, body)
        .await
        .map_err(|e| StorageError::io(&path, e))?;
    Ok(path)
}
