//! FITS keyword and property containers, with sexagesimal and time helpers.
//!
//! A [`KeywordSet`] is an ordered list of header cards as they appear in a FITS
//! file. A [`PropertySet`] holds typed values keyed by colon-separated
//! identifiers such as `Observation:Center:RA`.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::warn;

use crate::error::{Error, Result};

/// A single FITS header card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitsKeyword {
    pub name: String,
    /// Raw value text. String values keep their enclosing single quotes.
    pub value: String,
    pub comment: String,
}

impl FitsKeyword {
    pub fn new(name: impl Into<String>, value: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            comment: comment.into(),
        }
    }

    /// A string-valued card; the value is single-quoted with embedded quotes
    /// doubled.
    pub fn string(name: impl Into<String>, value: &str, comment: impl Into<String>) -> Self {
        Self::new(name, format!("'{}'", value.replace('\'', "''")), comment)
    }

    /// A numeric card with up to `precision` significant digits.
    pub fn number(name: impl Into<String>, value: f64, precision: usize, comment: impl Into<String>) -> Self {
        Self::new(name, format_number(value, precision), comment)
    }

    pub fn logical(name: impl Into<String>, value: bool, comment: impl Into<String>) -> Self {
        Self::new(name, if value { "T" } else { "F" }, comment)
    }

    pub fn is_string(&self) -> bool {
        let v = self.value.trim();
        v.len() >= 2 && v.starts_with('\'') && v.ends_with('\'')
    }

    /// Value text without quotes and surrounding blanks.
    pub fn stripped_value(&self) -> String {
        let v = self.value.trim();
        if self.is_string() {
            v[1..v.len() - 1].replace("''", "'").trim().to_string()
        } else {
            v.to_string()
        }
    }

    /// Numeric value, accepting FITS `D` exponents.
    pub fn as_f64(&self) -> Option<f64> {
        self.stripped_value().replace(['D', 'd'], "E").parse().ok()
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.stripped_value().as_str() {
            "T" => Some(true),
            "F" => Some(false),
            _ => None,
        }
    }
}

fn format_number(value: f64, precision: usize) -> String {
    if value == value.trunc() && value.abs() < 1e15 {
        format!("{value:.1}")
    } else {
        let s = format!("{value:.precision$e}");
        // Reparse to strip trailing zeros through the shortest representation.
        match s.parse::<f64>() {
            Ok(v) if v.abs() >= 1e-4 && v.abs() < 1e15 => format!("{v}"),
            _ => s,
        }
    }
}

/// Ordered collection of FITS header cards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordSet {
    keywords: Vec<FitsKeyword>,
}

impl KeywordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FitsKeyword> {
        self.keywords.iter()
    }

    pub fn push(&mut self, keyword: FitsKeyword) {
        self.keywords.push(keyword);
    }

    /// First card named `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&FitsKeyword> {
        self.keywords.iter().find(|k| k.name.eq_ignore_ascii_case(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn value(&self, name: &str) -> Option<String> {
        self.get(name).map(FitsKeyword::stripped_value)
    }

    pub fn f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(FitsKeyword::as_f64)
    }

    /// Numeric value of `name`; an error if the card exists but is not a
    /// number.
    pub fn try_f64(&self, name: &str) -> Result<Option<f64>> {
        match self.get(name) {
            None => Ok(None),
            Some(k) => k
                .as_f64()
                .map(Some)
                .ok_or_else(|| Error::Parse(format!("invalid {name} keyword value '{}'", k.value.trim()))),
        }
    }

    /// Replace the first card with the same name, or append.
    pub fn set(&mut self, keyword: FitsKeyword) {
        match self
            .keywords
            .iter_mut()
            .find(|k| k.name.eq_ignore_ascii_case(&keyword.name))
        {
            Some(k) => *k = keyword,
            None => self.keywords.push(keyword),
        }
    }

    /// Remove every card named `name`; returns how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.keywords.len();
        self.keywords.retain(|k| !k.name.eq_ignore_ascii_case(name));
        before - self.keywords.len()
    }
}

impl FromIterator<FitsKeyword> for KeywordSet {
    fn from_iter<I: IntoIterator<Item = FitsKeyword>>(iter: I) -> Self {
        Self {
            keywords: iter.into_iter().collect(),
        }
    }
}

/// Typed property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    String(String),
    Time(DateTime<Utc>),
    Bytes(Vec<u8>),
}

impl PropertyValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(v) => Some(*v),
            PropertyValue::Int(v) => Some(*v as f64),
            PropertyValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            PropertyValue::Time(t) => Some(*t),
            PropertyValue::String(s) => parse_fits_time(s).ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PropertyValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// Properties keyed by hierarchical identifiers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertySet {
    properties: BTreeMap<String, PropertyValue>,
}

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn set(&mut self, id: impl Into<String>, value: PropertyValue) {
        self.properties.insert(id.into(), value);
    }

    pub fn get(&self, id: &str) -> Option<&PropertyValue> {
        self.properties.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.properties.contains_key(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<PropertyValue> {
        self.properties.remove(id)
    }

    pub fn f64(&self, id: &str) -> Option<f64> {
        self.get(id).and_then(PropertyValue::as_f64)
    }

    pub fn string(&self, id: &str) -> Option<&str> {
        self.get(id).and_then(PropertyValue::as_str)
    }

    pub fn time(&self, id: &str) -> Option<DateTime<Utc>> {
        self.get(id).and_then(PropertyValue::as_time)
    }

    pub fn bytes(&self, id: &str) -> Option<&[u8]> {
        self.get(id).and_then(PropertyValue::as_bytes)
    }
}

/// Collects per-field parse failures while a keyword or property bundle is
/// read. Each failure is logged as a warning and the field stays undefined.
#[derive(Debug, Default)]
pub struct ParseReport {
    failures: Vec<(String, Error)>,
}

impl ParseReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unwrap a per-field result, recording the failure if there is one.
    pub fn field<T>(&mut self, name: &str, result: Result<Option<T>>) -> Option<T> {
        match result {
            Ok(v) => v,
            Err(e) => {
                warn!("{name}: {e}; value ignored");
                self.failures.push((name.to_string(), e));
                None
            }
        }
    }

    pub fn failures(&self) -> &[(String, Error)] {
        &self.failures
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Parse a sexagesimal value `[+-]D[ :]M[ :]S` (minutes and seconds optional)
/// into decimal units of its first field.
pub fn parse_sexagesimal(text: &str) -> Result<f64> {
    let t = text.trim();
    let (negative, body) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    let fields: Vec<&str> = body
        .split(|c: char| c == ':' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .collect();
    if fields.is_empty() || fields.len() > 3 {
        return Err(Error::Parse(format!("invalid sexagesimal value '{text}'")));
    }
    let mut value = 0.0;
    let mut unit = 1.0;
    for (i, f) in fields.iter().enumerate() {
        let v: f64 = f
            .parse()
            .map_err(|_| Error::Parse(format!("invalid sexagesimal field '{f}' in '{text}'")))?;
        if v < 0.0 || (i > 0 && v >= 60.0) {
            return Err(Error::Parse(format!("sexagesimal field out of range in '{text}'")));
        }
        value += v / unit;
        unit *= 60.0;
    }
    Ok(if negative { -value } else { value })
}

/// Format `value` as `D M S` with `precision` decimals in the seconds field,
/// carrying rounding overflow into minutes and degrees.
pub fn format_sexagesimal(value: f64, precision: usize, sign: bool, separator: char, width: usize) -> String {
    let negative = value < 0.0;
    let scale = 10f64.powi(precision as i32);
    let total = (value.abs() * 3600.0 * scale).round();
    let seconds_units = total % (60.0 * scale);
    let minutes_total = ((total - seconds_units) / (60.0 * scale)).round() as u64;
    let degrees = minutes_total / 60;
    let minutes = minutes_total % 60;
    let seconds = seconds_units / scale;

    let sign_text = if negative {
        "-"
    } else if sign {
        "+"
    } else {
        ""
    };
    let sec_width = if precision > 0 { precision + 3 } else { 2 };
    format!(
        "{sign_text}{degrees:0width$}{separator}{minutes:02}{separator}{seconds:0sec_width$.precision$}"
    )
}

/// Parse a FITS date-time (`YYYY-MM-DD[Thh:mm:ss[.sss]]`), interpreted as UTC.
/// A trailing `Z` is accepted.
pub fn parse_fits_time(text: &str) -> Result<DateTime<Utc>> {
    let t = text.trim().trim_end_matches('Z');
    if let Ok(dt) = NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(dt.and_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M") {
        return Ok(dt.and_utc());
    }
    NaiveDate::parse_from_str(t, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| Error::Parse(format!("invalid date-time '{text}'")))
}

/// ISO-8601 UTC representation with millisecond precision.
pub fn format_fits_time(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn keyword_values() {
        let k = FitsKeyword::string("OBJECT", "M 31 'core'", "");
        assert_eq!(k.value, "'M 31 ''core'''");
        assert!(k.is_string());
        assert_eq!(k.stripped_value(), "M 31 'core'");

        let k = FitsKeyword::new("CD1_1", "-2.7777D-04", "");
        assert!((k.as_f64().unwrap() + 2.7777e-4).abs() < 1e-16);
        assert_eq!(FitsKeyword::logical("REFSPLIN", true, "").as_bool(), Some(true));
    }

    #[test]
    fn keyword_set_replace_and_remove() {
        let mut set = KeywordSet::new();
        set.push(FitsKeyword::number("EXPTIME", 30.0, 6, ""));
        set.push(FitsKeyword::string("FILTER", "Ha", ""));
        set.set(FitsKeyword::number("exptime", 60.0, 6, "seconds"));
        assert_eq!(set.len(), 2);
        assert_eq!(set.f64("EXPTIME"), Some(60.0));
        assert_eq!(set.value("FILTER").as_deref(), Some("Ha"));
        assert_eq!(set.remove("FILTER"), 1);
        assert!(!set.contains("FILTER"));
    }

    #[test]
    fn parse_report_records_failures() {
        let mut set = KeywordSet::new();
        set.push(FitsKeyword::new("FOCALLEN", "abc", ""));
        let mut report = ParseReport::new();
        assert_eq!(report.field("FOCALLEN", set.try_f64("FOCALLEN")), None);
        assert_eq!(report.field("XPIXSZ", set.try_f64("XPIXSZ")), None);
        assert_eq!(report.failures().len(), 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn properties() {
        let mut p = PropertySet::new();
        p.set("Observation:Center:RA", PropertyValue::Float(10.5));
        p.set("Observation:Time:Start", PropertyValue::String("2024-03-01T20:15:00".into()));
        assert_eq!(p.f64("Observation:Center:RA"), Some(10.5));
        assert_eq!(p.time("Observation:Time:Start").unwrap().hour(), 20);
        assert!(p.remove("Observation:Center:RA").is_some());
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn sexagesimal_round_trip() {
        assert!((parse_sexagesimal("12 30 00").unwrap() - 12.5).abs() < 1e-12);
        assert!((parse_sexagesimal("-00:30:36").unwrap() + 0.51).abs() < 1e-12);
        assert!((parse_sexagesimal("+45").unwrap() - 45.0).abs() < 1e-12);
        assert!(parse_sexagesimal("12 75 00").is_err());
        assert!(parse_sexagesimal("abc").is_err());

        assert_eq!(format_sexagesimal(12.5, 3, false, ' ', 2), "12 30 00.000");
        assert_eq!(format_sexagesimal(-0.51, 2, true, ' ', 2), "-00 30 36.00");
        // 59.9996 seconds rounds up into the next minute.
        assert_eq!(format_sexagesimal(1.0 + 59.9996 / 3600.0, 3, true, ':', 2), "+01:01:00.000");
    }

    #[test]
    fn fits_times() {
        let t = parse_fits_time("2023-01-15T03:04:05.250").unwrap();
        assert_eq!((t.year(), t.month(), t.day()), (2023, 1, 15));
        assert_eq!(format_fits_time(&t), "2023-01-15T03:04:05.250");
        assert_eq!(parse_fits_time("2023-01-15").unwrap().hour(), 0);
        assert!(parse_fits_time("15/01/2023").is_err());
    }
}
