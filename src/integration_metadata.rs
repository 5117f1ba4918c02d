//! Observation metadata aggregated over the frames of an integration.
//!
//! Each frame contributes an [`IntegrationMetadata`] read from its properties
//! and FITS keywords. [`IntegrationMetadata::summarize`] merges them:
//!
//! - Most fields are kept only while every frame that defines them agrees;
//!   a disagreement marks the field inconsistent and it is no longer reported.
//! - Exposure times are summed.
//! - Center coordinates and the observer location are averaged.
//! - Start and end times become the earliest start and the latest end, provided
//!   every frame that carries a time defines both.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::astrometry::wcs::{angle_keyword, normalize_longitude};
use crate::error::{Error, Result};
use crate::keywords::{
    format_fits_time, format_sexagesimal, parse_fits_time, FitsKeyword, KeywordSet, ParseReport,
    PropertySet, PropertyValue,
};

/// Version token of the serialized form.
const SERIALIZATION_VERSION: &str = "1";

/// A value together with its agreement across frames.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsistentlyDefined<T> {
    value: Option<T>,
    consistent: bool,
}

impl<T> Default for ConsistentlyDefined<T> {
    fn default() -> Self {
        Self {
            value: None,
            consistent: true,
        }
    }
}

impl<T: Clone + PartialEq> ConsistentlyDefined<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Some(value),
            consistent: true,
        }
    }

    pub fn inconsistent() -> Self {
        Self {
            value: None,
            consistent: false,
        }
    }

    pub fn is_defined(&self) -> bool {
        self.value.is_some()
    }

    pub fn is_consistent(&self) -> bool {
        self.consistent
    }

    /// Defined and consistent.
    pub fn is_valid(&self) -> bool {
        self.consistent && self.value.is_some()
    }

    /// The value, if defined and consistent.
    pub fn value(&self) -> Option<&T> {
        if self.consistent {
            self.value.as_ref()
        } else {
            None
        }
    }

    pub fn set(&mut self, value: T) {
        self.value = Some(value);
        self.consistent = true;
    }

    fn set_if_undefined(&mut self, value: Option<T>) {
        if self.value.is_none() {
            if let Some(v) = value {
                self.set(v);
            }
        }
    }

    /// Merge under the equal-or-missing rule.
    pub fn merge(&mut self, other: &Self) {
        if !other.consistent {
            self.consistent = false;
        }
        match (&self.value, &other.value) {
            (None, Some(v)) => self.value = Some(v.clone()),
            (Some(a), Some(b)) if a != b => self.consistent = false,
            _ => {}
        }
    }
}

// ── Field tables ────────────────────────────────────────────────────────────

/// A text field: serialization key, source keywords, source property.
struct TextField {
    key: &'static str,
    keywords: &'static [&'static str],
    property: &'static str,
    get: fn(&IntegrationMetadata) -> &ConsistentlyDefined<String>,
    get_mut: fn(&mut IntegrationMetadata) -> &mut ConsistentlyDefined<String>,
}

/// A numeric field. Property values are multiplied by `property_scale` to
/// obtain keyword units.
struct NumberField {
    key: &'static str,
    keywords: &'static [&'static str],
    property: &'static str,
    property_scale: f64,
    get: fn(&IntegrationMetadata) -> &ConsistentlyDefined<f64>,
    get_mut: fn(&mut IntegrationMetadata) -> &mut ConsistentlyDefined<f64>,
}

const TEXT_FIELDS: &[TextField] = &[
    TextField {
        key: "author",
        keywords: &["AUTHOR"],
        property: "Observation:Authors",
        get: |m| &m.author,
        get_mut: |m| &mut m.author,
    },
    TextField {
        key: "observer",
        keywords: &["OBSERVER"],
        property: "Observer:Name",
        get: |m| &m.observer,
        get_mut: |m| &mut m.observer,
    },
    TextField {
        key: "objectName",
        keywords: &["OBJECT", "OBJNAME"],
        property: "Observation:Object:Name",
        get: |m| &m.object_name,
        get_mut: |m| &mut m.object_name,
    },
    TextField {
        key: "telescopeName",
        keywords: &["TELESCOP"],
        property: "Instrument:Telescope:Name",
        get: |m| &m.telescope_name,
        get_mut: |m| &mut m.telescope_name,
    },
    TextField {
        key: "cameraName",
        keywords: &["INSTRUME"],
        property: "Instrument:Camera:Name",
        get: |m| &m.camera_name,
        get_mut: |m| &mut m.camera_name,
    },
    TextField {
        key: "filterName",
        keywords: &["FILTER", "INSFLNAM"],
        property: "Instrument:Filter:Name",
        get: |m| &m.filter_name,
        get_mut: |m| &mut m.filter_name,
    },
    TextField {
        key: "frameType",
        keywords: &["IMAGETYP", "FRAME"],
        property: "Observation:FrameType",
        get: |m| &m.frame_type,
        get_mut: |m| &mut m.frame_type,
    },
    TextField {
        key: "cfaPatternName",
        keywords: &["BAYERPAT"],
        property: "PCL:CFASourcePatternName",
        get: |m| &m.cfa_pattern_name,
        get_mut: |m| &mut m.cfa_pattern_name,
    },
    TextField {
        key: "celestialReferenceSystem",
        keywords: &["RADESYS"],
        property: "Observation:CelestialReferenceSystem",
        get: |m| &m.reference_system,
        get_mut: |m| &mut m.reference_system,
    },
];

const NUMBER_FIELDS: &[NumberField] = &[
    NumberField {
        key: "focalLength",
        keywords: &["FOCALLEN"],
        property: "Instrument:Telescope:FocalLength",
        property_scale: 1000.0,
        get: |m| &m.focal_length,
        get_mut: |m| &mut m.focal_length,
    },
    NumberField {
        key: "aperture",
        keywords: &["APTDIA"],
        property: "Instrument:Telescope:Aperture",
        property_scale: 1000.0,
        get: |m| &m.aperture,
        get_mut: |m| &mut m.aperture,
    },
    NumberField {
        key: "apertureArea",
        keywords: &["APTAREA"],
        property: "Instrument:Telescope:CollectingArea",
        property_scale: 1.0e6,
        get: |m| &m.aperture_area,
        get_mut: |m| &mut m.aperture_area,
    },
    NumberField {
        key: "xPixelSize",
        keywords: &["XPIXSZ", "PIXSIZE"],
        property: "Instrument:Sensor:XPixelSize",
        property_scale: 1.0,
        get: |m| &m.x_pixel_size,
        get_mut: |m| &mut m.x_pixel_size,
    },
    NumberField {
        key: "yPixelSize",
        keywords: &["YPIXSZ", "PIXSIZE"],
        property: "Instrument:Sensor:YPixelSize",
        property_scale: 1.0,
        get: |m| &m.y_pixel_size,
        get_mut: |m| &mut m.y_pixel_size,
    },
    NumberField {
        key: "sensorTemperature",
        keywords: &["CCD-TEMP"],
        property: "Instrument:Sensor:Temperature",
        property_scale: 1.0,
        get: |m| &m.sensor_temperature,
        get_mut: |m| &mut m.sensor_temperature,
    },
    NumberField {
        key: "cameraGain",
        keywords: &["EGAIN"],
        property: "Instrument:Camera:Gain",
        property_scale: 1.0,
        get: |m| &m.camera_gain,
        get_mut: |m| &mut m.camera_gain,
    },
    NumberField {
        key: "cameraISO",
        keywords: &["ISOSPEED"],
        property: "Instrument:Camera:ISOSpeed",
        property_scale: 1.0,
        get: |m| &m.camera_iso,
        get_mut: |m| &mut m.camera_iso,
    },
    NumberField {
        key: "xBinning",
        keywords: &["XBINNING", "CCDBINX", "BINNING"],
        property: "Instrument:Camera:XBinning",
        property_scale: 1.0,
        get: |m| &m.x_binning,
        get_mut: |m| &mut m.x_binning,
    },
    NumberField {
        key: "yBinning",
        keywords: &["YBINNING", "CCDBINY", "BINNING"],
        property: "Instrument:Camera:YBinning",
        property_scale: 1.0,
        get: |m| &m.y_binning,
        get_mut: |m| &mut m.y_binning,
    },
    NumberField {
        key: "xOrigin",
        keywords: &["XORGSUBF"],
        property: "Instrument:Sensor:XOrigin",
        property_scale: 1.0,
        get: |m| &m.x_origin,
        get_mut: |m| &mut m.x_origin,
    },
    NumberField {
        key: "yOrigin",
        keywords: &["YORGSUBF"],
        property: "Instrument:Sensor:YOrigin",
        property_scale: 1.0,
        get: |m| &m.y_origin,
        get_mut: |m| &mut m.y_origin,
    },
    NumberField {
        key: "cfaXOffset",
        keywords: &["XBAYROFF"],
        property: "PCL:CFASourcePatternXOffset",
        property_scale: 1.0,
        get: |m| &m.cfa_x_offset,
        get_mut: |m| &mut m.cfa_x_offset,
    },
    NumberField {
        key: "cfaYOffset",
        keywords: &["YBAYROFF"],
        property: "PCL:CFASourcePatternYOffset",
        property_scale: 1.0,
        get: |m| &m.cfa_y_offset,
        get_mut: |m| &mut m.cfa_y_offset,
    },
    NumberField {
        key: "equinox",
        keywords: &["EQUINOX", "EPOCH"],
        property: "Observation:Equinox",
        property_scale: 1.0,
        get: |m| &m.equinox,
        get_mut: |m| &mut m.equinox,
    },
];

/// Fields averaged over the frames that define them.
const AVERAGED_KEYS: [&str; 5] = ["ra", "dec", "longitude", "latitude", "elevation"];

// ── Metadata ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegrationMetadata {
    pub author: ConsistentlyDefined<String>,
    pub observer: ConsistentlyDefined<String>,
    pub object_name: ConsistentlyDefined<String>,
    pub telescope_name: ConsistentlyDefined<String>,
    pub camera_name: ConsistentlyDefined<String>,
    pub filter_name: ConsistentlyDefined<String>,
    pub frame_type: ConsistentlyDefined<String>,
    pub cfa_pattern_name: ConsistentlyDefined<String>,
    pub reference_system: ConsistentlyDefined<String>,

    /// Millimeters.
    pub focal_length: ConsistentlyDefined<f64>,
    /// Millimeters.
    pub aperture: ConsistentlyDefined<f64>,
    /// Square millimeters.
    pub aperture_area: ConsistentlyDefined<f64>,
    /// Micrometers.
    pub x_pixel_size: ConsistentlyDefined<f64>,
    pub y_pixel_size: ConsistentlyDefined<f64>,
    /// Celsius.
    pub sensor_temperature: ConsistentlyDefined<f64>,
    /// Electrons per data number.
    pub camera_gain: ConsistentlyDefined<f64>,
    pub camera_iso: ConsistentlyDefined<f64>,
    pub x_binning: ConsistentlyDefined<f64>,
    pub y_binning: ConsistentlyDefined<f64>,
    pub x_origin: ConsistentlyDefined<f64>,
    pub y_origin: ConsistentlyDefined<f64>,
    pub cfa_x_offset: ConsistentlyDefined<f64>,
    pub cfa_y_offset: ConsistentlyDefined<f64>,
    pub equinox: ConsistentlyDefined<f64>,
    /// Data numbers; never negative.
    pub pedestal: ConsistentlyDefined<f64>,

    /// Seconds, summed over frames.
    pub exposure_time: ConsistentlyDefined<f64>,

    /// Degrees in `(-180, 180]`; reported in `[0, 360)`.
    pub ra: ConsistentlyDefined<f64>,
    pub dec: ConsistentlyDefined<f64>,
    /// Degrees in `(-180, 180]`.
    pub longitude: ConsistentlyDefined<f64>,
    pub latitude: ConsistentlyDefined<f64>,
    /// Meters.
    pub elevation: ConsistentlyDefined<f64>,

    pub start_time: ConsistentlyDefined<DateTime<Utc>>,
    pub end_time: ConsistentlyDefined<DateTime<Utc>>,
}

fn first_keyword<'a>(keywords: &KeywordSet, names: &'a [&'a str]) -> Option<&'a str> {
    names.iter().copied().find(|n| keywords.contains(n))
}

fn ranged(what: &'static str, value: Option<f64>, valid: impl Fn(f64) -> bool) -> Result<Option<f64>> {
    match value {
        Some(v) if !valid(v) => Err(Error::OutOfRange { what, value: v }),
        v => Ok(v),
    }
}

fn valid_ra(v: f64) -> bool {
    (0.0..360.0).contains(&v)
}

fn valid_latitude(v: f64) -> bool {
    (-90.0..=90.0).contains(&v)
}

impl IntegrationMetadata {
    /// Metadata of a single frame. Properties take precedence over keywords;
    /// fields that fail to parse are logged and left undefined.
    pub fn from_frame(properties: &PropertySet, keywords: &KeywordSet) -> Self {
        let mut report = ParseReport::new();
        let mut m = Self::default();

        for field in TEXT_FIELDS {
            let from_property = properties.string(field.property).map(|s| s.trim().to_string());
            let from_keyword = first_keyword(keywords, field.keywords).and_then(|n| keywords.value(n));
            let target = (field.get_mut)(&mut m);
            target.set_if_undefined(from_property.filter(|s| !s.is_empty()));
            target.set_if_undefined(from_keyword.filter(|s| !s.is_empty()));
        }
        for field in NUMBER_FIELDS {
            let from_property = properties.f64(field.property).map(|v| v * field.property_scale);
            let from_keyword = first_keyword(keywords, field.keywords)
                .and_then(|n| report.field(n, keywords.try_f64(n)));
            let target = (field.get_mut)(&mut m);
            target.set_if_undefined(from_property);
            target.set_if_undefined(from_keyword);
        }

        let pedestal = report.field("PEDESTAL", keywords.try_f64("PEDESTAL"));
        m.pedestal.set_if_undefined(pedestal.map(|p| {
            if p < 0.0 {
                warn!("negative PEDESTAL keyword value {p}; using its absolute value");
                -p
            } else {
                p
            }
        }));

        let exposure = properties.f64("Instrument:ExposureTime").or_else(|| {
            first_keyword(keywords, &["EXPTIME", "EXPOSURE"])
                .and_then(|n| report.field(n, keywords.try_f64(n)))
        });
        m.exposure_time.set_if_undefined(exposure);

        let ra = properties
            .f64("Observation:Center:RA")
            .map(Ok)
            .or_else(|| {
                first_keyword(keywords, &["RA", "OBJCTRA"])
                    .map(|n| angle_keyword(keywords, n, true).and_then(|v| v.ok_or(Error::Parse(n.into()))))
            })
            .transpose();
        let ra = report.field("RA", ra.and_then(|v| ranged("right ascension", v, valid_ra)));
        m.ra.set_if_undefined(ra.map(normalize_longitude));

        let dec = properties
            .f64("Observation:Center:Dec")
            .map(Ok)
            .or_else(|| {
                first_keyword(keywords, &["DEC", "OBJCTDEC"])
                    .map(|n| angle_keyword(keywords, n, false).and_then(|v| v.ok_or(Error::Parse(n.into()))))
            })
            .transpose();
        m.dec.set_if_undefined(report.field("DEC", dec.and_then(|v| ranged("declination", v, valid_latitude))));

        let lon = properties
            .f64("Observation:Location:Longitude")
            .map(Ok)
            .or_else(|| {
                first_keyword(keywords, &["OBSGEO-L", "LONG-OBS", "SITELONG"])
                    .map(|n| angle_keyword(keywords, n, false).and_then(|v| v.ok_or(Error::Parse(n.into()))))
            })
            .transpose();
        let lon = report.field("OBSGEO-L", lon.and_then(|v| ranged("geodetic longitude", v, f64::is_finite)));
        m.longitude.set_if_undefined(lon.map(normalize_longitude));

        let lat = properties
            .f64("Observation:Location:Latitude")
            .map(Ok)
            .or_else(|| {
                first_keyword(keywords, &["OBSGEO-B", "LAT-OBS", "SITELAT"])
                    .map(|n| angle_keyword(keywords, n, false).and_then(|v| v.ok_or(Error::Parse(n.into()))))
            })
            .transpose();
        m.latitude
            .set_if_undefined(report.field("OBSGEO-B", lat.and_then(|v| ranged("geodetic latitude", v, valid_latitude))));

        let elevation = properties.f64("Observation:Location:Elevation").or_else(|| {
            first_keyword(keywords, &["OBSGEO-H", "ALT-OBS", "SITEELEV"])
                .and_then(|n| report.field(n, keywords.try_f64(n)))
        });
        m.elevation.set_if_undefined(elevation);

        let start = properties.time("Observation:Time:Start").map(Ok).or_else(|| {
            first_keyword(keywords, &["DATE-OBS", "DATE-BEG"])
                .and_then(|n| keywords.value(n))
                .map(|t| parse_fits_time(&t))
        });
        m.start_time.set_if_undefined(report.field("DATE-OBS", start.transpose()));
        let end = properties
            .time("Observation:Time:End")
            .map(Ok)
            .or_else(|| keywords.value("DATE-END").map(|t| parse_fits_time(&t)));
        m.end_time.set_if_undefined(report.field("DATE-END", end.transpose()));

        m
    }

    /// Aggregate per-frame metadata.
    pub fn summarize(frames: &[IntegrationMetadata]) -> Self {
        let mut s = Self::default();
        for frame in frames {
            for field in TEXT_FIELDS {
                (field.get_mut)(&mut s).merge((field.get)(frame));
            }
            for field in NUMBER_FIELDS {
                (field.get_mut)(&mut s).merge((field.get)(frame));
            }
            s.pedestal.merge(&frame.pedestal);
        }

        let defined: Vec<f64> = frames.iter().filter_map(|f| f.exposure_time.value).collect();
        if !defined.is_empty() {
            s.exposure_time.set(defined.iter().sum());
        }
        if frames.iter().any(|f| !f.exposure_time.consistent) {
            s.exposure_time.consistent = false;
        }

        let average = |get: fn(&IntegrationMetadata) -> &ConsistentlyDefined<f64>| {
            let values: Vec<f64> = frames.iter().filter_map(|f| get(f).value).collect();
            let mut out = ConsistentlyDefined::default();
            if !values.is_empty() {
                out.set(values.iter().sum::<f64>() / values.len() as f64);
            }
            if frames.iter().any(|f| !get(f).consistent) {
                out.consistent = false;
            }
            out
        };
        s.ra = average(|m| &m.ra);
        s.dec = average(|m| &m.dec);
        s.longitude = average(|m| &m.longitude);
        s.latitude = average(|m| &m.latitude);
        s.elevation = average(|m| &m.elevation);

        let timed: Vec<&IntegrationMetadata> = frames
            .iter()
            .filter(|f| f.start_time.is_defined() || f.end_time.is_defined() || !f.start_time.consistent)
            .collect();
        let complete = timed.iter().all(|f| f.start_time.is_valid() && f.end_time.is_valid());
        if complete {
            if let Some(start) = timed.iter().filter_map(|f| f.start_time.value).min() {
                s.start_time.set(start);
            }
            if let Some(end) = timed.iter().filter_map(|f| f.end_time.value).max() {
                s.end_time.set(end);
            }
        } else {
            s.start_time = ConsistentlyDefined::inconsistent();
            s.end_time = ConsistentlyDefined::inconsistent();
        }
        s
    }

    /// Right ascension in `[0, 360)`.
    pub fn ra_degrees(&self) -> Option<f64> {
        self.ra.value().map(|ra| ra.rem_euclid(360.0))
    }

    // ── Output ──────────────────────────────────────────────────────────────

    /// Write every consistently defined field as a property.
    pub fn update_properties(&self, properties: &mut PropertySet) {
        for field in TEXT_FIELDS {
            if let Some(v) = (field.get)(self).value() {
                properties.set(field.property, PropertyValue::String(v.clone()));
            }
        }
        for field in NUMBER_FIELDS {
            if let Some(v) = (field.get)(self).value() {
                properties.set(field.property, PropertyValue::Float(v / field.property_scale));
            }
        }
        let ra = self.ra_degrees();
        let scalars = [
            ("Instrument:ExposureTime", self.exposure_time.value()),
            ("Observation:Center:RA", ra.as_ref()),
            ("Observation:Center:Dec", self.dec.value()),
            ("Observation:Location:Longitude", self.longitude.value()),
            ("Observation:Location:Latitude", self.latitude.value()),
            ("Observation:Location:Elevation", self.elevation.value()),
        ];
        for (id, value) in scalars {
            if let Some(v) = value {
                properties.set(id, PropertyValue::Float(*v));
            }
        }
        if let Some(t) = self.start_time.value() {
            properties.set("Observation:Time:Start", PropertyValue::Time(*t));
        }
        if let Some(t) = self.end_time.value() {
            properties.set("Observation:Time:End", PropertyValue::Time(*t));
        }
    }

    /// Write every consistently defined field as a FITS keyword.
    pub fn update_keywords(&self, keywords: &mut KeywordSet) {
        for field in TEXT_FIELDS {
            if let Some(v) = (field.get)(self).value() {
                keywords.set(FitsKeyword::string(field.keywords[0], v, ""));
            }
        }
        for field in NUMBER_FIELDS {
            if let Some(v) = (field.get)(self).value() {
                keywords.set(FitsKeyword::number(field.keywords[0], *v, 10, ""));
            }
        }
        if let Some(p) = self.pedestal.value() {
            keywords.set(FitsKeyword::number("PEDESTAL", *p, 10, "Value added to data numbers"));
        }
        if let Some(t) = self.exposure_time.value() {
            keywords.set(FitsKeyword::number("EXPTIME", *t, 10, "Total exposure time (s)"));
        }
        if let Some(ra) = self.ra_degrees() {
            keywords.set(FitsKeyword::number("RA", ra, 10, "Right ascension of the center of the image (deg)"));
            keywords.set(FitsKeyword::string(
                "OBJCTRA",
                &format_sexagesimal(ra / 15.0, 3, false, ' ', 2),
                "Right ascension (hms)",
            ));
        }
        if let Some(dec) = self.dec.value() {
            keywords.set(FitsKeyword::number("DEC", *dec, 10, "Declination of the center of the image (deg)"));
            keywords.set(FitsKeyword::string(
                "OBJCTDEC",
                &format_sexagesimal(*dec, 2, true, ' ', 2),
                "Declination (dms)",
            ));
        }
        if let Some(lon) = self.longitude.value() {
            keywords.set(FitsKeyword::number("OBSGEO-L", *lon, 10, "Geodetic longitude (deg)"));
        }
        if let Some(lat) = self.latitude.value() {
            keywords.set(FitsKeyword::number("OBSGEO-B", *lat, 10, "Geodetic latitude (deg)"));
        }
        if let Some(h) = self.elevation.value() {
            keywords.set(FitsKeyword::number("OBSGEO-H", *h, 6, "Geodetic height (m)"));
        }
        if let Some(t) = self.start_time.value() {
            keywords.set(FitsKeyword::string("DATE-OBS", &format_fits_time(t), "Beginning of observation (UTC)"));
        }
        if let Some(t) = self.end_time.value() {
            keywords.set(FitsKeyword::string("DATE-END", &format_fits_time(t), "End of observation (UTC)"));
        }
    }

    // ── Serialization ───────────────────────────────────────────────────────

    fn scalar_fields(&self) -> [(&'static str, &ConsistentlyDefined<f64>); 7] {
        [
            ("pedestal", &self.pedestal),
            ("exposureTime", &self.exposure_time),
            (AVERAGED_KEYS[0], &self.ra),
            (AVERAGED_KEYS[1], &self.dec),
            (AVERAGED_KEYS[2], &self.longitude),
            (AVERAGED_KEYS[3], &self.latitude),
            (AVERAGED_KEYS[4], &self.elevation),
        ]
    }

    fn scalar_field_mut(&mut self, key: &str) -> Option<&mut ConsistentlyDefined<f64>> {
        match key {
            "pedestal" => Some(&mut self.pedestal),
            "exposureTime" => Some(&mut self.exposure_time),
            "ra" => Some(&mut self.ra),
            "dec" => Some(&mut self.dec),
            "longitude" => Some(&mut self.longitude),
            "latitude" => Some(&mut self.latitude),
            "elevation" => Some(&mut self.elevation),
            _ => None,
        }
    }

    /// Tab-separated `key value` lines, starting with a version line.
    /// Inconsistent fields are written with the value `?`; undefined fields
    /// are omitted.
    pub fn serialize(&self) -> String {
        let mut lines = vec![format!("version\t{SERIALIZATION_VERSION}")];
        fn push<T>(lines: &mut Vec<String>, key: &str, field: &ConsistentlyDefined<T>, text: impl Fn(&T) -> String) {
            if !field.consistent {
                lines.push(format!("{key}\t?"));
            } else if let Some(v) = &field.value {
                lines.push(format!("{key}\t{}", text(v)));
            }
        }
        let clean = |s: &String| s.replace(['\t', '\n'], " ");
        for field in TEXT_FIELDS {
            push(&mut lines, field.key, (field.get)(self), clean);
        }
        for field in NUMBER_FIELDS {
            push(&mut lines, field.key, (field.get)(self), |v| format!("{v:e}"));
        }
        for (key, field) in self.scalar_fields() {
            push(&mut lines, key, field, |v| format!("{v:e}"));
        }
        push(&mut lines, "startTime", &self.start_time, format_fits_time);
        push(&mut lines, "endTime", &self.end_time, format_fits_time);
        lines.join("\n")
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        match lines.next().and_then(|l| l.split_once('\t')) {
            Some(("version", v)) if v.trim() == SERIALIZATION_VERSION => {}
            _ => return Err(Error::Parse("missing or unsupported integration metadata version".into())),
        }

        let mut m = Self::default();
        for line in lines {
            let (key, value) = line
                .split_once('\t')
                .ok_or_else(|| Error::Parse(format!("malformed integration metadata item '{line}'")))?;
            let inconsistent = value == "?";
            let number = || {
                value
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| Error::Parse(format!("invalid {key} value '{value}'")))
            };

            if let Some(field) = TEXT_FIELDS.iter().find(|f| f.key == key) {
                let target = (field.get_mut)(&mut m);
                *target = if inconsistent {
                    ConsistentlyDefined::inconsistent()
                } else {
                    ConsistentlyDefined::new(value.to_string())
                };
            } else if let Some(field) = NUMBER_FIELDS.iter().find(|f| f.key == key) {
                let parsed = if inconsistent { None } else { Some(number()?) };
                *(field.get_mut)(&mut m) = parsed.map_or_else(ConsistentlyDefined::inconsistent, ConsistentlyDefined::new);
            } else if key == "startTime" || key == "endTime" {
                let parsed = if inconsistent { None } else { Some(parse_fits_time(value)?) };
                let field = parsed.map_or_else(ConsistentlyDefined::inconsistent, ConsistentlyDefined::new);
                if key == "startTime" {
                    m.start_time = field;
                } else {
                    m.end_time = field;
                }
            } else {
                let parsed = if inconsistent { None } else { Some(number()?) };
                let parsed = if key == "ra" || key == "longitude" {
                    parsed.map(normalize_longitude)
                } else {
                    parsed
                };
                match m.scalar_field_mut(key) {
                    Some(target) => {
                        *target = parsed.map_or_else(ConsistentlyDefined::inconsistent, ConsistentlyDefined::new)
                    }
                    None => warn!("unknown integration metadata item '{key}' ignored"),
                }
            }
        }
        Ok(m)
    }
}
