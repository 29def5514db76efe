//! 🛂 Validation: the border checkpoint between "parsed" and "allowed to ship".
//!
//! The normalizer is a pushover; it will happily hand us a latitude of 500. This
//! module is where that fantasy ends. Every canonical report in a batch goes through
//! the `garde` rules declared on [`CanonicalReport`], and the batch either passes whole
//! or gets turned back with the full list of complaints. 🦆
//!
//! Doesn't know or care which wire format the reports came from. The one difference
//! between the paths is the single report's "locate me" coordinates, which are a
//! question and not a position, so [`validate_single`] lets them through.

use garde::Validate;

use crate::common::CanonicalReport;
use crate::wire::SENTINEL_COORDINATE;

/// 📻 The radio technologies we recognise. Empty means "the phone didn't say".
pub const KNOWN_RADIOS: [&str; 6] = ["", "gsm", "cdma", "umts", "wcdma", "lte"];

/// 📝 One complaint: where, and what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// 📍 e.g. `items[2].cell[0].mcc`
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// 🎫 Verdict for a batch. Non-empty `errors` means `data` is empty and nothing ships.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Validated {
    pub errors: Vec<ValidationIssue>,
    pub data: Vec<CanonicalReport>,
}

impl Validated {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// 🧭 Knobs the garde rules read while they run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportRules {
    /// 📍 Accept −255 as a latitude or longitude. Only a single report may ask to be located.
    pub allow_locate_sentinel: bool,
}

/// 📦 The canonical batch as the schema sees it. Only exists so garde paths read `items[n]...`.
#[derive(Validate)]
#[garde(context(ReportRules))]
struct SubmitBatch {
    #[garde(dive)]
    items: Vec<CanonicalReport>,
}

/// 🛂 Check the whole batch. All or nothing.
pub fn validate_batch(reports: Vec<CanonicalReport>) -> Validated {
    let batch = SubmitBatch { items: reports };
    match batch.validate() {
        Ok(()) => Validated {
            errors: Vec::new(),
            data: batch.items,
        },
        Err(report) => Validated {
            errors: issues(report),
            data: Vec::new(),
        },
    }
}

/// 📄 Check one single-path report. Real coordinates must be on the map; −255 means "locate me".
pub fn validate_single(report: &CanonicalReport) -> Vec<ValidationIssue> {
    let rules = ReportRules {
        allow_locate_sentinel: true,
    };
    match report.validate_with(&rules) {
        Ok(()) => Vec::new(),
        Err(report) => issues(report),
    }
}

fn issues(report: garde::Report) -> Vec<ValidationIssue> {
    report
        .iter()
        .map(|(path, error)| ValidationIssue {
            path: path.to_string(),
            message: error.message().to_string(),
        })
        .collect()
}

/// 🌐 garde hook: latitude within [−90, 90], or the sentinel when the rules allow it.
pub(crate) fn latitude(value: &f64, rules: &ReportRules) -> garde::Result {
    on_the_map(*value, 90.0, rules)
}

/// 🌐 garde hook: longitude within [−180, 180], or the sentinel when the rules allow it.
pub(crate) fn longitude(value: &f64, rules: &ReportRules) -> garde::Result {
    on_the_map(*value, 180.0, rules)
}

fn on_the_map(value: f64, limit: f64, rules: &ReportRules) -> garde::Result {
    if rules.allow_locate_sentinel && value == SENTINEL_COORDINATE {
        return Ok(());
    }
    if (-limit..=limit).contains(&value) {
        Ok(())
    } else {
        Err(garde::Error::new(format!("{value} is outside [-{limit}, {limit}]")))
    }
}

/// 📻 garde hook: the radio must be one we know how to bucket.
pub(crate) fn is_known_radio(value: &String, _rules: &ReportRules) -> garde::Result {
    if KNOWN_RADIOS.contains(&value.as_str()) {
        Ok(())
    } else {
        Err(garde::Error::new(format!("unknown radio type '{value}'")))
    }
}

/// 🔑 garde hook: a wifi with no key can't be aggregated into anything.
pub(crate) fn non_empty_key(value: &String, _rules: &ReportRules) -> garde::Result {
    if value.trim().is_empty() {
        Err(garde::Error::new("wifi key must not be empty"))
    } else {
        Ok(())
    }
}
