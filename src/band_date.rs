//! Band label → acquisition date → compositing bucket.
//!
//! Label grammars are pluggable through [`DateConvention`]; the default is the
//! `YYYYMMDD_...` prefix used by FORCE-style band descriptions. A label that
//! does not parse simply belongs to no bucket.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Parses an acquisition date out of a band label.
pub trait DateConvention {
    fn parse(&self, label: &str) -> Option<NaiveDate>;
}

/// First `_`-delimited segment is exactly eight digits forming `YYYYMMDD`.
#[derive(Debug, Clone, Copy, Default)]
pub struct YyyymmddPrefix;

impl DateConvention for YyyymmddPrefix {
    fn parse(&self, label: &str) -> Option<NaiveDate> {
        let token = label.split('_').next()?;
        if token.len() != 8 || !token.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        NaiveDate::parse_from_str(token, "%Y%m%d").ok()
    }
}

/// Calendar unit a bucket key is derived from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodUnit {
    /// Two-digit month, `"07"`
    #[default]
    Month,
    /// `"Q1"`..`"Q4"`
    Quarter,
    /// Four-digit year, `"2018"`
    Year,
}

impl PeriodUnit {
    #[must_use]
    pub fn key(self, date: NaiveDate) -> String {
        match self {
            PeriodUnit::Month => format!("{:02}", date.month()),
            PeriodUnit::Quarter => format!("Q{}", (date.month() - 1) / 3 + 1),
            PeriodUnit::Year => format!("{:04}", date.year()),
        }
    }
}

/// One recognised bucket: the key derived from a date and the label used in output names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub key: String,
    pub label: String,
}

impl Bucket {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
        }
    }
}

/// Ordered set of recognised buckets for one run.
///
/// Dates whose key is not in the table are excluded even when parseable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketTable {
    #[serde(default)]
    pub unit: PeriodUnit,
    pub buckets: Vec<Bucket>,
}

impl Default for BucketTable {
    /// July and August monthly buckets.
    fn default() -> Self {
        Self {
            unit: PeriodUnit::Month,
            buckets: vec![Bucket::new("07", "July"), Bucket::new("08", "August")],
        }
    }
}

impl BucketTable {
    #[must_use]
    pub fn new(unit: PeriodUnit, buckets: Vec<Bucket>) -> Self {
        Self { unit, buckets }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Bucket a band label falls into under `convention`, if any.
    pub fn bucket_for<C: DateConvention + ?Sized>(
        &self,
        convention: &C,
        label: &str,
    ) -> Option<&Bucket> {
        let key = self.unit.key(convention.parse(label)?);
        self.buckets.iter().find(|b| b.key == key)
    }

    /// Band indices per bucket, in table order. Buckets with no bands are kept
    /// with an empty index list so callers can report the skip.
    pub fn band_indices<'a, C: DateConvention + ?Sized>(
        &'a self,
        convention: &C,
        labels: &[Option<String>],
    ) -> Vec<(&'a Bucket, Vec<usize>)> {
        let mut groups: Vec<(&Bucket, Vec<usize>)> =
            self.buckets.iter().map(|b| (b, Vec::new())).collect();
        for (index, label) in labels.iter().enumerate() {
            let Some(bucket) = label.as_deref().and_then(|l| self.bucket_for(convention, l)) else {
                continue;
            };
            if let Some((_, indices)) = groups.iter_mut().find(|(b, _)| b.key == bucket.key) {
                indices.push(index);
            }
        }
        groups
    }
}
