//! Time-windowed per-camera statistics.
//!
//! A report picks one representative record per person (the latest inside the window,
//! optionally falling back to the latest ever for registered persons absent from it) and
//! folds their attributes into coarse histograms. Unlike [`crate::counters`], nothing is
//! dropped: unknown labels land in a catch-all bucket.

use crate::gallery::{GalleryError, IdentityRecord, PersonLedger, VectorGallery};
use chrono::{FixedOffset, Local, TimeZone};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Envelopes keyed by camera id.
pub type Report = BTreeMap<String, CameraEnvelope>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub camera_ids: Vec<String>,
    /// Window start, epoch millis, inclusive.
    pub from: i64,
    /// Window end, epoch millis, inclusive.
    pub to: i64,
    pub fallback_to_latest: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraEnvelope {
    pub camera_id: String,
    pub timestamp: TimestampRange,
    pub data: CameraData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampRange {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraData {
    pub total_head_count: u64,
    pub gender_count: GenderHistogram,
    pub expression: ExpressionHistogram,
    pub age_group: AgeHistogram,
    pub unique_face_count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenderHistogram {
    #[serde(rename = "Male")]
    pub male: u64,
    #[serde(rename = "Female")]
    pub female: u64,
    #[serde(rename = "Unrecognised")]
    pub unrecognised: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpressionHistogram {
    pub happy: u64,
    pub sad: u64,
    pub anger: u64,
    pub surprise: u64,
    pub disgust: u64,
    pub neutral: u64,
    pub other: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeHistogram {
    pub minor: u64,
    pub adult: u64,
    pub senior: u64,
}

impl GenderHistogram {
    pub fn add(&mut self, label: Option<&str>) {
        match label.map(str::trim) {
            Some("Male") => self.male += 1,
            Some("Female") => self.female += 1,
            _ => self.unrecognised += 1,
        }
    }
}

impl ExpressionHistogram {
    pub fn add(&mut self, label: Option<&str>) {
        let label = label.map(|l| l.trim().to_lowercase());
        match label.as_deref() {
            Some("happy") => self.happy += 1,
            Some("sad") => self.sad += 1,
            Some("anger" | "angry") => self.anger += 1,
            Some("surprised" | "surprise") => self.surprise += 1,
            Some("disgust") => self.disgust += 1,
            Some("neutral") => self.neutral += 1,
            // includes "fear", which has no bucket of its own
            _ => self.other += 1,
        }
    }
}

impl AgeHistogram {
    /// "Young (15-25)" and missing groups count as adult.
    pub fn add(&mut self, label: Option<&str>) {
        match label.map(str::trim) {
            Some("Child (0-14)") => self.minor += 1,
            Some("Elderly (56+)") => self.senior += 1,
            _ => self.adult += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Zone {
    /// Host local time; the offset is looked up per timestamp.
    Local,
    Fixed(FixedOffset),
}

#[derive(Debug, Clone, Copy)]
pub struct ReportAggregator {
    zone: Zone,
}

impl Default for ReportAggregator {
    fn default() -> Self {
        Self::local()
    }
}

impl ReportAggregator {
    /// Format window timestamps in a fixed UTC offset.
    pub fn new(offset: FixedOffset) -> Self {
        Self {
            zone: Zone::Fixed(offset),
        }
    }

    /// Format window timestamps in host local time.
    pub fn local() -> Self {
        Self { zone: Zone::Local }
    }

    pub fn format_timestamp(&self, millis: i64) -> String {
        let formatted = match self.zone {
            Zone::Local => Local
                .timestamp_millis_opt(millis)
                .single()
                .map(|t| t.format(TIMESTAMP_FORMAT).to_string()),
            Zone::Fixed(offset) => offset
                .timestamp_millis_opt(millis)
                .single()
                .map(|t| t.format(TIMESTAMP_FORMAT).to_string()),
        };
        formatted.unwrap_or_else(|| millis.to_string())
    }

    pub fn build_report<G, L>(
        &self,
        gallery: &G,
        ledger: &L,
        request: &ReportRequest,
    ) -> Result<Report, GalleryError>
    where
        G: VectorGallery + ?Sized,
        L: PersonLedger + ?Sized,
    {
        // The gallery has no camera column: every camera gets the same statistics.
        let representatives = representatives(
            gallery,
            ledger,
            request.from,
            request.to,
            request.fallback_to_latest,
        )?;
        let data = summarize(representatives.iter());
        let timestamp = TimestampRange {
            from: self.format_timestamp(request.from),
            to: self.format_timestamp(request.to),
        };

        tracing::debug!(
            cameras = request.camera_ids.len(),
            head_count = data.total_head_count,
            from = request.from,
            to = request.to,
            "built report"
        );

        Ok(request
            .camera_ids
            .iter()
            .map(|camera_id| {
                (
                    camera_id.clone(),
                    CameraEnvelope {
                        camera_id: camera_id.clone(),
                        timestamp: timestamp.clone(),
                        data: data.clone(),
                    },
                )
            })
            .collect())
    }
}

/// One record per person: the latest inside `[from, to]`, plus, with `fallback`, the
/// latest-ever record of each ledger person missing from the window.
pub fn representatives<G, L>(
    gallery: &G,
    ledger: &L,
    from: i64,
    to: i64,
    fallback: bool,
) -> Result<Vec<IdentityRecord>, GalleryError>
where
    G: VectorGallery + ?Sized,
    L: PersonLedger + ?Sized,
{
    let mut latest: BTreeMap<i64, IdentityRecord> = BTreeMap::new();
    for record in gallery.records_created_between(from, to)? {
        let newer = latest
            .get(&record.person_id)
            .map_or(true, |cur| (record.created_at, record.id) > (cur.created_at, cur.id));
        if newer {
            latest.insert(record.person_id, record);
        }
    }

    if fallback {
        let known: BTreeSet<i64> = ledger.persons()?.into_iter().map(|p| p.person_id).collect();
        for person_id in known {
            if latest.contains_key(&person_id) {
                continue;
            }
            if let Some(record) = gallery.latest_for_person(person_id)? {
                latest.insert(person_id, record);
            }
        }
    }

    Ok(latest.into_values().collect())
}

/// Fold representatives into histograms.
pub fn summarize<'a, I>(representatives: I) -> CameraData
where
    I: IntoIterator<Item = &'a IdentityRecord>,
{
    let mut data = CameraData::default();
    for record in representatives {
        data.total_head_count += 1;
        data.gender_count.add(record.attributes.gender.as_deref());
        data.expression.add(record.attributes.expression.as_deref());
        data.age_group.add(record.attributes.age_group.as_deref());
    }
    data.unique_face_count = data.total_head_count;
    data
}
