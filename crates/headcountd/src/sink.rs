//! Destinations for scheduled reports.

use headcount_core::Report;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write report to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub trait ReportSink: Send {
    fn name(&self) -> &str;

    /// Deliver one report. `generated_at` is the tick time in epoch millis.
    fn publish(&mut self, report: &Report, generated_at: i64) -> Result<(), SinkError>;
}

/// Logs a one-line summary per camera at info and the JSON body at debug.
#[derive(Debug, Default)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn publish(&mut self, report: &Report, generated_at: i64) -> Result<(), SinkError> {
        for envelope in report.values() {
            tracing::info!(
                camera = %envelope.camera_id,
                from = %envelope.timestamp.from,
                to = %envelope.timestamp.to,
                head_count = envelope.data.total_head_count,
                "report"
            );
        }
        tracing::debug!(generated_at, body = %serde_json::to_string(report)?, "report body");
        Ok(())
    }
}

/// Writes each report to `<dir>/report-<generated_at>.json`.
#[derive(Debug)]
pub struct SpoolSink {
    dir: PathBuf,
}

impl SpoolSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write(&self, path: &Path, body: &[u8]) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        // Write then rename so readers never pick up a partial file.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, path)
    }
}

impl ReportSink for SpoolSink {
    fn name(&self) -> &str {
        "spool"
    }

    fn publish(&mut self, report: &Report, generated_at: i64) -> Result<(), SinkError> {
        let body = serde_json::to_vec_pretty(report)?;
        let path = self.dir.join(format!("report-{generated_at}.json"));
        self.write(&path, &body).map_err(|source| SinkError::Write {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), bytes = body.len(), "report spooled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use headcount_core::report::{CameraData, TimestampRange};
    use headcount_core::CameraEnvelope;

    fn report() -> Report {
        let mut report = Report::new();
        report.insert(
            "camera1".into(),
            CameraEnvelope {
                camera_id: "camera1".into(),
                timestamp: TimestampRange {
                    from: "2024-01-01 10:00:00".into(),
                    to: "2024-01-01 10:01:00".into(),
                },
                data: CameraData::default(),
            },
        );
        report
    }

    #[test]
    fn test_log_sink_accepts_report() {
        LogSink.publish(&report(), 0).unwrap();
    }

    #[test]
    fn test_spool_sink_writes_json_file() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("headcount-spool-{}-{nanos}", std::process::id()));
        let mut sink = SpoolSink::new(&dir);

        sink.publish(&report(), 1_700_000_000_000).unwrap();

        let path = dir.join("report-1700000000000.json");
        let body: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(body["camera1"]["cameraId"], "camera1");
        assert_eq!(body["camera1"]["data"]["totalHeadCount"], 0);
        assert!(!dir.join("report-1700000000000.json.tmp").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
