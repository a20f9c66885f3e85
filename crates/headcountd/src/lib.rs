//! headcountd: frame engine, retention sweeper and report scheduler over a shared
//! [`headcount_store::FaceStore`].

pub mod config;
pub mod engine;
pub mod scheduler;
pub mod sink;

pub use config::{Config, ConfigError};
pub use engine::{
    spawn_engine, EngineError, EngineHandle, FaceResult, FrameOutcome, FrameReport,
    RecognitionMetrics,
};
pub use scheduler::{publish_report, spawn_reporter, spawn_sweeper, ReportError, ReportSchedule};
pub use sink::{LogSink, ReportSink, SinkError, SpoolSink};
