//! headcount-core: Face identity resolution and crowd statistics.
//!
//! Normalizes face embeddings, resolves them against a vector gallery (match an existing
//! person or mint a new one), and derives live counters and windowed reports from the
//! gallery contents. Storage and inference are abstracted behind traits.

pub mod analyzer;
pub mod attributes;
pub mod clock;
pub mod counters;
pub mod gallery;
pub mod memory;
pub mod report;
pub mod resolver;
pub mod retention;
pub mod types;

pub use analyzer::{crop_face, AnalyzerError, DetectedFace, FaceAnalyzer, LivenessResult};
pub use attributes::{AgeGroup, Attribute, Expression, FaceAttributes, Gender};
pub use clock::{Clock, ManualClock, SystemClock};
pub use counters::{FrameCounts, StoredCounts};
pub use gallery::{
    GalleryError, IdentityRecord, Neighbor, NewIdentity, PersonLedger, PersonRecord,
    VectorGallery,
};
pub use memory::{MemoryGallery, MemoryLedger};
pub use report::{CameraEnvelope, Report, ReportAggregator, ReportRequest};
pub use resolver::{IdentityResolver, Resolution, ResolverConfig};
pub use retention::RetentionPolicy;
pub use types::{BoundingBox, Embedding, EmbeddingError};
