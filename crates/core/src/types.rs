/// Job identifiers are opaque strings issued by the remote generation
/// service on submission. Unique per job; the registry key.
pub type JobId = String;

/// Opaque reference to the calling context a result is routed back to.
/// Carried on job records and events, never interpreted by the core.
pub type RequesterId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
