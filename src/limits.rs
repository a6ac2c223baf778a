use crate::model::Ms;

pub const MAX_TITLE_LEN: usize = 256;
pub const MAX_DESCRIPTION_LEN: usize = 4096;
pub const MAX_PHONE_LEN: usize = 32;

/// 0000-01-01T00:00:00Z. Together with the upper bound this covers every
/// `YYYY-MM-DD` date and keeps span arithmetic far from `i64` overflow.
pub const MIN_VALID_TIMESTAMP_MS: Ms = -62_167_219_200_000;
/// 10000-01-01T00:00:00Z, exclusive end of the last representable day.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_800_000;

/// Bounded event queue size when nothing else is configured.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_EVENT_WORKERS: usize = 2;
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;

/// Pending WAL commands the group-commit writer will buffer.
pub const WAL_CHANNEL_CAPACITY: usize = 4096;
