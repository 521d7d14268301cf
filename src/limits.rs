use crate::model::Ms;

const DAY_MS: Ms = 86_400_000;

pub const MAX_EMPLOYEE_ID_LEN: usize = 320;
pub const MAX_NOTES_LEN: usize = 2000;
pub const MAX_CREATED_BY_LEN: usize = 256;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

pub const MAX_SHIFT_DURATION_MS: Ms = 366 * DAY_MS;
pub const MAX_QUERY_WINDOW_MS: Ms = 400 * DAY_MS;
pub const MAX_BULK_RANGE_DAYS: i64 = 366;

pub const MAX_BATCH_SIZE: usize = 1000;
/// Largest WAL record payload; a longer length header is treated as damage.
pub const MAX_WAL_RECORD_BYTES: usize = 16 * 1024 * 1024;
pub const MAX_SHIFTS_PER_EMPLOYEE: usize = 100_000;
pub const MAX_PENDING_PROPOSALS: usize = 64;
pub const MAX_PENDING_BULK_PLANS: usize = 8;

/// Longest accepted request line on the wire.
pub const MAX_LINE_LEN: usize = 64 * 1024;
