/// Input-size ceilings. Requests exceeding these fail fast instead of
/// growing unbounded state.

pub const MAX_NOTES_LEN: usize = 2_000;

pub const MAX_MEMO_CONTENT_LEN: usize = 10_000;

/// Longest accepted request line on the wire, in bytes.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Lesson length ceiling; also bounds the buffer a policy entry may carry.
pub const MAX_DURATION_MINUTES: u32 = 8 * 60;

pub const MAX_BUFFER_MINUTES: u32 = 120;

/// Entries allowed in a duration policy.
pub const MAX_POLICY_ENTRIES: usize = 64;

/// Widest reservation/memo snapshot window for calendar queries, in days.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 62;
