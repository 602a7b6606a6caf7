/// Max byte length of an identity (occupant or waiter name).
pub const MAX_NAME_LEN: usize = 256;

/// Max byte length of a room's display name.
pub const MAX_ROOM_NAME_LEN: usize = 128;

/// Max entries in a single room's wait list.
pub const MAX_WAITLIST_LEN: usize = 1024;

/// Max rooms a store will seed.
pub const MAX_ROOMS: usize = 64;

/// Max payload bytes in one WAL record. A room snapshot with a full wait list
/// of max-length names stays well under this.
pub const MAX_RECORD_LEN: u32 = 4 * 1024 * 1024;
