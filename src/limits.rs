//! Hard ceilings on what a single engine will hold.

pub const MAX_RESOURCES: usize = 10_000;
pub const MAX_INTERVALS_PER_RESOURCE: usize = 100_000;
pub const MAX_TEAMS: usize = 10_000;
pub const MAX_USERS: usize = 100_000;

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 4_096;
pub const MAX_NOTE_LEN: usize = 2_048;
pub const MAX_EMAIL_LEN: usize = 254;
