// -
// Control channel opcodes

pub const OP_MONITOR: i32 = 1;
pub const OP_FORGET: i32 = 2;
pub const OP_QUERY: i32 = 3;
/// Echoed in replies to frames whose opcode could not be decoded
pub const OP_INVALID: i32 = 0;

// -
// Frame layout (all fields are little-endian i32)

/// `size` + `opcode`
pub(crate) const REQUEST_HEADER_LEN: usize = 8;
/// `size` + `opcode` + `code`
pub(crate) const RESPONSE_HEADER_LEN: usize = 12;
/// `status` + `count` in a successful query reply
pub(crate) const QUERY_REPLY_PREFIX_LEN: usize = 8;
pub(crate) const WIRE_INT_LEN: usize = 4;
/// Highest block index a query reply can carry
pub const MAX_WIRE_BLOCK: u64 = i32::MAX as u64;

// -
// Query status codes

pub const STATUS_OK: i32 = 0;
pub const STATUS_TRUNCATED: i32 = 1;
pub const STATUS_OVERFLOWED: i32 = 2;

// -
// Configuration

pub(crate) const ENV_PREFIX: &str = "BLOCKWATCH";
pub(crate) const ENV_CONFIG_PATH: &str = "CONFIG_PATH";
