//! Script opcode constants
//!
//! The low range mirrors the classic stack opcodes the standard shapes
//! are built from; 0xc0-0xc6 is the reserved cross-chain range. Parse
//! order of the reserved opcodes is consensus: a shape check walks the
//! ops in sequence and any deviation fails it.

/// Push up to 255 bytes given by the next length byte
pub const OP_PUSHDATA1: u8 = 0x4c;
/// Terminates an unspendable data-carrier output
pub const OP_RETURN: u8 = 0x6a;
/// Drop the top stack item
pub const OP_DROP: u8 = 0x75;
/// Drop the top two stack items
pub const OP_2DROP: u8 = 0x6d;
/// Duplicate the top stack item
pub const OP_DUP: u8 = 0x76;
/// Hash the top stack item to a 20-byte key id
pub const OP_HASH160: u8 = 0xa9;
/// Verify top two items are equal
pub const OP_EQUALVERIFY: u8 = 0x88;
/// Check a Schnorr signature
pub const OP_CHECKSIG: u8 = 0xac;

/// Marks an output held by a smart contract
pub const OP_CONTRACT: u8 = 0xc0;
/// Marks contract change returned by a contract call
pub const OP_CONTRACT_CHANGE: u8 = 0xc1;
/// Marks the locked output of a branch-create transaction
pub const OP_CREATE_BRANCH: u8 = 0xc2;
/// Marks value leaving this chain for a peer chain (step-1)
pub const OP_TRANS_BRANCH: u8 = 0xc3;
/// Marks a miner's collateral on the main chain
pub const OP_MINE_BRANCH_MORTGAGE: u8 = 0xc4;
/// Marks the derived mine coin on the branch
pub const OP_MINE_BRANCH_COIN: u8 = 0xc5;
/// Marks a redeem-mortgage statement output
pub const OP_REDEEM_MORTGAGE: u8 = 0xc6;

/// Largest direct-push length; longer data uses OP_PUSHDATA1
pub const MAX_DIRECT_PUSH: u8 = 0x4b;

/// Encode an integer in minimal little-endian scriptnum form
pub fn script_num_encode(mut value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }

    let negative = value < 0;
    if negative {
        value = -value;
    }

    let mut result = Vec::new();
    let mut abs = value as u64;
    while abs > 0 {
        result.push((abs & 0xff) as u8);
        abs >>= 8;
    }

    // If the high bit of the top byte is set, append a sign byte
    if result.last().map(|b| b & 0x80 != 0).unwrap_or(false) {
        result.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        let last = result.len() - 1;
        result[last] |= 0x80;
    }
    result
}

/// Decode a minimal little-endian scriptnum (at most 8 bytes)
pub fn script_num_decode(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() {
        return Some(0);
    }
    if bytes.len() > 8 {
        return None;
    }
    // Reject non-minimal encodings
    if bytes[bytes.len() - 1] & 0x7f == 0 && (bytes.len() == 1 || bytes[bytes.len() - 2] & 0x80 == 0) {
        return None;
    }

    let mut value: i64 = 0;
    for (i, b) in bytes.iter().enumerate() {
        if i == bytes.len() - 1 {
            value |= ((b & 0x7f) as i64) << (8 * i);
        } else {
            value |= (*b as i64) << (8 * i);
        }
    }
    if bytes[bytes.len() - 1] & 0x80 != 0 {
        value = -value;
    }
    Some(value)
}
