//! Keys shared with the host and the other mechanisms of a right.

/// Context: account name, NUL-terminated UTF-8.
pub const USERNAME: &str = "username";
/// Context: password, NUL-terminated UTF-8. Always written volatile.
pub const PASSWORD: &str = "password";
/// Context: numeric user id, 4 bytes in native byte order.
pub const UID: &str = "uid";

/// Hint: last username typed into the prompt.
pub const LAST_USERNAME_HINT: &str = "lastUsername";
/// Hint: password left by an earlier mechanism for a retry. Read-only here.
pub const PASSWORD_HINT: &str = "password";

/// Default hint under which the check mechanism records whether the
/// interactive step has to run. Overridden by `mechanism.hint_domain`.
pub const DEFAULT_GATE_HINT: &str = "com.authmech.gate";

/// Encode a string the way the host stores it.
pub fn encode_string(value: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(value.len() + 1);
    bytes.extend_from_slice(value.as_bytes());
    bytes.push(0);
    bytes
}

/// Decode a string value. Trailing NULs are not part of the value.
pub fn decode_string(bytes: &[u8]) -> Option<&str> {
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    std::str::from_utf8(&bytes[..end]).ok()
}

pub fn encode_uid(uid: u32) -> [u8; 4] {
    uid.to_ne_bytes()
}

pub fn decode_uid(bytes: &[u8]) -> Option<u32> {
    let raw: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    Some(u32::from_ne_bytes(raw))
}

pub fn encode_flag(flag: bool) -> [u8; 1] {
    [flag as u8]
}

/// Any non-zero first byte is true. An empty value is no flag at all.
pub fn decode_flag(bytes: &[u8]) -> Option<bool> {
    bytes.first().map(|b| *b != 0)
}
