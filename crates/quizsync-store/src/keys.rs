//! Mapping between store keys and file names.
//!
//! Keys are arbitrary strings. File names keep ASCII alphanumerics, `-` and
//! `_` as-is and percent-encode every other byte, so no key can escape the
//! store directory or collide with another key.

/// Extension of files holding a value.
pub const VALUE_EXT: &str = "val";

fn is_plain(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

/// File name for `key`.
pub fn encode(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + VALUE_EXT.len() + 1);
    for &b in key.as_bytes() {
        if is_plain(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out.push('.');
    out.push_str(VALUE_EXT);
    out
}

/// Key stored in the file called `name`, or `None` if `name` is not a
/// value file (temporary files, foreign files, bad escapes).
pub fn decode(name: &str) -> Option<String> {
    let stem = name.strip_suffix(VALUE_EXT)?.strip_suffix('.')?;
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = stem.get(i + 1..i + 3)?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b if is_plain(b) => {
                out.push(b);
                i += 1;
            }
            _ => return None,
        }
    }
    String::from_utf8(out).ok()
}
