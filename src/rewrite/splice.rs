//! Single-field injection by byte copying.
//!
//! Produces the same bytes as re-serializing the document with one string
//! field prepended, without building a tree.

use super::scanner::skip_ws;

/// The body does not start with `{` after whitespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotAnObject;

/// Write `src` into `out` with `"key":"value"` as the first object member.
///
/// `key` and `value` are written verbatim between quotes and must not need
/// JSON escaping. On [`NotAnObject`] nothing has been written.
pub fn prepend_string_field(
    src: &[u8],
    key: &str,
    value: &str,
    out: &mut Vec<u8>,
) -> Result<(), NotAnObject> {
    let open = skip_ws(src, 0);
    if src.get(open) != Some(&b'{') {
        return Err(NotAnObject);
    }

    out.reserve(src.len() + key.len() + value.len() + 8);
    out.extend_from_slice(&src[..=open]);
    out.push(b'"');
    out.extend_from_slice(key.as_bytes());
    out.extend_from_slice(b"\":\"");
    out.extend_from_slice(value.as_bytes());
    out.push(b'"');

    let next = skip_ws(src, open + 1);
    if src.get(next) == Some(&b'}') {
        out.extend_from_slice(&src[next..]);
    } else {
        out.push(b',');
        out.extend_from_slice(&src[open + 1..]);
    }
    Ok(())
}
