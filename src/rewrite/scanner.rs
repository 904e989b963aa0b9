//! Byte-level JSON key detection.
//!
//! Confirms that a quoted key occurs as an object key (followed by optional
//! whitespace and `:`) without parsing the document. A hit may come from a
//! nested object; callers treat a hit as "worth a closer look", never as proof
//! that the key sits at the top level.

use memchr::memmem::Finder;

/// JSON insignificant whitespace.
#[inline]
pub fn is_ws(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

/// Index of the first non-whitespace byte at or after `from`.
#[inline]
pub fn skip_ws(bytes: &[u8], from: usize) -> usize {
    let mut pos = from;
    while pos < bytes.len() && is_ws(bytes[pos]) {
        pos += 1;
    }
    pos
}

/// Precompiled searcher for one quoted key, e.g. `"instructions"`.
#[derive(Debug, Clone)]
pub struct KeyScanner {
    finder: Finder<'static>,
}

impl KeyScanner {
    /// Build a scanner for `quoted_key`, which must include its quotes.
    pub fn new(quoted_key: &'static [u8]) -> Self {
        Self {
            finder: Finder::new(quoted_key),
        }
    }

    /// True when the key occurs followed by optional whitespace and `:`.
    pub fn is_present(&self, bytes: &[u8]) -> bool {
        key_followed_by_colon(&self.finder, bytes)
    }
}

/// One-off form of [`KeyScanner::is_present`].
pub fn has_key(bytes: &[u8], quoted_key: &[u8]) -> bool {
    key_followed_by_colon(&Finder::new(quoted_key), bytes)
}

fn key_followed_by_colon(finder: &Finder<'_>, bytes: &[u8]) -> bool {
    let key_len = finder.needle().len();
    let mut offset = 0;
    while let Some(idx) = finder.find(&bytes[offset..]) {
        let pos = skip_ws(bytes, offset + idx + key_len);
        if bytes.get(pos) == Some(&b':') {
            return true;
        }
        // The match may sit inside a string value; resume one byte later.
        offset += idx + 1;
    }
    false
}
