//! Rewrite strategy selection.
//!
//! ```text
//! scan ──▶ DecisionFlags ──▶ Action
//!                              ├─ Passthrough      (no scanned key present)
//!                              ├─ AlreadyKeyed     (cache key present, nothing to move)
//!                              ├─ InjectCacheKey   (splice, falls back to the document path)
//!                              └─ Restructure      (document path)
//! ```

use super::scanner::KeyScanner;

/// Flags computed once per request from a single scan of the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecisionFlags {
    needs_instruction_rewrite: bool,
    has_cache_key: bool,
    has_prior_turn_id: bool,
}

impl DecisionFlags {
    /// Build flags from raw key presence.
    ///
    /// A prior turn id suppresses the instruction rewrite: a continuation must
    /// not receive the instructions again as a developer message.
    pub fn new(has_instructions: bool, has_cache_key: bool, has_prior_turn_id: bool) -> Self {
        Self {
            needs_instruction_rewrite: has_instructions && !has_prior_turn_id,
            has_cache_key,
            has_prior_turn_id,
        }
    }

    pub fn needs_instruction_rewrite(&self) -> bool {
        self.needs_instruction_rewrite
    }

    pub fn has_cache_key(&self) -> bool {
        self.has_cache_key
    }

    pub fn has_prior_turn_id(&self) -> bool {
        self.has_prior_turn_id
    }
}

/// Precompiled scanners for the three keys the decision depends on.
#[derive(Debug, Clone)]
pub struct FieldScanner {
    instructions: KeyScanner,
    cache_key: KeyScanner,
    prior_turn_id: KeyScanner,
}

impl FieldScanner {
    pub fn new() -> Self {
        Self {
            instructions: KeyScanner::new(b"\"instructions\""),
            cache_key: KeyScanner::new(b"\"prompt_cache_key\""),
            prior_turn_id: KeyScanner::new(b"\"previous_response_id\""),
        }
    }

    pub fn scan(&self, body: &[u8]) -> DecisionFlags {
        DecisionFlags::new(
            self.instructions.is_present(body),
            self.cache_key.is_present(body),
            self.prior_turn_id.is_present(body),
        )
    }
}

impl Default for FieldScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// What the pipeline does with a buffered body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// None of the scanned keys occur; forward the bytes as read.
    Passthrough,
    /// A cache key exists and no instruction rewrite is wanted.
    AlreadyKeyed,
    /// Only the cache key is missing; try the byte splice first.
    InjectCacheKey,
    /// Instructions must move into `input`; the cache key is added if missing.
    Restructure,
}

impl Action {
    /// Pure mapping from flags to action.
    pub fn decide(flags: DecisionFlags) -> Self {
        match (
            flags.needs_instruction_rewrite,
            flags.has_cache_key,
            flags.has_prior_turn_id,
        ) {
            (true, _, _) => Action::Restructure,
            (false, true, _) => Action::AlreadyKeyed,
            (false, false, true) => Action::InjectCacheKey,
            (false, false, false) => Action::Passthrough,
        }
    }
}
