//! Mutable view of a request document.
//!
//! The top-level object is split into `(key, value)` pairs whose values stay
//! as raw JSON slices of the input buffer until something replaces them.
//! Untouched fields are re-emitted byte-for-byte in their original order, and
//! because every slice borrows the input, the input buffer cannot go back to
//! its pool while a [`Document`] is alive.

use std::borrow::Cow;
use std::fmt;

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use super::cache_key::CacheIdentity;
use super::{INPUT, INSTRUCTIONS, PROMPT_CACHE_KEY};
use crate::error::RewriteError;

/// Message role of a synthesized input item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Developer,
    User,
}

/// A chat message wrapping an existing JSON value as its content.
#[derive(Debug, Clone, Serialize)]
pub struct Message<'a> {
    pub role: Role,
    pub content: &'a RawValue,
}

/// A field value: borrowed from the input or produced by the rewrite.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Node<'a> {
    Raw(&'a RawValue),
    String(String),
    Message(Message<'a>),
    Array(Vec<Node<'a>>),
}

impl<'a> Node<'a> {
    fn raw(&self) -> Option<&'a RawValue> {
        match self {
            Node::Raw(raw) => Some(*raw),
            _ => None,
        }
    }

    fn kind(&self) -> Kind {
        match self.raw().and_then(|raw| raw.get().as_bytes().first()) {
            Some(b'n') => Kind::Null,
            Some(b'"') => Kind::String,
            Some(b'[') => Kind::Array,
            _ => Kind::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Null,
    String,
    Array,
    Other,
}

/// Top-level JSON object as an ordered list of fields.
#[derive(Debug, Clone, Default)]
pub struct Document<'a> {
    fields: Vec<(Cow<'a, str>, Node<'a>)>,
}

impl<'a> Document<'a> {
    /// Parse `text` as a JSON object, borrowing every value from it.
    pub fn parse(text: &'a str) -> Result<Self, RewriteError> {
        serde_json::from_str(text).map_err(RewriteError::Parse)
    }

    /// Field names in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_ref())
    }

    /// Value of the last field named `key`.
    pub fn get(&self, key: &str) -> Option<&Node<'a>> {
        self.position(key).map(|i| &self.fields[i].1)
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.fields.iter().rposition(|(k, _)| k == key)
    }

    /// Replace the last field named `key`, or append it.
    fn set(&mut self, key: &'static str, node: Node<'a>) {
        match self.position(key) {
            Some(i) => self.fields[i].1 = node,
            None => self.fields.push((Cow::Borrowed(key), node)),
        }
    }

    /// Make sure the cache key is set, keeping any non-null existing value.
    ///
    /// A new field goes to `slot`, or first when no slot is given.
    fn ensure_cache_key(&mut self, slot: Option<usize>, derive: impl FnOnce() -> String) -> bool {
        match self.position(PROMPT_CACHE_KEY) {
            Some(i) if self.fields[i].1.kind() == Kind::Null => {
                self.fields[i].1 = Node::String(derive());
                true
            }
            Some(_) => false,
            None => {
                let at = slot.unwrap_or(0);
                self.fields
                    .insert(at, (Cow::Borrowed(PROMPT_CACHE_KEY), Node::String(derive())));
                true
            }
        }
    }

    /// Move a string `instructions` field into `input` as a developer message.
    ///
    /// Returns false when there is no string `instructions` field.
    fn move_instructions_to_input(&mut self) -> Result<bool, RewriteError> {
        let content = match self.get(INSTRUCTIONS) {
            Some(node) if node.kind() == Kind::String => node.raw(),
            _ => None,
        };
        let Some(content) = content else {
            return Ok(false);
        };
        self.fields.retain(|(k, _)| k != INSTRUCTIONS);

        let developer = Node::Message(Message {
            role: Role::Developer,
            content,
        });
        let input = self.get(INPUT).map(|node| (node.kind(), node.raw()));
        let items = match input {
            Some((Kind::String, Some(text))) => vec![
                developer,
                Node::Message(Message {
                    role: Role::User,
                    content: text,
                }),
            ],
            Some((Kind::Array, Some(array))) => {
                let existing: Vec<&'a RawValue> =
                    serde_json::from_str(array.get()).map_err(RewriteError::Parse)?;
                let mut items = Vec::with_capacity(existing.len() + 1);
                items.push(developer);
                items.extend(existing.into_iter().map(Node::Raw));
                items
            }
            // Absent, null, or a type `input` never legitimately has.
            _ => vec![developer],
        };
        self.set(INPUT, Node::Array(items));
        Ok(true)
    }

    /// Apply the rewrite and report whether anything changed.
    pub fn rewrite(
        &mut self,
        rewrite_instructions: bool,
        identity: &CacheIdentity<'_>,
    ) -> Result<bool, RewriteError> {
        // The cache key takes the slot `instructions` leaves behind.
        let slot = if rewrite_instructions
            && self.get(INSTRUCTIONS).map(Node::kind) == Some(Kind::String)
        {
            self.position(INSTRUCTIONS)
        } else {
            None
        };

        let mut changed = self.ensure_cache_key(slot, || identity.derive());
        if rewrite_instructions {
            changed |= self.move_instructions_to_input()?;
        }
        Ok(changed)
    }

    /// Serialize compactly, without a trailing newline.
    pub fn write_to(&self, out: &mut Vec<u8>) -> Result<(), RewriteError> {
        serde_json::to_writer(out, self).map_err(RewriteError::Serialize)
    }
}

/// Parse `input`, rewrite it, and serialize into `out`.
///
/// Returns false, leaving `out` empty, when the document needed no change.
pub fn rewrite_document(
    input: &[u8],
    rewrite_instructions: bool,
    identity: &CacheIdentity<'_>,
    out: &mut Vec<u8>,
) -> Result<bool, RewriteError> {
    let text = std::str::from_utf8(input)?;
    let mut doc = Document::parse(text)?;
    if !doc.rewrite(rewrite_instructions, identity)? {
        return Ok(false);
    }
    out.reserve(input.len() + 96);
    doc.write_to(out)?;
    Ok(true)
}

impl Serialize for Document<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Document<'de> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(DocumentVisitor)
    }
}

struct DocumentVisitor;

impl<'de> Visitor<'de> for DocumentVisitor {
    type Value = Document<'de>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut fields = Vec::with_capacity(map.size_hint().unwrap_or(16));
        while let Some((Key(key), value)) = map.next_entry::<Key<'de>, &'de RawValue>()? {
            fields.push((key, Node::Raw(value)));
        }
        Ok(Document { fields })
    }
}

/// Object key that borrows from the input unless it contains escapes.
struct Key<'a>(Cow<'a, str>);

impl<'de> Deserialize<'de> for Key<'de> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(KeyVisitor)
    }
}

struct KeyVisitor;

impl<'de> Visitor<'de> for KeyVisitor {
    type Value = Key<'de>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an object key")
    }

    fn visit_borrowed_str<E: de::Error>(self, v: &'de str) -> Result<Self::Value, E> {
        Ok(Key(Cow::Borrowed(v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(Key(Cow::Owned(v.to_owned())))
    }
}
