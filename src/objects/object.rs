//! The object sum type and its raw (undecoded) form
//!
//! Stores deal in [`RawObject`] — a kind plus an immutable payload —
//! and decode to the exhaustive [`Object`] enum on demand. The id of a
//! raw object is memoized, since hashing is the hot path of strict-mode
//! verification.

use crate::errors::ObjectFormatError;
use crate::objects::{Blob, Commit, ObjectId, ObjectType, Tag, Tree};
use bytes::Bytes;
use std::sync::OnceLock;

/// How forgiving parsers should be.
///
/// Strict is the default everywhere; tolerant mode exists for read-only
/// ingestion of historical repositories (zero-padded tree modes, legacy
/// entry orderings).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseMode {
    #[default]
    Strict,
    Tolerant,
}

/// A decoded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    Blob(Blob),
    Tree(Tree),
    Commit(Commit),
    Tag(Tag),
}

impl Object {
    pub fn kind(&self) -> ObjectType {
        match self {
            Object::Blob(_) => ObjectType::Blob,
            Object::Tree(_) => ObjectType::Tree,
            Object::Commit(_) => ObjectType::Commit,
            Object::Tag(_) => ObjectType::Tag,
        }
    }

    /// Decode a payload of the given kind.
    pub fn parse(
        kind: ObjectType,
        payload: &[u8],
        mode: ParseMode,
    ) -> Result<Self, ObjectFormatError> {
        Ok(match kind {
            ObjectType::Blob => Object::Blob(Blob::from_slice(payload)),
            ObjectType::Tree => Object::Tree(Tree::parse(payload, mode)?),
            ObjectType::Commit => Object::Commit(Commit::parse(payload, mode)?),
            ObjectType::Tag => Object::Tag(Tag::parse(payload, mode)?),
        })
    }

    /// Canonical payload bytes (without the `<kind> <size>\0` header).
    pub fn serialize(&self) -> Bytes {
        match self {
            Object::Blob(blob) => blob.serialize(),
            Object::Tree(tree) => tree.serialize(),
            Object::Commit(commit) => commit.serialize(),
            Object::Tag(tag) => tag.serialize(),
        }
    }

    pub fn id(&self) -> ObjectId {
        ObjectId::for_object(self.kind(), &self.serialize())
    }

    pub fn into_raw(self) -> RawObject {
        RawObject::new(self.kind(), self.serialize())
    }

    pub fn as_blob(&self) -> Option<&Blob> {
        match self {
            Object::Blob(blob) => Some(blob),
            _ => None,
        }
    }

    pub fn as_tree(&self) -> Option<&Tree> {
        match self {
            Object::Tree(tree) => Some(tree),
            _ => None,
        }
    }

    pub fn as_commit(&self) -> Option<&Commit> {
        match self {
            Object::Commit(commit) => Some(commit),
            _ => None,
        }
    }

    pub fn as_tag(&self) -> Option<&Tag> {
        match self {
            Object::Tag(tag) => Some(tag),
            _ => None,
        }
    }
}

/// An undecoded object: kind plus payload, as a store hands it out.
#[derive(Debug, Clone)]
pub struct RawObject {
    kind: ObjectType,
    payload: Bytes,
    id: OnceLock<ObjectId>,
}

impl RawObject {
    pub fn new(kind: ObjectType, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
            id: OnceLock::new(),
        }
    }

    pub fn kind(&self) -> ObjectType {
        self.kind
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// The content address, computed on first use.
    pub fn id(&self) -> ObjectId {
        *self
            .id
            .get_or_init(|| ObjectId::for_object(self.kind, &self.payload))
    }

    /// The `<kind> <size>\0payload` stream that loose storage compresses
    /// and the id hashes.
    pub fn framed(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + 16);
        out.extend_from_slice(self.kind.as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.payload.len().to_string().as_bytes());
        out.push(0);
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(&self, mode: ParseMode) -> Result<Object, ObjectFormatError> {
        Object::parse(self.kind, &self.payload, mode)
    }
}

impl PartialEq for RawObject {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.payload == other.payload
    }
}

impl Eq for RawObject {}
