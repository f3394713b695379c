//! Blob object
//!
//! Blobs carry uninterpreted file content; names and modes live in the
//! trees that reference them.

use crate::objects::{Object, ObjectId, ObjectType};
use bytes::Bytes;
use derive_new::new;

/// File content, addressed by its hash.
#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct Blob {
    content: Bytes,
}

impl Blob {
    pub fn from_slice(content: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(content))
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn serialize(&self) -> Bytes {
        self.content.clone()
    }

    pub fn id(&self) -> ObjectId {
        ObjectId::for_object(ObjectType::Blob, &self.content)
    }
}

impl From<Blob> for Object {
    fn from(blob: Blob) -> Self {
        Object::Blob(blob)
    }
}
