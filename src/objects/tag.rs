//! Annotated tag object
//!
//! Same header/body shape as a commit: `object`, `type`, `tag`, and an
//! optional `tagger`, then the tag message. Historical tags without a
//! tagger are accepted.

use crate::errors::ObjectFormatError;
use crate::objects::commit::{HeaderBlock, Signature, push_header};
use crate::objects::{Object, ObjectId, ObjectType, ParseMode};
use bytes::Bytes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    object: ObjectId,
    kind: ObjectType,
    name: String,
    tagger: Option<Signature>,
    extra_headers: Vec<(String, String)>,
    message: Bytes,
}

impl Tag {
    pub fn new(
        object: ObjectId,
        kind: ObjectType,
        name: impl Into<String>,
        tagger: Option<Signature>,
        message: impl Into<Bytes>,
    ) -> Self {
        Self {
            object,
            kind,
            name: name.into(),
            tagger,
            extra_headers: Vec::new(),
            message: message.into(),
        }
    }

    pub fn parse(payload: &[u8], mode: ParseMode) -> Result<Self, ObjectFormatError> {
        let mut headers = HeaderBlock::parse(payload, "tag")?;

        let object = ObjectId::from_hex(&headers.take_required("object")?)?;
        let kind = ObjectType::from_wire(headers.take_required("type")?.as_bytes())?;
        let name = headers.take_required("tag")?;
        let tagger = match headers.take("tagger") {
            Some(raw) => Some(Signature::parse(raw.as_bytes())?),
            None => None,
        };
        let extra_headers = headers.finish(mode)?;

        Ok(Self {
            object,
            kind,
            name,
            tagger,
            extra_headers,
            message: Bytes::copy_from_slice(headers.body()),
        })
    }

    pub fn serialize(&self) -> Bytes {
        let mut out = Vec::new();
        push_header(&mut out, "object", &self.object.to_hex());
        push_header(&mut out, "type", self.kind.as_str());
        push_header(&mut out, "tag", &self.name);
        if let Some(tagger) = &self.tagger {
            push_header(&mut out, "tagger", &tagger.to_wire());
        }
        for (key, value) in &self.extra_headers {
            push_header(&mut out, key, value);
        }
        out.push(b'\n');
        out.extend_from_slice(&self.message);
        Bytes::from(out)
    }

    pub fn id(&self) -> ObjectId {
        ObjectId::for_object(ObjectType::Tag, &self.serialize())
    }

    /// The tagged object.
    pub fn object(&self) -> (&ObjectId, ObjectType) {
        (&self.object, self.kind)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tagger(&self) -> Option<&Signature> {
        self.tagger.as_ref()
    }

    pub fn message(&self) -> &Bytes {
        &self.message
    }
}

impl From<Tag> for Object {
    fn from(tag: Tag) -> Self {
        Object::Tag(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const OBJECT_HEX: &str = "a38d6181ff27824c79fc7df825164a212eff6a3f";

    #[test]
    fn parse_and_reserialize() {
        let payload = format!(
            "object {OBJECT_HEX}\ntype commit\ntag v1.0\n\
             tagger T <t@x> 1700000000 +0200\n\nrelease\n"
        );
        let tag = Tag::parse(payload.as_bytes(), ParseMode::Strict).unwrap();
        assert_eq!(tag.name(), "v1.0");
        assert_eq!(tag.object().1, ObjectType::Commit);
        assert_eq!(tag.tagger().unwrap().email(), "t@x");
        assert_eq!(tag.message().as_ref(), b"release\n");
        assert_eq!(tag.serialize().as_ref(), payload.as_bytes());
    }

    #[test]
    fn tagger_is_optional() {
        let payload = format!("object {OBJECT_HEX}\ntype commit\ntag old-style\n\nmsg\n");
        let tag = Tag::parse(payload.as_bytes(), ParseMode::Strict).unwrap();
        assert!(tag.tagger().is_none());
        assert_eq!(tag.serialize().as_ref(), payload.as_bytes());
    }

    #[test]
    fn missing_type_is_rejected() {
        let payload = format!("object {OBJECT_HEX}\ntag v1\n\nmsg\n");
        assert!(Tag::parse(payload.as_bytes(), ParseMode::Strict).is_err());
    }

    #[test]
    fn headers_out_of_order_are_rejected() {
        let payload = format!("type commit\nobject {OBJECT_HEX}\ntag v1\n\nmsg\n");
        assert!(Tag::parse(payload.as_bytes(), ParseMode::Strict).is_err());
    }
}
