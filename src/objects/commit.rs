//! Commit object
//!
//! ## Format
//!
//! A header block of `key SP value LF` lines, a blank line, then the
//! message:
//!
//! ```text
//! tree <tree-sha>
//! parent <parent-sha>          (zero or more, order significant)
//! author <name> <email> <secs> <±HHMM>
//! committer <name> <email> <secs> <±HHMM>
//! encoding <charset>           (optional)
//! gpgsig <first line>
//!  <continuation lines prefixed with SP>
//!
//! <message>
//! ```
//!
//! Headers past `committer` (`encoding`, `mergetag`, `gpgsig`, …) are
//! preserved verbatim and in order, so re-serializing a parsed commit is
//! byte-identical.

use crate::errors::ObjectFormatError;
use crate::objects::{Object, ObjectId, ObjectType, ParseMode};
use bytes::Bytes;
use chrono::{DateTime, FixedOffset, TimeZone};

/// Author or committer identity with timestamp and timezone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    name: String,
    email: String,
    /// Seconds since the Unix epoch.
    timestamp: i64,
    /// Timezone offset east of UTC, in seconds.
    tz_offset: i32,
    /// A `-0000` zone is distinct from `+0000` on the wire; the flag
    /// keeps the byte round-trip exact.
    negative_utc: bool,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>, when: DateTime<FixedOffset>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            timestamp: when.timestamp(),
            tz_offset: when.offset().local_minus_utc(),
            negative_utc: false,
        }
    }

    /// Parse the wire form `Name <email> unix-seconds ±HHMM`.
    pub fn parse(raw: &[u8]) -> Result<Self, ObjectFormatError> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| ObjectFormatError::malformed("commit", 0, "identity is not UTF-8"))?;

        let (rest, zone) = text
            .rsplit_once(' ')
            .ok_or_else(|| ObjectFormatError::malformed("commit", 0, "identity missing timezone"))?;
        let (identity, seconds) = rest
            .rsplit_once(' ')
            .ok_or_else(|| ObjectFormatError::malformed("commit", 0, "identity missing timestamp"))?;

        let timestamp: i64 = seconds
            .parse()
            .map_err(|_| ObjectFormatError::malformed("commit", 0, "malformed timestamp"))?;
        let (tz_offset, negative_utc) = parse_timezone(zone)?;

        let open = identity
            .find('<')
            .ok_or_else(|| ObjectFormatError::malformed("commit", 0, "identity missing '<'"))?;
        let close = identity
            .find('>')
            .ok_or_else(|| ObjectFormatError::malformed("commit", 0, "identity missing '>'"))?;
        if close < open {
            return Err(ObjectFormatError::malformed("commit", 0, "identity brackets reversed"));
        }

        Ok(Self {
            name: identity[..open].trim_end().to_string(),
            email: identity[open + 1..close].to_string(),
            timestamp,
            tz_offset,
            negative_utc,
        })
    }

    /// Wire form: `Name <email> unix-seconds ±HHMM`.
    pub fn to_wire(&self) -> String {
        format!(
            "{} <{}> {} {}",
            self.name,
            self.email,
            self.timestamp,
            format_timezone(self.tz_offset, self.negative_utc)
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn tz_offset_seconds(&self) -> i32 {
        self.tz_offset
    }

    /// Timestamp in the author's own timezone.
    pub fn when(&self) -> DateTime<FixedOffset> {
        let offset = FixedOffset::east_opt(self.tz_offset)
            .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
        offset
            .timestamp_opt(self.timestamp, 0)
            .single()
            .unwrap_or_else(|| offset.timestamp_opt(0, 0).unwrap())
    }
}

fn parse_timezone(zone: &str) -> Result<(i32, bool), ObjectFormatError> {
    let bytes = zone.as_bytes();
    if bytes.len() != 5 || (bytes[0] != b'+' && bytes[0] != b'-') {
        return Err(ObjectFormatError::malformed("commit", 0, "malformed timezone"));
    }
    let digits = &zone[1..];
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ObjectFormatError::malformed("commit", 0, "malformed timezone"));
    }

    let hours: i32 = digits[..2].parse().unwrap_or(0);
    let minutes: i32 = digits[2..].parse().unwrap_or(0);
    if minutes >= 60 || hours >= 24 {
        return Err(ObjectFormatError::malformed("commit", 0, "timezone out of range"));
    }

    let magnitude = hours * 3600 + minutes * 60;
    let negative = bytes[0] == b'-';
    let offset = if negative { -magnitude } else { magnitude };
    Ok((offset, negative && magnitude == 0))
}

fn format_timezone(offset: i32, negative_utc: bool) -> String {
    let sign = if offset < 0 || negative_utc { '-' } else { '+' };
    let magnitude = offset.abs();
    format!("{}{:02}{:02}", sign, magnitude / 3600, magnitude % 3600 / 60)
}

/// A snapshot of the repository with its ancestry metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    tree: ObjectId,
    parents: Vec<ObjectId>,
    author: Signature,
    committer: Signature,
    /// Headers following `committer`, preserved in wire order
    /// (`encoding`, `mergetag`, `gpgsig`, …). Values keep embedded
    /// newlines; serialization re-applies LF+SP continuation.
    extra_headers: Vec<(String, String)>,
    message: Bytes,
}

impl Commit {
    pub fn new(
        tree: ObjectId,
        parents: Vec<ObjectId>,
        author: Signature,
        committer: Signature,
        message: impl Into<Bytes>,
    ) -> Self {
        Self {
            tree,
            parents,
            author,
            committer,
            extra_headers: Vec::new(),
            message: message.into(),
        }
    }

    pub fn parse(payload: &[u8], mode: ParseMode) -> Result<Self, ObjectFormatError> {
        let mut headers = HeaderBlock::parse(payload, "commit")?;

        let tree_hex = headers.take_required("tree")?;
        let tree = ObjectId::from_hex(&tree_hex)?;

        let mut parents = Vec::new();
        while let Some(parent_hex) = headers.take("parent") {
            parents.push(ObjectId::from_hex(&parent_hex)?);
        }

        let author = Signature::parse(headers.take_required("author")?.as_bytes())?;
        let committer = Signature::parse(headers.take_required("committer")?.as_bytes())?;

        let extra_headers = headers.finish(mode)?;

        Ok(Self {
            tree,
            parents,
            author,
            committer,
            extra_headers,
            message: Bytes::copy_from_slice(headers.body()),
        })
    }

    pub fn serialize(&self) -> Bytes {
        let mut out = Vec::new();
        push_header(&mut out, "tree", &self.tree.to_hex());
        for parent in &self.parents {
            push_header(&mut out, "parent", &parent.to_hex());
        }
        push_header(&mut out, "author", &self.author.to_wire());
        push_header(&mut out, "committer", &self.committer.to_wire());
        for (key, value) in &self.extra_headers {
            push_header(&mut out, key, value);
        }
        out.push(b'\n');
        out.extend_from_slice(&self.message);
        Bytes::from(out)
    }

    pub fn id(&self) -> ObjectId {
        ObjectId::for_object(ObjectType::Commit, &self.serialize())
    }

    pub fn tree(&self) -> &ObjectId {
        &self.tree
    }

    pub fn parents(&self) -> &[ObjectId] {
        &self.parents
    }

    pub fn author(&self) -> &Signature {
        &self.author
    }

    pub fn committer(&self) -> &Signature {
        &self.committer
    }

    pub fn encoding(&self) -> Option<&str> {
        self.extra_headers
            .iter()
            .find(|(k, _)| k == "encoding")
            .map(|(_, v)| v.as_str())
    }

    pub fn extra_headers(&self) -> &[(String, String)] {
        &self.extra_headers
    }

    pub fn message(&self) -> &Bytes {
        &self.message
    }

    /// First line of the message, for one-line displays.
    pub fn summary(&self) -> String {
        String::from_utf8_lossy(&self.message)
            .lines()
            .next()
            .unwrap_or("")
            .to_string()
    }
}

impl From<Commit> for Object {
    fn from(commit: Commit) -> Self {
        Object::Commit(commit)
    }
}

pub(crate) fn push_header(out: &mut Vec<u8>, key: &str, value: &str) {
    out.extend_from_slice(key.as_bytes());
    out.push(b' ');
    // Continuation lines are prefixed with a single space.
    let mut first = true;
    for line in value.split('\n') {
        if !first {
            out.extend_from_slice(b"\n ");
        }
        out.extend_from_slice(line.as_bytes());
        first = false;
    }
    out.push(b'\n');
}

/// Sequential reader over a `key SP value LF` header block shared by
/// commits and tags.
pub(crate) struct HeaderBlock<'a> {
    headers: Vec<(String, String)>,
    cursor: usize,
    body: &'a [u8],
    kind: &'static str,
}

impl<'a> HeaderBlock<'a> {
    pub(crate) fn parse(payload: &'a [u8], kind: &'static str) -> Result<Self, ObjectFormatError> {
        let mut headers = Vec::new();
        let mut pos = 0;

        loop {
            if pos >= payload.len() {
                // No blank line: the message is empty.
                return Ok(Self { headers, cursor: 0, body: &[], kind });
            }
            if payload[pos] == b'\n' {
                return Ok(Self {
                    headers,
                    cursor: 0,
                    body: &payload[pos + 1..],
                    kind,
                });
            }

            let line_end = payload[pos..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|i| pos + i)
                .ok_or_else(|| {
                    ObjectFormatError::malformed(kind, pos, "unterminated header line")
                })?;
            let line = &payload[pos..line_end];

            if line.starts_with(b" ") {
                // Continuation of the previous header value.
                let (_, value) = headers.last_mut().ok_or_else(|| {
                    ObjectFormatError::malformed(kind, pos, "continuation without a header")
                })?;
                value.push('\n');
                value.push_str(&decode(line[1..].to_vec(), kind, pos)?);
            } else {
                let space = line.iter().position(|&b| b == b' ').ok_or_else(|| {
                    ObjectFormatError::malformed(kind, pos, "header line without a space")
                })?;
                let key = decode(line[..space].to_vec(), kind, pos)?;
                let value = decode(line[space + 1..].to_vec(), kind, pos)?;
                headers.push((key, value));
            }

            pos = line_end + 1;
        }
    }

    /// Take the next header if it matches `key`. Order-sensitive, as the
    /// wire format is.
    pub(crate) fn take(&mut self, key: &str) -> Option<String> {
        let (k, _) = self.headers.get(self.cursor)?;
        if k == key {
            let (_, v) = self.headers[self.cursor].clone();
            self.cursor += 1;
            Some(v)
        } else {
            None
        }
    }

    pub(crate) fn take_required(&mut self, key: &str) -> Result<String, ObjectFormatError> {
        self.take(key).ok_or_else(|| {
            ObjectFormatError::malformed(self.kind, 0, format!("missing {key} header"))
        })
    }

    /// Remaining headers, in order. Strict mode rejects a stray repeat of
    /// a structural header that should have appeared earlier.
    pub(crate) fn finish(
        &mut self,
        mode: ParseMode,
    ) -> Result<Vec<(String, String)>, ObjectFormatError> {
        let rest: Vec<(String, String)> = self.headers[self.cursor..].to_vec();
        if mode == ParseMode::Strict {
            for (key, _) in &rest {
                if matches!(key.as_str(), "tree" | "parent" | "author" | "committer" | "object" | "type" | "tag")
                {
                    return Err(ObjectFormatError::malformed(
                        self.kind,
                        0,
                        format!("{key} header out of order"),
                    ));
                }
            }
        }
        Ok(rest)
    }

    pub(crate) fn body(&self) -> &'a [u8] {
        self.body
    }
}

fn decode(bytes: Vec<u8>, kind: &'static str, pos: usize) -> Result<String, ObjectFormatError> {
    String::from_utf8(bytes)
        .map_err(|_| ObjectFormatError::malformed(kind, pos, "header is not UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TREE_HEX: &str = "0155eb4229851634a0f03eb265b69f5a2d56f341";

    fn sample_payload() -> Vec<u8> {
        format!(
            "tree {TREE_HEX}\n\
             author A <a@x> 1700000000 +0000\n\
             committer A <a@x> 1700000000 +0000\n\
             \n\
             msg\n"
        )
        .into_bytes()
    }

    #[test]
    fn parse_minimal_commit() {
        let commit = Commit::parse(&sample_payload(), ParseMode::Strict).unwrap();
        assert_eq!(commit.tree().to_hex(), TREE_HEX);
        assert!(commit.parents().is_empty());
        assert_eq!(commit.author().timestamp(), 1_700_000_000);
        assert_eq!(commit.author().tz_offset_seconds(), 0);
        assert_eq!(commit.message().as_ref(), b"msg\n");
    }

    #[test]
    fn roundtrips_bytewise() {
        let payload = sample_payload();
        let commit = Commit::parse(&payload, ParseMode::Strict).unwrap();
        assert_eq!(commit.serialize().as_ref(), payload.as_slice());
    }

    #[test]
    fn parses_multiple_parents_in_order() {
        let p1 = "aa".repeat(20);
        let p2 = "bb".repeat(20);
        let payload = format!(
            "tree {TREE_HEX}\nparent {p1}\nparent {p2}\n\
             author A <a@x> 1700000000 +0000\ncommitter A <a@x> 1700000000 +0000\n\nm\n"
        );
        let commit = Commit::parse(payload.as_bytes(), ParseMode::Strict).unwrap();
        assert_eq!(commit.parents().len(), 2);
        assert_eq!(commit.parents()[0].to_hex(), p1);
        assert_eq!(commit.parents()[1].to_hex(), p2);
        assert_eq!(commit.serialize().as_ref(), payload.as_bytes());
    }

    #[test]
    fn preserves_gpgsig_continuation() {
        let payload = format!(
            "tree {TREE_HEX}\n\
             author A <a@x> 1700000000 +0000\n\
             committer A <a@x> 1700000000 +0000\n\
             gpgsig -----BEGIN PGP SIGNATURE-----\n\
             \x20line two\n\
             \x20-----END PGP SIGNATURE-----\n\
             \n\
             signed\n"
        );
        let commit = Commit::parse(payload.as_bytes(), ParseMode::Strict).unwrap();
        let (key, value) = &commit.extra_headers()[0];
        assert_eq!(key, "gpgsig");
        assert_eq!(
            value,
            "-----BEGIN PGP SIGNATURE-----\nline two\n-----END PGP SIGNATURE-----"
        );
        assert_eq!(commit.serialize().as_ref(), payload.as_bytes());
    }

    #[test]
    fn missing_tree_is_rejected() {
        let payload = b"author A <a@x> 1 +0000\ncommitter A <a@x> 1 +0000\n\nm\n";
        assert!(Commit::parse(payload, ParseMode::Strict).is_err());
    }

    #[test]
    fn signature_parses_negative_zone() {
        let sig = Signature::parse(b"A U Thor <a@x> 1700000000 -0730").unwrap();
        assert_eq!(sig.name(), "A U Thor");
        assert_eq!(sig.email(), "a@x");
        assert_eq!(sig.tz_offset_seconds(), -(7 * 3600 + 30 * 60));
        assert_eq!(sig.to_wire(), "A U Thor <a@x> 1700000000 -0730");
    }

    #[test]
    fn signature_negative_utc_roundtrips() {
        let sig = Signature::parse(b"A <a@x> 1700000000 -0000").unwrap();
        assert_eq!(sig.tz_offset_seconds(), 0);
        assert_eq!(sig.to_wire(), "A <a@x> 1700000000 -0000");
    }

    #[test]
    fn signature_rejects_bad_zone() {
        assert!(Signature::parse(b"A <a@x> 1 +00").is_err());
        assert!(Signature::parse(b"A <a@x> 1 +0a00").is_err());
        assert!(Signature::parse(b"A <a@x> 1 +0099").is_err());
    }

    #[test]
    fn when_reflects_zone() {
        let sig = Signature::parse(b"A <a@x> 1700000000 +0100").unwrap();
        assert_eq!(sig.when().timestamp(), 1_700_000_000);
        assert_eq!(sig.when().offset().local_minus_utc(), 3600);
    }
}
