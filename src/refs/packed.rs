//! packed-refs parser
//!
//! ## Format
//!
//! Line-oriented: `<40-hex-id> SP <name>`. A line starting with `^`
//! carries the peeled target of the preceding annotated tag. Lines
//! starting with `#` are headers and ignored.

use crate::errors::RefError;
use crate::objects::ObjectId;

/// One entry of the packed-refs file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedRef {
    pub name: String,
    pub id: ObjectId,
    /// Target of the annotated tag this ref points at, when recorded.
    pub peeled: Option<ObjectId>,
}

pub fn parse(content: &str) -> Result<Vec<PackedRef>, RefError> {
    let mut refs: Vec<PackedRef> = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        let line_no = line_no + 1;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(peeled_hex) = line.strip_prefix('^') {
            let peeled = ObjectId::from_hex(peeled_hex.trim_end()).map_err(|e| {
                RefError::MalformedPacked {
                    line: line_no,
                    reason: e.to_string(),
                }
            })?;
            let last = refs.last_mut().ok_or(RefError::MalformedPacked {
                line: line_no,
                reason: "peeled line without a preceding ref".to_string(),
            })?;
            last.peeled = Some(peeled);
            continue;
        }

        let (hex, name) = line.split_once(' ').ok_or(RefError::MalformedPacked {
            line: line_no,
            reason: "missing space separator".to_string(),
        })?;
        let id = ObjectId::from_hex(hex).map_err(|e| RefError::MalformedPacked {
            line: line_no,
            reason: e.to_string(),
        })?;
        if name.is_empty() {
            return Err(RefError::MalformedPacked {
                line: line_no,
                reason: "empty ref name".to_string(),
            });
        }

        refs.push(PackedRef {
            name: name.to_string(),
            id,
            peeled: None,
        });
    }

    Ok(refs)
}
