//! Attached context serialization

use crate::error::SessionResult;
use crate::store::ContextEntry;
use crate::workflow::AttachedContext;

/// Turns prompt attachments into the payload sent with a chat request.
///
/// Runs synchronously on the submitting thread, before any hand-off, since
/// resolving attachments may need host state only valid there.
pub trait ContextSerializer: Send + Sync {
    fn serialize(&self, entries: &[ContextEntry]) -> SessionResult<AttachedContext>;
}

/// Serializes attachments as a JSON array
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonContextSerializer;

impl ContextSerializer for JsonContextSerializer {
    fn serialize(&self, entries: &[ContextEntry]) -> SessionResult<AttachedContext> {
        if entries.is_empty() {
            return Ok(AttachedContext::default());
        }
        Ok(AttachedContext {
            entries: entries.to_vec(),
            payload: serde_json::to_string(entries)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_attachments() {
        let context = JsonContextSerializer.serialize(&[]).unwrap();
        assert!(context.entries.is_empty());
        assert!(context.payload.is_empty());
    }

    #[test]
    fn test_payload_is_json_array() {
        let entries = vec![ContextEntry::new("selection", "Player", json!({"path": "/Root/Player"}))];
        let context = JsonContextSerializer.serialize(&entries).unwrap();

        let parsed: serde_json::Value = serde_json::from_str(&context.payload).unwrap();
        assert_eq!(parsed[0]["name"], "Player");
        assert_eq!(context.entries, entries);
    }
}
