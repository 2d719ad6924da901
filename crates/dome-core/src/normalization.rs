use serde_json::Value;
use uuid::Uuid;

use crate::{
    error::DomeError,
    types::{ClientId, ConversationEntry, EntryKind, SendReceipt},
};

/// Convert a `sendMessage` response body into a stable receipt.
///
/// The server answers with the stored entry, a bare confirmation token, or
/// nothing at all. An empty answer still means the message was stored.
pub fn normalize_send_response(body: Value) -> Result<SendReceipt, DomeError> {
    match body {
        Value::Null => Ok(SendReceipt::Accepted),
        Value::String(token) if token.trim().is_empty() => Ok(SendReceipt::Accepted),
        Value::String(token) => Ok(SendReceipt::Confirmed { token }),
        Value::Object(_) => serde_json::from_value::<ConversationEntry>(body)
            .map(SendReceipt::Entry)
            .map_err(|err| DomeError::protocol("send_response_decode_error", err.to_string())),
        other => Err(DomeError::protocol(
            "unexpected_send_response",
            format!("expected entry or confirmation token, got {}", value_kind(&other)),
        )),
    }
}

/// Convert a `SupportResponse` push payload into a conversation entry.
///
/// Legacy servers push the reply text as a plain string. Such a payload
/// becomes a synthetic operator entry with a fresh id and no timestamp.
pub fn normalize_support_payload(
    payload: Value,
    client_id: &ClientId,
) -> Result<ConversationEntry, DomeError> {
    match payload {
        Value::Object(_) => serde_json::from_value(payload)
            .map_err(|err| DomeError::protocol("support_payload_decode_error", err.to_string())),
        Value::String(raw) => {
            if let Ok(entry) = serde_json::from_str::<ConversationEntry>(&raw) {
                return Ok(entry);
            }
            Ok(legacy_entry(raw, client_id))
        }
        other => Err(DomeError::protocol(
            "unexpected_support_payload",
            format!("expected entry or message text, got {}", value_kind(&other)),
        )),
    }
}

/// Convert a `registerClient` response body into a client id.
pub fn normalize_client_id(body: Value) -> Result<ClientId, DomeError> {
    let raw = match body {
        Value::String(raw) => raw,
        Value::Object(mut map) => {
            let field = map
                .remove("DomeClientId")
                .or_else(|| map.remove("domeClientId"));
            match field {
                Some(Value::String(raw)) => raw,
                _ => {
                    return Err(DomeError::protocol(
                        "client_id_missing",
                        "registration response has no client id",
                    ));
                }
            }
        }
        other => {
            return Err(DomeError::protocol(
                "unexpected_register_response",
                format!("expected client id, got {}", value_kind(&other)),
            ));
        }
    };

    ClientId::new(raw).ok_or_else(|| {
        DomeError::protocol("client_id_missing", "server returned a blank client id")
    })
}

fn legacy_entry(text: String, client_id: &ClientId) -> ConversationEntry {
    ConversationEntry {
        id: format!("legacy-{}", Uuid::new_v4()),
        client_id: client_id.as_str().to_owned(),
        timestamp: None,
        kind: EntryKind::FromOperator,
        text,
        operator_id: None,
        ticket_id: None,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::DomeErrorCategory;

    fn client_id() -> ClientId {
        ClientId::new("dc-123").expect("valid id")
    }

    #[test]
    fn maps_entry_response_to_receipt() {
        let receipt = normalize_send_response(json!({
            "Id": "m9",
            "ClientId": "dc-123",
            "Timestamp": "2024-11-07T10:00:00Z",
            "Type": "FromUser",
            "Text": "hello",
        }))
        .expect("entry response should normalize");

        let entry = receipt.entry().expect("receipt carries entry");
        assert_eq!(entry.id, "m9");
        assert_eq!(entry.kind, EntryKind::FromUser);
        assert!(entry.timestamp.is_some());
    }

    #[test]
    fn maps_token_response_to_confirmation() {
        let receipt = normalize_send_response(json!("ack-42")).expect("token should normalize");
        assert_eq!(
            receipt,
            SendReceipt::Confirmed {
                token: "ack-42".into()
            }
        );
    }

    #[test]
    fn empty_send_response_is_an_acceptance() {
        assert_eq!(
            normalize_send_response(Value::Null).expect("null body is accepted"),
            SendReceipt::Accepted
        );
        assert_eq!(
            normalize_send_response(json!("  ")).expect("blank token is accepted"),
            SendReceipt::Accepted
        );
    }

    #[test]
    fn rejects_unexpected_send_response() {
        let err = normalize_send_response(json!(17)).expect_err("number is not a receipt");
        assert_eq!(err.category, DomeErrorCategory::Protocol);
        assert_eq!(err.code, "unexpected_send_response");

        let err = normalize_send_response(json!([])).expect_err("array is not a receipt");
        assert_eq!(err.code, "unexpected_send_response");

        let err = normalize_send_response(json!({"Id": 1})).expect_err("broken entry");
        assert_eq!(err.code, "send_response_decode_error");
    }

    #[test]
    fn legacy_text_payload_becomes_untimed_operator_entry() {
        let entry = normalize_support_payload(json!("We are looking into it"), &client_id())
            .expect("legacy payload should normalize");
        assert!(entry.id.starts_with("legacy-"));
        assert_eq!(entry.client_id, "dc-123");
        assert_eq!(entry.kind, EntryKind::FromOperator);
        assert_eq!(entry.timestamp, None);
        assert_eq!(entry.text, "We are looking into it");
    }

    #[test]
    fn string_encoded_entry_payload_is_decoded() {
        let raw = r#"{"Id":"m3","ClientId":"dc-123","Type":"FromOperator","Text":"hi"}"#;
        let entry = normalize_support_payload(json!(raw), &client_id()).expect("decodes");
        assert_eq!(entry.id, "m3");
    }

    #[test]
    fn accepts_plain_and_wrapped_client_ids() {
        assert_eq!(
            normalize_client_id(json!("dc-123")).expect("plain id").as_str(),
            "dc-123"
        );
        assert_eq!(
            normalize_client_id(json!({"DomeClientId": "dc-9"}))
                .expect("wrapped id")
                .as_str(),
            "dc-9"
        );
        let err = normalize_client_id(json!("")).expect_err("blank id");
        assert_eq!(err.code, "client_id_missing");
    }
}
