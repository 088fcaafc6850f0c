use serde_json::Value;

/// A chat message as returned by `all-messages-in-chat`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub body: Option<String>,
    pub from_me: bool,
    pub timestamp: Option<i64>,
}

impl ChatMessage {
    /// Server payloads carry the id either as a string or as an object with `_serialized`.
    pub fn from_value(item: &Value) -> Self {
        let id = match item.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(obj @ Value::Object(_)) => obj
                .get("_serialized")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        };
        let body = item.get("body").and_then(|v| v.as_str()).map(str::to_string);
        let from_me = item.get("fromMe").and_then(|v| v.as_bool()).unwrap_or(false);
        let timestamp = item.get("timestamp").and_then(|v| v.as_i64());
        Self { id, body, from_me, timestamp }
    }

    pub fn has_body(&self) -> bool {
        self.body.as_deref().is_some_and(|b| !b.is_empty())
    }

    pub fn sender_prefix(&self) -> &'static str {
        if self.from_me { "Me: " } else { "Contact: " }
    }

    pub fn time_label(&self) -> Option<String> {
        use chrono::TimeZone;
        let ts = self.timestamp?;
        chrono::Local
            .timestamp_opt(ts, 0)
            .single()
            .map(|t| t.format("%d/%m/%Y %H:%M").to_string())
    }
}

pub const HISTORY_LIMIT: usize = 20;

/// The last `limit` messages, newest first, keeping only those with text.
pub fn recent_with_body(messages: &[ChatMessage], limit: usize) -> Vec<&ChatMessage> {
    let start = messages.len().saturating_sub(limit);
    messages[start..].iter().rev().filter(|m| m.has_body()).collect()
}

/// What `start-session` reported back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStart {
    QrCode,
    Connected,
    Initializing,
}

impl SessionStart {
    pub fn message(&self) -> &'static str {
        match self {
            SessionStart::QrCode => "QR code generated. Scan it on the server console.",
            SessionStart::Connected => "WhatsApp already connected!",
            SessionStart::Initializing => "Session is starting up...",
        }
    }
}

/// Authentication state of one named session on the automation server.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub name: String,
    pub token: Option<String>,
    pub connected: bool,
}

impl Session {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), token: None, connected: false }
    }
}

/// The server answers `check-connection-session` with several ad-hoc shapes;
/// any of them signalling an active link counts.
pub fn is_connected_payload(data: &Value) -> bool {
    let field = |key: &str| data.get(key).and_then(|v| v.as_str());
    data.get("connected").and_then(|v| v.as_bool()) == Some(true)
        || matches!(field("status"), Some("CONNECTED") | Some("inChat"))
        || matches!(field("state"), Some("CONNECTED") | Some("OPENING"))
        || mentions_connected(data)
}

// Only string values are inspected; keys like `"connected": false` must not match.
fn mentions_connected(data: &Value) -> bool {
    match data {
        Value::String(s) => {
            let lower = s.to_lowercase();
            lower.contains("connected") && !lower.contains("disconnected")
        }
        Value::Array(items) => items.iter().any(mentions_connected),
        Value::Object(map) => map.values().any(mentions_connected),
        _ => false,
    }
}

/// Digits only, with the default country code prefixed to short local numbers.
pub fn normalize_phone(phone: &str, country_code: &str) -> String {
    let digits = crate::utils::digits_only(phone);
    if digits.len() <= 11 && !digits.starts_with(country_code) {
        format!("{}{}", country_code, digits)
    } else {
        digits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn connection_payload_variants() {
        assert!(is_connected_payload(&json!({"connected": true})));
        assert!(is_connected_payload(&json!({"status": "inChat"})));
        assert!(is_connected_payload(&json!({"state": "OPENING"})));
        assert!(is_connected_payload(&json!({"status": true, "message": "Connected"})));
        assert!(!is_connected_payload(&json!({"status": false, "message": "Disconnected"})));
        assert!(!is_connected_payload(&json!({"state": "CLOSED"})));
        assert!(!is_connected_payload(&json!({"connected": false})));
    }

    #[test]
    fn phone_gets_country_code_when_short() {
        assert_eq!(normalize_phone("(11) 98765-4321", "55"), "5511987654321");
        assert_eq!(normalize_phone("+55 11 98765-4321", "55"), "5511987654321");
        assert_eq!(normalize_phone("551187654321", "55"), "551187654321");
        assert_eq!(normalize_phone("14155550123", "55"), "5514155550123");
    }

    #[test]
    fn recent_history_is_newest_first() {
        let msgs: Vec<ChatMessage> = (0..25)
            .map(|i| ChatMessage::from_value(&json!({"id": format!("m{i}"), "body": if i == 24 { "" } else { "x" }, "timestamp": i})))
            .collect();
        let recent = recent_with_body(&msgs, HISTORY_LIMIT);
        assert_eq!(recent.len(), 19);
        assert_eq!(recent[0].id, "m23");
        assert_eq!(recent.last().unwrap().id, "m5");
        assert_eq!(recent[0].sender_prefix(), "Contact: ");
        assert!(recent[0].time_label().is_some());
    }

    #[test]
    fn message_ids_accept_both_shapes() {
        let a = ChatMessage::from_value(&json!({"id": "abc", "body": "oi", "fromMe": true, "timestamp": 1700000000}));
        assert_eq!(a.id, "abc");
        assert!(a.from_me);
        let b = ChatMessage::from_value(&json!({"id": {"_serialized": "xyz"}, "body": ""}));
        assert_eq!(b.id, "xyz");
        assert!(!b.has_body());
    }
}
