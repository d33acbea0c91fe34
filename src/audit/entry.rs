//! Audit log records.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One routing outcome, as persisted in the audit log.
///
/// Serialized with camelCase keys, one JSON object per line:
/// `{"time":"…","method":"GET","url":"/8080/special","clientIp":"…","statusCode":200,"statusMessage":"…"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    #[serde(with = "iso_millis")]
    pub time: DateTime<Utc>,
    pub method: String,
    /// Inbound path and query, before any selector is stripped.
    pub url: String,
    pub client_ip: String,
    pub status_code: u16,
    pub status_message: String,
}

impl AuditEntry {
    /// Creates an entry stamped with the current time.
    pub fn now(
        method: impl Into<String>,
        url: impl Into<String>,
        client_ip: impl Into<String>,
        status_code: u16,
        status_message: impl Into<String>,
    ) -> Self {
        Self {
            time: Utc::now(),
            method: method.into(),
            url: url.into(),
            client_ip: client_ip.into(),
            status_code,
            status_message: status_message.into(),
        }
    }

    /// Encodes the entry as a single line, newline included.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// ISO-8601 UTC timestamps with millisecond precision, e.g. `2024-05-01T12:00:00.123Z`.
mod iso_millis {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_time(time))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Formats a timestamp the way entries are persisted.
pub fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_entry() -> AuditEntry {
        AuditEntry {
            time: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            method: "GET".to_string(),
            url: "/8080/special".to_string(),
            client_ip: "127.0.0.1".to_string(),
            status_code: 200,
            status_message: "Proxying to http://127.0.0.1:8080".to_string(),
        }
    }

    #[test]
    fn test_entry_json_shape() {
        let value = serde_json::to_value(fixed_entry()).unwrap();
        assert_eq!(value["time"], "2024-05-01T12:00:00.000Z");
        assert_eq!(value["method"], "GET");
        assert_eq!(value["url"], "/8080/special");
        assert_eq!(value["clientIp"], "127.0.0.1");
        assert_eq!(value["statusCode"], 200);
        assert_eq!(value["statusMessage"], "Proxying to http://127.0.0.1:8080");
    }

    #[test]
    fn test_to_line_is_single_line() {
        let line = fixed_entry().to_line().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn test_parses_javascript_style_timestamp() {
        let line = r#"{"time":"2024-05-01T12:00:00.123Z","method":"POST","url":"/x","clientIp":"::1","statusCode":404,"statusMessage":"nope"}"#;
        let entry: AuditEntry = serde_json::from_str(line).unwrap();
        assert_eq!(format_time(&entry.time), "2024-05-01T12:00:00.123Z");
        assert_eq!(entry.client_ip, "::1");
        assert_eq!(entry.status_code, 404);
    }

    #[test]
    fn test_rejects_bad_timestamp() {
        let line = r#"{"time":"yesterday","method":"GET","url":"/","clientIp":"::1","statusCode":200,"statusMessage":""}"#;
        assert!(serde_json::from_str::<AuditEntry>(line).is_err());
    }
}
