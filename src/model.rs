use bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

pub const DEMO_TENANT_ID: &str = "demo-tenant";
pub const DEMO_API_KEY: &str = "demo-api-key-replace-with-real";
pub const DEFAULT_API_URL: &str = "https://api.aptrinsic.com";

/// Per tenant extraction settings, stored in `tenant_configurations`.
///
/// Optional fields are left out of the stored document when unset. A `null`
/// value would still land in the sparse `idx_extraction_error` index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantConfiguration {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub tenant_id: String,
    pub company_name: String,
    pub api_key: String,
    pub api_url: String,

    /// Inactive tenants are never picked up by the scheduler.
    pub active: bool,

    pub extraction_interval_minutes: i32,
    pub extract_custom_events: bool,
    pub extract_standard_events: bool,
    pub max_retry_attempts: i32,
    pub timeout_seconds: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_extraction: Option<DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempted_extraction: Option<DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_extraction_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_scroll_id: Option<String>,

    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl TenantConfiguration {
    /// New tenant with the default extraction preferences. Active by default.
    pub fn new<S: Into<String>>(tenant_id: S, company_name: S, api_key: S, api_url: S) -> Self {
        let now = DateTime::now();
        Self {
            id: None,
            tenant_id: tenant_id.into(),
            company_name: company_name.into(),
            api_key: api_key.into(),
            api_url: api_url.into(),
            active: true,
            extraction_interval_minutes: 5,
            extract_custom_events: true,
            extract_standard_events: true,
            max_retry_attempts: 3,
            timeout_seconds: 30,
            last_successful_extraction: None,
            last_attempted_extraction: None,
            last_extraction_error: None,
            last_processed_scroll_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Placeholder tenant seeded by the provisioner. Kept inactive.
    pub fn demo() -> Self {
        Self {
            active: false,
            ..Self::new(DEMO_TENANT_ID, "Demo Company", DEMO_API_KEY, DEFAULT_API_URL)
        }
    }

    /// Sample set seeded into an empty collection with `--with-samples`.
    pub fn samples(api_key: &str, api_url: &str) -> Vec<Self> {
        let acme = Self::new("tenant-001", "Acme Corporation", api_key, api_url);

        let techstart = Self {
            active: false,
            extraction_interval_minutes: 10,
            extract_standard_events: false,
            ..Self::new("tenant-002", "TechStart Inc", api_key, api_url)
        };

        let global = Self {
            extraction_interval_minutes: 3,
            extract_custom_events: false,
            ..Self::new("tenant-003", "Global Enterprise Ltd", api_key, api_url)
        };

        vec![acme, techstart, global]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Extracted,
    Processing,
    Processed,
    Failed,
}

impl Default for ProcessingStatus {
    fn default() -> Self {
        Self::Extracted
    }
}

/// Single event pulled from a tenant's source system, stored in `extracted_events`.
/// The (tenant_id, event_id) pair is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedEvent {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub tenant_id: String,
    pub event_id: String,
    /// CUSTOM or STANDARD.
    pub event_type: String,
    pub event_name: String,
    /// Raw JSON payload as received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_timestamp: Option<DateTime>,

    pub extracted_at: DateTime,
    #[serde(default)]
    pub status: ProcessingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_error: Option<String>,
    #[serde(default)]
    pub retry_count: i32,
}

impl ExtractedEvent {
    pub fn new<S: Into<String>>(tenant_id: S, event_id: S, event_type: S, event_name: S) -> Self {
        Self {
            id: None,
            tenant_id: tenant_id.into(),
            event_id: event_id.into(),
            event_type: event_type.into(),
            event_name: event_name.into(),
            event_data: None,
            event_timestamp: None,
            extracted_at: DateTime::now(),
            status: ProcessingStatus::default(),
            processing_error: None,
            retry_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ExtractedEvent, ProcessingStatus, TenantConfiguration};
    use bson::Bson;

    #[test]
    fn test_demo_tenant_document() -> anyhow::Result<()> {
        let doc = bson::to_document(&TenantConfiguration::demo())?;

        assert_eq!(doc.get_str("tenantId")?, "demo-tenant");
        assert_eq!(doc.get_str("apiKey")?, "demo-api-key-replace-with-real");
        assert_eq!(doc.get_str("apiUrl")?, "https://api.aptrinsic.com");
        assert!(!doc.get_bool("active")?);
        assert_eq!(doc.get_i32("extractionIntervalMinutes")?, 5);
        assert_eq!(doc.get_i32("maxRetryAttempts")?, 3);
        assert_eq!(doc.get_i32("timeoutSeconds")?, 30);
        assert!(doc.get_datetime("createdAt").is_ok());
        assert!(doc.get_datetime("updatedAt").is_ok());

        // unset optionals must not be written at all
        assert!(!doc.contains_key("_id"));
        assert!(!doc.contains_key("lastExtractionError"));
        assert!(!doc.contains_key("lastAttemptedExtraction"));
        Ok(())
    }

    #[test]
    fn test_samples() {
        let samples = TenantConfiguration::samples("key", "https://example.com");
        let ids: Vec<&str> = samples.iter().map(|t| t.tenant_id.as_str()).collect();
        assert_eq!(ids, vec!["tenant-001", "tenant-002", "tenant-003"]);

        assert!(samples[0].active);
        assert!(!samples[1].active);
        assert_eq!(samples[1].extraction_interval_minutes, 10);
        assert!(!samples[1].extract_standard_events);
        assert_eq!(samples[2].extraction_interval_minutes, 3);
        assert!(!samples[2].extract_custom_events);
        assert!(samples.iter().all(|t| t.api_key == "key"));
    }

    #[test]
    fn test_extracted_event_document() -> anyhow::Result<()> {
        let mut event = ExtractedEvent::new("tenant-001", "evt-1", "CUSTOM", "signup");
        event.status = ProcessingStatus::Failed;
        event.retry_count = 2;

        let doc = bson::to_document(&event)?;
        assert_eq!(doc.get("status"), Some(&Bson::String("FAILED".into())));
        assert_eq!(doc.get_i32("retryCount")?, 2);
        assert_eq!(doc.get_str("eventId")?, "evt-1");
        assert!(!doc.contains_key("processingError"));

        let back: ExtractedEvent = bson::from_document(doc)?;
        assert_eq!(back, event);
        Ok(())
    }

    #[test]
    fn test_new_event_defaults() {
        let event = ExtractedEvent::new("t", "e", "STANDARD", "page_view");
        assert_eq!(event.status, ProcessingStatus::Extracted);
        assert_eq!(event.retry_count, 0);
    }
}
