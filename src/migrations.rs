use bson::{Bson, Document};
use mongodb::{options::IndexOptions, IndexModel};

pub const TENANT_CONFIGURATIONS: &str = "tenant_configurations";
pub const EXTRACTED_EVENTS: &str = "extracted_events";

pub const COLLECTIONS: [&str; 2] = [TENANT_CONFIGURATIONS, EXTRACTED_EVENTS];

/// Unique index on a tenant's natural key.
pub const TENANT_ID_INDEX: &str = "idx_tenant_id_unique";

/// Declaration of a single named index. The name is what makes re-runs a
/// no-op on the server, so it must never change for an existing spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: &'static str,
    /// Ordered (field, direction) pairs.
    pub keys: &'static [(&'static str, i32)],
    pub unique: bool,
    pub sparse: bool,
}

impl IndexSpec {
    const fn ascending(name: &'static str, keys: &'static [(&'static str, i32)]) -> Self {
        Self {
            name,
            keys,
            unique: false,
            sparse: false,
        }
    }

    const fn unique(self) -> Self {
        Self {
            unique: true,
            ..self
        }
    }

    const fn sparse(self) -> Self {
        Self {
            sparse: true,
            ..self
        }
    }

    pub fn key_document(&self) -> Document {
        let mut keys = Document::new();
        for (field, direction) in self.keys {
            keys.insert(*field, Bson::Int32(*direction));
        }
        keys
    }

    pub fn fields(&self) -> impl Iterator<Item = &'static str> {
        let keys: &'static [(&'static str, i32)] = self.keys;
        keys.iter().map(|(field, _)| *field)
    }

    /// Only options that are actually set are sent, so an index created
    /// elsewhere without `unique: false` is still recognised as identical.
    pub fn to_index_model(&self) -> IndexModel {
        let mut options = IndexOptions::default();
        options.name = Some(self.name.to_string());
        if self.unique {
            options.unique = Some(true);
        }
        if self.sparse {
            options.sparse = Some(true);
        }

        IndexModel::builder()
            .keys(self.key_document())
            .options(options)
            .build()
    }
}

pub const TENANT_INDEXES: [IndexSpec; 4] = [
    IndexSpec::ascending(TENANT_ID_INDEX, &[("tenantId", 1)]).unique(),
    IndexSpec::ascending("idx_active", &[("active", 1)]),
    // scheduler: active tenants ordered by staleness
    IndexSpec::ascending(
        "idx_active_last_attempted",
        &[("active", 1), ("lastAttemptedExtraction", 1)],
    ),
    IndexSpec::ascending("idx_extraction_error", &[("lastExtractionError", 1)]).sparse(),
];

pub const EVENT_INDEXES: [IndexSpec; 7] = [
    IndexSpec::ascending("idx_tenant_id", &[("tenantId", 1)]),
    IndexSpec::ascending("idx_event_id", &[("eventId", 1)]),
    IndexSpec::ascending("idx_extracted_at", &[("extractedAt", 1)]),
    IndexSpec::ascending("idx_status", &[("status", 1)]),
    IndexSpec::ascending("idx_tenant_extracted_at", &[("tenantId", 1), ("extractedAt", 1)]),
    // duplicate extraction guard
    IndexSpec::ascending("idx_tenant_event_unique", &[("tenantId", 1), ("eventId", 1)]).unique(),
    IndexSpec::ascending("idx_status_retry", &[("status", 1), ("retryCount", 1)]),
];

/// Index declarations per collection, in creation order.
pub fn index_plan() -> [(&'static str, &'static [IndexSpec]); 2] {
    [
        (TENANT_CONFIGURATIONS, &TENANT_INDEXES),
        (EXTRACTED_EVENTS, &EVENT_INDEXES),
    ]
}
