use crate::migrations::{
    index_plan, IndexSpec, COLLECTIONS, TENANT_CONFIGURATIONS, TENANT_ID_INDEX,
};
use crate::model::{TenantConfiguration, DEFAULT_API_URL, DEMO_API_KEY};
use crate::store::{IndexInfo, SchemaStore, StoreError};
use anyhow::Context;
use std::io::Write;
use tracing::{info, warn};

pub const NEXT_STEPS: [&str; 3] = [
    "1. Update your application configuration with the MongoDB connection string",
    "2. Replace the demo API key with your real Gainsight PX API key",
    "3. Start the event extraction application",
];

/// What to do after the schema is in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub seed_demo: bool,
    /// Seeds the sample tenant set when the tenant collection is empty.
    pub seed_samples: bool,
    pub sample_api_key: String,
    pub sample_api_url: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            seed_demo: true,
            seed_samples: false,
            sample_api_key: DEMO_API_KEY.to_string(),
            sample_api_url: DEFAULT_API_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedOutcome {
    Created,
    /// Collision on the tenant id, the record is already there.
    AlreadyExists,
    Failed(String),
}

impl SeedOutcome {
    fn from_insert(result: Result<(), StoreError>) -> Self {
        match result {
            Ok(()) => Self::Created,
            Err(err) if err.is_unique_violation_on(TENANT_ID_INDEX) => Self::AlreadyExists,
            Err(err) => Self::Failed(err.to_string()),
        }
    }
}

#[derive(Debug, Default)]
pub struct ProvisionReport {
    /// Collections that did not exist before this run.
    pub created_collections: Vec<String>,
    /// Indexes present per collection after provisioning.
    pub indexes: Vec<(String, Vec<IndexInfo>)>,
    /// Sample tenants by tenant id. Empty unless samples were requested and seeded.
    pub samples: Vec<(String, SeedOutcome)>,
    pub demo: Option<SeedOutcome>,
}

impl ProvisionReport {
    pub fn indexes_of(&self, collection: &str) -> Option<&[IndexInfo]> {
        self.indexes
            .iter()
            .find(|(name, _)| name == collection)
            .map(|(_, indexes)| indexes.as_slice())
    }
}

/// Brings a database to the known collection and index layout, then seeds
/// the demo tenant. Console output goes to `out`.
pub struct Provisioner<S, W> {
    store: S,
    out: W,
    options: Options,
}

impl<S, W> Provisioner<S, W>
where
    S: SchemaStore,
    W: Write,
{
    pub fn new(store: S, out: W, options: Options) -> Self {
        Self {
            store,
            out,
            options,
        }
    }

    pub fn into_inner(self) -> (S, W) {
        (self.store, self.out)
    }

    /// Runs every step in order. Schema failures abort the run, seed
    /// failures are reported and the run carries on.
    pub async fn run(&mut self) -> anyhow::Result<ProvisionReport> {
        let mut report = ProvisionReport {
            created_collections: self.ensure_collections().await?,
            ..Default::default()
        };

        for (collection, specs) in index_plan() {
            self.ensure_indexes(collection, specs).await?;
        }

        report.indexes = self.report_indexes().await?;

        if self.options.seed_samples {
            report.samples = self.seed_samples().await?;
        }
        if self.options.seed_demo {
            report.demo = Some(self.seed_demo_tenant().await?);
        }

        self.print_banner()?;
        Ok(report)
    }

    async fn ensure_collections(&mut self) -> anyhow::Result<Vec<String>> {
        let mut created = vec![];
        for name in COLLECTIONS {
            let new = self
                .store
                .ensure_collection(name)
                .await
                .with_context(|| format!("could not create collection {name}"))?;
            info!(collection = name, created = new, "collection ensured");
            if new {
                created.push(name.to_string());
            }
        }
        Ok(created)
    }

    async fn ensure_indexes(
        &mut self,
        collection: &str,
        specs: &[IndexSpec],
    ) -> anyhow::Result<()> {
        writeln!(self.out, "Creating indexes for {collection}...")?;

        for spec in specs {
            self.store
                .ensure_index(collection, spec)
                .await
                .with_context(|| format!("could not create index {} on {collection}", spec.name))?;
            info!(
                collection = collection,
                index = spec.name,
                unique = spec.unique,
                sparse = spec.sparse,
                "index ensured"
            );
        }
        Ok(())
    }

    /// Prints every index present in each collection, not only the declared ones.
    pub async fn report_indexes(&mut self) -> anyhow::Result<Vec<(String, Vec<IndexInfo>)>> {
        let mut all = vec![];
        for name in COLLECTIONS {
            let indexes = self
                .store
                .list_indexes(name)
                .await
                .with_context(|| format!("could not list indexes of {name}"))?;

            writeln!(self.out, "\nIndexes for {name}:")?;
            for index in &indexes {
                writeln!(self.out, "  - {}: {}", index.name, index.keys_json())?;
            }
            all.push((name.to_string(), indexes));
        }
        Ok(all)
    }

    async fn insert_tenant(&self, tenant: &TenantConfiguration) -> SeedOutcome {
        let result = match bson::to_document(tenant) {
            Ok(doc) => self.store.insert(TENANT_CONFIGURATIONS, doc).await,
            Err(err) => Err(err.into()),
        };
        SeedOutcome::from_insert(result)
    }

    async fn seed_demo_tenant(&mut self) -> anyhow::Result<SeedOutcome> {
        writeln!(self.out, "\nInserting sample tenant configuration...")?;

        let outcome = self.insert_tenant(&TenantConfiguration::demo()).await;
        match &outcome {
            SeedOutcome::Created => {
                writeln!(self.out, "Sample tenant configuration created successfully.")?
            }
            SeedOutcome::AlreadyExists => {
                writeln!(self.out, "Sample tenant already exists, skipping.")?
            }
            SeedOutcome::Failed(msg) => {
                warn!(err = msg.as_str(), "could not insert demo tenant");
                writeln!(self.out, "Error creating sample tenant: {msg}")?
            }
        }
        Ok(outcome)
    }

    /// Only touches an empty tenant collection.
    async fn seed_samples(&mut self) -> anyhow::Result<Vec<(String, SeedOutcome)>> {
        writeln!(self.out, "\nInserting sample tenants...")?;

        let existing = match self.store.count(TENANT_CONFIGURATIONS).await {
            Ok(n) => n,
            Err(err) => {
                warn!(err = err.to_string(), "could not count tenants");
                writeln!(self.out, "Error counting tenants: {err}")?;
                return Ok(vec![]);
            }
        };
        if existing > 0 {
            writeln!(
                self.out,
                "Found {existing} existing tenant(s), skipping sample tenants."
            )?;
            return Ok(vec![]);
        }

        let mut outcomes = vec![];
        for tenant in TenantConfiguration::samples(
            &self.options.sample_api_key,
            &self.options.sample_api_url,
        ) {
            let outcome = self.insert_tenant(&tenant).await;
            match &outcome {
                SeedOutcome::Created => writeln!(self.out, "  - {} created", tenant.tenant_id)?,
                SeedOutcome::AlreadyExists => {
                    writeln!(self.out, "  - {} already exists, skipping", tenant.tenant_id)?
                }
                SeedOutcome::Failed(msg) => {
                    warn!(
                        tenant_id = tenant.tenant_id.as_str(),
                        err = msg.as_str(),
                        "could not insert sample tenant"
                    );
                    writeln!(self.out, "  - {} failed: {msg}", tenant.tenant_id)?
                }
            }
            outcomes.push((tenant.tenant_id, outcome));
        }
        Ok(outcomes)
    }

    fn print_banner(&mut self) -> anyhow::Result<()> {
        writeln!(self.out, "\nMongoDB setup completed successfully!")?;
        writeln!(self.out, "Next steps:")?;
        for step in NEXT_STEPS {
            writeln!(self.out, "{step}")?;
        }
        Ok(())
    }
}
