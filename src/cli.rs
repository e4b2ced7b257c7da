use crate::db;
use crate::model::{DEFAULT_API_URL, DEMO_API_KEY};
use crate::provision;
use clap::{Parser, Subcommand};

/// Provisions the tenant and extracted event collections.
#[derive(Parser, Debug, Clone)]
#[clap(name = "provision", version)]
pub struct CLI {
    #[clap(long, env = "MONGODB_URI")]
    pub uri: Option<String>,

    #[clap(long, env = "MONGODB_HOST", default_value = "localhost")]
    pub host: String,

    #[clap(long, env = "MONGODB_PORT", default_value_t = 27017)]
    pub port: u16,

    #[clap(long, env = "MONGODB_USERNAME")]
    pub username: Option<String>,

    #[clap(long, env = "MONGODB_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[clap(long, env = "MONGODB_DATABASE", default_value = "gainsightdb")]
    pub database: String,

    #[clap(long, default_value = "extraction-schema")]
    pub app_name: String,

    #[clap(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Creates collections and indexes, then seeds the demo tenant. Default.
    Provision {
        /// Do not insert the demo tenant.
        #[clap(long)]
        skip_seed: bool,

        /// Also seed the sample tenant set into an empty collection.
        #[clap(long)]
        with_samples: bool,

        #[clap(long, env = "GAINSIGHT_PX_API_KEY", default_value = DEMO_API_KEY, hide_env_values = true)]
        sample_api_key: String,

        #[clap(long, env = "GAINSIGHT_PX_API_URL", default_value = DEFAULT_API_URL)]
        sample_api_url: String,

        /// Run against an empty in-memory database instead of connecting.
        #[clap(long)]
        dry_run: bool,
    },
    /// Lists the indexes currently present in both collections.
    Indexes,
}

impl Default for Command {
    fn default() -> Self {
        Self::Provision {
            skip_seed: false,
            with_samples: false,
            sample_api_key: DEMO_API_KEY.to_string(),
            sample_api_url: DEFAULT_API_URL.to_string(),
            dry_run: false,
        }
    }
}

impl CLI {
    pub fn db_config(&self) -> db::Config<'_> {
        db::Config {
            app_name: Some(&self.app_name),
            uri: self.uri.as_deref(),
            username: self.username.as_deref(),
            password: self.password.as_deref(),
            database: &self.database,
            host: &self.host,
            port: self.port,
        }
    }
}

/// Seeding flags of the provision command. `Indexes` never seeds.
impl From<&Command> for provision::Options {
    fn from(val: &Command) -> Self {
        match val {
            Command::Provision {
                skip_seed,
                with_samples,
                sample_api_key,
                sample_api_url,
                ..
            } => provision::Options {
                seed_demo: !skip_seed,
                seed_samples: *with_samples,
                sample_api_key: sample_api_key.clone(),
                sample_api_url: sample_api_url.clone(),
            },
            Command::Indexes => provision::Options {
                seed_demo: false,
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Command, CLI};
    use crate::provision::Options;
    use clap::Parser;

    #[test]
    fn test_defaults() {
        let cli = CLI::try_parse_from(["provision"]).unwrap();
        assert_eq!(cli.command, None);
        assert_eq!(cli.db_config().database, "gainsightdb");

        let options = Options::from(&cli.command.unwrap_or_default());
        assert_eq!(options, Options::default());
    }

    #[test]
    fn test_provision_flags() {
        let cli = CLI::try_parse_from([
            "provision",
            "--database",
            "events",
            "provision",
            "--skip-seed",
            "--with-samples",
            "--sample-api-key",
            "k",
        ])
        .unwrap();
        assert_eq!(cli.database, "events");

        let command = cli.command.unwrap();
        let options = Options::from(&command);
        assert!(!options.seed_demo);
        assert!(options.seed_samples);
        assert_eq!(options.sample_api_key, "k");
    }

    #[test]
    fn test_indexes_command() {
        let cli = CLI::try_parse_from(["provision", "indexes"]).unwrap();
        assert_eq!(cli.command, Some(Command::Indexes));
    }

    #[test]
    fn test_cli_asserts() {
        use clap::CommandFactory;
        CLI::command().debug_assert();
    }
}
