//! Command line configuration.
//!
//! Every global option falls back to an environment variable.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RECORDHUB_LOG_LEVEL` | info | Log level |
//! | `RECORDHUB_REGISTRY` | providers.json | Provider registry file (JSON array) |
//! | `RECORDHUB_MAX_PROVIDER_WAIT_MS` | 30000 | Per-provider wait bound; `<= 0` disables it |
//! | `RECORDHUB_AUDIT_CATEGORY` | federation | Category stamped on audit events |

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use recordhub_federation::core::Operation;
use recordhub_federation::{
    ConsumerContext, FederationConfig, ProtocolVersion, RecordFilters, RecordRequest,
};

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// RecordHub command line.
#[derive(Debug, Clone, Parser)]
#[command(name = "recordhub")]
#[command(about = "Fetch and reconcile a patient's record across FHIR providers")]
pub struct CliConfig {
    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "RECORDHUB_LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Provider registry file.
    #[arg(long, env = "RECORDHUB_REGISTRY", default_value = "providers.json", global = true)]
    pub registry: PathBuf,

    /// Per-provider wait bound in milliseconds. Zero or negative waits forever.
    #[arg(
        long,
        env = "RECORDHUB_MAX_PROVIDER_WAIT_MS",
        default_value = "30000",
        allow_hyphen_values = true,
        global = true
    )]
    pub max_provider_wait_ms: i64,

    /// Category stamped on audit events.
    #[arg(long, env = "RECORDHUB_AUDIT_CATEGORY", default_value = "federation", global = true)]
    pub audit_category: String,

    #[command(subcommand)]
    pub command: Command,
}

/// What to do.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Show which providers would be called, without calling them.
    Select(RequestArgs),
    /// Fetch and reconcile the record.
    Fetch(RequestArgs),
}

impl Command {
    /// Request arguments of either subcommand.
    pub fn request_args(&self) -> &RequestArgs {
        match self {
            Command::Select(args) | Command::Fetch(args) => args,
        }
    }
}

/// Arguments describing one record request.
#[derive(Debug, Clone, Args)]
pub struct RequestArgs {
    /// Patient identifier.
    pub patient: String,

    /// Protocol version (stu3, r4).
    #[arg(long, default_value = "r4")]
    pub protocol_version: ProtocolVersion,

    /// Operation (everything, structured).
    #[arg(long, default_value = "everything")]
    pub operation: Operation,

    /// Clinical period start (YYYY-MM-DD).
    #[arg(long)]
    pub start: Option<NaiveDate>,

    /// Clinical period end (YYYY-MM-DD).
    #[arg(long)]
    pub end: Option<NaiveDate>,

    /// Only content changed after this RFC 3339 instant.
    #[arg(long)]
    pub since: Option<DateTime<Utc>>,

    /// Resource types to include (comma-separated).
    #[arg(long = "type", value_delimiter = ',')]
    pub resource_types: Vec<String>,

    /// Correlation id to trace the request with.
    #[arg(long)]
    pub correlation_id: Option<String>,

    /// Consumer the request runs on behalf of.
    #[arg(long, default_value = "operator")]
    pub consumer: String,

    /// Consumer organisation code.
    #[arg(long)]
    pub organisation: Option<String>,
}

impl RequestArgs {
    /// Builds the record request.
    pub fn to_request(&self) -> RecordRequest {
        let request = RecordRequest::new(&self.patient, self.protocol_version, self.operation)
            .with_filters(RecordFilters {
                period_start: self.start,
                period_end: self.end,
                since: self.since,
                resource_types: self.resource_types.clone(),
            });
        match &self.correlation_id {
            Some(id) => request.with_correlation_id(id),
            None => request,
        }
    }

    /// Builds the consumer context.
    pub fn consumer(&self) -> ConsumerContext {
        let consumer = ConsumerContext::new(&self.consumer);
        match &self.organisation {
            Some(org) => consumer.with_organisation(org),
            None => consumer,
        }
    }
}

impl CliConfig {
    /// Engine configuration derived from the command line.
    pub fn federation_config(&self) -> FederationConfig {
        FederationConfig {
            max_provider_wait_time_ms: self.max_provider_wait_ms,
            audit_category: self.audit_category.clone(),
            ..FederationConfig::default()
        }
    }

    /// Validates the configuration and returns errors if any.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            errors.push(format!(
                "Log level must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                self.log_level
            ));
        }

        if self.registry.as_os_str().is_empty() {
            errors.push("Registry path cannot be empty".to_string());
        }

        if let Err(mut federation) = self.federation_config().validate() {
            errors.append(&mut federation);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliConfig {
        CliConfig::try_parse_from(std::iter::once("recordhub").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_fetch_with_filters() {
        let config = parse(&[
            "fetch",
            "9434765919",
            "--protocol-version",
            "stu3",
            "--operation",
            "structured",
            "--start",
            "2024-01-01",
            "--type",
            "AllergyIntolerance,MedicationStatement",
        ]);

        let request = config.command.request_args().to_request();
        assert!(matches!(config.command, Command::Fetch(_)));
        assert_eq!(request.protocol_version, ProtocolVersion::Stu3);
        assert_eq!(request.operation, Operation::GetStructuredRecord);
        assert_eq!(request.filters.period_start, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(
            request.filters.resource_types,
            vec!["AllergyIntolerance", "MedicationStatement"]
        );
        assert!(request.correlation_id.is_none());
    }

    #[test]
    fn test_negative_wait_disables_bound() {
        let config = parse(&["--max-provider-wait-ms", "-1", "select", "9434765919"]);
        assert_eq!(config.federation_config().max_provider_wait(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = parse(&["select", "9434765919"]);
        config.log_level = "verbose".to_string();
        config.audit_category = " ".to_string();

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("Log level")));
        assert!(errors.iter().any(|e| e.contains("Audit category")));
    }

    #[test]
    fn test_consumer_context() {
        let config = parse(&[
            "fetch",
            "9434765919",
            "--consumer",
            "gp-practice",
            "--organisation",
            "A81001",
        ]);
        assert_eq!(
            config.command.request_args().consumer().to_string(),
            "gp-practice@A81001"
        );
    }
}
