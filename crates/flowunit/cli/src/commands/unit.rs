//! Deploy and inspect function units

use crate::error::{CliError, CliResult};
use crate::output::{self, humanize_duration, print_error, print_info, print_success, OutputFormat};
use flowunit_deployment::{
    DeploymentError, FunctionUnitDisplay, FunctionUnitService, VersionHistoryEntry,
};
use flowunit_registry::RegistryError;
use flowunit_types::ChangeType;
use serde::Serialize;
use std::path::PathBuf;
use tabled::Tabled;

/// Arguments of `flowunitctl deploy`
#[derive(Debug, clap::Args)]
pub struct DeployArgs {
    /// Function unit name
    pub name: String,

    /// Workflow definition file (XML)
    pub file: PathBuf,

    /// Version bump relative to the highest existing version (major, minor, patch)
    #[arg(short, long, default_value = "minor", conflicts_with = "version")]
    pub change: String,

    /// Deploy under this exact version instead of bumping
    #[arg(short = 'V', long)]
    pub version: Option<String>,

    /// Metadata attached to the version, as a JSON object
    #[arg(short, long)]
    pub metadata: Option<String>,
}

#[derive(Debug, Serialize, Tabled)]
struct UnitRow {
    name: String,
    version: String,
    deployed: String,
    versions: usize,
    #[tabled(rename = "active id")]
    active_id: i64,
}

impl From<FunctionUnitDisplay> for UnitRow {
    fn from(unit: FunctionUnitDisplay) -> Self {
        Self {
            name: unit.name,
            version: unit.current_version.to_string(),
            deployed: humanize_duration(chrono::Utc::now() - unit.deployed_at),
            versions: unit.version_count,
            active_id: unit.active_version_id.value(),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct HistoryRow {
    id: i64,
    version: String,
    active: String,
    deployed: String,
    instances: u64,
    #[tabled(rename = "can rollback")]
    can_rollback: bool,
}

impl From<VersionHistoryEntry> for HistoryRow {
    fn from(entry: VersionHistoryEntry) -> Self {
        Self {
            id: entry.version_id.value(),
            version: entry.version.to_string(),
            active: if entry.is_active { "*".to_string() } else { String::new() },
            deployed: entry.deployed_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            instances: entry.process_instance_count,
            can_rollback: entry.can_rollback,
        }
    }
}

fn parse_metadata(raw: Option<&str>) -> CliResult<serde_json::Value> {
    match raw {
        None => Ok(serde_json::json!({})),
        Some(text) => {
            let value: serde_json::Value = serde_json::from_str(text)?;
            if !value.is_object() {
                return Err(CliError::InvalidArgument(
                    "metadata must be a JSON object".to_string(),
                ));
            }
            Ok(value)
        }
    }
}

pub async fn deploy(
    service: &FunctionUnitService,
    args: DeployArgs,
    format: OutputFormat,
) -> CliResult<()> {
    let definition = std::fs::read_to_string(&args.file).map_err(|source| CliError::Io {
        path: args.file.display().to_string(),
        source,
    })?;
    let metadata = parse_metadata(args.metadata.as_deref())?;

    let outcome = match &args.version {
        Some(version) => {
            service
                .deploy_explicit(&args.name, &definition, version, metadata)
                .await?
        }
        None => {
            let change: ChangeType = args
                .change
                .parse()
                .map_err(|e: flowunit_types::InvalidChangeType| CliError::InvalidArgument(e.to_string()))?;
            service.deploy(&args.name, &definition, change, metadata).await?
        }
    };

    match format {
        OutputFormat::Json => output::print_single(&outcome)?,
        OutputFormat::Table => {
            print_success(&format!(
                "Deployed {} {} as {}",
                outcome.name, outcome.version, outcome.definition_key
            ));
            if outcome.inherited_grants > 0 {
                print_info(&format!("Inherited {} grant(s)", outcome.inherited_grants));
            }
        }
    }
    Ok(())
}

pub async fn history(service: &FunctionUnitService, name: &str, format: OutputFormat) -> CliResult<()> {
    let history = service.history_for_display(name).await?;
    match format {
        OutputFormat::Json => output::print_single(&history),
        OutputFormat::Table => {
            let rows: Vec<HistoryRow> = history.versions.into_iter().map(HistoryRow::from).collect();
            output::print_output(rows, format)
        }
    }
}

pub async fn active(service: &FunctionUnitService, name: &str, format: OutputFormat) -> CliResult<()> {
    let version = service.get_active_version(name).await?;
    match format {
        OutputFormat::Json => output::print_single(&version),
        OutputFormat::Table => {
            println!("{} {} (id {})", version.name, version.version, version.id.value());
            println!("  definition key: {}", version.definition_key());
            println!("  deployed at:    {}", version.deployed_at.to_rfc3339());
            Ok(())
        }
    }
}

pub async fn list(service: &FunctionUnitService, format: OutputFormat) -> CliResult<()> {
    let rows: Vec<UnitRow> = service
        .list_for_display()
        .await?
        .into_iter()
        .map(UnitRow::from)
        .collect();
    output::print_output(rows, format)
}

/// Consistency check; a violation is printed and returned as the error.
pub async fn check(service: &FunctionUnitService, name: &str) -> CliResult<()> {
    match service.check_consistency(name).await {
        Ok(active) => {
            print_success(&format!("{} has exactly one active version: {}", name, active.version));
            Ok(())
        }
        Err(err @ DeploymentError::Registry(
            RegistryError::NoActiveVersion(_) | RegistryError::MultipleActiveVersions { .. },
        )) => {
            print_error(&err.to_string());
            Err(err.into())
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metadata() {
        assert_eq!(parse_metadata(None).unwrap(), serde_json::json!({}));
        assert_eq!(
            parse_metadata(Some(r#"{"ticket":"OPS-1"}"#)).unwrap()["ticket"],
            "OPS-1"
        );
        assert!(matches!(
            parse_metadata(Some("[1,2]")).unwrap_err(),
            CliError::InvalidArgument(_)
        ));
        assert!(matches!(parse_metadata(Some("{")).unwrap_err(), CliError::Json(_)));
    }
}
