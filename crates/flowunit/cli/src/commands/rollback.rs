//! Rollback command

use crate::error::CliResult;
use crate::output::{self, print_info, print_success, print_warning, OutputFormat};
use flowunit_deployment::{FunctionUnitService, RollbackResponse};

/// Preview the rollback of `name` to `version`, or run it when `yes` is set.
pub async fn execute(
    service: &FunctionUnitService,
    name: &str,
    version: &str,
    yes: bool,
    format: OutputFormat,
) -> CliResult<()> {
    let response = service.rollback(name, version, yes).await?;
    if format == OutputFormat::Json {
        return output::print_single(&response);
    }

    match response {
        RollbackResponse::Preview(impact) => {
            print_warning(&impact.warning_message);
            if impact.versions_to_delete.is_empty() {
                print_info("No newer versions; the rollback only reactivates the target");
            } else {
                let doomed: Vec<String> = impact
                    .versions_to_delete
                    .iter()
                    .map(|v| v.to_string())
                    .collect();
                print_info(&format!("Versions to delete: {}", doomed.join(", ")));
            }
            print_info("Re-run with --yes to proceed");
        }
        RollbackResponse::Executed(outcome) => {
            print_success(&format!(
                "Rolled {} back to {}: deleted {} version(s) and {} process instance(s)",
                outcome.name,
                outcome.rolled_back_to,
                outcome.deleted_versions.len(),
                outcome.deleted_instance_count
            ));
        }
    }
    Ok(())
}
