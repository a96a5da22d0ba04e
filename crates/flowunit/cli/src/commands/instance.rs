//! Process instance commands

use crate::error::{CliError, CliResult};
use crate::output::{self, print_success, OutputFormat};
use flowunit_deployment::FunctionUnitService;
use flowunit_registry::StartInstance;

/// Arguments of `flowunitctl start`
#[derive(Debug, clap::Args)]
pub struct StartArgs {
    /// Function unit name
    pub name: String,

    /// Id of the user starting the process
    #[arg(short, long)]
    pub user: String,

    /// Display name of the user
    #[arg(long)]
    pub user_name: Option<String>,

    /// Start variable as key=value; values are parsed as JSON when possible
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,
}

fn parse_vars(vars: &[String]) -> CliResult<serde_json::Value> {
    let mut map = serde_json::Map::new();
    for pair in vars {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| CliError::InvalidArgument(format!("expected KEY=VALUE, got {pair}")))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(CliError::InvalidArgument(format!("empty variable name in {pair}")));
        }
        let value = serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        map.insert(key.to_string(), value);
    }
    Ok(serde_json::Value::Object(map))
}

pub async fn start(service: &FunctionUnitService, args: StartArgs, format: OutputFormat) -> CliResult<()> {
    let mut request =
        StartInstance::new(&args.name, &args.user).with_variables(parse_vars(&args.vars)?);
    if let Some(user_name) = args.user_name {
        request = request.with_user_name(user_name);
    }

    let instance = service.create_instance(request).await?;
    match format {
        OutputFormat::Json => output::print_single(&instance),
        OutputFormat::Table => {
            print_success(&format!(
                "Started {} on {} (version id {})",
                instance.id,
                instance.definition_key,
                instance.version_id.value()
            ));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vars() {
        let vars = parse_vars(&[
            "days=3".to_string(),
            "reason=family trip".to_string(),
            "urgent=true".to_string(),
        ])
        .unwrap();
        assert_eq!(vars["days"], 3);
        assert_eq!(vars["reason"], "family trip");
        assert_eq!(vars["urgent"], true);

        assert!(parse_vars(&["novalue".to_string()]).is_err());
        assert!(parse_vars(&["=1".to_string()]).is_err());
    }
}
