//! CLI command implementations
//!
//! Both commands follow the same sequence: configuration, model descriptors,
//! derived collection schemas, then the query file. `compile` validates the
//! condition tree before lowering it.

use std::path::Path;

use chrono_tz::Tz;
use serde_json::{json, Value};

use crate::config::{parse_timezone, CompilerConfig};
use crate::observability::{log_event_with_fields, Event, ObservationScope};
use crate::pipeline::{build_datasource, DocumentQueryCompiler};
use crate::query::{resolve_column, ConditionTreeValidator, Projection, ALL_FIELDS};
use crate::schema::{Collection, ModelRegistry, SchemaLoader};

use super::args::{Cli, Command};
use super::errors::{CliError, CliResult};
use super::io::{read_query, write_response, QueryFile};

/// Parse arguments, run the command and print its response
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    let data = run_command(cli.command)?;
    write_response(data)
}

/// Run a command and return its response payload
pub fn run_command(command: Command) -> CliResult<Value> {
    let name = command.name();
    log_event_with_fields(Event::CommandStart, &[("command", name)]);
    let scope = ObservationScope::with_fields("COMMAND", &[("command", name)]);

    let result = match command {
        Command::Validate {
            models,
            config,
            collection,
            query,
        } => validate(
            &models,
            config.as_deref(),
            collection.as_deref().zip(query.as_deref()),
        ),
        Command::Compile {
            models,
            config,
            collection,
            query,
            timezone,
        } => compile(
            &models,
            config.as_deref(),
            &collection,
            &query,
            timezone.as_deref(),
        ),
    };

    match &result {
        Ok(_) => {
            scope.complete();
            log_event_with_fields(Event::CommandComplete, &[("command", name)]);
        }
        Err(err) => scope.fail(err.code_str(), err.message()),
    }
    result
}

/// Load models and optionally check a query against one collection
pub fn validate(
    models_dir: &Path,
    config_path: Option<&Path>,
    target: Option<(&str, &Path)>,
) -> CliResult<Value> {
    load_config(config_path)?;
    let models = SchemaLoader::new(models_dir).load_all()?;
    let datasource = build_datasource(&models)?;

    if let Some((collection, query_path)) = target {
        let query = read_query(query_path)?;
        check_query(datasource.collection(collection)?, &query)?;
    }

    let collections: Vec<&str> = datasource.collection_names().collect();
    Ok(json!({
        "models": models.len(),
        "collections": collections,
    }))
}

/// Lower a query file into the stage list of `collection`
pub fn compile(
    models_dir: &Path,
    config_path: Option<&Path>,
    collection: &str,
    query_path: &Path,
    timezone: Option<&str>,
) -> CliResult<Value> {
    let config = load_config(config_path)?;
    let timezone: Tz = match timezone {
        Some(name) => parse_timezone(name)?,
        None => config.timezone()?,
    };
    let models = SchemaLoader::new(models_dir).load_all()?;
    let query = read_query(query_path)?;

    let datasource = build_datasource(&models)?;
    check_query(datasource.collection(collection)?, &query)?;

    compile_query(&models, config, collection, &query, timezone)
}

fn compile_query(
    models: &ModelRegistry,
    config: CompilerConfig,
    collection: &str,
    query: &QueryFile,
    timezone: Tz,
) -> CliResult<Value> {
    let compiler = DocumentQueryCompiler::new(models, config);

    let (operation, stages) = match (&query.aggregation, &query.projection) {
        (Some(_), Some(_)) => {
            return Err(CliError::query_error(
                "A query holds either a projection or an aggregation, not both",
            ))
        }
        (Some(aggregation), None) => (
            "aggregate",
            compiler.aggregate(collection, &query.filter, aggregation, query.limit, timezone)?,
        ),
        (None, projection) => {
            if query.limit.is_some() {
                return Err(CliError::query_error(
                    "'limit' applies to aggregations; use the filter's page for lists",
                ));
            }
            let all = Projection::new([ALL_FIELDS]);
            let projection = projection.as_ref().unwrap_or(&all);
            ("list", compiler.list(collection, &query.filter, projection, timezone)?)
        }
    };

    Ok(json!({
        "collection": collection,
        "operation": operation,
        "stages": serde_json::to_value(&stages)?,
    }))
}

fn load_config(path: Option<&Path>) -> CliResult<CompilerConfig> {
    let config = match path {
        Some(path) => CompilerConfig::load(path)?,
        None => CompilerConfig::default(),
    };
    config.apply_log_level()?;
    Ok(config)
}

/// Condition tree and sort fields must exist on the collection
fn check_query(collection: Collection<'_>, query: &QueryFile) -> CliResult<()> {
    if let Some(tree) = &query.filter.condition_tree {
        ConditionTreeValidator::validate(tree, collection)?;
    }
    if let Some(sort) = &query.filter.sort {
        for clause in sort.clauses() {
            resolve_column(collection, &clause.field)?;
        }
    }
    Ok(())
}
