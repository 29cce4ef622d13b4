//! Configuration management for fedquery.
//!
//! This module provides configuration handling through multiple sources:
//! 1. Default configuration (embedded in binary)
//! 2. System-wide configuration file (`/etc/fedquery/config.toml`)
//! 3. User-specified configuration file
//! 4. Environment variables (prefixed with `FEDQUERY_`, nested keys separated by `__`)
//! 5. Command-line arguments
//!
//! Configuration options are loaded in order of precedence, with later sources
//! overriding earlier ones.
//!
//! # Environment Variables
//!
//! - `FEDQUERY_REWRITE__PULL_ALL_TO_MEMORY` - Materialize every multi-source queryable
//! - `FEDQUERY_REWRITE__PERSIST_CAPTURED_FIELDS` - Write resolved queryables back into closures
//! - `FEDQUERY_REWRITE__PROVIDER_FUNCTIONS` - Rewrite `NewUuid()` to provider id functions

use crate::error::{Error, Result};
use crate::query::RewriteOptions;
use crate::storage::{DuckDbBackend, MemorySource, Queryable, SourceRegistry};
use crate::types::{ElementType, Field, FieldType, Record, TypeRegistry, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Configuration-related command-line arguments
#[derive(Debug, Default, Clone, clap::Args)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Materialize every multi-source queryable in memory
    #[arg(long, global = true)]
    pub pull_all_to_memory: bool,
}

/// Service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Rewrite behavior
    #[serde(default)]
    pub rewrite: RewriteOptions,
    /// Element types, parents declared before their children
    #[serde(default)]
    pub types: Vec<TypeConfig>,
    /// Sources, in the order they are federated
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// Element type declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeConfig {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    /// Own fields; inherited fields come from the parent
    #[serde(default)]
    pub fields: Vec<Field>,
}

/// Source engine selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Memory,
    Duckdb,
}

/// Source declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub engine: Engine,
    pub element_type: String,
    /// Table name (duckdb); defaults to the source name
    #[serde(default)]
    pub table: Option<String>,
    /// Database path (duckdb)
    #[serde(default = "default_connection")]
    pub connection: String,
    /// Seed rows, keyed by field name
    #[serde(default)]
    pub rows: Vec<BTreeMap<String, Value>>,
}

impl ServiceConfig {
    /// Load configuration from all sources
    pub fn load(args: &Args) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config::File::with_name("/etc/fedquery/config.toml").required(false));

        // Load user config if specified
        if let Some(path) = &args.config {
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        // Add environment variables
        builder = builder.add_source(config::Environment::with_prefix("FEDQUERY").separator("__"));

        let mut config: ServiceConfig = builder.build()?.try_deserialize()?;

        // Override with command line args
        if args.pull_all_to_memory {
            config.rewrite.pull_all_to_memory = true;
        }

        debug!(
            types = config.types.len(),
            sources = config.sources.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn rewrite_options(&self) -> RewriteOptions {
        self.rewrite
    }

    /// Build the declared element types and sources, creating and seeding
    /// DuckDB tables as needed.
    pub fn build_registry(&self) -> Result<(TypeRegistry, SourceRegistry)> {
        let mut types = TypeRegistry::new();
        for declared in &self.types {
            types.register(&declared.name, declared.parent.as_deref(), declared.fields.clone())?;
        }

        let mut backends: HashMap<&str, DuckDbBackend> = HashMap::new();
        let mut sources = SourceRegistry::new();
        for declared in &self.sources {
            let element_type = types.get(&declared.element_type).ok_or_else(|| {
                Error::Config(format!(
                    "Source '{}' uses undeclared element type '{}'",
                    declared.name, declared.element_type
                ))
            })?;
            let records = declared
                .rows
                .iter()
                .map(|row| build_record(&element_type, row))
                .collect::<Result<Vec<_>>>()?;

            let source: Arc<dyn Queryable> = match declared.engine {
                Engine::Memory => Arc::new(MemorySource::new(element_type, records)),
                Engine::Duckdb => {
                    let backend = match backends.get(declared.connection.as_str()) {
                        Some(backend) => backend.clone(),
                        None => {
                            let backend = DuckDbBackend::open(&declared.connection)?;
                            backends.insert(&declared.connection, backend.clone());
                            backend
                        }
                    };
                    let table = declared.table.as_deref().unwrap_or(&declared.name);
                    backend.create_table(table, &element_type)?;
                    let source = backend.source(table, element_type);
                    if !records.is_empty() {
                        source.insert(&records)?;
                    }
                    Arc::new(source)
                }
            };
            sources.register(&declared.name, source)?;
        }

        info!(
            types = types.len(),
            sources = sources.len(),
            "Built source registry"
        );
        Ok((types, sources))
    }
}

/// Build a record of `element_type` from a configured row.
pub fn build_record(element_type: &ElementType, row: &BTreeMap<String, Value>) -> Result<Record> {
    let mut record = Record::new(element_type.clone());
    for (key, value) in row {
        // keys may come back lowercased from the config layer
        let field = element_type
            .field(key)
            .or_else(|| {
                element_type
                    .fields()
                    .into_iter()
                    .find(|f| f.name.eq_ignore_ascii_case(key))
            })
            .ok_or_else(|| {
                Error::Config(format!(
                    "Element type '{}' has no field '{}'",
                    element_type, key
                ))
            })?;
        let value = match (field.field_type, value) {
            (_, Value::Null) => Value::Null,
            (FieldType::Bool, Value::Bool(_))
            | (FieldType::Int, Value::Int(_))
            | (FieldType::Float, Value::Float(_))
            | (FieldType::Text, Value::Text(_)) => value.clone(),
            (FieldType::Float, Value::Int(i)) => Value::Float(*i as f64),
            (expected, other) => {
                return Err(Error::Config(format!(
                    "Field '{}' of '{}' expects {:?}, got {}",
                    field.name,
                    element_type,
                    expected,
                    other.type_name()
                )))
            }
        };
        record.set(&field.name, value);
    }
    Ok(record)
}

fn default_connection() -> String {
    ":memory:".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SourceProvider;
    use std::io::Write;

    #[test]
    fn test_config_defaults() {
        let config = ServiceConfig::load(&Args::default()).unwrap();
        assert_eq!(config.rewrite_options(), RewriteOptions::default());
        assert!(config.types.is_empty());
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_cli_override() {
        let args = Args {
            config: None,
            pull_all_to_memory: true,
        };
        let config = ServiceConfig::load(&args).unwrap();
        assert!(config.rewrite.pull_all_to_memory);
        assert!(config.rewrite.persist_captured_fields);
    }

    #[test]
    fn test_load_file_and_build_registry() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[rewrite]
provider_functions = false

[[types]]
name = "Data"
fields = [{{ name = "id", type = "int" }}]

[[types]]
name = "Page"
parent = "Data"
fields = [{{ name = "title", type = "text" }}, {{ name = "score", type = "float" }}]

[[sources]]
name = "cache"
engine = "memory"
element_type = "Page"
rows = [{{ id = 1, title = "home", score = 2 }}]

[[sources]]
name = "db"
engine = "duckdb"
element_type = "Page"
table = "config_pages"
rows = [{{ id = 2, title = "about" }}, {{ id = 3 }}]
"#
        )
        .unwrap();

        let args = Args {
            config: Some(file.path().to_path_buf()),
            pull_all_to_memory: false,
        };
        let config = ServiceConfig::load(&args).unwrap();
        assert!(!config.rewrite.provider_functions);

        let (types, sources) = config.build_registry().unwrap();
        assert_eq!(types.len(), 2);
        assert_eq!(sources.len(), 2);

        let data = types.get("Data").unwrap();
        let all = sources.get_data(&data, &[]).unwrap();
        let total: usize = all.sources().iter().map(|s| s.count().unwrap()).sum();
        assert_eq!(total, 3);

        let cached = sources.get_data(&data, &[Value::from("cache")]).unwrap();
        let record = cached.sources()[0].first_or_default().unwrap().unwrap();
        assert_eq!(record.get("score"), Some(&Value::Float(2.0)));
    }

    #[test]
    fn test_build_record_validation() {
        let ty = ElementType::root("Row", vec![Field::new("n", FieldType::Int)]);
        let mut row = BTreeMap::new();
        row.insert("n".to_string(), Value::from("x"));
        assert!(matches!(build_record(&ty, &row), Err(Error::Config(_))));

        let mut row = BTreeMap::new();
        row.insert("missing".to_string(), Value::Int(1));
        assert!(matches!(build_record(&ty, &row), Err(Error::Config(_))));

        let mut row = BTreeMap::new();
        row.insert("N".to_string(), Value::Int(1));
        assert_eq!(build_record(&ty, &row).unwrap().get("n"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_undeclared_type() {
        let config = ServiceConfig {
            sources: vec![SourceConfig {
                name: "s".into(),
                engine: Engine::Memory,
                element_type: "Nope".into(),
                table: None,
                connection: default_connection(),
                rows: vec![],
            }],
            ..ServiceConfig::default()
        };
        assert!(matches!(config.build_registry(), Err(Error::Config(_))));
    }
}
