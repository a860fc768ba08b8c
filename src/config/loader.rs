//! Discover model definitions (built-in account models, then a user directory) and
//! compile them into a registry.

use crate::config::{
    validate_definition, validate_references, DatabaseConfig, LoadedDefinition, ModelDefinition,
    SchemaSet, TestCase,
};
use crate::error::ConfigError;
use crate::schema::{Registry, SchemaCompiler};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// Account models shipped with the crate, in directory order.
const BUILTIN_MODELS: &[(&str, &str)] = &[
    ("accountotp", include_str!("../../models/account/accountotp.json")),
    ("accountuser", include_str!("../../models/account/accountuser.json")),
];

/// Read and validate every definition the config points at. The first definition of a
/// name wins; later ones are skipped (or rejected when `rejectConflictingModels` is set
/// and their shape differs). Files without a `model` key are dropped.
pub async fn discover(config: &DatabaseConfig) -> Result<Vec<LoadedDefinition>, ConfigError> {
    let mut loaded: Vec<LoadedDefinition> = Vec::new();

    if config.initialise_user_account {
        for (name, text) in BUILTIN_MODELS {
            let source = PathBuf::from(format!("builtin:{}", name));
            let definition = parse_definition(&source, text)?;
            loaded.push(LoadedDefinition {
                name: (*name).to_string(),
                source,
                definition,
            });
        }
    }

    if let Some(dir) = &config.user_data_model_path {
        let is_dir = tokio::fs::metadata(dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if is_dir {
            for (name, path) in list_json_files(dir).await? {
                let text = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|source| ConfigError::Read {
                        file: path.clone(),
                        source,
                    })?;
                let definition = parse_definition(&path, &text)?;
                if let Some(existing) = loaded.iter().find(|l| l.name == name) {
                    if config.reject_conflicting_models
                        && !existing.definition.same_shape(&definition)
                    {
                        return Err(ConfigError::ConflictingModel {
                            name,
                            file: path,
                            existing: existing.source.clone(),
                        });
                    }
                    tracing::warn!(
                        model = %name,
                        file = %path.display(),
                        existing = %existing.source.display(),
                        "duplicate model name; keeping the first definition"
                    );
                    continue;
                }
                loaded.push(LoadedDefinition {
                    name,
                    source: path,
                    definition,
                });
            }
        } else {
            tracing::debug!(path = %dir.display(), "user model directory not found; skipping");
        }
    }

    let mut models = Vec::with_capacity(loaded.len());
    for l in loaded {
        if l.definition.model.is_none() {
            tracing::debug!(file = %l.source.display(), "no model key; skipping");
            continue;
        }
        validate_definition(&l.name, &l.definition).map_err(|reason| {
            ConfigError::InvalidModel {
                file: l.source.clone(),
                reason,
            }
        })?;
        models.push(l);
    }
    validate_references(&models)?;
    Ok(models)
}

fn parse_definition(source: &Path, text: &str) -> Result<ModelDefinition, ConfigError> {
    serde_json::from_str(text).map_err(|source_err| ConfigError::Parse {
        file: source.to_path_buf(),
        source: source_err,
    })
}

/// `.json` files (any case) directly under `dir`, keyed by file stem, sorted by name.
async fn list_json_files(dir: &Path) -> Result<Vec<(String, PathBuf)>, ConfigError> {
    let read_err = |source| ConfigError::Read {
        file: dir.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(read_err)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
        let path = entry.path();
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if !is_json || !path.is_file() {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            files.push((stem.to_string(), path.clone()));
        }
    }
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

/// Compile loaded definitions in order, collecting field lists, virtuals and fixtures.
pub fn compile_all<C: SchemaCompiler>(
    definitions: &[LoadedDefinition],
    compiler: &C,
    registry: &mut Registry<C::Model>,
) -> Result<SchemaSet, ConfigError> {
    let mut set = SchemaSet::default();
    for loaded in definitions {
        let Some(compiled) = registry.compile(compiler, &loaded.name, &loaded.definition)? else {
            continue;
        };
        let name = loaded.name.clone();
        for (id, case) in &loaded.definition.test {
            set.tests.push(TestCase {
                model: name.clone(),
                id: id.clone(),
                ..case.clone()
            });
        }
        set.fields.insert(name.clone(), compiled.fields);
        set.virtuals.insert(name.clone(), compiled.virtuals);
        set.models.push(name);
    }
    set.tests.sort_by(|a, b| compare_test_ids(&a.id, &b.id));
    Ok(set)
}

/// Discover, then compile.
pub async fn load_schemas<C: SchemaCompiler>(
    config: &DatabaseConfig,
    compiler: &C,
    registry: &mut Registry<C::Model>,
) -> Result<SchemaSet, ConfigError> {
    let definitions = discover(config).await?;
    compile_all(&definitions, compiler, registry)
}

/// Numeric ids in numeric order, ahead of non-numeric ids in lexical order.
fn compare_test_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
