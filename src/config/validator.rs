//! Definition validation: field naming, schema options and virtual references.

use crate::config::{FieldMap, FieldType, LoadedDefinition, ModelDefinition, IMPLICIT_FIELDS};
use crate::error::ConfigError;
use std::collections::HashMap;

/// Check one definition on its own. Returns the reason on failure; the loader attaches
/// the file.
pub fn validate_definition(name: &str, def: &ModelDefinition) -> Result<(), String> {
    let Some(fields) = &def.model else {
        return Ok(());
    };
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(format!(
            "model name '{}' may only contain letters, digits, '_' and '-'",
            name
        ));
    }
    validate_field_names(fields, "")?;

    let schema = &def.schema;
    if schema.encrypt_password && !fields.contains(&schema.password_field) {
        return Err(format!(
            "encryptPassword is set but password field '{}' is not declared",
            schema.password_field
        ));
    }
    if let Some(id_field) = &schema.id_field {
        match fields.get(id_field) {
            None => return Err(format!("idField '{}' is not declared", id_field)),
            Some(ty) if ty.is_virtual() => {
                return Err(format!("idField '{}' cannot be Virtual", id_field))
            }
            Some(_) => {}
        }
    }
    for (virtual_name, v) in &schema.virtuals {
        if let Some(ty) = fields.get(virtual_name) {
            if !ty.is_virtual() {
                return Err(format!(
                    "virtual '{}' collides with a stored field",
                    virtual_name
                ));
            }
        }
        if v.ref_model.is_empty() || v.local_field.is_empty() || v.foreign_field.is_empty() {
            return Err(format!(
                "virtual '{}' needs ref, localField and foreignField",
                virtual_name
            ));
        }
        if !has_field(fields, &v.local_field) {
            return Err(format!(
                "virtual '{}' localField '{}' is not a field of '{}'",
                virtual_name, v.local_field, name
            ));
        }
    }
    Ok(())
}

fn validate_field_names(fields: &FieldMap, prefix: &str) -> Result<(), String> {
    for (name, ty) in fields.iter() {
        let path = format!("{}{}", prefix, name);
        if name.is_empty() {
            return Err(format!("empty field name under '{}'", prefix));
        }
        if name.starts_with('$') || name.contains('.') {
            return Err(format!(
                "field name '{}' may not start with '$' or contain '.'",
                path
            ));
        }
        let nested = match ty {
            FieldType::Object(map) => Some(map),
            FieldType::Array(inner) => match inner.as_ref() {
                FieldType::Object(map) => Some(map),
                _ => None,
            },
            _ => None,
        };
        if let Some(map) = nested {
            validate_field_names(map, &format!("{}.", path))?;
        }
    }
    Ok(())
}

fn has_field(fields: &FieldMap, name: &str) -> bool {
    fields.contains(name) || IMPLICIT_FIELDS.contains(&name)
}

/// Cross-model checks once every definition is known: each virtual's `ref` names a
/// loaded model that has the `foreignField`.
pub fn validate_references(definitions: &[LoadedDefinition]) -> Result<(), ConfigError> {
    let by_name: HashMap<&str, &LoadedDefinition> = definitions
        .iter()
        .map(|d| (d.name.as_str(), d))
        .collect();
    for loaded in definitions {
        for v in loaded.definition.schema.virtuals.values() {
            let target = by_name
                .get(v.ref_model.as_str())
                .ok_or_else(|| ConfigError::MissingReference {
                    kind: "model",
                    id: v.ref_model.clone(),
                })?;
            let target_fields = target.definition.model.as_ref();
            if !target_fields.is_some_and(|f| has_field(f, &v.foreign_field)) {
                return Err(ConfigError::MissingReference {
                    kind: "field",
                    id: format!("{}.{}", v.ref_model, v.foreign_field),
                });
            }
        }
    }
    Ok(())
}
