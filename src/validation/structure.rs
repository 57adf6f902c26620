//! Version-driven structure verification.
//!
//! Older TL versions are checked against a schema; newer versions add
//! presence/absence checks of structural markers because the schema alone
//! does not tell the two dialects apart. Violations are advisory: they are
//! recorded on the parsing result and never invalidate trust by themselves.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::json_path::{matches_data_type, resolve_all, resolve_json_path, value_to_int};
use crate::logging::structured::LogContext;

pub const TL_V5: u32 = 5;
pub const TL_V6: u32 = 6;

/// Path of the declared TL version in a normalized document.
pub const VERSION_PATH: &str = "scheme.version";

/// Schema check plugged into the version table.
pub trait SchemaValidator: Send + Sync {
    /// Returns human-readable violations; an error means the check could not run.
    fn validate(&self, document: &Value) -> anyhow::Result<Vec<String>>;
}

/// Required field rule of a `RequiredFieldsSchema`.
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub json_path: String,
    pub data_type: String, // string, int, array, object, timestamp
    pub required: bool,
}

impl FieldRule {
    pub fn required(json_path: &str, data_type: &str) -> Self {
        Self {
            json_path: json_path.to_string(),
            data_type: data_type.to_string(),
            required: true,
        }
    }

    pub fn optional(json_path: &str, data_type: &str) -> Self {
        Self {
            required: false,
            ..Self::required(json_path, data_type)
        }
    }
}

/// Schema expressed as a list of field rules over the normalized document.
#[derive(Debug, Clone, Default)]
pub struct RequiredFieldsSchema {
    pub name: String,
    pub rules: Vec<FieldRule>,
}

impl RequiredFieldsSchema {
    /// Rules shared by the v5 and v6 normalized documents.
    pub fn trusted_list(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rules: vec![
                FieldRule::required("scheme", "object"),
                FieldRule::required("scheme.tsl_type", "string"),
                FieldRule::required("scheme.version", "int"),
                FieldRule::required("scheme.sequence_number", "int"),
                FieldRule::required("scheme.territory", "string"),
                FieldRule::required("scheme.issue_date", "timestamp"),
                FieldRule::optional("scheme.next_update", "timestamp"),
                FieldRule::optional("scheme.distribution_points", "array"),
                FieldRule::optional("scheme.pointers", "array"),
                FieldRule::required("scheme.pointers.*.location", "string"),
                FieldRule::optional("providers", "array"),
                FieldRule::required("providers.*.names", "object"),
                FieldRule::required("providers.*.services", "array"),
                FieldRule::required("providers.*.services.*.history", "array"),
                FieldRule::required("providers.*.services.*.history.*.start", "timestamp"),
                FieldRule::required("providers.*.services.*.history.*.status", "string"),
                FieldRule::required("providers.*.services.*.history.*.type", "string"),
            ],
        }
    }
}

impl SchemaValidator for RequiredFieldsSchema {
    fn validate(&self, document: &Value) -> anyhow::Result<Vec<String>> {
        let mut violations = Vec::new();
        for rule in &self.rules {
            for (path, value) in resolve_all(document, &rule.json_path) {
                match value {
                    None | Some(Value::Null) => {
                        // optional parents stop required children from firing
                        if rule.required && !path.contains('*') {
                            violations.push(format!("Missing required field '{}'", path));
                        }
                    }
                    Some(v) if !matches_data_type(v, &rule.data_type) => {
                        violations.push(format!(
                            "Field '{}' must be of type {}",
                            path, rule.data_type
                        ));
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(violations)
    }
}

/// What to check for one TL version.
#[derive(Clone, Default)]
pub struct VersionRules {
    pub schema: Option<Arc<dyn SchemaValidator>>,
    /// Paths that must be present.
    pub required_markers: Vec<String>,
    /// Paths that must be absent.
    pub forbidden_markers: Vec<String>,
}

impl VersionRules {
    pub fn v5() -> Self {
        Self {
            schema: Some(Arc::new(RequiredFieldsSchema::trusted_list("TL v5"))),
            required_markers: vec![],
            forbidden_markers: vec![],
        }
    }

    pub fn v6() -> Self {
        Self {
            schema: Some(Arc::new(RequiredFieldsSchema::trusted_list("TL v6"))),
            required_markers: vec!["signature.signed_properties.signing_certificate_v2".to_string()],
            forbidden_markers: vec![
                "signature.signed_properties.signing_certificate".to_string(),
                "signature.signed_properties.signature_production_place".to_string(),
                "signature.signed_properties.signer_role".to_string(),
            ],
        }
    }
}

/// Structure verifier with a version lookup table.
#[derive(Clone)]
pub struct StructureVerifier {
    accepted_versions: Vec<u32>,
    tables: HashMap<u32, VersionRules>,
}

impl StructureVerifier {
    /// Verifier with the built-in v5 and v6 tables.
    pub fn new(accepted_versions: Vec<u32>) -> Self {
        let mut tables = HashMap::new();
        tables.insert(TL_V5, VersionRules::v5());
        tables.insert(TL_V6, VersionRules::v6());
        Self {
            accepted_versions,
            tables,
        }
    }

    /// Replace the rules used for `version`.
    pub fn with_rules(mut self, version: u32, rules: VersionRules) -> Self {
        self.tables.insert(version, rules);
        self
    }

    pub fn accepted_versions(&self) -> &[u32] {
        &self.accepted_versions
    }

    /// Verify a document against its declared version.
    pub fn verify(&self, document: &Value, ctx: &LogContext) -> Vec<String> {
        let version = resolve_json_path(document, VERSION_PATH).and_then(value_to_int);
        let version = match version {
            Some(v) => v,
            None => return vec!["No TLVersion has been found!".to_string()],
        };

        if self.accepted_versions.is_empty() {
            crate::log_debug!(ctx, "STRUCTURE_CHECK_SKIPPED", reason = "no_accepted_versions");
            return Vec::new();
        }

        let mut errors = Vec::new();
        if !document.get("scheme").map_or(false, Value::is_object) {
            errors.push("The root of the Trusted List shall be a scheme object!".to_string());
        }

        let accepted = u32::try_from(version)
            .ok()
            .filter(|v| self.accepted_versions.contains(v));
        let version = match accepted {
            Some(v) => v,
            None => {
                errors.push(format!("The TL Version '{}' is not acceptable!", version));
                return errors;
            }
        };

        if document.get("signature").is_none() {
            errors.push("No signature element is present!".to_string());
        }

        if let Some(rules) = self.tables.get(&version) {
            if let Some(schema) = &rules.schema {
                match schema.validate(document) {
                    Ok(violations) => errors.extend(violations),
                    Err(e) => errors.push(format!("Schema validation could not run: {:#}", e)),
                }
            }
            errors.extend(check_markers(document, rules));
        }

        if errors.is_empty() {
            crate::log_debug!(ctx, "STRUCTURE_CHECK_PASSED", version = version);
        } else {
            crate::log_warn!(
                ctx,
                "STRUCTURE_VIOLATIONS",
                version = version,
                count = errors.len()
            );
        }
        errors
    }
}

fn check_markers(document: &Value, rules: &VersionRules) -> Vec<String> {
    let mut errors = Vec::new();
    for marker in &rules.required_markers {
        if resolve_json_path(document, marker).is_none() {
            errors.push(format!("No {} element has been found!", marker_name(marker)));
        }
    }
    for marker in &rules.forbidden_markers {
        if resolve_json_path(document, marker).is_some() {
            errors.push(format!("{} element shall not be present!", marker_name(marker)));
        }
    }
    errors
}

fn marker_name(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}
