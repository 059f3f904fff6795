//! Frontmatter shape validation against the embedded JSON schema
//!
//! Catches typoed top-level keys and grossly wrong value types before the
//! typed parsers run. The schema is compiled once per process.

use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde_yaml::Mapping;

use crate::error::{CompilerError, Diagnostics};

const FRONTMATTER_SCHEMA_JSON: &str = include_str!("data/frontmatter_schema.json");

static FRONTMATTER_SCHEMA: Lazy<JSONSchema> = Lazy::new(|| {
    let schema: serde_json::Value = serde_json::from_str(FRONTMATTER_SCHEMA_JSON)
        .expect("embedded frontmatter schema is valid JSON");
    JSONSchema::compile(&schema).expect("embedded frontmatter schema compiles")
});

/// Validate the merged frontmatter's top-level shape. Accumulates every
/// schema violation so the user can fix all of them in one pass.
pub fn validate_frontmatter(frontmatter: &Mapping, path: &str) -> Diagnostics {
    let mut diags = Diagnostics::new();

    let instance = match serde_json::to_value(frontmatter) {
        Ok(value) => value,
        Err(e) => {
            diags.push(
                CompilerError::validation(path, "frontmatter is not representable as JSON")
                    .with_cause(e),
            );
            return diags;
        }
    };

    if let Err(errors) = FRONTMATTER_SCHEMA.validate(&instance) {
        for error in errors {
            let location = error.instance_path.to_string();
            let message = if location.is_empty() {
                format!("frontmatter: {error}")
            } else {
                format!("frontmatter at '{location}': {error}")
            };
            diags.push(CompilerError::validation(path, message));
        }
    }
    diags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frontmatter(yaml: &str) -> Mapping {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn recognized_keys_pass() {
        let fm = frontmatter(
            "on: push\nengine: copilot\npermissions:\n  contents: read\ntools:\n  github:\n    toolsets: [repos]\n",
        );
        let diags = validate_frontmatter(&fm, "wf.md");
        assert!(diags.is_empty(), "{:?}", diags.items);
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let fm = frontmatter("on: push\ntriggers: [push]\n");
        let diags = validate_frontmatter(&fm, "wf.md");
        assert!(diags.has_errors());
    }

    #[test]
    fn wrong_type_is_rejected() {
        let fm = frontmatter("on: push\nstrict: 'yes'\n");
        let diags = validate_frontmatter(&fm, "wf.md");
        assert!(diags.has_errors());
    }

    #[test]
    fn internal_markers_are_tolerated() {
        let fm = frontmatter("on: push\n__gh_aw_stop_after__: '2026-01-01'\n");
        let diags = validate_frontmatter(&fm, "wf.md");
        assert!(diags.is_empty(), "{:?}", diags.items);
    }

    #[test]
    fn multiple_violations_accumulate() {
        let fm = frontmatter("bogus-a: 1\nbogus-b: 2\n");
        let diags = validate_frontmatter(&fm, "wf.md");
        assert!(diags.items.len() >= 2);
    }
}
