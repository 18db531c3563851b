//! Pipeline manifest parsing.

use crate::{ConfigError, ConfigResult};
use kiln_core::pipeline::Pipeline;
use std::collections::HashSet;
use std::path::Path;

/// File name of the manifest at the repository root.
pub const MANIFEST_FILE: &str = ".kiln.yml";

/// Parse and validate a pipeline manifest from YAML text.
pub fn parse_manifest(yaml: &str) -> ConfigResult<Pipeline> {
    let pipeline: Pipeline = serde_yaml::from_str(yaml)?;
    validate(&pipeline)?;
    Ok(pipeline)
}

/// Read the manifest from the root of a checked-out workspace.
pub fn load_manifest(workspace: &Path) -> ConfigResult<Pipeline> {
    let path = workspace.join(MANIFEST_FILE);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::ManifestNotFound(path));
        }
        Err(e) => return Err(e.into()),
    };
    parse_manifest(&content)
}

fn validate(pipeline: &Pipeline) -> ConfigResult<()> {
    if pipeline.image.trim().is_empty() {
        return Err(ConfigError::MissingField("image".to_string()));
    }
    if pipeline.steps.is_empty() {
        return Err(ConfigError::MissingField("steps".to_string()));
    }

    let mut seen = HashSet::new();
    for (idx, step) in pipeline.steps.iter().enumerate() {
        if step.name.trim().is_empty() {
            return Err(ConfigError::MissingField(format!("steps[{}].name", idx)));
        }
        if !seen.insert(step.name.as_str()) {
            return Err(ConfigError::Duplicate(format!("step '{}'", step.name)));
        }
        if step.commands.is_empty() {
            return Err(ConfigError::MissingField(format!(
                "commands of step '{}'",
                step.name
            )));
        }
        if let Some(key) = step.env.keys().find(|k| k.is_empty() || k.contains('=')) {
            return Err(ConfigError::InvalidValue {
                field: format!("env of step '{}'", step.name),
                message: format!("'{}' is not a valid variable name", key),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_manifest() {
        let yaml = r#"
image: rust:1.85
steps:
  - name: build
    commands:
      - cargo build
"#;

        let pipeline = parse_manifest(yaml).unwrap();
        assert_eq!(pipeline.image, "rust:1.85");
        assert_eq!(pipeline.steps.len(), 1);
        assert_eq!(pipeline.steps[0].name, "build");
        assert!(pipeline.steps[0].env.is_empty());
    }

    #[test]
    fn test_parse_preserves_step_order_and_env() {
        let yaml = r#"
image: node:20
steps:
  - name: install
    commands: [npm ci]
  - name: test
    commands:
      - npm run lint
      - npm test
    env:
      NODE_ENV: test
      FORCE_COLOR: "1"
"#;

        let pipeline = parse_manifest(yaml).unwrap();
        let names: Vec<_> = pipeline.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["install", "test"]);
        assert_eq!(pipeline.steps[1].commands.len(), 2);
        assert_eq!(
            pipeline.steps[1].env.get("NODE_ENV").map(String::as_str),
            Some("test")
        );
        assert_eq!(
            pipeline.steps[1].env.get("FORCE_COLOR").map(String::as_str),
            Some("1")
        );
    }

    #[test]
    fn test_missing_image() {
        let yaml = r#"
steps:
  - name: build
    commands: [make]
"#;
        assert!(matches!(parse_manifest(yaml), Err(ConfigError::Parse(_))));

        let yaml = r#"
image: ""
steps:
  - name: build
    commands: [make]
"#;
        assert!(matches!(parse_manifest(yaml), Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn test_no_steps() {
        let yaml = "image: alpine\n";
        assert!(matches!(parse_manifest(yaml), Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn test_step_without_commands() {
        let yaml = r#"
image: alpine
steps:
  - name: empty
"#;
        assert!(matches!(parse_manifest(yaml), Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn test_duplicate_step_names() {
        let yaml = r#"
image: alpine
steps:
  - name: test
    commands: [echo one]
  - name: test
    commands: [echo two]
"#;
        assert!(matches!(parse_manifest(yaml), Err(ConfigError::Duplicate(_))));
    }

    #[test]
    fn test_duplicate_env_keys_rejected() {
        let yaml = r#"
image: alpine
steps:
  - name: test
    commands: [env]
    env:
      A: "1"
      A: "2"
"#;
        assert!(parse_manifest(yaml).is_err());
    }

    #[test]
    fn test_malformed_yaml() {
        assert!(matches!(
            parse_manifest("image: [unclosed"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_manifest(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ManifestNotFound(_)));
    }

    #[test]
    fn test_load_manifest_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            "image: alpine\nsteps:\n  - name: hello\n    commands: [echo hi]\n",
        )
        .unwrap();

        let pipeline = load_manifest(dir.path()).unwrap();
        assert_eq!(pipeline.steps[0].commands, vec!["echo hi"]);
    }
}
