use super::JobConf;
use crate::error::{ErrorCode, PipesError, Result};
use std::path::Path;
use tokio::fs;

/// Load a job configuration file and apply environment overrides.
///
/// TOML and JSON are accepted. Nested tables are flattened into dotted keys,
/// so `[mapreduce.pipes] executable = "..."` and
/// `"mapreduce.pipes.executable" = "..."` mean the same thing.
pub async fn load_job_conf(path: &Path) -> Result<JobConf> {
    if !path.exists() {
        return Err(PipesError::config_with_code(
            ErrorCode::CONFIG_NOT_FOUND,
            format!("Configuration file not found: {}", path.display()),
            None,
        ));
    }

    let content = fs::read_to_string(path).await?;
    let mut conf = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_json(&content)?,
        _ => parse_toml(&content)?,
    };

    conf.merge_env_vars();
    tracing::debug!("Loaded {} settings from {}", conf.len(), path.display());
    Ok(conf)
}

pub fn parse_toml(content: &str) -> Result<JobConf> {
    let table: toml::Table = toml::from_str(content)?;
    let mut conf = JobConf::new();
    flatten_toml("", &toml::Value::Table(table), &mut conf)?;
    Ok(conf)
}

pub fn parse_json(content: &str) -> Result<JobConf> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    if !value.is_object() {
        return Err(PipesError::config_with_code(
            ErrorCode::CONFIG_PARSE_ERROR,
            "Top level of a JSON job configuration must be an object",
            None,
        ));
    }
    let mut conf = JobConf::new();
    flatten_json("", &value, &mut conf)?;
    Ok(conf)
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn flatten_toml(prefix: &str, value: &toml::Value, conf: &mut JobConf) -> Result<()> {
    match value {
        toml::Value::Table(table) => {
            for (key, nested) in table {
                flatten_toml(&join(prefix, key), nested, conf)?;
            }
        }
        toml::Value::String(s) => conf.set(prefix, s.clone()),
        toml::Value::Integer(i) => conf.set(prefix, i.to_string()),
        toml::Value::Float(f) => conf.set(prefix, f.to_string()),
        toml::Value::Boolean(b) => conf.set(prefix, b.to_string()),
        toml::Value::Datetime(d) => conf.set(prefix, d.to_string()),
        toml::Value::Array(_) => {
            return Err(PipesError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                "Arrays are not valid job configuration values",
                Some(prefix.to_string()),
            ))
        }
    }
    Ok(())
}

fn flatten_json(prefix: &str, value: &serde_json::Value, conf: &mut JobConf) -> Result<()> {
    use serde_json::Value;

    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                flatten_json(&join(prefix, key), nested, conf)?;
            }
        }
        Value::String(s) => conf.set(prefix, s.clone()),
        Value::Number(n) => conf.set(prefix, n.to_string()),
        Value::Bool(b) => conf.set(prefix, b.to_string()),
        Value::Null => {}
        Value::Array(_) => {
            return Err(PipesError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                "Arrays are not valid job configuration values",
                Some(prefix.to_string()),
            ))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::keys;

    #[test]
    fn test_nested_toml_tables_flatten_to_dotted_keys() {
        let conf = parse_toml(
            r#"
            [mapreduce.pipes]
            executable = "file:///bin/wordcount"
            isjavarecordreader = true

            [mapreduce.job]
            reduces = 3
            "#,
        )
        .unwrap();

        assert_eq!(conf.get(keys::EXECUTABLE), Some("file:///bin/wordcount"));
        assert!(conf.get_bool(keys::IS_JAVA_RECORD_READER, false));
        assert_eq!(conf.get_u32(keys::NUM_REDUCES, 1).unwrap(), 3);
    }

    #[test]
    fn test_quoted_dotted_keys_are_kept() {
        let conf = parse_toml(r#""mapreduce.pipes.partitioner" = "hash""#).unwrap();
        assert_eq!(conf.get(keys::PARTITIONER), Some("hash"));
    }

    #[test]
    fn test_json_object_flattens() {
        let conf =
            parse_json(r#"{"mapreduce": {"pipes": {"executable": "/bin/cat"}}, "x": null}"#)
                .unwrap();
        assert_eq!(conf.get(keys::EXECUTABLE), Some("/bin/cat"));
        assert!(!conf.contains("x"));
    }

    #[test]
    fn test_arrays_rejected() {
        let err = parse_toml("a = [1, 2]").unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_INVALID_VALUE);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = load_job_conf(Path::new("/definitely/not/here.toml"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.toml");
        std::fs::write(&path, "\"mapreduce.job.reduces\" = 4\n").unwrap();

        let conf = load_job_conf(&path).await.unwrap();
        assert_eq!(conf.get(keys::NUM_REDUCES), Some("4"));
    }
}
