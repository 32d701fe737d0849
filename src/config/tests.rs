use super::*;

fn base_conf() -> JobConf {
    [(keys::EXECUTABLE, "file:///opt/bin/wordcount")]
        .into_iter()
        .collect()
}

#[test]
fn test_get_bool_defaults_on_garbage() {
    let mut conf = JobConf::new();
    assert!(conf.get_bool("flag", true));

    conf.set("flag", "TRUE");
    assert!(conf.get_bool("flag", false));

    conf.set("flag", "yes");
    assert!(!conf.get_bool("flag", false));
}

#[test]
fn test_get_millis() {
    let mut conf = JobConf::new();
    assert_eq!(conf.get_millis(keys::AUTH_TIMEOUT_MS).unwrap(), None);

    conf.set(keys::AUTH_TIMEOUT_MS, "1500");
    assert_eq!(
        conf.get_millis(keys::AUTH_TIMEOUT_MS).unwrap(),
        Some(Duration::from_millis(1500))
    );

    conf.set(keys::AUTH_TIMEOUT_MS, "soon");
    let err = conf.get_millis(keys::AUTH_TIMEOUT_MS).unwrap_err();
    assert_eq!(err.code(), ErrorCode::CONFIG_INVALID_VALUE);
}

#[test]
fn test_pipes_config_requires_executable() {
    let err = PipesConfig::from_job_conf(&JobConf::new()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::CONFIG_MISSING_REQUIRED);
}

#[test]
fn test_pipes_config_defaults() {
    let config = PipesConfig::from_job_conf(&base_conf()).unwrap();

    assert_eq!(config.executable, "file:///opt/bin/wordcount");
    assert_eq!(config.interpreter, None);
    assert_eq!(config.num_reduces, 1);
    assert!(!config.piped_input());
    assert!(!config.piped_output());
    assert_eq!(config.auth_timeout, None);
    assert_eq!(config.finish_timeout, None);
}

#[test]
fn test_piped_input_needs_external_mapper() {
    let mut conf = base_conf();
    conf.set_bool(keys::IS_JAVA_RECORD_READER, true);
    assert!(PipesConfig::from_job_conf(&conf).unwrap().piped_input());

    conf.set_bool(keys::IS_JAVA_MAPPER, true);
    assert!(!PipesConfig::from_job_conf(&conf).unwrap().piped_input());
}

#[test]
fn test_java_mapper_without_java_reader_is_rejected() {
    let mut conf = base_conf();
    conf.set_bool(keys::IS_JAVA_MAPPER, true);
    let err = PipesConfig::from_job_conf(&conf).unwrap_err();
    assert_eq!(err.code(), ErrorCode::CONFIG_INVALID_VALUE);
}

#[test]
fn test_merge_env_overrides() {
    let mut conf = base_conf();
    conf.merge_env_from(|name| match name {
        "PIPES_BRIDGE_EXECUTABLE" => Some("/usr/local/bin/other".to_string()),
        "PIPES_BRIDGE_FINISH_TIMEOUT_MS" => Some("30000".to_string()),
        _ => None,
    });

    let config = PipesConfig::from_job_conf(&conf).unwrap();
    assert_eq!(config.executable, "/usr/local/bin/other");
    assert_eq!(config.finish_timeout, Some(Duration::from_secs(30)));
}

#[test]
fn test_job_conf_serde_is_flat() {
    let conf = base_conf();
    let json = serde_json::to_string(&conf).unwrap();
    assert_eq!(json, r#"{"mapreduce.pipes.executable":"file:///opt/bin/wordcount"}"#);

    let back: JobConf = serde_json::from_str(&json).unwrap();
    assert_eq!(back, conf);
}
