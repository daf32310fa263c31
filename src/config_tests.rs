use super::*;
use std::collections::HashMap;
use std::time::Duration;

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| map.get(name).cloned()
}

#[test]
fn default_config_validates_and_round_trips_through_stub() {
    let config = default_config();
    validate_config(&config).unwrap();
    let stub = config_stub().unwrap();
    let parsed: Config = serde_json::from_str(&stub).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn minimal_file_fills_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "database": { "path": "/data/shop.db" },
            "answer": { "language": "Vietnamese", "currency": "VND" },
            "llm": { "classify": { "model": "tiny", "max_tokens": 8 } }
        }"#,
    )
    .unwrap();
    let config = load_config(&path).unwrap();
    assert_eq!(config.database.path, PathBuf::from("/data/shop.db"));
    assert_eq!(config.database.read_pool_size, DEFAULT_POOL_SIZE);
    assert_eq!(config.answer.currency, "VND");
    assert_eq!(config.answer.max_rows, 50);
    assert_eq!(config.llm.classify.model, "tiny");
    assert_eq!(config.llm.classify.temperature, 0.1);
    assert_eq!(config.llm.summary, LlmConfig::default().summary);
    assert_eq!(config.generator, GeneratorConfig::Prompted);
}

#[test]
fn unknown_fields_are_rejected() {
    let err = serde_json::from_str::<Config>(r#"{"schema_version": 1, "databse": {}}"#);
    assert!(err.is_err());
}

#[test]
fn cloud_generator_parses_with_defaults() {
    let config: Config = serde_json::from_str(
        r#"{"schema_version": 1, "generator": {"kind": "cloud", "model": "shop"}}"#,
    )
    .unwrap();
    assert_eq!(
        config.generator,
        GeneratorConfig::Cloud {
            endpoint: DEFAULT_CLOUD_ENDPOINT.to_string(),
            model: "shop".to_string(),
            api_key_env: "VANNA_API_KEY".to_string(),
        }
    );
}

#[test]
fn env_overrides_apply() {
    let mut config = default_config();
    apply_env_overrides(
        &mut config,
        env_from(&[
            ("BIZQ_DB_PATH", "/tmp/other.db"),
            ("OLLAMA_HOST", "http://gpu:11434"),
            ("BIZQ_LLM_TIMEOUT_SECS", "15"),
        ]),
    )
    .unwrap();
    assert_eq!(config.database.path, PathBuf::from("/tmp/other.db"));
    assert_eq!(
        config.llm.backend,
        LlmBackend::Ollama {
            host: "http://gpu:11434".to_string()
        }
    );
    assert_eq!(config.assistant_settings().timeouts.llm, Duration::from_secs(15));
}

#[test]
fn command_override_wins_over_host() {
    let mut config = default_config();
    apply_env_overrides(
        &mut config,
        env_from(&[("BIZQ_LM_COMMAND", "llm -m small"), ("OLLAMA_HOST", "gpu")]),
    )
    .unwrap();
    assert_eq!(
        config.llm.backend,
        LlmBackend::Command {
            command: "llm -m small".to_string()
        }
    );
}

#[test]
fn bad_timeout_override_is_an_error() {
    let mut config = default_config();
    let err = apply_env_overrides(&mut config, env_from(&[("BIZQ_LLM_TIMEOUT_SECS", "soon")]))
        .unwrap_err();
    assert!(err.to_string().contains("BIZQ_LLM_TIMEOUT_SECS"));
}

#[test]
fn validate_rejects_bad_values() {
    let mut config = default_config();
    config.schema_version = 2;
    assert!(validate_config(&config).is_err());

    let mut config = default_config();
    config.llm.generate.model = " ".to_string();
    let err = validate_config(&config).unwrap_err();
    assert!(err.to_string().contains("llm.generate.model"));

    let mut config = default_config();
    config.answer.max_rows = 0;
    assert!(validate_config(&config).is_err());

    let mut config = default_config();
    config.request_timeout_secs = Some(0);
    assert!(validate_config(&config).is_err());
}

#[test]
fn validate_checks_command_on_path() {
    let mut config = default_config();
    config.llm.backend = LlmBackend::Command {
        command: "definitely-not-a-real-lm-binary --flag".to_string(),
    };
    let err = validate_config(&config).unwrap_err();
    assert!(err.to_string().contains("not found on PATH"));
}

#[test]
fn settings_follow_config() {
    let mut config = default_config();
    config.answer.sample_rows = 7;
    config.request_timeout_secs = None;
    config.database.query_timeout_ms = 250;
    let settings = config.assistant_settings();
    assert_eq!(settings.synthesis.sample_rows, 7);
    assert_eq!(settings.timeouts.request, None);
    assert_eq!(settings.timeouts.query, Duration::from_millis(250));
    assert_eq!(settings.dialect, "SQLite");
}

#[test]
fn explicit_flag_wins_path_resolution() {
    let path = Path::new("/etc/bizq.json");
    assert_eq!(resolve_config_path(Some(path)), Some(path.to_path_buf()));
}

#[test]
fn empty_docs_dir_loads_as_retriever() {
    let dir = tempfile::tempdir().unwrap();
    let docs = build_documents(&DocsConfig {
        dir: Some(dir.path().to_path_buf()),
    })
    .unwrap();
    assert!(docs.related_docs("what is the returns policy").unwrap().is_empty());
}

#[test]
fn build_assistant_opens_configured_database() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("shop.db");
    rusqlite::Connection::open(&db)
        .unwrap()
        .execute_batch("CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT);")
        .unwrap();
    let mut config = default_config();
    config.database.path = db;
    let assistant = build_assistant(&config).unwrap();
    assert_eq!(assistant.generator_name(), "prompted");
    let hint = assistant.schema_hint("list products").unwrap();
    assert_eq!(hint.tables, vec!["products"]);

    config.database.path = dir.path().join("missing.db");
    let err = build_assistant(&config).err().unwrap();
    assert!(format!("{err:#}").contains("open database"));
}
