use super::*;
use serial_test::serial;
use tempfile::TempDir;

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.ollama.protocol, "http");
    assert_eq!(config.ollama.host, "localhost");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.ollama.model, "nomic-embed-text:latest");
    assert_eq!(config.memory.chunk_size, 1000);
    assert_eq!(config.memory.top_k, 3);
    assert_eq!(config.memory.embed_concurrency, 1);
    assert_eq!(config.embedding.retry_attempts, 3);
    assert_eq!(config.flashcards.max_input_chars, 30_000);
}

#[test]
fn config_validation() {
    let config = Config::default();
    assert!(config.validate().is_ok());

    let mut invalid_config = config.clone();
    invalid_config.ollama.protocol = "ftp".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.model = String::new();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.memory.chunk_size = 0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidChunkSize(0))
    ));

    let mut invalid_config = config.clone();
    invalid_config.memory.top_k = 0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidTopK(0))
    ));

    let mut invalid_config = config.clone();
    invalid_config.memory.collection = "my notes".to_string();
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidCollection(_))
    ));

    let mut invalid_config = config.clone();
    invalid_config.embedding.retry_attempts = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config;
    invalid_config.flashcards.min_input_chars = 40_000;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidFlashcardBounds(40_000, 30_000))
    ));
}

#[test]
fn ollama_url_generation() {
    let config = Config::default();
    let url = config
        .ollama_url()
        .expect("should generate ollama_url successfully");
    assert_eq!(url.as_str(), "http://localhost:11434/");
}

#[test]
fn toml_serialization() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_toml_uses_defaults() {
    let partial_toml = r#"
        [memory]
        chunk_size = 500
    "#;

    let config: Config = toml::from_str(partial_toml).expect("should parse partial toml");
    assert_eq!(config.memory.chunk_size, 500);
    assert_eq!(config.memory.top_k, 3);
    assert_eq!(config.ollama, OllamaConfig::default());
}

#[test]
fn setter_validation() {
    let mut config = OllamaConfig::default();

    assert!(config.set_protocol("https".to_string()).is_ok());
    assert!(config.set_host("example.com".to_string()).is_ok());
    assert!(config.set_port(8080).is_ok());
    assert!(config.set_model("new-model".to_string()).is_ok());
    assert!(config.set_generation_model("writer".to_string()).is_ok());

    assert!(config.set_protocol("ftp".to_string()).is_err());
    assert!(config.set_protocol("HTTP".to_string()).is_err());
    assert!(config.set_port(0).is_err());
    assert!(config.set_model(String::new()).is_err());
    assert!(config.set_generation_model("  ".to_string()).is_err());

    let mut memory = MemoryConfig::default();
    assert!(memory.set_chunk_size(250).is_ok());
    assert!(memory.set_top_k(5).is_ok());
    assert!(memory.set_chunk_size(0).is_err());
    assert!(memory.set_top_k(101).is_err());
    assert_eq!(memory.chunk_size, 250);
    assert_eq!(memory.top_k, 5);
}

#[test]
fn load_missing_config_returns_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let config = Config::load_from(temp_dir.path()).expect("should load defaults");

    assert_eq!(config.ollama, OllamaConfig::default());
    assert_eq!(config.memory, MemoryConfig::default());
    assert_eq!(config.base_dir.as_deref(), Some(temp_dir.path()));
}

#[test]
fn save_and_reload() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config {
        base_dir: Some(temp_dir.path().join("nested")),
        ..Config::default()
    };
    config.memory.top_k = 7;
    config.ollama.host = "ollama.internal".to_string();

    config.save().expect("should save config");

    let loaded = Config::load_from(temp_dir.path().join("nested")).expect("should reload");
    assert_eq!(loaded, config);
}

#[test]
fn load_rejects_invalid_values() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[memory]\ntop_k = 0\n",
    )
    .expect("should write config");

    assert!(Config::load_from(temp_dir.path()).is_err());
}

#[test]
fn vector_database_path_is_under_base_dir() {
    let config = Config {
        base_dir: Some(PathBuf::from("/tmp/study")),
        ..Config::default()
    };

    let path = config
        .vector_database_path()
        .expect("should build vector path");
    assert_eq!(path, PathBuf::from("/tmp/study/vectors"));
}

#[test]
#[serial]
fn config_dir_honours_env_override() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    // SAFETY: serialized with other tests touching the environment
    unsafe { std::env::set_var(HOME_ENV_VAR, temp_dir.path()) };
    let dir = Config::config_dir();
    unsafe { std::env::remove_var(HOME_ENV_VAR) };

    assert_eq!(
        dir.expect("should resolve config dir"),
        temp_dir.path().to_path_buf()
    );
}
