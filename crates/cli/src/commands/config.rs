use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use deferra_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let fields: [(&str, String, &[&str]); 10] = [
        ("database.url", config.database.url.clone(), &["DEFERRA_DATABASE_URL"]),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["DEFERRA_DATABASE_MAX_CONNECTIONS"],
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["DEFERRA_DATABASE_TIMEOUT_SECS"],
        ),
        ("server.bind_address", config.server.bind_address.clone(), &["DEFERRA_SERVER_BIND_ADDRESS"]),
        ("server.port", config.server.port.to_string(), &["DEFERRA_SERVER_PORT"]),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["DEFERRA_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        (
            "lifecycle.max_conflict_retries",
            config.lifecycle.max_conflict_retries.to_string(),
            &["DEFERRA_LIFECYCLE_MAX_CONFLICT_RETRIES"],
        ),
        (
            "lifecycle.code_prefix",
            config.lifecycle.code_prefix.clone(),
            &["DEFERRA_LIFECYCLE_CODE_PREFIX"],
        ),
        (
            "logging.level",
            config.logging.level.clone(),
            &["DEFERRA_LOGGING_LEVEL", "DEFERRA_LOG_LEVEL"],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format),
            &["DEFERRA_LOGGING_FORMAT", "DEFERRA_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, value, env_keys) in fields {
        let source = field_source(
            key_path,
            env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(key_path, &value, source));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    ["deferra.toml", "config/deferra.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    let set_env_key = env_keys.iter().find(|key| {
        env::var(key).map(|value| !value.trim().is_empty()).unwrap_or(false)
    });
    if let Some(env_key) = set_env_key {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use super::{contains_path, render_line};
    use toml::Value;

    #[test]
    fn nested_key_paths_resolve_against_the_file_document() {
        let doc: Value = "[lifecycle]\ncode_prefix = \"MNT\"\n".parse().expect("toml");
        assert!(contains_path(&doc, "lifecycle.code_prefix"));
        assert!(!contains_path(&doc, "lifecycle.max_conflict_retries"));
        assert!(!contains_path(&doc, "server.port"));
    }

    #[test]
    fn lines_render_key_value_and_source() {
        assert_eq!(
            render_line("server.port", "8080", "default".to_string()),
            "- server.port = 8080 (source: default)"
        );
    }
}
