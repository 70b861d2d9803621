//! Human and JSON renderings of the effective configuration.

use std::path::Path;

use anyhow::{Context, Result};

use super::ProjectConfig;

fn push_kv(output: &mut String, key: &str, value: impl std::fmt::Display) {
    output.push_str(&format!("  {key:<22} {value}\n"));
}

fn config_source_label(config_path: Option<&Path>) -> String {
    config_path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults: no .logos/config.toml found)".to_string())
}

fn system_prompt_label(config: &ProjectConfig) -> String {
    match (&config.provider.system_prompt_file, &config.provider.system_prompt) {
        (Some(path), _) => format!("file {}", path.display()),
        (None, Some(inline)) => format!("inline ({} chars)", inline.chars().count()),
        (None, None) => "(built-in)".to_string(),
    }
}

pub fn render_config_human(config: &ProjectConfig, config_path: Option<&Path>) -> String {
    let mut output = String::new();
    output.push_str("Session\n");
    push_kv(&mut output, "program", &config.session.program);
    if config.session.args.is_empty() {
        push_kv(&mut output, "args", "(none)");
    } else {
        push_kv(&mut output, "args", config.session.args.join(", "));
    }
    push_kv(
        &mut output,
        "work_dir",
        config.session.work_dir.as_deref().unwrap_or("(current)"),
    );
    push_kv(
        &mut output,
        "size",
        format!("{}x{}", config.session.cols, config.session.rows),
    );
    push_kv(
        &mut output,
        "context_window",
        format!("{} chars", config.session.context_window),
    );
    push_kv(
        &mut output,
        "record_injected_input",
        config.session.record_injected_input,
    );
    output.push('\n');

    output.push_str("Prompt\n");
    match &config.prompt.session_token {
        Some(token) => push_kv(&mut output, "session_token", token),
        None => push_kv(&mut output, "pattern", &config.prompt.pattern),
    }
    output.push('\n');

    output.push_str("Provider\n");
    push_kv(&mut output, "kind", config.provider.kind.as_str());
    push_kv(&mut output, "model", config.provider.model());
    push_kv(&mut output, "system_prompt", system_prompt_label(config));
    push_kv(
        &mut output,
        "timeout",
        format!("{}s", config.provider.timeout_secs),
    );
    push_kv(&mut output, "openai.base_url", &config.provider.openai.base_url);
    push_kv(
        &mut output,
        "openai.api_key_env",
        &config.provider.openai.api_key_env,
    );
    push_kv(&mut output, "ollama.host", &config.provider.ollama.host);
    output.push('\n');

    output.push_str("Log\n");
    push_kv(&mut output, "path", config.log.path.display());
    output.push('\n');

    output.push_str("Source Path\n");
    push_kv(&mut output, "path", config_source_label(config_path));

    output
}

pub fn render_config_json(config: &ProjectConfig, config_path: Option<&Path>) -> Result<String> {
    let mut payload = serde_json::to_value(config).context("failed to serialize config")?;
    payload["source_path"] = serde_json::Value::String(config_source_label(config_path));
    serde_json::to_string_pretty(&payload).context("failed to serialize config to JSON")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;

    #[test]
    fn render_config_human_groups_sections() {
        let config = ProjectConfig::default();
        let rendered = render_config_human(&config, None);

        assert!(rendered.contains("Session"));
        assert!(rendered.contains("Provider"));
        assert!(rendered.contains("Source Path"));
        assert!(rendered.contains("128x64"));
        assert!(rendered.contains("gpt-4o"));
        assert!(rendered.contains("(built-in)"));
        assert!(rendered.contains("(defaults: no .logos/config.toml found)"));
    }

    #[test]
    fn render_config_human_prefers_session_token() {
        let mut config = ProjectConfig::default();
        config.prompt.session_token = Some("logos_ab12".to_string());
        config.session.args = vec!["-l".to_string(), "-i".to_string()];
        let rendered = render_config_human(&config, None);
        assert!(rendered.contains("logos_ab12"));
        assert!(rendered.contains("-l, -i"));
        assert!(!rendered.contains("  pattern"));
    }

    #[test]
    fn render_config_json_is_valid_and_contains_expected_fields() {
        let mut config = ProjectConfig::default();
        config.provider.kind = ProviderKind::Ollama;
        let json = render_config_json(&config, Some(Path::new("/p/.logos/config.toml"))).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["session"]["program"], "/bin/bash");
        assert_eq!(value["session"]["context_window"], 5000);
        assert_eq!(value["provider"]["kind"], "ollama");
        assert_eq!(value["provider"]["ollama"]["model"], "llama3:70b-instruct-q5_K_M");
        assert_eq!(value["source_path"], "/p/.logos/config.toml");
    }
}
