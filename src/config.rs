use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::llm::Provider;

/// Runtime configuration, read from the environment (and `.env`).
#[derive(Clone)]
pub struct Config {
    pub provider: Provider,
    pub deepseek_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub tavily_api_key: Option<String>,
    pub deepseek_model: String,
    pub openai_model: String,
    /// Overrides the provider's default API base.
    pub llm_base_url: Option<String>,

    pub max_search_results: usize,
    pub search_timeout_secs: u64,
    pub max_content_length: usize,

    pub max_reflections: u32,
    pub max_sections: usize,
    /// Share of the previous summary's content words a reflective merge must keep.
    /// `0.0` disables the check.
    pub min_summary_retention: f64,

    pub output_dir: PathBuf,
    pub save_intermediate_states: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: Provider::DeepSeek,
            deepseek_api_key: None,
            openai_api_key: None,
            tavily_api_key: None,
            deepseek_model: Provider::DeepSeek.default_model().to_string(),
            openai_model: Provider::OpenAi.default_model().to_string(),
            llm_base_url: None,
            max_search_results: 3,
            search_timeout_secs: 200,
            max_content_length: 20_000,
            max_reflections: 2,
            max_sections: 5,
            min_summary_retention: 0.6,
            output_dir: PathBuf::from("reports"),
            save_intermediate_states: true,
        }
    }
}

impl Config {
    /// Load from the process environment, after applying any `.env` file.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Config::default();

        let provider = match get("DEFAULT_LLM_PROVIDER") {
            Some(raw) => raw.parse::<Provider>().map_err(Error::Config)?,
            None => defaults.provider,
        };

        Ok(Self {
            provider,
            deepseek_api_key: get("DEEPSEEK_API_KEY"),
            openai_api_key: get("OPENAI_API_KEY"),
            tavily_api_key: get("TAVILY_API_KEY"),
            deepseek_model: get("DEEPSEEK_MODEL").unwrap_or(defaults.deepseek_model),
            openai_model: get("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            llm_base_url: get("LLM_BASE_URL"),
            max_search_results: parse_or(&get, "SEARCH_RESULTS_PER_QUERY", defaults.max_search_results)?,
            search_timeout_secs: parse_or(&get, "SEARCH_TIMEOUT", defaults.search_timeout_secs)?,
            max_content_length: parse_or(&get, "SEARCH_CONTENT_MAX_LENGTH", defaults.max_content_length)?,
            max_reflections: parse_or(&get, "MAX_REFLECTIONS", defaults.max_reflections)?,
            max_sections: parse_or(&get, "MAX_PARAGRAPHS", defaults.max_sections)?,
            min_summary_retention: parse_or(&get, "MIN_SUMMARY_RETENTION", defaults.min_summary_retention)?,
            output_dir: get("OUTPUT_DIR").map(PathBuf::from).unwrap_or(defaults.output_dir),
            save_intermediate_states: match get("SAVE_INTERMEDIATE_STATES") {
                Some(raw) => parse_bool(&raw)
                    .ok_or_else(|| Error::Config(format!("SAVE_INTERMEDIATE_STATES: invalid bool '{}'", raw)))?,
                None => defaults.save_intermediate_states,
            },
        })
    }

    /// Check that the selected provider and the search provider have credentials
    /// and that the numeric caps make sense.
    pub fn validate(&self) -> Result<()> {
        if self.llm_api_key().is_none() {
            return Err(Error::Config(format!("{} API key is not set", self.provider)));
        }
        if self.tavily_api_key.is_none() {
            return Err(Error::Config("Tavily API key is not set".to_string()));
        }
        if self.max_sections == 0 {
            return Err(Error::Config("MAX_PARAGRAPHS must be at least 1".to_string()));
        }
        if self.max_search_results == 0 {
            return Err(Error::Config("SEARCH_RESULTS_PER_QUERY must be at least 1".to_string()));
        }
        if self.search_timeout_secs == 0 {
            return Err(Error::Config("SEARCH_TIMEOUT must be at least 1 second".to_string()));
        }
        if !(0.0..=1.0).contains(&self.min_summary_retention) {
            return Err(Error::Config(
                "MIN_SUMMARY_RETENTION must be between 0 and 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn llm_api_key(&self) -> Option<&str> {
        match self.provider {
            Provider::DeepSeek => self.deepseek_api_key.as_deref(),
            Provider::OpenAi => self.openai_api_key.as_deref(),
        }
    }

    pub fn llm_model(&self) -> &str {
        match self.provider {
            Provider::DeepSeek => &self.deepseek_model,
            Provider::OpenAi => &self.openai_model,
        }
    }

    /// Human-readable listing with secrets reduced to Set / Not Set.
    pub fn summary(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set = |key: &Option<String>| if key.is_some() { "Set" } else { "Not Set" };
        writeln!(f, "LLM Provider: {}", self.provider)?;
        writeln!(f, "DeepSeek Model: {}", self.deepseek_model)?;
        writeln!(f, "OpenAI Model: {}", self.openai_model)?;
        if let Some(url) = &self.llm_base_url {
            writeln!(f, "LLM Base URL: {}", url)?;
        }
        writeln!(f, "Max Search Results: {}", self.max_search_results)?;
        writeln!(f, "Search Timeout: {} seconds", self.search_timeout_secs)?;
        writeln!(f, "Max Content Length: {}", self.max_content_length)?;
        writeln!(f, "Max Reflections: {}", self.max_reflections)?;
        writeln!(f, "Max Paragraphs: {}", self.max_sections)?;
        writeln!(f, "Min Summary Retention: {}", self.min_summary_retention)?;
        writeln!(f, "Output Dir: {}", self.output_dir.display())?;
        writeln!(f, "Save Intermediate States: {}", self.save_intermediate_states)?;
        writeln!(f, "DeepSeek API Key: {}", set(&self.deepseek_api_key))?;
        writeln!(f, "OpenAI API Key: {}", set(&self.openai_api_key))?;
        write!(f, "Tavily API Key: {}", set(&self.tavily_api_key))
    }
}

// Keys never show up in Debug output either.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("provider", &self.provider)
            .field("model", &self.llm_model())
            .field("max_search_results", &self.max_search_results)
            .field("max_reflections", &self.max_reflections)
            .field("max_sections", &self.max_sections)
            .field("output_dir", &self.output_dir)
            .finish_non_exhaustive()
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| Error::Config(format!("{}: invalid value '{}': {}", key, raw, e))),
        None => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.provider, Provider::DeepSeek);
        assert_eq!(config.max_search_results, 3);
        assert_eq!(config.search_timeout_secs, 200);
        assert_eq!(config.max_content_length, 20_000);
        assert_eq!(config.max_reflections, 2);
        assert_eq!(config.max_sections, 5);
        assert_eq!(config.output_dir, PathBuf::from("reports"));
        assert!(config.save_intermediate_states);
        assert_eq!(config.llm_model(), "deepseek-chat");
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("DEFAULT_LLM_PROVIDER", "openai"),
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_MODEL", "gpt-4o"),
            ("MAX_REFLECTIONS", "4"),
            ("MAX_PARAGRAPHS", "3"),
            ("SAVE_INTERMEDIATE_STATES", "False"),
            ("OUTPUT_DIR", "/tmp/out"),
            ("LLM_BASE_URL", "http://localhost:1234/v1"),
        ]))
        .unwrap();
        assert_eq!(config.provider, Provider::OpenAi);
        assert_eq!(config.llm_api_key(), Some("sk-test"));
        assert_eq!(config.llm_model(), "gpt-4o");
        assert_eq!(config.max_reflections, 4);
        assert_eq!(config.max_sections, 3);
        assert!(!config.save_intermediate_states);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.llm_base_url.as_deref(), Some("http://localhost:1234/v1"));
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        for pairs in [
            [("MAX_REFLECTIONS", "two")],
            [("DEFAULT_LLM_PROVIDER", "claude")],
            [("SAVE_INTERMEDIATE_STATES", "maybe")],
        ] {
            assert!(matches!(
                Config::from_lookup(lookup(&pairs)),
                Err(Error::Config(_))
            ));
        }
    }

    #[test]
    fn test_validate_requires_keys() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = Config {
            deepseek_api_key: Some("k".into()),
            ..Config::default()
        };
        assert!(config.validate().is_err(), "tavily key still missing");

        let config = Config {
            deepseek_api_key: Some("k".into()),
            tavily_api_key: Some("t".into()),
            ..Config::default()
        };
        config.validate().unwrap();

        let config = Config {
            max_sections: 0,
            ..config
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = Config {
            deepseek_api_key: Some("k".into()),
            tavily_api_key: Some("t".into()),
            search_timeout_secs: 0,
            ..Config::default()
        };
        match config.validate() {
            Err(Error::Config(msg)) => assert!(msg.contains("SEARCH_TIMEOUT")),
            other => panic!("expected config error, got {:?}", other),
        }

        let config = Config {
            search_timeout_secs: 1,
            ..config
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_summary_hides_secrets() {
        let config = Config {
            deepseek_api_key: Some("sk-secret".into()),
            ..Config::default()
        };
        let summary = config.summary();
        assert!(summary.contains("DeepSeek API Key: Set"));
        assert!(summary.contains("Tavily API Key: Not Set"));
        assert!(!summary.contains("sk-secret"));
        assert!(!format!("{:?}", config).contains("sk-secret"));
    }
}
