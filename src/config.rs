//! Configuration: named sources and inheritable search templates.
//!
//! The YAML config file declares the log stores logfuse can reach
//! (`sources`) and reusable search templates (`searches`). A template may
//! name a parent with `inherit`; resolution walks the chain root-first and
//! applies [`LogSearch::merge_into`] at each step, so children override only
//! what they explicitly set.
//!
//! ```yaml
//! sources:
//!   prod-es:
//!     type: opensearch
//!     url: http://localhost:9200
//!     options:
//!       index: prod-logs
//! searches:
//!   base:
//!     search:
//!       range: { last: 1h }
//!   errors:
//!     inherit: base
//!     search:
//!       filter: { field: level, value: ERROR }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::lines::LineReaderBackend;
use crate::backend::opensearch::{OpenSearchBackend, OpenSearchClient};
use crate::backend::splunk::{SplunkBackend, SplunkClient};
use crate::backend::Backend;
use crate::error::{FuseError, Result};
use crate::search::LogSearch;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Named log stores.
    pub sources: IndexMap<String, SourceConfig>,
    /// Named search templates.
    pub searches: IndexMap<String, SearchTemplate>,
}

/// One configured log store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Backend kind.
    #[serde(rename = "type")]
    pub kind: SourceKind,

    /// Base URL for HTTP backends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Basic-auth username (Splunk).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Basic-auth password; supports `${VAR}` substitution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Default options merged into every search against this source.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub options: IndexMap<String, Value>,
}

/// Supported backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// OpenSearch or Elasticsearch over HTTP.
    Opensearch,
    /// Alias for [`SourceKind::Opensearch`].
    Elasticsearch,
    /// Splunk search REST API.
    Splunk,
    /// CloudWatch Logs Insights.
    Cloudwatch,
    /// A command whose stdout is scanned line by line.
    Command,
}

/// A named, inheritable search template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchTemplate {
    /// Parent template name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inherit: Option<String>,
    /// The template body.
    pub search: LogSearch,
}

impl Config {
    /// Load configuration from the default location, or defaults when the
    /// file does not exist.
    pub fn load() -> Result<Self> {
        let config_path = default_config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FuseError::io(format!("Failed to read config file: {}", path.display()), e)
        })?;
        serde_yaml::from_str(&content).map_err(|e| FuseError::Config {
            message: format!("{}: {e}", path.display()),
        })
    }

    /// Look up a source by name.
    pub fn source(&self, name: &str) -> Result<&SourceConfig> {
        self.sources.get(name).ok_or_else(|| FuseError::UnknownName {
            kind: "source",
            name: name.to_string(),
        })
    }

    /// Resolve a search template, applying the inheritance chain root-first.
    pub fn resolve_search(&self, name: &str) -> Result<LogSearch> {
        let mut chain: Vec<&SearchTemplate> = Vec::new();
        let mut visited: Vec<&str> = Vec::new();
        let mut current = Some(name);

        while let Some(template_name) = current {
            if visited.contains(&template_name) {
                return Err(FuseError::config(format!(
                    "search template inheritance cycle through '{template_name}'"
                )));
            }
            let template =
                self.searches
                    .get(template_name)
                    .ok_or_else(|| FuseError::UnknownName {
                        kind: "search",
                        name: template_name.to_string(),
                    })?;
            visited.push(template_name);
            chain.push(template);
            current = template.inherit.as_deref();
        }

        // Walk root-first so each child overrides its parent.
        let mut resolved = LogSearch::default();
        for template in chain.iter().rev() {
            resolved = resolved.merge_into(&template.search);
        }
        Ok(resolved)
    }
}

impl SourceConfig {
    /// Build the backend adapter for this source.
    pub fn build_backend(&self) -> Result<Arc<dyn Backend>> {
        match self.kind {
            SourceKind::Opensearch | SourceKind::Elasticsearch => {
                let url = self.require_url("opensearch")?;
                Ok(Arc::new(OpenSearchBackend::new(OpenSearchClient::new(url))))
            }
            SourceKind::Splunk => {
                let url = self.require_url("splunk")?;
                let mut client = SplunkClient::new(url);
                if let (Some(username), Some(password)) = (&self.username, &self.password) {
                    client = client.with_basic_auth(username, password);
                }
                Ok(Arc::new(SplunkBackend::new(client)))
            }
            SourceKind::Command => Ok(Arc::new(LineReaderBackend::local())),
            // The Insights API client comes from the cloud SDK, which stays
            // outside this crate; wire a CloudWatchBackend in from the
            // embedding application.
            SourceKind::Cloudwatch => Err(FuseError::unsupported(
                "cloudwatch sources require an InsightsApi client supplied programmatically",
            )),
        }
    }

    /// Apply this source's defaults to a search: the source's options act as
    /// the parent side of the merge, and the context id is stamped.
    #[must_use]
    pub fn apply_to(&self, context_id: &str, search: &LogSearch) -> LogSearch {
        let parent = LogSearch {
            options: self.options.clone(),
            ..LogSearch::default()
        };
        let mut applied = parent.merge_into(search);
        applied.options.insert(
            crate::search::CONTEXT_ID_OPTION.to_string(),
            Value::String(context_id.to_string()),
        );
        applied
    }

    fn require_url(&self, backend: &'static str) -> Result<String> {
        self.url
            .clone()
            .ok_or_else(|| FuseError::missing_option("url", backend))
    }
}

/// Get the default configuration path.
pub fn default_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().ok_or_else(|| FuseError::Unsupported {
        feature: "config directory discovery".to_string(),
    })?;
    Ok(config_dir.join("logfuse").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::Opt;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const SAMPLE: &str = r#"
sources:
  prod-es:
    type: opensearch
    url: http://localhost:9200
    options:
      index: prod-logs
  audit:
    type: splunk
    url: https://splunk:8089
    username: admin
    password: secret
  app-tail:
    type: command
    options:
      cmd: "tail -f /var/log/app.log"
searches:
  base:
    search:
      range: { last: 1h }
      size: 500
  errors:
    inherit: base
    search:
      size: 100
      filter: { field: level, value: ERROR }
"#;

    fn sample() -> Config {
        serde_yaml::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn parses_sources_and_searches() {
        let config = sample();
        assert_eq!(config.sources.len(), 3);
        assert_eq!(config.source("prod-es").unwrap().kind, SourceKind::Opensearch);
        assert!(config.source("nope").is_err());
    }

    #[test]
    fn inheritance_resolves_root_first() {
        let config = sample();
        let resolved = config.resolve_search("errors").unwrap();

        // Child size wins, parent range survives.
        assert_eq!(resolved.size, Opt::Value(100));
        assert_eq!(resolved.range.last.as_deref(), Some("1h"));
        assert!(resolved.filter.is_some());
    }

    #[test]
    fn inheritance_cycles_are_rejected() {
        let yaml = r#"
searches:
  a:
    inherit: b
    search: {}
  b:
    inherit: a
    search: {}
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.resolve_search("a").is_err());
    }

    #[test]
    fn unknown_template_is_an_error() {
        let config = sample();
        assert!(matches!(
            config.resolve_search("missing"),
            Err(FuseError::UnknownName { kind: "search", .. })
        ));
    }

    #[test]
    fn apply_to_stamps_context_and_merges_options() {
        let config = sample();
        let source = config.source("prod-es").unwrap();

        let mut search = LogSearch::default();
        search.size = Opt::Value(10);
        let applied = source.apply_to("prod-es", &search);

        assert_eq!(applied.option_str("index").unwrap(), "prod-logs");
        assert_eq!(applied.context_id(), "prod-es");
        assert_eq!(applied.size, Opt::Value(10));
    }

    #[test]
    fn source_options_lose_to_search_options() {
        let config = sample();
        let source = config.source("prod-es").unwrap();

        let mut search = LogSearch::default();
        search
            .options
            .insert("index".to_string(), Value::String("other".to_string()));
        let applied = source.apply_to("prod-es", &search);
        assert_eq!(applied.option_str("index").unwrap(), "other");
    }

    #[test]
    fn load_from_reads_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert!(config.sources.contains_key("audit"));
    }

    #[test]
    fn missing_url_is_reported() {
        let yaml = r#"
sources:
  broken:
    type: opensearch
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let err = config.source("broken").unwrap().build_backend().unwrap_err();
        assert!(matches!(err, FuseError::MissingOption { .. }));
    }

    #[test]
    fn cloudwatch_sources_need_programmatic_wiring() {
        let yaml = r#"
sources:
  cw:
    type: cloudwatch
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let err = config.source("cw").unwrap().build_backend().unwrap_err();
        assert!(matches!(err, FuseError::Unsupported { .. }));
    }
}
