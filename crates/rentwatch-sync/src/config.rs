//! Process settings from the environment and the searches/filters YAML file.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rentwatch_adapters::SearchQuery;
use rentwatch_storage::HttpClientConfig;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::enrich::EnrichmentConfig;
use crate::filter::{compile, FilterSpec};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub config_path: PathBuf,
    pub snapshot_dir: PathBuf,
    pub outbox_dir: PathBuf,
    pub export_dir: PathBuf,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub detail_timeout_secs: u64,
    pub detail_concurrency: usize,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable values fall back to defaults.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let path = |key: &str, default: &str| PathBuf::from(var(key).unwrap_or_else(|| default.to_string()));
        let number = |key: &str, default: u64| var(key).and_then(|v| v.parse().ok()).unwrap_or(default);
        Self {
            config_path: path("RENTWATCH_CONFIG", "./rentwatch.yaml"),
            snapshot_dir: path("RENTWATCH_SNAPSHOT_DIR", "./data/snapshots"),
            outbox_dir: path("RENTWATCH_OUTBOX_DIR", "./data/outbox"),
            export_dir: path("RENTWATCH_EXPORT_DIR", "./data/exports"),
            scheduler_enabled: var("RENTWATCH_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            sync_cron: var("RENTWATCH_SYNC_CRON").unwrap_or_else(|| "0 0 8,20 * * *".to_string()),
            user_agent: var("RENTWATCH_USER_AGENT")
                .unwrap_or_else(|| "rentwatch-bot/0.1".to_string()),
            http_timeout_secs: number("RENTWATCH_HTTP_TIMEOUT_SECS", 20),
            detail_timeout_secs: number("RENTWATCH_DETAIL_TIMEOUT_SECS", 30),
            detail_concurrency: number("RENTWATCH_DETAIL_CONCURRENCY", 4).max(1) as usize,
        }
    }

    pub fn http_client(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            concurrency: self.detail_concurrency,
            ..Default::default()
        }
    }

    pub fn enrichment(&self) -> EnrichmentConfig {
        EnrichmentConfig {
            concurrency: self.detail_concurrency,
            fetch_timeout: Duration::from_secs(self.detail_timeout_secs),
        }
    }
}

fn default_subject() -> String {
    "Openrent search results".to_string()
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifySettings {
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub recipient: Option<String>,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            subject: default_subject(),
            sender: None,
            recipient: None,
        }
    }
}

/// One named search; its snapshot file is keyed by `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub name: String,
    #[serde(flatten)]
    pub query: SearchQuery,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Replaces the top-level filters for this search when present.
    #[serde(default)]
    pub filters: Option<FilterSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchConfig {
    pub searches: Vec<SearchConfig>,
    #[serde(default)]
    pub filters: FilterSpec,
    #[serde(default)]
    pub notify: NotifySettings,
}

impl WatchConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text).context("decoding watch config yaml")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configs that would only fail later, mid-cycle.
    pub fn validate(&self) -> Result<()> {
        if self.searches.is_empty() {
            bail!("no searches configured");
        }
        let mut names = BTreeSet::new();
        for search in &self.searches {
            if search.name.trim().is_empty() {
                bail!("search with term `{}` has no name", search.query.term);
            }
            if search.query.term.trim().is_empty() {
                bail!("search `{}` has an empty term", search.name);
            }
            if !names.insert(search.name.as_str()) {
                bail!("search `{}` is configured twice", search.name);
            }
            compile(self.filters_for(search))
                .with_context(|| format!("compiling filters for search `{}`", search.name))?;
        }
        Ok(())
    }

    pub fn filters_for<'a>(&'a self, search: &'a SearchConfig) -> &'a FilterSpec {
        search.filters.as_ref().unwrap_or(&self.filters)
    }

    pub fn enabled_searches(&self) -> impl Iterator<Item = &SearchConfig> {
        self.searches.iter().filter(|s| s.enabled)
    }

    pub fn search(&self, name: &str) -> Option<&SearchConfig> {
        self.searches.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::filter::FilterBound;
    use rentwatch_core::FieldValue;

    const SAMPLE: &str = r#"
searches:
  - name: camden
    term: Camden Town, London
    params:
      prices_max: 2200
      bedrooms_min: 2
      isLive: true
  - name: hackney
    term: Hackney
    enabled: false
    filters:
      max_rent_per_person: 900
filters:
  max_rent_per_person: 1000
  min_bedrooms: 2
  list_closest_station: [Camden Town, Mornington Crescent]
  furnished: ~
notify:
  recipient: me@example.com
"#;

    #[test]
    fn env_defaults_apply_when_unset() {
        let config = SyncConfig::from_vars(|_| None);
        assert_eq!(config.config_path, PathBuf::from("./rentwatch.yaml"));
        assert!(!config.scheduler_enabled);
        assert_eq!(config.detail_concurrency, 4);
        assert_eq!(config.enrichment().fetch_timeout, Duration::from_secs(30));
    }

    #[test]
    fn env_overrides_are_parsed() {
        let vars: HashMap<&str, &str> = [
            ("RENTWATCH_SCHEDULER_ENABLED", "true"),
            ("RENTWATCH_DETAIL_CONCURRENCY", "0"),
            ("RENTWATCH_DETAIL_TIMEOUT_SECS", "7"),
            ("RENTWATCH_HTTP_TIMEOUT_SECS", "not-a-number"),
            ("RENTWATCH_SNAPSHOT_DIR", "/var/lib/rentwatch"),
        ]
        .into_iter()
        .collect();
        let config = SyncConfig::from_vars(|k| vars.get(k).map(|v| v.to_string()));
        assert!(config.scheduler_enabled);
        assert_eq!(config.detail_concurrency, 1);
        assert_eq!(config.detail_timeout_secs, 7);
        assert_eq!(config.http_timeout_secs, 20);
        assert_eq!(config.snapshot_dir, PathBuf::from("/var/lib/rentwatch"));
    }

    #[test]
    fn parses_searches_filters_and_notify_settings() {
        let config = WatchConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.searches.len(), 2);
        let camden = config.search("camden").unwrap();
        assert_eq!(camden.query.term, "Camden Town, London");
        assert_eq!(camden.query.params.get("prices_max"), Some(&FieldValue::Int(2200)));
        assert_eq!(
            config.filters.get("list_closest_station"),
            Some(&Some(FilterBound::List(vec![
                "Camden Town".into(),
                "Mornington Crescent".into()
            ])))
        );
        assert_eq!(config.filters.get("furnished"), Some(&None));
        assert_eq!(config.notify.subject, "Openrent search results");
        assert_eq!(config.notify.recipient.as_deref(), Some("me@example.com"));

        let enabled: Vec<_> = config.enabled_searches().map(|s| s.name.as_str()).collect();
        assert_eq!(enabled, vec!["camden"]);
    }

    #[test]
    fn per_search_filters_replace_the_defaults() {
        let config = WatchConfig::from_yaml_str(SAMPLE).unwrap();
        let hackney = config.search("hackney").unwrap();
        assert_eq!(config.filters_for(hackney).len(), 1);
        let camden = config.search("camden").unwrap();
        assert_eq!(config.filters_for(camden).len(), 4);
    }

    #[test]
    fn rejects_duplicate_names_and_bad_filters() {
        let dup = "searches:\n  - {name: a, term: x}\n  - {name: a, term: y}\n";
        assert!(WatchConfig::from_yaml_str(dup).is_err());

        let bad = "searches:\n  - {name: a, term: x}\nfilters:\n  list_station: Euston\n";
        let err = WatchConfig::from_yaml_str(bad).unwrap_err();
        assert!(format!("{err:#}").contains("list_station"));

        assert!(WatchConfig::from_yaml_str("searches: []\n").is_err());
    }

    #[tokio::test]
    async fn load_reports_missing_file_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        let err = WatchConfig::load(&path).await.unwrap_err();
        assert!(format!("{err:#}").contains("absent.yaml"));
    }
}
