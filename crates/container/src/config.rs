//! Конфигурация контейнера: URL security, manifest страниц, логирование.
//!
//! Поддерживаемые форматы файлов: TOML, YAML, JSON.

use anyhow::{anyhow, Context, Result};
use common::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// Правило безопасности для одного URL.
///
/// `url` сравнивается точно; шаблон вида `/admin/*` покрывает всё под `/admin/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlPattern {
    pub url: String,
    #[serde(default)]
    pub secure: bool,
    /// `None`: доступ не ограничен ролями
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<BTreeSet<String>>,
}

impl UrlPattern {
    pub fn secure(url: impl Into<String>, roles: Option<&[&str]>) -> Self {
        Self {
            url: url.into(),
            secure: true,
            roles: roles.map(|roles| roles.iter().map(|role| role.to_string()).collect()),
        }
    }

    pub fn open(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            secure: false,
            roles: None,
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self.url.strip_suffix("/*") {
            Some(prefix) => path == prefix || path.starts_with(&format!("{}/", prefix)),
            None => self.url == "*" || self.url == path,
        }
    }

    /// Длина совпавшей части, точное совпадение сильнее любого шаблона
    fn specificity(&self, path: &str) -> usize {
        if self.url == path {
            usize::MAX
        } else {
            self.url.len()
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.url == "*" || self.url.ends_with("/*")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Пути, недоступные аутентифицированному пользователю (redirect на home)
    pub non_secure_only: Vec<String>,
    pub url_patterns: Vec<UrlPattern>,
}

impl SecurityConfig {
    /// Самое специфичное правило для `path`
    pub fn pattern_for(&self, path: &str) -> Option<&UrlPattern> {
        self.url_patterns
            .iter()
            .filter(|pattern| pattern.matches(path))
            .max_by_key(|pattern| pattern.specificity(path))
    }

    pub fn is_secure(&self, path: &str) -> bool {
        self.pattern_for(path).map(|pattern| pattern.secure).unwrap_or(false)
    }

    pub fn is_non_secure_only(&self, path: &str) -> bool {
        self.non_secure_only.iter().any(|url| url == path)
    }

    pub fn has_secure_urls(&self) -> bool {
        self.url_patterns.iter().any(|pattern| pattern.secure)
    }

    /// Конкретные (не шаблонные) пути, упомянутые в конфигурации
    pub fn served_paths(&self) -> impl Iterator<Item = &str> {
        self.url_patterns
            .iter()
            .filter(|pattern| !pattern.is_wildcard())
            .map(|pattern| pattern.url.as_str())
            .chain(self.non_secure_only.iter().map(String::as_str))
    }
}

/// Путь -> упорядоченные имена bean-ов страницы
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageManifest(BTreeMap<String, Vec<String>>);

impl PageManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page<I, S>(mut self, path: impl Into<String>, beans: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0.insert(path.into(), beans.into_iter().map(Into::into).collect());
        self
    }

    pub fn beans_for(&self, path: &str) -> &[String] {
        self.0.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn bean_names(&self) -> BTreeSet<&str> {
        self.0.values().flatten().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub security: SecurityConfig,
    pub pages: PageManifest,
    pub logging: LoggingConfig,
}

/// Загрузка `ContainerConfig` из файлов и строк
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigLoader;

impl ConfigLoader {
    /// Формат выбирается по расширению файла
    pub fn load<P: AsRef<Path>>(path: P) -> Result<ContainerConfig> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

        let config = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            Some("json") => Self::from_json_str(&content),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            other => Err(anyhow!("Unsupported configuration file format: {:?}", other)),
        };
        config.with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<ContainerConfig> {
        toml::from_str(content).context("Failed to parse TOML configuration")
    }

    pub fn from_yaml_str(content: &str) -> Result<ContainerConfig> {
        serde_yaml::from_str(content).context("Failed to parse YAML configuration")
    }

    pub fn from_json_str(content: &str) -> Result<ContainerConfig> {
        serde_json::from_str(content).context("Failed to parse JSON configuration")
    }

    pub fn to_toml_string(config: &ContainerConfig) -> Result<String> {
        toml::to_string_pretty(config).context("Failed to serialize configuration")
    }
}
