mod fixtures;

use anyhow::Result;
use container::{ConfigLoader, ContainerConfig, Method, StaticResolver, WebContainer};
use fixtures::{shop_registry, Counters};
use std::fs;
use tempfile::TempDir;

const SHOP_TOML: &str = r#"
[security]
non_secure_only = ["/register"]

[[security.url_patterns]]
url = "/admin"
secure = true
roles = ["manager"]

[[security.url_patterns]]
url = "/orders/*"
secure = true
roles = ["*"]

[pages]
"/orders" = ["orderForm", "orderTable"]
"/checkout" = ["wizard"]

[logging]
level = "warn"
json_output = true
"#;

const SHOP_YAML: &str = r#"
security:
  non_secure_only: [/register]
  url_patterns:
    - url: /admin
      secure: true
      roles: [manager]
    - url: /orders/*
      secure: true
      roles: ["*"]
pages:
  /orders: [orderForm, orderTable]
  /checkout: [wizard]
logging:
  level: warn
  json_output: true
"#;

#[test]
fn test_toml_and_yaml_agree() -> Result<()> {
    let dir = TempDir::new()?;
    let toml_path = dir.path().join("container.toml");
    let yaml_path = dir.path().join("container.yml");
    fs::write(&toml_path, SHOP_TOML)?;
    fs::write(&yaml_path, SHOP_YAML)?;

    let from_toml = ConfigLoader::load(&toml_path)?;
    let from_yaml = ConfigLoader::load(&yaml_path)?;
    assert_eq!(from_toml, from_yaml);
    assert!(from_toml.security.is_secure("/orders/history"));
    assert_eq!(from_toml.pages.beans_for("/checkout"), &["wizard".to_string()]);
    assert!(from_toml.logging.json_output);
    Ok(())
}

#[test]
fn test_saved_config_loads_back() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("saved.toml");
    let config = ConfigLoader::from_toml_str(SHOP_TOML)?;

    fs::write(&path, ConfigLoader::to_toml_string(&config)?)?;
    assert_eq!(ConfigLoader::load(&path)?, config);
    Ok(())
}

#[test]
fn test_unsupported_extension() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("container.ini");
    fs::write(&path, "[security]")?;

    let err = ConfigLoader::load(&path).unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains("Unsupported configuration file format"));
    assert!(message.contains("container.ini"));
    Ok(())
}

#[test]
fn test_missing_file_has_context() {
    let err = ConfigLoader::load("/definitely/not/here.toml").unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to read configuration file"));
}

#[test]
fn test_empty_config_is_default() -> Result<()> {
    let config = ConfigLoader::from_toml_str("")?;
    assert_eq!(config, ContainerConfig::default());
    Ok(())
}

#[test]
fn test_container_from_loaded_config() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("container.yaml");
    fs::write(&path, SHOP_YAML)?;

    let counters = Counters::default();
    let container = WebContainer::builder(shop_registry(&counters))
        .config(ConfigLoader::load(&path)?)
        .resolver(StaticResolver::new())
        .build()?;

    let session = container.open_session();
    let ctx = container.begin_request(&session);
    let dispatch = container.dispatch(&ctx, Method::Get, "/checkout", None)?;
    assert!(dispatch.bean("wizard").is_some());
    assert_eq!(counters.constructed(), 1);
    Ok(())
}

#[test]
fn test_bean_named_like_login_path_is_rejected() {
    use container::{AuthDefinition, BeanDefinition, Registry, Scope};

    #[derive(Default)]
    struct Account;
    #[derive(Default)]
    struct Panel;

    let registry = Registry::builder()
        .auth(AuthDefinition::new("account", "/signin", "/home", Account::default))
        .bean(BeanDefinition::new("/signin", Scope::Request, Panel::default))
        .build()
        .expect("registry itself is valid");

    let err = WebContainer::builder(registry).build().unwrap_err();
    assert!(err.to_string().contains("collides with a served path"));
}
