use common::{
    init_structured_logging, ExecutionContext, JsonFormatter, JsonVisitor, LoggingConfig,
    OperationTimer, PerformanceMetrics, StructuredLogEntry,
};
use serde_json::Value;
use std::collections::HashMap;
use tracing::Level;

#[test]
fn test_structured_log_entry_roundtrip_fields() {
    let mut fields = HashMap::new();
    fields.insert("bean".to_string(), Value::String("cart".to_string()));

    let entry = StructuredLogEntry {
        timestamp: chrono::Utc::now().to_rfc3339(),
        level: "WARN".to_string(),
        target: "container::lifecycle".to_string(),
        message: "Bean construction rolled back".to_string(),
        fields,
        context: None,
        performance: None,
    };

    let json: Value = serde_json::to_value(&entry).unwrap();
    // fields разворачиваются на верхний уровень
    assert_eq!(json["bean"], "cart");
    assert!(json.get("context").is_none());
    assert!(json.get("performance").is_none());
}

#[test]
fn test_execution_context_defaults() {
    let context = ExecutionContext::default();
    assert!(context.request_id.is_none());
    assert!(context.session_id.is_none());
    assert_eq!(context.pid, std::process::id());
    assert!(!context.hostname.is_empty());
}

#[test]
fn test_json_formatter_collects_dispatch_metrics() {
    let visitor = JsonVisitor::default()
        .with_message("Request dispatched")
        .with_field("duration_ms", Value::Number(15.into()))
        .with_field("constructed", Value::Number(2.into()))
        .with_field("finalized", Value::Number(1.into()));

    let entry = JsonFormatter::new(true).entry(&Level::INFO, "container::router", visitor);
    assert_eq!(
        entry.performance,
        Some(PerformanceMetrics {
            duration_ms: Some(15),
            beans_constructed: Some(2),
            beans_finalized: Some(1),
        })
    );
}

#[test]
fn test_logging_config_from_toml() {
    let config: LoggingConfig = toml::from_str("level = \"warn\"\njson_output = true\n").unwrap();
    assert!(config.json_output);
    assert_eq!(config.max_level(), Level::WARN);
    assert!(config.include_context);
}

#[test]
fn test_init_twice_fails() {
    let config = LoggingConfig {
        level: "debug".to_string(),
        json_output: true,
        ..LoggingConfig::default()
    };
    // Глобальный subscriber ставится только один раз на процесс
    let first = init_structured_logging(config.clone());
    let second = init_structured_logging(config);
    assert!(first.is_ok());
    assert!(second.is_err());
}

#[test]
fn test_operation_timer_with_error() {
    let mut timer = OperationTimer::new("dispatch");
    timer.add_field("path", "/admin");
    let result: Result<(), String> = Err("denied".to_string());
    let _ = timer.finish_with_result(&result);
}
