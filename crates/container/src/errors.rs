//! Ошибки bean-контейнера.
//!
//! - **Configuration**: фатальная ошибка конфигурации, запрос прерывается
//! - **Instantiation**: bean не удалось создать, ошибка уходит вызывающему
//! - **Injection**: ошибка отдельного поля, логируется и не прерывает обработку
//! - **Resolver**: внешний `DependencyResolver` вернул ошибку
//! - **Action**: submit action не найден или завершился ошибкой
//!
//! Отказ в авторизации ошибкой не является: это `Authorization::Denied`.

use anyhow::Context;
use thiserror::Error;

use crate::scope::Scope;

/// Основной error type контейнера
#[derive(Debug, Error, Clone)]
pub enum ContainerError {
    /// Неверная конфигурация: нет auth bean при secure urls, нет marker поля и т.п.
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        component: Option<String>,
    },

    /// Конструирование, injection или lifecycle hook упали
    #[error("Bean '{bean}' ({scope}) could not be instantiated: {message}")]
    Instantiation {
        bean: String,
        scope: Scope,
        message: String,
    },

    #[error("Injection of '{bean}.{field}' failed: {message}")]
    Injection {
        bean: String,
        field: String,
        message: String,
    },

    #[error("Resolver failed for '{declared_name}' ({declared_type}): {message}")]
    Resolver {
        declared_name: String,
        declared_type: String,
        message: String,
    },

    #[error("Action '{bean}.{action}' failed: {message}")]
    Action {
        bean: String,
        action: String,
        message: String,
    },
}

pub type ContainerResult<T> = Result<T, ContainerError>;

impl ContainerError {
    pub fn configuration(message: impl Into<String>, component: Option<impl Into<String>>) -> Self {
        ContainerError::Configuration {
            message: message.into(),
            component: component.map(Into::into),
        }
    }

    pub fn instantiation(
        bean: impl Into<String>,
        scope: Scope,
        cause: impl std::fmt::Display,
    ) -> Self {
        ContainerError::Instantiation {
            bean: bean.into(),
            scope,
            message: cause.to_string(),
        }
    }

    pub fn injection(
        bean: impl Into<String>,
        field: impl Into<String>,
        cause: impl std::fmt::Display,
    ) -> Self {
        ContainerError::Injection {
            bean: bean.into(),
            field: field.into(),
            message: cause.to_string(),
        }
    }

    pub fn action(
        bean: impl Into<String>,
        action: impl Into<String>,
        cause: impl std::fmt::Display,
    ) -> Self {
        ContainerError::Action {
            bean: bean.into(),
            action: action.into(),
            message: cause.to_string(),
        }
    }

    /// Категория ошибки для логов
    pub fn category(&self) -> &'static str {
        match self {
            ContainerError::Configuration { .. } => "configuration",
            ContainerError::Instantiation { .. } => "instantiation",
            ContainerError::Injection { .. } => "injection",
            ContainerError::Resolver { .. } => "resolver",
            ContainerError::Action { .. } => "action",
        }
    }

    /// Фатальные ошибки прерывают обработку запроса
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ContainerError::Configuration { .. } | ContainerError::Instantiation { .. }
        )
    }
}

/// Helper trait для добавления контекста к `ContainerResult`
pub trait ContainerContextExt<T> {
    fn container_context(self, message: &str) -> anyhow::Result<T>;
}

impl<T> ContainerContextExt<T> for ContainerResult<T> {
    fn container_context(self, message: &str) -> anyhow::Result<T> {
        self.map_err(anyhow::Error::from)
            .with_context(|| message.to_string())
    }
}
