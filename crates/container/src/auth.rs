//! AuthGate: аутентификация и авторизация до запуска обработчиков.
//!
//! | secure | authenticated | дополнительно                     | результат      |
//! |--------|---------------|-----------------------------------|----------------|
//! | да     | да            |                                   | proceed        |
//! | да     | нет           |                                   | redirect login |
//! | нет    | да            | путь = login или non-secure-only  | redirect home  |
//! | нет    | да            | иначе                             | proceed        |
//! | нет    | нет           |                                   | proceed        |

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::config::SecurityConfig;
use crate::context::{ScopeContext, REQUEST_USER_ACCESS};
use crate::errors::{ContainerError, ContainerResult};
use crate::lifecycle::LifecycleManager;
use crate::path::PathDecoder;
use crate::registry::{ActionSpec, AuthDescriptor};

/// HTTP статус отказа в доступе
pub const FORBIDDEN: u16 = 403;

/// Роль, открывающая страницу любому аутентифицированному пользователю
pub const ANY_ROLE: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// Обработка продолжается по этому пути
    Proceed(String),
    Redirect(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Granted,
    Denied { status: u16 },
}

impl Authorization {
    pub fn is_granted(self) -> bool {
        matches!(self, Authorization::Granted)
    }
}

pub struct AuthGate {
    lifecycle: Arc<LifecycleManager>,
    security: Arc<SecurityConfig>,
    decoder: Arc<dyn PathDecoder>,
}

impl AuthGate {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        security: Arc<SecurityConfig>,
        decoder: Arc<dyn PathDecoder>,
    ) -> Self {
        Self {
            lifecycle,
            security,
            decoder,
        }
    }

    pub fn security(&self) -> &SecurityConfig {
        &self.security
    }

    fn auth_descriptor(&self) -> Option<&Arc<AuthDescriptor>> {
        self.lifecycle.registry().auth()
    }

    pub fn login_path(&self) -> Option<String> {
        self.auth_descriptor()
            .map(|auth| self.decoder.decode_path(auth.login_path()).into_owned())
    }

    pub fn home_path(&self) -> Option<String> {
        self.auth_descriptor()
            .map(|auth| self.decoder.decode_path(auth.home_path()).into_owned())
    }

    /// Аутентифицирован ли пользователь сессии. Auth bean создаётся при первом обращении.
    pub fn is_authenticated(&self, ctx: &ScopeContext) -> ContainerResult<bool> {
        let auth = self.auth_descriptor().ok_or_else(|| {
            ContainerError::configuration("no authentication bean is registered", None::<String>)
        })?;
        let marker = auth.marker.as_ref().ok_or_else(|| {
            ContainerError::configuration(
                format!("authentication bean '{}' declares no authentication marker", auth.name()),
                Some(auth.name()),
            )
        })?;

        let bean = self.lifecycle.instantiate_auth(ctx)?;
        let state = bean.state_read();
        Ok((marker.read)(&**state))
    }

    /// Решение аутентификации для `path`
    pub fn authenticate(&self, path: &str, ctx: &ScopeContext) -> ContainerResult<AuthDecision> {
        let secure = self.security.is_secure(path);

        let Some(auth) = self.auth_descriptor() else {
            if secure {
                return Err(ContainerError::configuration(
                    format!("path '{}' is secure but no authentication bean is registered", path),
                    Some(path),
                ));
            }
            return Ok(AuthDecision::Proceed(path.to_string()));
        };

        let authenticated = self.is_authenticated(ctx)?;
        let decision = match (secure, authenticated) {
            (true, true) => AuthDecision::Proceed(path.to_string()),
            (true, false) => {
                AuthDecision::Redirect(self.decoder.decode_path(auth.login_path()).into_owned())
            }
            (false, true) => {
                let login = self.decoder.decode_path(auth.login_path());
                if path == login || self.security.is_non_secure_only(path) {
                    AuthDecision::Redirect(self.decoder.decode_path(auth.home_path()).into_owned())
                } else {
                    AuthDecision::Proceed(path.to_string())
                }
            }
            (false, false) => AuthDecision::Proceed(path.to_string()),
        };

        debug!(path = %path, secure, authenticated, decision = ?decision, "Authentication decided");
        Ok(decision)
    }

    /// Роли пользователя, кэшируются на время запроса
    pub fn user_access(&self, ctx: &ScopeContext) -> ContainerResult<Arc<BTreeSet<String>>> {
        if let Some(cached) = ctx.attribute::<BTreeSet<String>>(REQUEST_USER_ACCESS) {
            return Ok(cached);
        }

        let roles = match self.auth_descriptor().and_then(|auth| auth.access.as_ref()) {
            Some(access) => {
                let bean = self.lifecycle.instantiate_auth(ctx)?;
                let state = bean.state_read();
                (access.read)(&**state).into_iter().collect()
            }
            None => BTreeSet::new(),
        };

        ctx.set_attribute(REQUEST_USER_ACCESS, roles);
        Ok(ctx
            .attribute::<BTreeSet<String>>(REQUEST_USER_ACCESS)
            .unwrap_or_default())
    }

    /// Авторизация страницы. Проверяются только secure пути.
    pub fn authorize(&self, path: &str, ctx: &ScopeContext) -> ContainerResult<Authorization> {
        let Some(pattern) = self.security.pattern_for(path).filter(|pattern| pattern.secure) else {
            return Ok(Authorization::Granted);
        };
        let Some(required) = pattern.roles.as_ref() else {
            return Ok(Authorization::Granted);
        };
        if required.contains(ANY_ROLE) {
            return Ok(Authorization::Granted);
        }

        let user = self.user_access(ctx)?;
        if required.iter().any(|role| user.contains(role)) {
            Ok(Authorization::Granted)
        } else {
            debug!(path = %path, required = ?required, user = ?user, "Access denied");
            Ok(Authorization::Denied { status: FORBIDDEN })
        }
    }

    /// Может ли пользователь выполнить submit action.
    ///
    /// Action без ролей разрешён всем; пользователь без ролей тоже допускается.
    pub fn check_execute_authorization(&self, action: &ActionSpec, ctx: &ScopeContext) -> ContainerResult<bool> {
        if action.roles().is_empty() {
            return Ok(true);
        }
        let user = self.user_access(ctx)?;
        if user.is_empty() {
            return Ok(true);
        }
        Ok(action.roles().iter().any(|role| user.contains(role)))
    }
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("security", &self.security)
            .field("auth", &self.auth_descriptor().map(|auth| auth.name().to_string()))
            .finish()
    }
}
