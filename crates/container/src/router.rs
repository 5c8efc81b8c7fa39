//! PathRouter: AuthGate, затем LifecycleManager, затем `Dispatch` для слоя рендеринга.

use common::OperationTimer;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::auth::{AuthDecision, AuthGate, Authorization, FORBIDDEN};
use crate::config::PageManifest;
use crate::context::ScopeContext;
use crate::errors::{ContainerError, ContainerResult};
use crate::instance::BeanRef;
use crate::lifecycle::LifecycleManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
}

impl FromStr for Method {
    type Err = ContainerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "HEAD" => Ok(Method::Head),
            "OPTIONS" => Ok(Method::Options),
            "PATCH" => Ok(Method::Patch),
            other => Err(ContainerError::configuration(
                format!("unsupported HTTP method '{}'", other),
                Some("router"),
            )),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
        };
        f.write_str(name)
    }
}

/// Submit action из формы: `bean.action`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub bean: String,
    pub action: String,
}

impl SubmitRequest {
    pub fn new(bean: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            bean: bean.into(),
            action: action.into(),
        }
    }
}

/// Итог обработки запроса
#[derive(Debug, Clone)]
pub enum Dispatch {
    /// Отрисовать `path` с этими bean-ами
    Forward { path: String, beans: Vec<BeanRef> },
    Redirect { to: String },
    Denied { status: u16 },
}

impl Dispatch {
    pub fn is_forward(&self) -> bool {
        matches!(self, Dispatch::Forward { .. })
    }

    pub fn redirect_target(&self) -> Option<&str> {
        match self {
            Dispatch::Redirect { to } => Some(to),
            _ => None,
        }
    }

    pub fn bean(&self, name: &str) -> Option<&BeanRef> {
        match self {
            Dispatch::Forward { beans, .. } => beans.iter().find(|bean| bean.name() == name),
            _ => None,
        }
    }
}

pub struct PathRouter {
    lifecycle: Arc<LifecycleManager>,
    gate: Arc<AuthGate>,
    pages: Arc<PageManifest>,
}

impl PathRouter {
    pub fn new(lifecycle: Arc<LifecycleManager>, gate: Arc<AuthGate>, pages: Arc<PageManifest>) -> Self {
        Self {
            lifecycle,
            gate,
            pages,
        }
    }

    pub fn dispatch(
        &self,
        ctx: &ScopeContext,
        method: Method,
        path: &str,
        submit: Option<SubmitRequest>,
    ) -> ContainerResult<Dispatch> {
        let mut timer = OperationTimer::new("dispatch");
        timer.add_field("method", method.to_string());
        timer.add_field("path", path);
        timer.add_field("request_id", ctx.request_id().to_string());

        // Счётчики общие для контейнера: при параллельных запросах разница приблизительна
        let before = self.lifecycle.stats();
        let result = self.route(ctx, method, path, submit);
        let after = self.lifecycle.stats();

        let constructed = after.constructions.saturating_sub(before.constructions);
        let finalized = after.finalizations.saturating_sub(before.finalizations);
        timer.add_field("constructed", constructed);
        timer.add_field("finalized", finalized);
        debug!(
            request_id = %ctx.request_id(),
            session = %ctx.session().id(),
            path = %path,
            constructed,
            finalized,
            "Request dispatched"
        );

        timer.finish_with_result(&result);
        result
    }

    fn route(
        &self,
        ctx: &ScopeContext,
        method: Method,
        path: &str,
        submit: Option<SubmitRequest>,
    ) -> ContainerResult<Dispatch> {
        if method == Method::Get {
            self.lifecycle.finalize_other_pages(path, ctx.session());
        }

        if let AuthDecision::Redirect(to) = self.gate.authenticate(path, ctx)? {
            return Ok(Dispatch::Redirect { to });
        }
        if let Authorization::Denied { status } = self.gate.authorize(path, ctx)? {
            return Ok(Dispatch::Denied { status });
        }

        match method {
            Method::Get => {
                let beans = self.lifecycle.instantiate_page(path, self.pages.beans_for(path), ctx)?;
                if let Some(target) = ctx.take_redirect() {
                    if let Some(outcome) = self.leave_page(ctx, path, target) {
                        return Ok(outcome);
                    }
                }
                Ok(Dispatch::Forward {
                    path: path.to_string(),
                    beans,
                })
            }
            Method::Post => {
                let beans = self.lifecycle.instantiate_page(path, self.pages.beans_for(path), ctx)?;
                if let Some(target) = ctx.take_redirect() {
                    if let Some(outcome) = self.leave_page(ctx, path, target) {
                        return Ok(outcome);
                    }
                }
                if let Some(submit) = submit {
                    if let Some(outcome) = self.submit(ctx, path, &beans, &submit)? {
                        return Ok(outcome);
                    }
                }
                Ok(Dispatch::Forward {
                    path: path.to_string(),
                    beans,
                })
            }
            _ => Ok(Dispatch::Forward {
                path: path.to_string(),
                beans: Vec::new(),
            }),
        }
    }

    /// `Some` если action завершил запрос (redirect или отказ)
    fn submit(
        &self,
        ctx: &ScopeContext,
        path: &str,
        beans: &[BeanRef],
        submit: &SubmitRequest,
    ) -> ContainerResult<Option<Dispatch>> {
        let bean = match beans.iter().find(|bean| bean.name() == submit.bean) {
            Some(bean) => bean.clone(),
            None => self
                .lifecycle
                .instantiate(&submit.bean, ctx, None)?
                .ok_or_else(|| ContainerError::action(&submit.bean, &submit.action, "no such bean"))?,
        };

        let registry = self.lifecycle.registry();
        let action = registry
            .descriptor_for(bean.name())
            .and_then(|descriptor| descriptor.action(&submit.action))
            .ok_or_else(|| ContainerError::action(&submit.bean, &submit.action, "no such action"))?;

        if !self.gate.check_execute_authorization(action, ctx)? {
            debug!(bean = %submit.bean, action = %submit.action, "Action execution denied");
            return Ok(Some(Dispatch::Denied { status: FORBIDDEN }));
        }

        Ok(self
            .lifecycle
            .execute_action(&bean, &submit.action)?
            .and_then(|target| self.leave_page(ctx, path, target)))
    }

    /// Redirect на другой путь уничтожает PageScope текущей страницы.
    /// Redirect на тот же путь игнорируется.
    fn leave_page(&self, ctx: &ScopeContext, path: &str, target: String) -> Option<Dispatch> {
        if target == path {
            return None;
        }
        let finalized = self.lifecycle.finalize_page(path, ctx.session());
        debug!(path = %path, to = %target, finalized, "Leaving page");
        Some(Dispatch::Redirect { to: target })
    }
}

impl fmt::Debug for PathRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathRouter")
            .field("pages", &self.pages.len())
            .field("gate", &self.gate)
            .finish()
    }
}
