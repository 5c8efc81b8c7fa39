//! WebContainer: собирает registry, конфигурацию и хранилища в одно целое.
//!
//! Создаётся один раз при старте и передаётся по ссылке обработчикам запросов.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::AuthGate;
use crate::config::ContainerConfig;
use crate::context::{ExpressionBinding, ScopeContext};
use crate::errors::{ContainerError, ContainerResult};
use crate::lifecycle::{LifecycleManager, LifecycleStats};
use crate::path::{PathDecoder, UrlPathDecoder};
use crate::registry::Registry;
use crate::resolver::{DependencyResolver, NoopResolver};
use crate::router::{Dispatch, Method, PathRouter, SubmitRequest};
use crate::store::{Application, Session};

pub struct WebContainerBuilder {
    registry: Registry,
    config: ContainerConfig,
    resolver: Arc<dyn DependencyResolver>,
    decoder: Arc<dyn PathDecoder>,
}

impl WebContainerBuilder {
    pub fn config(mut self, config: ContainerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn resolver(mut self, resolver: impl DependencyResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn decoder(mut self, decoder: impl PathDecoder + 'static) -> Self {
        self.decoder = Arc::new(decoder);
        self
    }

    pub fn build(self) -> ContainerResult<WebContainer> {
        WebContainer::assemble(self.registry, self.config, self.resolver, self.decoder)
    }
}

pub struct WebContainer {
    config: Arc<ContainerConfig>,
    lifecycle: Arc<LifecycleManager>,
    gate: Arc<AuthGate>,
    router: PathRouter,
    application: Arc<Application>,
    sessions: Mutex<HashMap<Uuid, Arc<Session>>>,
}

impl WebContainer {
    pub fn builder(registry: Registry) -> WebContainerBuilder {
        WebContainerBuilder {
            registry,
            config: ContainerConfig::default(),
            resolver: Arc::new(NoopResolver),
            decoder: Arc::new(UrlPathDecoder),
        }
    }

    pub fn new(
        registry: Registry,
        config: ContainerConfig,
        resolver: Arc<dyn DependencyResolver>,
    ) -> ContainerResult<Self> {
        Self::assemble(registry, config, resolver, Arc::new(UrlPathDecoder))
    }

    fn assemble(
        registry: Registry,
        config: ContainerConfig,
        resolver: Arc<dyn DependencyResolver>,
        decoder: Arc<dyn PathDecoder>,
    ) -> ContainerResult<Self> {
        validate_keyspaces(&registry, &config, decoder.as_ref())?;

        let registry = Arc::new(registry);
        let security = Arc::new(config.security.clone());
        let pages = Arc::new(config.pages.clone());

        let lifecycle = Arc::new(LifecycleManager::new(registry.clone(), resolver));
        let gate = Arc::new(AuthGate::new(lifecycle.clone(), security, decoder));
        let router = PathRouter::new(lifecycle.clone(), gate.clone(), pages);

        info!(
            beans = registry.len(),
            pages = config.pages.len(),
            secure = config.security.has_secure_urls(),
            "Container started"
        );

        Ok(Self {
            config: Arc::new(config),
            lifecycle,
            gate,
            router,
            application: Arc::new(Application::new()),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.lifecycle.registry()
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn auth_gate(&self) -> &AuthGate {
        &self.gate
    }

    pub fn router(&self) -> &PathRouter {
        &self.router
    }

    pub fn application(&self) -> &Arc<Application> {
        &self.application
    }

    pub fn stats(&self) -> LifecycleStats {
        self.lifecycle.stats()
    }

    pub fn open_session(&self) -> Arc<Session> {
        let session = Arc::new(Session::new());
        self.sessions.lock().insert(session.id(), session.clone());
        info!(session = %session.id(), "Session opened");
        session
    }

    pub fn session(&self, id: Uuid) -> Option<Arc<Session>> {
        self.sessions.lock().get(&id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn begin_request(&self, session: &Arc<Session>) -> ScopeContext {
        ScopeContext::new(session.clone(), self.application.clone())
    }

    /// Запрос со значениями формы вида `bean.field = value`
    pub fn begin_request_with(
        &self,
        session: &Arc<Session>,
        bindings: impl IntoIterator<Item = ExpressionBinding>,
    ) -> ScopeContext {
        self.begin_request(session).with_bindings(bindings)
    }

    pub fn dispatch(
        &self,
        ctx: &ScopeContext,
        method: Method,
        path: &str,
        submit: Option<SubmitRequest>,
    ) -> ContainerResult<Dispatch> {
        self.router.dispatch(ctx, method, path, submit)
    }

    pub fn end_request(&self, ctx: &ScopeContext) -> usize {
        self.lifecycle.end_request(ctx)
    }

    pub fn end_session(&self, session: &Session) -> usize {
        self.sessions.lock().remove(&session.id());
        self.lifecycle.end_session(session)
    }

    /// Закрывает оставшиеся сессии и уничтожает application bean-ы
    pub fn shutdown(&self) -> usize {
        let sessions: Vec<_> = self.sessions.lock().drain().map(|(_, session)| session).collect();
        let mut finalized = 0;
        for session in sessions {
            finalized += self.lifecycle.end_session(&session);
        }
        finalized + self.lifecycle.shutdown(&self.application)
    }
}

impl std::fmt::Debug for WebContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebContainer")
            .field("lifecycle", &self.lifecycle)
            .field("sessions", &self.session_count())
            .finish_non_exhaustive()
    }
}

/// Имена bean-ов и обслуживаемые пути делят одно пространство ключей сессии
fn validate_keyspaces(
    registry: &Registry,
    config: &ContainerConfig,
    decoder: &dyn PathDecoder,
) -> ContainerResult<()> {
    let mut paths: BTreeSet<String> = config
        .security
        .served_paths()
        .chain(config.pages.paths())
        .map(str::to_string)
        .collect();
    if let Some(auth) = registry.auth() {
        paths.insert(decoder.decode_path(auth.login_path()).into_owned());
        paths.insert(decoder.decode_path(auth.home_path()).into_owned());
    }

    let names = registry
        .names()
        .chain(registry.auth().map(|auth| auth.name()));
    for name in names {
        if paths.contains(name) {
            return Err(ContainerError::configuration(
                format!("bean name '{}' collides with a served path", name),
                Some(name),
            ));
        }
    }

    for name in config.pages.bean_names() {
        if registry.descriptor_for(name).is_none() {
            warn!(bean = %name, "Page manifest references an unregistered bean");
        }
    }
    if config.security.has_secure_urls() && registry.auth().is_none() {
        warn!("Secure urls are configured but no authentication bean is registered");
    }
    Ok(())
}
