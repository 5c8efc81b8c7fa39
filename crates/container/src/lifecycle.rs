//! LifecycleManager: создание, injection, hooks и уничтожение bean-ов.
//!
//! Порядок поиска при `instantiate`: request store, session store,
//! application store, registry. Session lock держится на всём пути
//! check -> create -> store, поэтому два параллельных запроса одной сессии
//! создают bean один раз. Application bean создаётся под session lock и
//! глобальным application lock (всегда в этом порядке).

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::ScopeContext;
use crate::errors::{ContainerError, ContainerResult};
use crate::instance::{BeanInstance, BeanRef, InjectedValue, Injectable};
use crate::registry::{BeanDescriptor, HookKind, InjectionPoint, Registry};
use crate::resolver::{DependencyResolver, Resolution};
use crate::scope::Scope;
use crate::store::{Application, PageScope, ScopeStore, Session};

/// Счётчики жизненного цикла
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LifecycleStats {
    pub constructions: u64,
    pub reuses: u64,
    pub finalizations: u64,
    pub failed_constructions: u64,
    pub injection_failures: u64,
}

/// Что нашлось для injection point-а
enum Resolved {
    Bean(Option<BeanRef>),
    Auth(BeanRef),
    External(Injectable),
}

impl Resolved {
    fn payload(&self) -> Option<Injectable> {
        match self {
            Resolved::Bean(Some(bean)) | Resolved::Auth(bean) => Some(bean.clone() as Injectable),
            Resolved::Bean(None) => None,
            Resolved::External(value) => Some(value.clone()),
        }
    }

    fn into_record(self) -> InjectedValue {
        match self {
            Resolved::Bean(Some(bean)) => InjectedValue::Bean(bean),
            Resolved::Bean(None) => InjectedValue::Empty,
            Resolved::Auth(bean) => InjectedValue::Auth(bean),
            Resolved::External(_) => InjectedValue::External,
        }
    }
}

pub struct LifecycleManager {
    registry: Arc<Registry>,
    resolver: Arc<dyn DependencyResolver>,
    stats: Mutex<LifecycleStats>,
}

impl LifecycleManager {
    pub fn new(registry: Arc<Registry>, resolver: Arc<dyn DependencyResolver>) -> Self {
        Self {
            registry,
            resolver,
            stats: Mutex::new(LifecycleStats::default()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn stats(&self) -> LifecycleStats {
        self.stats.lock().clone()
    }

    /// Находит или создаёт bean по имени.
    ///
    /// `Ok(None)` если имя неизвестно ни одному хранилищу и registry.
    /// Page-scoped bean требует `page`: в него записывается имя созданного bean-а.
    pub fn instantiate(
        &self,
        name: &str,
        ctx: &ScopeContext,
        mut page: Option<&mut PageScope>,
    ) -> ContainerResult<Option<BeanRef>> {
        if let Some(bean) = ctx.request().get(name) {
            self.reuse(&bean, ctx, page.as_deref_mut());
            return Ok(Some(bean));
        }

        let session_guard = ctx.session().exclusive();
        if let Some(bean) = ctx.session().get(name) {
            self.reuse(&bean, ctx, page.as_deref_mut());
            return Ok(Some(bean));
        }

        let application_guard = ctx.application().exclusive();
        if let Some(bean) = ctx.application().get(name) {
            self.reuse(&bean, ctx, page.as_deref_mut());
            return Ok(Some(bean));
        }

        let Some(descriptor) = self.registry.descriptor_for(name) else {
            return Ok(None);
        };

        match descriptor.scope() {
            Scope::Request => {
                drop(application_guard);
                drop(session_guard);
            }
            Scope::Page | Scope::Session => drop(application_guard),
            Scope::Application => {}
        }

        self.construct(descriptor, ctx, page).map(Some)
    }

    /// Session-экземпляр authentication bean-а, создаётся по требованию
    pub fn instantiate_auth(&self, ctx: &ScopeContext) -> ContainerResult<BeanRef> {
        let auth = self.registry.auth().ok_or_else(|| {
            ContainerError::configuration("no authentication bean is registered", None::<String>)
        })?;

        let _session = ctx.session().exclusive();
        if let Some(bean) = ctx.session().get(auth.name()) {
            return Ok(bean);
        }
        self.construct(auth.bean(), ctx, None)
    }

    /// Создаёт page-scoped и прочие bean-ы страницы `path`, протягивая один PageScope.
    ///
    /// Непустой PageScope сохраняется в сессии даже если создание прервалось ошибкой,
    /// чтобы уже созданные bean-ы можно было уничтожить позже.
    pub fn instantiate_page<S: AsRef<str>>(
        &self,
        path: &str,
        names: &[S],
        ctx: &ScopeContext,
    ) -> ContainerResult<Vec<BeanRef>> {
        let mut page = PageScope::new(path);
        let mut beans = Vec::with_capacity(names.len());
        let mut failure = None;

        for name in names {
            match self.instantiate(name.as_ref(), ctx, Some(&mut page)) {
                Ok(Some(bean)) => beans.push(bean),
                Ok(None) => warn!(bean = %name.as_ref(), path = %path, "Page references an unknown bean"),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        if !page.is_empty() {
            debug!(path = %path, members = ?page.member_names(), "Storing page scope");
            ctx.session().store_page(page);
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(beans),
        }
    }

    fn reuse(&self, bean: &BeanRef, ctx: &ScopeContext, page: Option<&mut PageScope>) {
        self.stats.lock().reuses += 1;
        let Some(descriptor) = self.registry.descriptor_for(bean.name()) else {
            return;
        };

        // только injection: hooks и presets выполняются один раз при создании
        self.inject(descriptor, bean, ctx, page);
    }

    fn construct(
        &self,
        descriptor: &BeanDescriptor,
        ctx: &ScopeContext,
        mut page: Option<&mut PageScope>,
    ) -> ContainerResult<BeanRef> {
        let name = descriptor.name();
        let scope = descriptor.scope();

        if scope == Scope::Page && page.is_none() {
            self.stats.lock().failed_constructions += 1;
            return Err(ContainerError::instantiation(name, scope, "no page scope is active"));
        }

        let state = (descriptor.factory)().map_err(|err| {
            self.stats.lock().failed_constructions += 1;
            ContainerError::instantiation(name, scope, format!("{:#}", err))
        })?;

        let bean: BeanRef = Arc::new(BeanInstance::new(
            name,
            descriptor.type_tag().clone(),
            scope,
            state,
        ));

        // Кладём в хранилище до injection: циклическая зависимость найдёт этот экземпляр
        let store = store_for(scope, ctx);
        store.put(name, bean.clone());
        if scope == Scope::Page {
            if let Some(page) = page.as_deref_mut() {
                page.add(name);
            }
        }

        if let Err(err) = self.initialize(descriptor, &bean, ctx, page.as_deref_mut()) {
            store.take(name, &bean);
            if scope == Scope::Page {
                if let Some(page) = page {
                    page.remove(name);
                }
            }
            self.stats.lock().failed_constructions += 1;
            warn!(bean = %name, scope = %scope, error = %err, "Bean construction rolled back");
            return Err(ContainerError::instantiation(name, scope, format!("{:#}", err)));
        }

        self.stats.lock().constructions += 1;
        debug!(bean = %name, scope = %scope, serial = bean.serial(), "Bean constructed");
        Ok(bean)
    }

    fn initialize(
        &self,
        descriptor: &BeanDescriptor,
        bean: &BeanRef,
        ctx: &ScopeContext,
        page: Option<&mut PageScope>,
    ) -> Result<()> {
        self.inject(descriptor, bean, ctx, page);
        self.apply_presets(descriptor, bean, ctx)?;

        if let Some(hook) = descriptor.hooks().post_construct() {
            let mut state = bean.state_write();
            hook(&mut **state, ctx).context("post construct hook failed")?;
        }
        Ok(())
    }

    /// Применяет значения запроса, адресованные `name.field`
    fn apply_presets(&self, descriptor: &BeanDescriptor, bean: &BeanRef, ctx: &ScopeContext) -> Result<()> {
        for (field, apply) in descriptor.hooks().presets() {
            let target = format!("{}.{}", descriptor.name(), field);
            if let Some(binding) = ctx.take_binding(&target) {
                let mut state = bean.state_write();
                apply(&mut **state, &binding.value)
                    .with_context(|| format!("post preset of '{}' failed", target))?;
            }
        }
        Ok(())
    }

    /// Заполняет injection points. Ошибки отдельных полей логируются и пропускаются.
    fn inject(
        &self,
        descriptor: &BeanDescriptor,
        bean: &BeanRef,
        ctx: &ScopeContext,
        mut page: Option<&mut PageScope>,
    ) {
        if descriptor.injection_points().is_empty() {
            return;
        }
        let Some(_injecting) = ctx.enter_injection(bean.name()) else {
            debug!(bean = %bean.name(), "Injection already in progress, skipping");
            return;
        };

        for point in descriptor.injection_points() {
            let resolved = match self.resolve_point(bean, point, ctx, page.as_deref_mut()) {
                Ok(Some(resolved)) => resolved,
                Ok(None) => continue,
                Err(err) => {
                    self.injection_failed(bean, point, err);
                    continue;
                }
            };

            let applied = {
                let mut state = bean.state_write();
                (point.setter)(&mut **state, resolved.payload())
            };
            match applied {
                Ok(()) => bean.record_injection(point.field(), resolved.into_record()),
                Err(err) => self.injection_failed(bean, point, format!("{:#}", err)),
            }
        }
    }

    fn resolve_point(
        &self,
        bean: &BeanRef,
        point: &InjectionPoint,
        ctx: &ScopeContext,
        page: Option<&mut PageScope>,
    ) -> ContainerResult<Option<Resolved>> {
        let declared = point.declared_type();

        // Зависимость, которую не удалось создать, оставляет поле пустым
        if let Some(dependency) = self.registry.by_type(declared) {
            let dependency = match self.instantiate(dependency.name(), ctx, page) {
                Ok(dependency) => dependency,
                Err(err) => {
                    self.injection_failed(bean, point, &err);
                    None
                }
            };
            return Ok(Some(Resolved::Bean(dependency)));
        }

        if let Some(auth) = self.registry.auth() {
            if auth.type_tag() == declared {
                let resolved = match self.instantiate_auth(ctx) {
                    Ok(auth) => Resolved::Auth(auth),
                    Err(err) => {
                        self.injection_failed(bean, point, &err);
                        Resolved::Bean(None)
                    }
                };
                return Ok(Some(resolved));
            }
        }

        match self.resolver.resolve(declared, point.field(), point.expression()) {
            Ok(Resolution::Resolved(value)) => Ok(Some(Resolved::External(value))),
            Ok(Resolution::NoMapping) => Ok(None),
            Err(err) => Err(ContainerError::Resolver {
                declared_name: format!("{}.{}", bean.name(), point.field()),
                declared_type: declared.to_string(),
                message: format!("{:#}", err),
            }),
        }
    }

    fn injection_failed(&self, bean: &BeanRef, point: &InjectionPoint, cause: impl std::fmt::Display) {
        self.stats.lock().injection_failures += 1;
        let err = ContainerError::injection(bean.name(), point.field(), cause);
        warn!(bean = %bean.name(), field = point.field(), category = err.category(), "{}", err);
    }

    /// Уничтожает bean: pre-destroy, очистка injected полей, удаление из хранилища.
    ///
    /// Идемпотентно: если `store` не содержит этот экземпляр или finalize уже
    /// начат, ничего не делает. Вложенные bean-ы, лежащие в том же хранилище,
    /// уничтожаются рекурсивно; page-scoped зависимости принадлежат своему
    /// PageScope и только отвязываются. Возвращает число уничтоженных bean-ов.
    pub fn finalize(&self, bean: &BeanRef, store: &dyn ScopeStore) -> usize {
        if !holds(store, bean) || !bean.begin_finalize() {
            return 0;
        }
        let mut finalized = 1;
        let descriptor = self.registry.descriptor_for(bean.name());

        if let Some(hook) = descriptor.and_then(|d| d.hooks().get(HookKind::PreDestroy)) {
            let mut state = bean.state_write();
            if let Err(err) = hook(&mut **state) {
                warn!(bean = %bean.name(), error = %err, "Pre destroy hook failed");
            }
        }

        for (field, value) in bean.take_injections() {
            let point = descriptor.and_then(|d| d.injection_points().iter().find(|p| p.field() == field));
            if let Some(point) = point {
                let mut state = bean.state_write();
                if let Err(err) = (point.setter)(&mut **state, None) {
                    warn!(bean = %bean.name(), field = field, error = %err, "Field could not be cleared");
                }
            }

            match value {
                InjectedValue::Bean(nested) => {
                    if nested.scope() != Scope::Page && holds(store, &nested) {
                        finalized += self.finalize(&nested, store);
                    }
                }
                // auth bean живёт до конца сессии
                InjectedValue::Auth(auth) => {
                    debug!(bean = %bean.name(), auth = %auth.name(), "Authentication reference released");
                }
                InjectedValue::External | InjectedValue::Empty => {}
            }
        }

        store.take(bean.name(), bean);
        self.stats.lock().finalizations += 1;
        debug!(bean = %bean.name(), scope = %bean.scope(), "Bean finalized");
        finalized
    }

    /// Уничтожает PageScope пути `path` вместе со всеми его bean-ами
    pub fn finalize_page(&self, path: &str, session: &Session) -> usize {
        let _session = session.exclusive();
        match session.take_page(path) {
            Some(page) => self.finalize_members(&page, session),
            None => 0,
        }
    }

    /// Уничтожает все PageScope сессии, кроме принадлежащего `path`
    pub fn finalize_other_pages(&self, path: &str, session: &Session) -> usize {
        let _session = session.exclusive();
        let mut finalized = 0;
        for owner in session.page_scope_paths() {
            if owner == path {
                continue;
            }
            if let Some(page) = session.take_page(&owner) {
                finalized += self.finalize_members(&page, session);
            }
        }
        finalized
    }

    fn finalize_members(&self, page: &PageScope, session: &Session) -> usize {
        let mut finalized = 0;
        for name in page.member_names().iter().rev() {
            if let Some(bean) = session.bean(name) {
                finalized += self.finalize(&bean, session);
            }
        }
        debug!(path = %page.owner_path(), finalized, "Page scope finalized");
        finalized
    }

    /// Конец запроса: уничтожает request-scoped bean-ы
    pub fn end_request(&self, ctx: &ScopeContext) -> usize {
        finalize_all(self, ctx.request())
    }

    /// Конец сессии: PageScope-ы, session bean-ы и authentication bean
    pub fn end_session(&self, session: &Session) -> usize {
        let _session = session.exclusive();
        let mut finalized = 0;
        for path in session.page_scope_paths() {
            if let Some(page) = session.take_page(&path) {
                finalized += self.finalize_members(&page, session);
            }
        }
        finalized += finalize_all(self, session);
        info!(session = %session.id(), finalized, "Session ended");
        finalized
    }

    pub fn shutdown(&self, application: &Application) -> usize {
        let _application = application.exclusive();
        let finalized = finalize_all(self, application);
        info!(finalized, "Application scope destroyed");
        finalized
    }

    /// Выполняет submit action: pre-submit, action, post-submit.
    /// Возвращает путь для redirect, если action его вернул.
    pub fn execute_action(&self, bean: &BeanRef, action: &str) -> ContainerResult<Option<String>> {
        let descriptor = self
            .registry
            .descriptor_for(bean.name())
            .ok_or_else(|| ContainerError::action(bean.name(), action, "bean is not registered"))?;
        let spec = descriptor
            .action(action)
            .ok_or_else(|| ContainerError::action(bean.name(), action, "no such action"))?;

        let mut state = bean.state_write();
        if let Some(hook) = descriptor.hooks().get(HookKind::PreSubmit) {
            hook(&mut **state).map_err(|err| ContainerError::action(bean.name(), action, format!("pre submit: {:#}", err)))?;
        }
        let redirect = (spec.handler)(&mut **state)
            .map_err(|err| ContainerError::action(bean.name(), action, format!("{:#}", err)))?;
        if let Some(hook) = descriptor.hooks().get(HookKind::PostSubmit) {
            hook(&mut **state).map_err(|err| ContainerError::action(bean.name(), action, format!("post submit: {:#}", err)))?;
        }

        debug!(bean = %bean.name(), action = %action, redirect = ?redirect, "Action executed");
        Ok(redirect)
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("beans", &self.registry.len())
            .field("stats", &self.stats())
            .finish()
    }
}

fn store_for(scope: Scope, ctx: &ScopeContext) -> &dyn ScopeStore {
    match scope {
        Scope::Request => ctx.request(),
        Scope::Page | Scope::Session => &**ctx.session(),
        Scope::Application => &**ctx.application(),
    }
}

/// Лежит ли под именем bean-а именно этот экземпляр
fn holds(store: &dyn ScopeStore, bean: &BeanRef) -> bool {
    store
        .get(bean.name())
        .map(|current| Arc::ptr_eq(&current, bean))
        .unwrap_or(false)
}

fn finalize_all(manager: &LifecycleManager, store: &dyn ScopeStore) -> usize {
    let mut finalized = 0;
    for name in store.names().iter().rev() {
        if let Some(bean) = store.get(name) {
            finalized += manager.finalize(&bean, store);
        }
    }
    finalized
}
