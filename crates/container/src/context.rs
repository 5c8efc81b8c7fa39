//! ScopeContext: связка хранилищ на время одного запроса.

use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::store::{Application, RequestStore, Session};

/// Ключ request-атрибута, под которым кэшируются роли пользователя
pub const REQUEST_USER_ACCESS: &str = "__request_user_access";

/// Значение запроса, ожидающее привязки к полю `bean.field`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionBinding {
    pub target: String,
    pub value: String,
}

impl ExpressionBinding {
    pub fn new(target: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            value: value.into(),
        }
    }
}

pub struct ScopeContext {
    request_id: Uuid,
    request: RequestStore,
    session: Arc<Session>,
    application: Arc<Application>,
    bindings: Mutex<Vec<ExpressionBinding>>,
    attributes: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    injecting: Mutex<Vec<String>>,
    redirect: Mutex<Option<String>>,
}

impl ScopeContext {
    pub fn new(session: Arc<Session>, application: Arc<Application>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            request: RequestStore::new(),
            session,
            application,
            bindings: Mutex::new(Vec::new()),
            attributes: Mutex::new(HashMap::new()),
            injecting: Mutex::new(Vec::new()),
            redirect: Mutex::new(None),
        }
    }

    pub fn with_bindings(self, bindings: impl IntoIterator<Item = ExpressionBinding>) -> Self {
        self.bindings.lock().extend(bindings);
        self
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn request(&self) -> &RequestStore {
        &self.request
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn application(&self) -> &Arc<Application> {
        &self.application
    }

    pub fn add_binding(&self, binding: ExpressionBinding) {
        self.bindings.lock().push(binding);
    }

    /// Ещё не применённые значения запроса
    pub fn pending_bindings(&self) -> Vec<ExpressionBinding> {
        self.bindings.lock().clone()
    }

    pub(crate) fn take_binding(&self, target: &str) -> Option<ExpressionBinding> {
        let mut bindings = self.bindings.lock();
        let index = bindings.iter().position(|binding| binding.target == target)?;
        Some(bindings.remove(index))
    }

    pub fn attribute<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let value = self.attributes.lock().get(key).cloned()?;
        value.downcast::<T>().ok()
    }

    pub fn set_attribute<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.attributes.lock().insert(key.into(), Arc::new(value));
    }

    /// Запросить redirect из lifecycle hook-а. Последний вызов побеждает.
    pub fn redirect_to(&self, path: impl Into<String>) {
        *self.redirect.lock() = Some(path.into());
    }

    pub fn requested_redirect(&self) -> Option<String> {
        self.redirect.lock().clone()
    }

    pub(crate) fn take_redirect(&self) -> Option<String> {
        self.redirect.lock().take()
    }

    /// Отмечает bean как находящийся в injection на этом запросе.
    /// `None` если он уже в injection (цикл зависимостей).
    pub(crate) fn enter_injection(&self, name: &str) -> Option<InjectionGuard<'_>> {
        let mut injecting = self.injecting.lock();
        if injecting.iter().any(|current| current == name) {
            return None;
        }
        injecting.push(name.to_string());
        Some(InjectionGuard {
            context: self,
            name: name.to_string(),
        })
    }
}

impl std::fmt::Debug for ScopeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeContext")
            .field("request_id", &self.request_id)
            .field("session", &self.session.id())
            .field("bindings", &self.bindings.lock().len())
            .finish_non_exhaustive()
    }
}

pub(crate) struct InjectionGuard<'a> {
    context: &'a ScopeContext,
    name: String,
}

impl Drop for InjectionGuard<'_> {
    fn drop(&mut self) {
        let mut injecting = self.context.injecting.lock();
        if let Some(index) = injecting.iter().rposition(|current| *current == self.name) {
            injecting.remove(index);
        }
    }
}
