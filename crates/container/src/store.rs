//! Хранилища scope-ов.
//!
//! - `RequestStore`: принадлежит потоку, обслуживающему запрос
//! - `Session`: общий для параллельных запросов одного клиента, reentrant lock
//! - `Application`: общий для всех, глобальный reentrant lock
//!
//! Lock-и reentrant, потому что injection рекурсивно вызывает instantiate
//! на том же потоке, пока внешний вызов держит lock. Порядок захвата:
//! сначала session, потом application.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::instance::BeanRef;
use crate::scope::Scope;

/// Хранилище bean-ов одного scope; finalize работает через этот интерфейс
pub trait ScopeStore: Send + Sync {
    fn scope(&self) -> Scope;

    fn get(&self, name: &str) -> Option<BeanRef>;

    fn put(&self, name: &str, bean: BeanRef) -> Option<BeanRef>;

    /// Удаляет запись, только если под именем лежит именно этот экземпляр
    fn take(&self, name: &str, bean: &BeanRef) -> Option<BeanRef>;

    fn names(&self) -> Vec<String>;
}

/// Page-scoped bean-ы, созданные при обслуживании одного пути
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageScope {
    owner_path: String,
    member_names: Vec<String>,
}

impl PageScope {
    pub fn new(owner_path: impl Into<String>) -> Self {
        Self {
            owner_path: owner_path.into(),
            member_names: Vec::new(),
        }
    }

    pub fn owner_path(&self) -> &str {
        &self.owner_path
    }

    /// Имена в порядке создания
    pub fn member_names(&self) -> &[String] {
        &self.member_names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.member_names.iter().any(|member| member == name)
    }

    pub fn is_empty(&self) -> bool {
        self.member_names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.member_names.len()
    }

    /// false если имя уже было записано
    pub fn add(&mut self, name: &str) -> bool {
        if self.contains(name) {
            return false;
        }
        self.member_names.push(name.to_string());
        true
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.member_names.len();
        self.member_names.retain(|member| member != name);
        before != self.member_names.len()
    }

    pub(crate) fn merge(&mut self, other: PageScope) {
        for name in other.member_names {
            if !self.contains(&name) {
                self.member_names.push(name);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct RequestStore {
    beans: Mutex<BTreeMap<String, BeanRef>>,
}

impl RequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.beans.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.beans.lock().is_empty()
    }
}

impl ScopeStore for RequestStore {
    fn scope(&self) -> Scope {
        Scope::Request
    }

    fn get(&self, name: &str) -> Option<BeanRef> {
        self.beans.lock().get(name).cloned()
    }

    fn put(&self, name: &str, bean: BeanRef) -> Option<BeanRef> {
        self.beans.lock().insert(name.to_string(), bean)
    }

    fn take(&self, name: &str, bean: &BeanRef) -> Option<BeanRef> {
        let mut beans = self.beans.lock();
        match beans.get(name) {
            Some(current) if Arc::ptr_eq(current, bean) => beans.remove(name),
            _ => None,
        }
    }

    fn names(&self) -> Vec<String> {
        self.beans.lock().keys().cloned().collect()
    }
}

/// Запись session store: bean по имени или PageScope по пути
#[derive(Debug, Clone)]
enum SessionEntry {
    Bean(BeanRef),
    Page(PageScope),
}

/// Удерживает session lock до drop
#[must_use = "the session lock is released when the guard is dropped"]
pub struct SessionGuard<'a>(#[allow(dead_code)] ReentrantMutexGuard<'a, RefCell<BTreeMap<String, SessionEntry>>>);

pub struct Session {
    id: Uuid,
    created_at: DateTime<Utc>,
    entries: ReentrantMutex<RefCell<BTreeMap<String, SessionEntry>>>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            entries: ReentrantMutex::new(RefCell::new(BTreeMap::new())),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Эксклюзивный доступ на всю последовательность read-modify-write.
    /// Повторный захват тем же потоком не блокирует.
    pub fn exclusive(&self) -> SessionGuard<'_> {
        SessionGuard(self.entries.lock())
    }

    pub fn bean(&self, name: &str) -> Option<BeanRef> {
        let guard = self.entries.lock();
        let entries = guard.borrow();
        match entries.get(name) {
            Some(SessionEntry::Bean(bean)) => Some(bean.clone()),
            _ => None,
        }
    }

    pub fn bean_names(&self) -> Vec<String> {
        let guard = self.entries.lock();
        let entries = guard.borrow();
        entries
            .iter()
            .filter(|(_, entry)| matches!(entry, SessionEntry::Bean(_)))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn page_scope(&self, path: &str) -> Option<PageScope> {
        let guard = self.entries.lock();
        let entries = guard.borrow();
        match entries.get(path) {
            Some(SessionEntry::Page(page)) => Some(page.clone()),
            _ => None,
        }
    }

    pub fn page_scope_paths(&self) -> Vec<String> {
        let guard = self.entries.lock();
        let entries = guard.borrow();
        entries
            .iter()
            .filter(|(_, entry)| matches!(entry, SessionEntry::Page(_)))
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().borrow().is_empty()
    }

    /// Сливает с уже сохранённым PageScope того же пути
    pub(crate) fn store_page(&self, page: PageScope) {
        let guard = self.entries.lock();
        let mut entries = guard.borrow_mut();
        let path = page.owner_path().to_string();
        match entries.get_mut(&path) {
            Some(SessionEntry::Page(existing)) => existing.merge(page),
            _ => {
                entries.insert(path, SessionEntry::Page(page));
            }
        }
    }

    pub(crate) fn take_page(&self, path: &str) -> Option<PageScope> {
        let guard = self.entries.lock();
        let mut entries = guard.borrow_mut();
        match entries.get(path) {
            Some(SessionEntry::Page(_)) => match entries.remove(path) {
                Some(SessionEntry::Page(page)) => Some(page),
                _ => None,
            },
            _ => None,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl ScopeStore for Session {
    fn scope(&self) -> Scope {
        Scope::Session
    }

    fn get(&self, name: &str) -> Option<BeanRef> {
        self.bean(name)
    }

    fn put(&self, name: &str, bean: BeanRef) -> Option<BeanRef> {
        let guard = self.entries.lock();
        let mut entries = guard.borrow_mut();
        match entries.insert(name.to_string(), SessionEntry::Bean(bean)) {
            Some(SessionEntry::Bean(previous)) => Some(previous),
            _ => None,
        }
    }

    fn take(&self, name: &str, bean: &BeanRef) -> Option<BeanRef> {
        let guard = self.entries.lock();
        let mut entries = guard.borrow_mut();
        match entries.get(name) {
            Some(SessionEntry::Bean(current)) if Arc::ptr_eq(current, bean) => {
                match entries.remove(name) {
                    Some(SessionEntry::Bean(removed)) => Some(removed),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn names(&self) -> Vec<String> {
        self.bean_names()
    }
}

#[must_use = "the application lock is released when the guard is dropped"]
pub struct ApplicationGuard<'a>(#[allow(dead_code)] ReentrantMutexGuard<'a, RefCell<BTreeMap<String, BeanRef>>>);

#[derive(Default)]
pub struct Application {
    beans: ReentrantMutex<RefCell<BTreeMap<String, BeanRef>>>,
}

impl Application {
    pub fn new() -> Self {
        Self::default()
    }

    /// Глобальный эксклюзивный доступ; захватывать после session lock
    pub fn exclusive(&self) -> ApplicationGuard<'_> {
        ApplicationGuard(self.beans.lock())
    }

    pub fn len(&self) -> usize {
        self.beans.lock().borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.beans.lock().borrow().is_empty()
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("beans", &self.names())
            .finish()
    }
}

impl ScopeStore for Application {
    fn scope(&self) -> Scope {
        Scope::Application
    }

    fn get(&self, name: &str) -> Option<BeanRef> {
        self.beans.lock().borrow().get(name).cloned()
    }

    fn put(&self, name: &str, bean: BeanRef) -> Option<BeanRef> {
        self.beans.lock().borrow_mut().insert(name.to_string(), bean)
    }

    fn take(&self, name: &str, bean: &BeanRef) -> Option<BeanRef> {
        let guard = self.beans.lock();
        let mut beans = guard.borrow_mut();
        match beans.get(name) {
            Some(current) if Arc::ptr_eq(current, bean) => beans.remove(name),
            _ => None,
        }
    }

    fn names(&self) -> Vec<String> {
        self.beans.lock().borrow().keys().cloned().collect()
    }
}
