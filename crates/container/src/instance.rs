//! Физический экземпляр bean-а, общий для всех хранилищ.

use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLock, RwLockReadGuard,
    RwLockWriteGuard,
};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::scope::{Scope, TypeTag};

/// Значение, которое можно внедрить в поле bean-а
pub type Injectable = Arc<dyn Any + Send + Sync>;

/// Разделяемая ссылка на живой bean
pub type BeanRef = Arc<BeanInstance>;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Что было записано в поле при injection; нужно для finalize
#[derive(Clone)]
pub(crate) enum InjectedValue {
    Bean(BeanRef),
    Auth(BeanRef),
    External,
    Empty,
}

pub struct BeanInstance {
    name: String,
    type_tag: TypeTag,
    scope: Scope,
    serial: u64,
    state: RwLock<Box<dyn Any + Send + Sync>>,
    injected: Mutex<BTreeMap<&'static str, InjectedValue>>,
    finalizing: AtomicBool,
}

impl BeanInstance {
    pub(crate) fn new(
        name: impl Into<String>,
        type_tag: TypeTag,
        scope: Scope,
        state: Box<dyn Any + Send + Sync>,
    ) -> Self {
        Self {
            name: name.into(),
            type_tag,
            scope,
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            state: RwLock::new(state),
            injected: Mutex::new(BTreeMap::new()),
            finalizing: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_tag(&self) -> &TypeTag {
        &self.type_tag
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Монотонный номер физического создания
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn is<T: Any>(&self) -> bool {
        let state = self.state.read();
        (**state).is::<T>()
    }

    /// Типизированный доступ на чтение; `None` если тип не совпадает
    pub fn read<T: Any>(&self) -> Option<MappedRwLockReadGuard<'_, T>> {
        RwLockReadGuard::try_map(self.state.read(), |state| (**state).downcast_ref::<T>()).ok()
    }

    pub fn write<T: Any>(&self) -> Option<MappedRwLockWriteGuard<'_, T>> {
        RwLockWriteGuard::try_map(self.state.write(), |state| (**state).downcast_mut::<T>()).ok()
    }

    pub fn with<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.read::<T>().map(|state| f(&*state))
    }

    pub fn with_mut<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.write::<T>().map(|mut state| f(&mut *state))
    }

    /// Поля, заполненные injection и ещё не очищенные
    pub fn injected_fields(&self) -> Vec<&'static str> {
        self.injected.lock().keys().copied().collect()
    }

    /// true после начала finalize
    pub fn is_finalized(&self) -> bool {
        self.finalizing.load(Ordering::Acquire)
    }

    /// Отмечает начало finalize; false если finalize уже идёт или завершён
    pub(crate) fn begin_finalize(&self) -> bool {
        !self.finalizing.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn state_read(&self) -> RwLockReadGuard<'_, Box<dyn Any + Send + Sync>> {
        self.state.read()
    }

    pub(crate) fn state_write(&self) -> RwLockWriteGuard<'_, Box<dyn Any + Send + Sync>> {
        self.state.write()
    }

    pub(crate) fn record_injection(&self, field: &'static str, value: InjectedValue) {
        self.injected.lock().insert(field, value);
    }

    pub(crate) fn take_injections(&self) -> BTreeMap<&'static str, InjectedValue> {
        std::mem::take(&mut *self.injected.lock())
    }
}

impl fmt::Debug for BeanInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanInstance")
            .field("name", &self.name)
            .field("type_tag", &self.type_tag)
            .field("scope", &self.scope)
            .field("serial", &self.serial)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Counter {
        hits: u32,
    }

    fn counter_bean() -> BeanInstance {
        BeanInstance::new(
            "counter",
            TypeTag::of::<Counter>(),
            Scope::Session,
            Box::new(Counter::default()),
        )
    }

    #[test]
    fn test_typed_access() {
        let bean = counter_bean();
        assert!(bean.is::<Counter>());
        assert!(!bean.is::<String>());

        bean.with_mut(|c: &mut Counter| c.hits += 2);
        assert_eq!(bean.with(|c: &Counter| c.hits), Some(2));
        assert!(bean.read::<String>().is_none());
    }

    #[test]
    fn test_serials_are_unique() {
        let first = counter_bean();
        let second = counter_bean();
        assert_ne!(first.serial(), second.serial());
    }

    #[test]
    fn test_injection_record() {
        let bean = counter_bean();
        bean.record_injection("clock", InjectedValue::External);
        bean.record_injection("user", InjectedValue::Empty);
        assert_eq!(bean.injected_fields(), vec!["clock", "user"]);

        let taken = bean.take_injections();
        assert_eq!(taken.len(), 2);
        assert!(bean.injected_fields().is_empty());
    }

    #[test]
    fn test_finalize_marker_is_one_shot() {
        let bean = counter_bean();
        assert!(!bean.is_finalized());
        assert!(bean.begin_finalize());
        assert!(!bean.begin_finalize());
        assert!(bean.is_finalized());
    }
}
