//! Типизированные определения bean-ов.
//!
//! Вместо поиска полей и методов по аннотациям каждое определение явно
//! перечисляет injection points, hooks и submit actions. Builder стирает
//! типы в `BeanDescriptor`, с которым работает `LifecycleManager`.

use anyhow::{anyhow, Result};
use std::any::{type_name, Any};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::context::ScopeContext;
use crate::instance::{BeanInstance, BeanRef, Injectable};
use crate::scope::{default_bean_name, Scope, TypeTag};

pub(crate) type ErasedFactory =
    Arc<dyn Fn() -> Result<Box<dyn Any + Send + Sync>> + Send + Sync>;
pub(crate) type ErasedHook = Arc<dyn Fn(&mut (dyn Any + Send + Sync)) -> Result<()> + Send + Sync>;
pub(crate) type ErasedContextHook =
    Arc<dyn Fn(&mut (dyn Any + Send + Sync), &ScopeContext) -> Result<()> + Send + Sync>;
pub(crate) type ErasedSetter =
    Arc<dyn Fn(&mut (dyn Any + Send + Sync), Option<Injectable>) -> Result<()> + Send + Sync>;
pub(crate) type ErasedPreset =
    Arc<dyn Fn(&mut (dyn Any + Send + Sync), &str) -> Result<()> + Send + Sync>;
pub(crate) type ErasedAction =
    Arc<dyn Fn(&mut (dyn Any + Send + Sync)) -> Result<Option<String>> + Send + Sync>;
pub(crate) type ErasedFlagAccessor = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> bool + Send + Sync>;
pub(crate) type ErasedRolesAccessor =
    Arc<dyn Fn(&(dyn Any + Send + Sync)) -> Vec<String> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    PostConstruct,
    PreDestroy,
    PreSubmit,
    PostSubmit,
    PostPreset,
}

#[derive(Clone)]
pub(crate) enum Hook {
    PostConstruct(ErasedContextHook),
    PreDestroy(ErasedHook),
    PreSubmit(ErasedHook),
    PostSubmit(ErasedHook),
    PostPreset {
        field: &'static str,
        apply: ErasedPreset,
    },
}

impl Hook {
    fn kind(&self) -> HookKind {
        match self {
            Hook::PostConstruct(_) => HookKind::PostConstruct,
            Hook::PreDestroy(_) => HookKind::PreDestroy,
            Hook::PreSubmit(_) => HookKind::PreSubmit,
            Hook::PostSubmit(_) => HookKind::PostSubmit,
            Hook::PostPreset { .. } => HookKind::PostPreset,
        }
    }
}

/// Таблица lifecycle hooks одного bean-а
#[derive(Clone, Default)]
pub struct HookTable {
    hooks: Vec<Hook>,
}

impl HookTable {
    /// Один hook на вид (кроме PostPreset, он привязан к полю)
    fn set(&mut self, hook: Hook) {
        let kind = hook.kind();
        if kind != HookKind::PostPreset {
            self.hooks.retain(|existing| existing.kind() != kind);
        }
        self.hooks.push(hook);
    }

    pub(crate) fn get(&self, kind: HookKind) -> Option<&ErasedHook> {
        self.hooks.iter().find_map(|hook| match (hook, kind) {
            (Hook::PreDestroy(h), HookKind::PreDestroy)
            | (Hook::PreSubmit(h), HookKind::PreSubmit)
            | (Hook::PostSubmit(h), HookKind::PostSubmit) => Some(h),
            _ => None,
        })
    }

    /// Post-construct получает контекст запроса (например, для redirect)
    pub(crate) fn post_construct(&self) -> Option<&ErasedContextHook> {
        self.hooks.iter().find_map(|hook| match hook {
            Hook::PostConstruct(h) => Some(h),
            _ => None,
        })
    }

    pub(crate) fn presets(&self) -> impl Iterator<Item = (&'static str, &ErasedPreset)> {
        self.hooks.iter().filter_map(|hook| match hook {
            Hook::PostPreset { field, apply } => Some((*field, apply)),
            _ => None,
        })
    }

    pub fn contains(&self, kind: HookKind) -> bool {
        self.hooks.iter().any(|hook| hook.kind() == kind)
    }

    pub fn kinds(&self) -> Vec<HookKind> {
        self.hooks.iter().map(Hook::kind).collect()
    }
}

/// Поле, заполняемое контейнером
#[derive(Clone)]
pub struct InjectionPoint {
    field: &'static str,
    declared_type: TypeTag,
    expression: Option<String>,
    pub(crate) setter: ErasedSetter,
}

impl InjectionPoint {
    pub fn field(&self) -> &'static str {
        self.field
    }

    pub fn declared_type(&self) -> &TypeTag {
        &self.declared_type
    }

    /// Property expression для внешнего resolver-а (`${app.tax.rate}`)
    pub fn expression(&self) -> Option<&str> {
        self.expression.as_deref()
    }
}

impl fmt::Debug for InjectionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectionPoint")
            .field("field", &self.field)
            .field("declared_type", &self.declared_type)
            .field("expression", &self.expression)
            .finish()
    }
}

/// Submit action с собственным списком ролей
#[derive(Clone)]
pub struct ActionSpec {
    name: String,
    roles: Vec<String>,
    pub(crate) handler: ErasedAction,
}

impl ActionSpec {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }
}

impl fmt::Debug for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSpec")
            .field("name", &self.name)
            .field("roles", &self.roles)
            .finish()
    }
}

/// Стёртое описание bean-а в registry
#[derive(Clone)]
pub struct BeanDescriptor {
    name: String,
    type_tag: TypeTag,
    scope: Scope,
    pub(crate) factory: ErasedFactory,
    hooks: HookTable,
    injections: Vec<InjectionPoint>,
    actions: Vec<ActionSpec>,
}

impl BeanDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_tag(&self) -> &TypeTag {
        &self.type_tag
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn hooks(&self) -> &HookTable {
        &self.hooks
    }

    pub fn injection_points(&self) -> &[InjectionPoint] {
        &self.injections
    }

    pub fn actions(&self) -> &[ActionSpec] {
        &self.actions
    }

    pub fn action(&self, name: &str) -> Option<&ActionSpec> {
        self.actions.iter().find(|action| action.name == name)
    }
}

impl fmt::Debug for BeanDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanDescriptor")
            .field("name", &self.name)
            .field("type_tag", &self.type_tag)
            .field("scope", &self.scope)
            .field("hooks", &self.hooks.kinds())
            .field("injections", &self.injections)
            .field("actions", &self.actions)
            .finish()
    }
}

fn downcast_state<T: Any>(state: &mut (dyn Any + Send + Sync)) -> Result<&mut T> {
    state
        .downcast_mut::<T>()
        .ok_or_else(|| anyhow!("bean state is not {}", type_name::<T>()))
}

fn erase_hook<T, H>(hook: H) -> ErasedHook
where
    T: Any + Send + Sync,
    H: Fn(&mut T) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(move |state: &mut (dyn Any + Send + Sync)| hook(downcast_state::<T>(state)?))
}

/// Builder типизированного bean-а
pub struct BeanDefinition<T> {
    descriptor: BeanDescriptor,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> BeanDefinition<T> {
    pub fn new<F>(name: impl Into<String>, scope: Scope, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::fallible(name, scope, move || Ok(factory()))
    }

    /// Factory, которая может вернуть ошибку конструирования
    pub fn fallible<F>(name: impl Into<String>, scope: Scope, factory: F) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        let factory: ErasedFactory = Arc::new(move || {
            let instance = factory()?;
            Ok(Box::new(instance) as Box<dyn Any + Send + Sync>)
        });

        Self {
            descriptor: BeanDescriptor {
                name: name.into(),
                type_tag: TypeTag::of::<T>(),
                scope,
                factory,
                hooks: HookTable::default(),
                injections: Vec::new(),
                actions: Vec::new(),
            },
            _marker: PhantomData,
        }
    }

    /// Имя выводится из типа (`ShoppingCart` -> `shoppingCart`)
    pub fn by_type<F>(scope: Scope, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::new(default_bean_name::<T>(), scope, factory)
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Поле типа `D`: другой bean или auth bean. Setter получает `None`,
    /// если bean недоступен, и при finalize.
    pub fn inject<D, S>(mut self, field: &'static str, setter: S) -> Self
    where
        D: Any,
        S: Fn(&mut T, Option<BeanRef>) + Send + Sync + 'static,
    {
        let erased: ErasedSetter = Arc::new(move |state: &mut (dyn Any + Send + Sync), value: Option<Injectable>| {
            let typed = downcast_state::<T>(state)?;
            let bean = match value {
                Some(value) => Some(
                    value
                        .downcast::<BeanInstance>()
                        .map_err(|_| anyhow!("injected value for '{}' is not a managed bean", field))?,
                ),
                None => None,
            };
            setter(typed, bean);
            Ok(())
        });

        self.descriptor.injections.push(InjectionPoint {
            field,
            declared_type: TypeTag::of::<D>(),
            expression: None,
            setter: erased,
        });
        self
    }

    /// Поле, значение которого даёт внешний `DependencyResolver`
    pub fn resource<V, S>(mut self, field: &'static str, expression: Option<&str>, setter: S) -> Self
    where
        V: Any + Send + Sync,
        S: Fn(&mut T, Option<Arc<V>>) + Send + Sync + 'static,
    {
        let erased: ErasedSetter = Arc::new(move |state: &mut (dyn Any + Send + Sync), value: Option<Injectable>| {
            let typed = downcast_state::<T>(state)?;
            let resource = match value {
                Some(value) => Some(value.downcast::<V>().map_err(|_| {
                    anyhow!("resolved value for '{}' is not {}", field, type_name::<V>())
                })?),
                None => None,
            };
            setter(typed, resource);
            Ok(())
        });

        self.descriptor.injections.push(InjectionPoint {
            field,
            declared_type: TypeTag::of::<V>(),
            expression: expression.map(str::to_string),
            setter: erased,
        });
        self
    }

    pub fn post_construct<H>(self, hook: H) -> Self
    where
        H: Fn(&mut T) -> Result<()> + Send + Sync + 'static,
    {
        self.post_construct_with(move |state, _| hook(state))
    }

    /// Post-construct с доступом к контексту запроса: `ctx.redirect_to(..)`
    /// прерывает обработку страницы redirect-ом
    pub fn post_construct_with<H>(mut self, hook: H) -> Self
    where
        H: Fn(&mut T, &ScopeContext) -> Result<()> + Send + Sync + 'static,
    {
        let erased: ErasedContextHook =
            Arc::new(move |state: &mut (dyn Any + Send + Sync), ctx: &ScopeContext| {
                hook(downcast_state::<T>(state)?, ctx)
            });
        self.descriptor.hooks.set(Hook::PostConstruct(erased));
        self
    }

    pub fn pre_destroy<H>(mut self, hook: H) -> Self
    where
        H: Fn(&mut T) -> Result<()> + Send + Sync + 'static,
    {
        self.descriptor.hooks.set(Hook::PreDestroy(erase_hook(hook)));
        self
    }

    pub fn pre_submit<H>(mut self, hook: H) -> Self
    where
        H: Fn(&mut T) -> Result<()> + Send + Sync + 'static,
    {
        self.descriptor.hooks.set(Hook::PreSubmit(erase_hook(hook)));
        self
    }

    pub fn post_submit<H>(mut self, hook: H) -> Self
    where
        H: Fn(&mut T) -> Result<()> + Send + Sync + 'static,
    {
        self.descriptor.hooks.set(Hook::PostSubmit(erase_hook(hook)));
        self
    }

    /// Применяет ожидающее значение запроса, адресованное `name.field`,
    /// сразу после создания bean-а и до post-construct
    pub fn post_preset<H>(mut self, field: &'static str, hook: H) -> Self
    where
        H: Fn(&mut T, &str) -> Result<()> + Send + Sync + 'static,
    {
        let apply: ErasedPreset =
            Arc::new(move |state: &mut (dyn Any + Send + Sync), value: &str| {
                hook(downcast_state::<T>(state)?, value)
            });
        self.descriptor.hooks.set(Hook::PostPreset { field, apply });
        self
    }

    /// Submit action. Возвращённый путь означает redirect.
    pub fn action<H>(mut self, name: impl Into<String>, roles: &[&str], handler: H) -> Self
    where
        H: Fn(&mut T) -> Result<Option<String>> + Send + Sync + 'static,
    {
        let handler: ErasedAction = Arc::new(move |state: &mut (dyn Any + Send + Sync)| {
            handler(downcast_state::<T>(state)?)
        });
        let name = name.into();
        self.descriptor.actions.retain(|action| action.name != name);
        self.descriptor.actions.push(ActionSpec {
            name,
            roles: roles.iter().map(|role| role.to_string()).collect(),
            handler,
        });
        self
    }

    pub fn into_descriptor(self) -> BeanDescriptor {
        self.descriptor
    }
}

/// Поле-признак или поле ролей auth bean-а
#[derive(Clone)]
pub(crate) struct Accessor<P> {
    pub(crate) field: &'static str,
    pub(crate) read: P,
}

/// Единственный authentication bean системы
#[derive(Clone)]
pub struct AuthDescriptor {
    bean: BeanDescriptor,
    login_path: String,
    home_path: String,
    pub(crate) marker: Option<Accessor<ErasedFlagAccessor>>,
    pub(crate) access: Option<Accessor<ErasedRolesAccessor>>,
}

impl AuthDescriptor {
    pub fn name(&self) -> &str {
        self.bean.name()
    }

    pub fn type_tag(&self) -> &TypeTag {
        self.bean.type_tag()
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    pub fn home_path(&self) -> &str {
        &self.home_path
    }

    pub fn bean(&self) -> &BeanDescriptor {
        &self.bean
    }

    pub fn marker_field(&self) -> Option<&'static str> {
        self.marker.as_ref().map(|marker| marker.field)
    }

    pub fn access_field(&self) -> Option<&'static str> {
        self.access.as_ref().map(|access| access.field)
    }
}

impl fmt::Debug for AuthDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthDescriptor")
            .field("bean", &self.bean)
            .field("login_path", &self.login_path)
            .field("home_path", &self.home_path)
            .field("marker", &self.marker_field())
            .field("access", &self.access_field())
            .finish()
    }
}

/// Builder authentication bean-а. Всегда живёт в session scope.
pub struct AuthDefinition<T> {
    bean: BeanDefinition<T>,
    login_path: String,
    home_path: String,
    marker: Option<Accessor<ErasedFlagAccessor>>,
    access: Option<Accessor<ErasedRolesAccessor>>,
}

impl<T: Any + Send + Sync> AuthDefinition<T> {
    pub fn new<F>(
        name: impl Into<String>,
        login_path: impl Into<String>,
        home_path: impl Into<String>,
        factory: F,
    ) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            bean: BeanDefinition::new(name, Scope::Session, factory),
            login_path: login_path.into(),
            home_path: home_path.into(),
            marker: None,
            access: None,
        }
    }

    /// Поле-признак аутентификации: пользователь вошёл, если accessor вернул true
    pub fn authenticated_by<P>(mut self, field: &'static str, read: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let read: ErasedFlagAccessor = Arc::new(move |state: &(dyn Any + Send + Sync)| {
            state.downcast_ref::<T>().map(&read).unwrap_or(false)
        });
        self.marker = Some(Accessor { field, read });
        self
    }

    /// Поле с ролями текущего пользователя
    pub fn access_roles<P>(mut self, field: &'static str, read: P) -> Self
    where
        P: Fn(&T) -> Vec<String> + Send + Sync + 'static,
    {
        let read: ErasedRolesAccessor = Arc::new(move |state: &(dyn Any + Send + Sync)| {
            state.downcast_ref::<T>().map(&read).unwrap_or_default()
        });
        self.access = Some(Accessor { field, read });
        self
    }

    /// Доступ к остальным возможностям обычного bean-а (resources, hooks)
    pub fn configure<F>(mut self, configure: F) -> Self
    where
        F: FnOnce(BeanDefinition<T>) -> BeanDefinition<T>,
    {
        self.bean = configure(self.bean);
        self
    }

    pub fn into_descriptor(self) -> AuthDescriptor {
        AuthDescriptor {
            bean: self.bean.into_descriptor(),
            login_path: self.login_path,
            home_path: self.home_path,
            marker: self.marker,
            access: self.access,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Catalog;

    #[derive(Debug, Default)]
    struct Cart {
        items: Vec<String>,
        catalog: Option<BeanRef>,
        tax_rate: Option<Arc<f64>>,
        constructed: bool,
    }

    fn cart_definition() -> BeanDefinition<Cart> {
        BeanDefinition::new("cart", Scope::Session, Cart::default)
            .inject::<Catalog, _>("catalog", |cart, bean| cart.catalog = bean)
            .resource::<f64, _>("tax_rate", Some("${shop.tax}"), |cart, rate| cart.tax_rate = rate)
            .post_construct(|cart| {
                cart.constructed = true;
                Ok(())
            })
            .post_preset("items", |cart, value| {
                cart.items.push(value.to_string());
                Ok(())
            })
            .action("checkout", &["customer"], |cart| {
                cart.items.clear();
                Ok(Some("/thanks".to_string()))
            })
    }

    #[test]
    fn test_descriptor_shape() {
        let descriptor = cart_definition().into_descriptor();
        assert_eq!(descriptor.name(), "cart");
        assert_eq!(descriptor.scope(), Scope::Session);
        assert_eq!(descriptor.type_tag(), &TypeTag::of::<Cart>());

        let fields: Vec<_> = descriptor.injection_points().iter().map(|p| p.field()).collect();
        assert_eq!(fields, vec!["catalog", "tax_rate"]);
        assert_eq!(descriptor.injection_points()[1].expression(), Some("${shop.tax}"));
        assert_eq!(descriptor.injection_points()[0].declared_type(), &TypeTag::of::<Catalog>());

        assert!(descriptor.hooks().contains(HookKind::PostConstruct));
        assert!(descriptor.hooks().contains(HookKind::PostPreset));
        assert!(!descriptor.hooks().contains(HookKind::PreDestroy));
        assert_eq!(descriptor.action("checkout").map(|a| a.roles().to_vec()), Some(vec!["customer".to_string()]));
    }

    #[test]
    fn test_erased_hooks_run_on_typed_state() -> Result<()> {
        let descriptor = cart_definition().into_descriptor();
        let mut state = (descriptor.factory)()?;

        let ctx = ScopeContext::new(
            Arc::new(crate::store::Session::new()),
            Arc::new(crate::store::Application::new()),
        );
        let hook = descriptor.hooks().post_construct().expect("post construct registered");
        hook(&mut *state, &ctx)?;
        assert!(descriptor.hooks().get(HookKind::PostConstruct).is_none());

        let (field, preset) = descriptor.hooks().presets().next().expect("preset registered");
        assert_eq!(field, "items");
        preset(&mut *state, "book")?;

        let tax: Injectable = Arc::new(0.2_f64);
        (descriptor.injection_points()[1].setter)(&mut *state, Some(tax))?;

        let cart = state.downcast_ref::<Cart>().expect("cart state");
        assert!(cart.constructed);
        assert_eq!(cart.items, vec!["book".to_string()]);
        assert_eq!(cart.tax_rate.as_deref(), Some(&0.2));
        Ok(())
    }

    #[test]
    fn test_setter_rejects_wrong_value_type() -> Result<()> {
        let descriptor = cart_definition().into_descriptor();
        let mut state = (descriptor.factory)()?;

        let wrong: Injectable = Arc::new("not a bean".to_string());
        let result = (descriptor.injection_points()[0].setter)(&mut *state, Some(wrong));
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn test_single_hook_per_kind() {
        let descriptor = BeanDefinition::new("cart", Scope::Request, Cart::default)
            .pre_destroy(|_| Ok(()))
            .pre_destroy(|cart| {
                cart.items.clear();
                Ok(())
            })
            .into_descriptor();
        assert_eq!(descriptor.hooks().kinds(), vec![HookKind::PreDestroy]);
    }

    #[test]
    fn test_auth_descriptor_accessors() {
        #[derive(Default)]
        struct Login {
            user: Option<String>,
            roles: Vec<String>,
        }

        let auth = AuthDefinition::new("login", "/login", "/home", Login::default)
            .authenticated_by("user", |login: &Login| login.user.is_some())
            .access_roles("roles", |login: &Login| login.roles.clone())
            .into_descriptor();

        assert_eq!(auth.bean().scope(), Scope::Session);
        assert_eq!(auth.marker_field(), Some("user"));
        assert_eq!(auth.access_field(), Some("roles"));

        let state = Login {
            user: Some("ana".to_string()),
            roles: vec!["manager".to_string()],
        };
        let marker = auth.marker.as_ref().expect("marker");
        assert!((marker.read)(&state));
        let access = auth.access.as_ref().expect("access");
        assert_eq!((access.read)(&state), vec!["manager".to_string()]);
    }
}
