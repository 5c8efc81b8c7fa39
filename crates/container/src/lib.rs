pub mod auth;
pub mod config;
pub mod container;
pub mod context;
pub mod errors;
mod instance;
pub mod lifecycle;
pub mod path;
pub mod registry;
pub mod resolver;
pub mod router;
pub mod scope;
pub mod store;

// Основные компоненты контейнера
pub use container::{WebContainer, WebContainerBuilder};
pub use lifecycle::{LifecycleManager, LifecycleStats};
pub use registry::{
    ActionSpec, AuthDefinition, AuthDescriptor, BeanDefinition, BeanDescriptor, HookKind,
    HookTable, InjectionPoint, Registry, RegistryBuilder,
};
pub use instance::{BeanInstance, BeanRef, Injectable};
pub use scope::{default_bean_name, Scope, TypeTag};
pub use store::{Application, PageScope, RequestStore, ScopeStore, Session, SessionGuard, ApplicationGuard};
pub use context::{ExpressionBinding, ScopeContext, REQUEST_USER_ACCESS};

// Безопасность
pub use auth::{AuthDecision, AuthGate, Authorization, ANY_ROLE, FORBIDDEN};
pub use config::{ConfigLoader, ContainerConfig, PageManifest, SecurityConfig, UrlPattern};
pub use path::{PathDecoder, PrefixedPathDecoder, UrlPathDecoder};

// Внешние зависимости и маршрутизация
pub use resolver::{ChainResolver, DependencyResolver, NoopResolver, Resolution, StaticResolver};
pub use router::{Dispatch, Method, PathRouter, SubmitRequest};

pub use errors::{ContainerContextExt, ContainerError, ContainerResult};
