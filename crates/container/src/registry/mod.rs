//! Registry: неизменяемое отображение имя -> описание bean-а.
//!
//! Собирается один раз при старте. Допускается ровно один authentication
//! bean: первый зарегистрированный используется, остальные игнорируются
//! с предупреждением в лог.

pub mod definition;

pub use definition::{
    ActionSpec, AuthDefinition, AuthDescriptor, BeanDefinition, BeanDescriptor, HookKind,
    HookTable, InjectionPoint,
};

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::{ContainerError, ContainerResult};
use crate::scope::{Scope, TypeTag};

#[derive(Debug, Default)]
pub struct Registry {
    beans: HashMap<String, Arc<BeanDescriptor>>,
    order: Vec<String>,
    by_type: HashMap<TypeTag, String>,
    auth: Option<Arc<AuthDescriptor>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<BeanDescriptor>> {
        self.beans.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.beans.contains_key(name)
    }

    pub fn by_type(&self, type_tag: &TypeTag) -> Option<&Arc<BeanDescriptor>> {
        self.by_type.get(type_tag).and_then(|name| self.beans.get(name))
    }

    pub fn auth(&self) -> Option<&Arc<AuthDescriptor>> {
        self.auth.as_ref()
    }

    /// Описание bean-а или auth bean-а по имени
    pub fn descriptor_for(&self, name: &str) -> Option<&BeanDescriptor> {
        match self.beans.get(name) {
            Some(descriptor) => Some(descriptor.as_ref()),
            None => self
                .auth
                .as_ref()
                .filter(|auth| auth.name() == name)
                .map(|auth| auth.bean()),
        }
    }

    /// Имена в порядке регистрации
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn names_in_scope(&self, scope: Scope) -> Vec<&str> {
        self.names()
            .filter(|name| self.beans.get(*name).map(|d| d.scope()) == Some(scope))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.beans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beans.is_empty()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    beans: Vec<BeanDescriptor>,
    auths: Vec<AuthDescriptor>,
}

impl RegistryBuilder {
    pub fn bean<T: Any + Send + Sync>(self, definition: BeanDefinition<T>) -> Self {
        self.descriptor(definition.into_descriptor())
    }

    pub fn descriptor(mut self, descriptor: BeanDescriptor) -> Self {
        self.beans.push(descriptor);
        self
    }

    pub fn auth<T: Any + Send + Sync>(mut self, definition: AuthDefinition<T>) -> Self {
        self.auths.push(definition.into_descriptor());
        self
    }

    pub fn build(self) -> ContainerResult<Registry> {
        let mut registry = Registry::default();

        for descriptor in self.beans {
            let name = descriptor.name().to_string();
            if name.is_empty() {
                return Err(ContainerError::configuration(
                    "bean name must not be empty",
                    Some(descriptor.type_tag().to_string()),
                ));
            }
            if registry.beans.contains_key(&name) {
                return Err(ContainerError::configuration(
                    format!("bean name '{}' is registered more than once", name),
                    Some(name),
                ));
            }
            if let Some(existing) = registry.by_type.get(descriptor.type_tag()) {
                return Err(ContainerError::configuration(
                    format!(
                        "type {} is registered as both '{}' and '{}'",
                        descriptor.type_tag(),
                        existing,
                        name
                    ),
                    Some(name),
                ));
            }

            info!(bean = %name, scope = %descriptor.scope(), type_tag = %descriptor.type_tag(), "Mapping bean");
            registry.by_type.insert(descriptor.type_tag().clone(), name.clone());
            registry.order.push(name.clone());
            registry.beans.insert(name, Arc::new(descriptor));
        }

        let mut auths = self.auths.into_iter();
        if let Some(auth) = auths.next() {
            if registry.beans.contains_key(auth.name()) {
                return Err(ContainerError::configuration(
                    format!("authentication bean '{}' collides with a bean name", auth.name()),
                    Some(auth.name()),
                ));
            }
            if registry.by_type.contains_key(auth.type_tag()) {
                return Err(ContainerError::configuration(
                    format!("authentication type {} is also registered as a bean", auth.type_tag()),
                    Some(auth.name()),
                ));
            }
            info!(bean = %auth.name(), login = %auth.login_path(), home = %auth.home_path(), "Mapping authentication bean");
            registry.auth = Some(Arc::new(auth));
        }
        for ignored in auths {
            warn!(bean = %ignored.name(), "Only one authentication bean may be declared, skipping");
        }

        if registry.beans.is_empty() {
            info!("No beans were mapped");
        }
        if registry.auth.is_none() {
            info!("Authentication bean was not mapped");
        }

        Ok(registry)
    }
}
