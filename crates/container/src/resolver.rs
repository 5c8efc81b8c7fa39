//! Внешние значения для injection points, которые не являются bean-ами.

use anyhow::Result;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::instance::Injectable;
use crate::scope::TypeTag;

/// Результат обращения к resolver-у
#[derive(Clone)]
pub enum Resolution {
    Resolved(Injectable),
    /// Resolver ничего не знает об этой точке; поле остаётся как есть
    NoMapping,
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved(_))
    }
}

impl std::fmt::Debug for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolution::Resolved(_) => f.write_str("Resolved(..)"),
            Resolution::NoMapping => f.write_str("NoMapping"),
        }
    }
}

/// Источник внешних зависимостей (properties, environment, каталоги ресурсов)
pub trait DependencyResolver: Send + Sync {
    fn resolve(
        &self,
        declared_type: &TypeTag,
        declared_name: &str,
        expression: Option<&str>,
    ) -> Result<Resolution>;
}

/// Ничего не разрешает
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopResolver;

impl DependencyResolver for NoopResolver {
    fn resolve(&self, _: &TypeTag, _: &str, _: Option<&str>) -> Result<Resolution> {
        Ok(Resolution::NoMapping)
    }
}

/// Таблица заранее известных значений.
///
/// Порядок поиска: выражение, затем имя поля, затем тип.
#[derive(Default, Clone)]
pub struct StaticResolver {
    by_expression: HashMap<String, Injectable>,
    by_name: HashMap<String, Injectable>,
    by_type: HashMap<TypeTag, Injectable>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expression<V: Any + Send + Sync>(mut self, expression: impl Into<String>, value: V) -> Self {
        self.by_expression.insert(expression.into(), Arc::new(value));
        self
    }

    pub fn with_name<V: Any + Send + Sync>(mut self, name: impl Into<String>, value: V) -> Self {
        self.by_name.insert(name.into(), Arc::new(value));
        self
    }

    pub fn with_type<V: Any + Send + Sync>(mut self, value: V) -> Self {
        self.by_type.insert(TypeTag::of::<V>(), Arc::new(value));
        self
    }

    pub fn len(&self) -> usize {
        self.by_expression.len() + self.by_name.len() + self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DependencyResolver for StaticResolver {
    fn resolve(
        &self,
        declared_type: &TypeTag,
        declared_name: &str,
        expression: Option<&str>,
    ) -> Result<Resolution> {
        let hit = expression
            .and_then(|expression| self.by_expression.get(expression))
            .or_else(|| self.by_name.get(declared_name))
            .or_else(|| self.by_type.get(declared_type));

        Ok(match hit {
            Some(value) => Resolution::Resolved(value.clone()),
            None => Resolution::NoMapping,
        })
    }
}

/// Опрашивает resolver-ы по порядку до первого `Resolved`
#[derive(Default, Clone)]
pub struct ChainResolver {
    resolvers: Vec<Arc<dyn DependencyResolver>>,
}

impl ChainResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, resolver: impl DependencyResolver + 'static) -> Self {
        self.resolvers.push(Arc::new(resolver));
        self
    }

    pub fn push_shared(mut self, resolver: Arc<dyn DependencyResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

impl DependencyResolver for ChainResolver {
    fn resolve(
        &self,
        declared_type: &TypeTag,
        declared_name: &str,
        expression: Option<&str>,
    ) -> Result<Resolution> {
        for resolver in &self.resolvers {
            if let resolved @ Resolution::Resolved(_) =
                resolver.resolve(declared_type, declared_name, expression)?
            {
                return Ok(resolved);
            }
        }
        Ok(Resolution::NoMapping)
    }
}
