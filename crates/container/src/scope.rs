use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Время жизни bean-а
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Request,
    /// Хранится в сессии, привязан к PageScope обслуживаемого пути
    Page,
    Session,
    Application,
}

impl Scope {
    /// Page и Session bean-ы физически лежат в session store
    pub fn is_session_held(self) -> bool {
        matches!(self, Scope::Page | Scope::Session)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Scope::Request => "request",
            Scope::Page => "page",
            Scope::Session => "session",
            Scope::Application => "application",
        };
        f.write_str(name)
    }
}

/// Непрозрачный идентификатор типа bean-а или injection point-а
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeTag(Cow<'static, str>);

impl TypeTag {
    pub fn of<T: ?Sized + 'static>() -> Self {
        TypeTag(Cow::Borrowed(std::any::type_name::<T>()))
    }

    pub fn named(name: impl Into<String>) -> Self {
        TypeTag(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Имя по умолчанию: простое имя типа с маленькой первой буквой
/// (`shop::ShoppingCart` -> `shoppingCart`)
pub fn default_bean_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    let simple = base.rsplit("::").next().unwrap_or(base);

    let mut chars = simple.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}
