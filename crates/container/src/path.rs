//! Преобразование логических путей (login, home) в реальные.

use std::borrow::Cow;

pub trait PathDecoder: Send + Sync {
    fn decode_path<'a>(&self, path: &'a str) -> Cow<'a, str>;
}

/// Percent-decoding; невалидная последовательность оставляет путь как есть
#[derive(Debug, Default, Clone, Copy)]
pub struct UrlPathDecoder;

impl PathDecoder for UrlPathDecoder {
    fn decode_path<'a>(&self, path: &'a str) -> Cow<'a, str> {
        urlencoding::decode(path).unwrap_or(Cow::Borrowed(path))
    }
}

/// Префикс контекста приложения перед логическим путём
#[derive(Debug, Clone)]
pub struct PrefixedPathDecoder {
    prefix: String,
}

impl PrefixedPathDecoder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().trim_end_matches('/').to_string(),
        }
    }
}

impl PathDecoder for PrefixedPathDecoder {
    fn decode_path<'a>(&self, path: &'a str) -> Cow<'a, str> {
        let decoded = UrlPathDecoder.decode_path(path);
        if self.prefix.is_empty() || decoded.starts_with(&format!("{}/", self.prefix)) {
            return decoded;
        }
        Cow::Owned(format!("{}{}", self.prefix, decoded))
    }
}
