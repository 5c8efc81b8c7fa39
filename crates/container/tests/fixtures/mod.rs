//! Общие fixtures для интеграционных тестов контейнера.
//!
//! Небольшой "магазин": auth bean, счётчик в сессии, page-scoped формы,
//! request-scoped часы и application-scoped каталог.

#![allow(dead_code)]

use anyhow::anyhow;
use container::{
    AuthDefinition, BeanDefinition, BeanRef, ContainerConfig, ContainerResult, PageManifest,
    Registry, Scope, SecurityConfig, Session, StaticResolver, UrlPattern, WebContainer,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const LOGIN: &str = "/login";
pub const HOME: &str = "/home";

#[derive(Debug, Default)]
pub struct LoginBean {
    pub user: Option<String>,
    pub roles: Vec<String>,
}

#[derive(Debug, Default)]
pub struct Counter {
    pub hits: u32,
}

#[derive(Debug, Default)]
pub struct Catalog {
    pub items: Vec<String>,
}

#[derive(Debug, Default)]
pub struct Clock {
    pub currency: Option<Arc<String>>,
}

#[derive(Debug, Default)]
pub struct OrderForm {
    pub quantity: u32,
    pub catalog: Option<BeanRef>,
    pub login: Option<BeanRef>,
    pub placed: bool,
}

#[derive(Debug, Default)]
pub struct OrderTable {
    pub rows: Vec<String>,
}

/// Баннер, который может увести со страницы прямо из post-construct
#[derive(Debug, Default)]
pub struct PromoBanner {
    pub target: Option<String>,
}

#[derive(Debug, Default)]
pub struct Wizard {
    pub step: u32,
}

/// Счётчики hooks, разделяемые с фабриками
#[derive(Debug, Default, Clone)]
pub struct Counters {
    pub constructed: Arc<AtomicUsize>,
    pub destroyed: Arc<AtomicUsize>,
    pub counter_constructed: Arc<AtomicUsize>,
}

impl Counters {
    pub fn constructed(&self) -> usize {
        self.constructed.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn counter_constructed(&self) -> usize {
        self.counter_constructed.load(Ordering::SeqCst)
    }
}

fn counted<T: Send + Sync + 'static>(definition: BeanDefinition<T>, counters: &Counters) -> BeanDefinition<T> {
    let constructed = counters.constructed.clone();
    let destroyed = counters.destroyed.clone();
    definition
        .post_construct(move |_| {
            constructed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .pre_destroy(move |_| {
            destroyed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
}

pub fn shop_registry(counters: &Counters) -> Registry {
    let counter_constructed = counters.counter_constructed.clone();

    Registry::builder()
        .auth(
            AuthDefinition::new("loginBean", LOGIN, HOME, LoginBean::default)
                .authenticated_by("user", |login: &LoginBean| login.user.is_some())
                .access_roles("roles", |login: &LoginBean| login.roles.clone()),
        )
        .bean(
            BeanDefinition::new("counter", Scope::Session, Counter::default).post_construct(move |counter| {
                counter.hits += 1;
                // Расширяем окно гонки
                std::thread::sleep(std::time::Duration::from_millis(20));
                counter_constructed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .bean(counted(
            BeanDefinition::new("catalog", Scope::Application, || Catalog {
                items: vec!["tea".to_string(), "coffee".to_string()],
            }),
            counters,
        ))
        .bean(counted(
            BeanDefinition::new("clock", Scope::Request, Clock::default)
                .resource::<String, _>("currency", Some("${shop.currency}"), |clock, value| clock.currency = value),
            counters,
        ))
        .bean(counted(
            BeanDefinition::new("orderForm", Scope::Page, OrderForm::default)
                .inject::<Catalog, _>("catalog", |form, bean| form.catalog = bean)
                .inject::<LoginBean, _>("login", |form, bean| form.login = bean)
                .post_preset("quantity", |form, value| {
                    form.quantity = value.parse()?;
                    Ok(())
                })
                .action("place", &["customer"], |form| {
                    form.placed = true;
                    Ok(Some("/orders/done".to_string()))
                })
                .action("recalculate", &[], |_| Ok(Some("/orders".to_string())))
                .action("fail", &[], |_| Err(anyhow!("payment backend unavailable"))),
            counters,
        ))
        .bean(counted(
            BeanDefinition::new("orderTable", Scope::Page, OrderTable::default),
            counters,
        ))
        .bean(counted(
            BeanDefinition::new("wizard", Scope::Page, Wizard::default),
            counters,
        ))
        .bean(
            BeanDefinition::new("promoBanner", Scope::Page, PromoBanner::default)
                .post_preset("target", |banner, value| {
                    banner.target = Some(value.to_string());
                    Ok(())
                })
                .post_construct_with(|banner, ctx| {
                    if let Some(target) = &banner.target {
                        ctx.redirect_to(target.clone());
                    }
                    Ok(())
                }),
        )
        .build()
        .expect("shop registry is valid")
}

pub fn shop_config() -> ContainerConfig {
    ContainerConfig {
        security: SecurityConfig {
            url_patterns: vec![
                UrlPattern::secure("/admin", Some(&["manager"])),
                UrlPattern::secure("/orders/*", Some(&["*"])),
                UrlPattern::secure(HOME, None),
                UrlPattern::open("/contact"),
                UrlPattern::open(LOGIN),
            ],
            non_secure_only: vec!["/register".to_string()],
        },
        pages: PageManifest::new()
            .page("/orders", ["orderForm", "orderTable"])
            .page("/checkout", ["wizard"])
            .page("/promo", ["promoBanner"])
            .page("/contact", ["clock", "catalog"]),
        ..ContainerConfig::default()
    }
}

pub struct Shop {
    pub container: WebContainer,
    pub counters: Counters,
}

impl Shop {
    pub fn new() -> Self {
        let counters = Counters::default();
        let container = WebContainer::builder(shop_registry(&counters))
            .config(shop_config())
            .resolver(StaticResolver::new().with_expression("${shop.currency}", "EUR".to_string()))
            .build()
            .expect("shop container starts");
        Self { container, counters }
    }

    /// Помечает пользователя сессии как вошедшего с данными ролями
    pub fn sign_in(&self, session: &Arc<Session>, user: &str, roles: &[&str]) -> ContainerResult<()> {
        let ctx = self.container.begin_request(session);
        let login = self.container.lifecycle().instantiate_auth(&ctx)?;
        login.with_mut(|login: &mut LoginBean| {
            login.user = Some(user.to_string());
            login.roles = roles.iter().map(|role| role.to_string()).collect();
        });
        self.container.end_request(&ctx);
        Ok(())
    }

    /// Живые page-scoped bean-ы сессии
    pub fn page_beans(&self, session: &Session) -> Vec<String> {
        let registry = self.container.registry();
        session
            .bean_names()
            .into_iter()
            .filter(|name| registry.get(name).map(|d| d.scope()) == Some(Scope::Page))
            .collect()
    }
}

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("container=debug")
        .with_test_writer()
        .try_init();
}
