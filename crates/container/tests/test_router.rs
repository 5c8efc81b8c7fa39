mod fixtures;

use container::{ContainerError, ContainerResult, Dispatch, ExpressionBinding, Method, SubmitRequest};
use fixtures::{OrderForm, PromoBanner, Shop, LOGIN};

#[test]
fn test_other_methods_forward_without_beans() -> ContainerResult<()> {
    let shop = Shop::new();
    let session = shop.container.open_session();
    shop.sign_in(&session, "alice", &["customer"])?;

    let ctx = shop.container.begin_request(&session);
    match shop.container.dispatch(&ctx, Method::Put, "/orders", None)? {
        Dispatch::Forward { path, beans } => {
            assert_eq!(path, "/orders");
            assert!(beans.is_empty());
        }
        other => panic!("expected forward, got {:?}", other),
    }
    assert!(session.page_scope_paths().is_empty());
    Ok(())
}

#[test]
fn test_other_methods_still_authenticate() -> ContainerResult<()> {
    let shop = Shop::new();
    let session = shop.container.open_session();
    let ctx = shop.container.begin_request(&session);

    let dispatch = shop.container.dispatch(&ctx, Method::Delete, "/admin", None)?;
    assert_eq!(dispatch.redirect_target(), Some(LOGIN));
    Ok(())
}

#[test]
fn test_unmapped_page_forwards_empty() -> ContainerResult<()> {
    let shop = Shop::new();
    let session = shop.container.open_session();
    let ctx = shop.container.begin_request(&session);

    let dispatch = shop.container.dispatch(&ctx, Method::Get, "/about", None)?;
    assert!(dispatch.is_forward());
    assert!(dispatch.bean("orderForm").is_none());
    Ok(())
}

#[test]
fn test_first_post_applies_request_values_on_construction() -> ContainerResult<()> {
    let shop = Shop::new();
    let session = shop.container.open_session();
    shop.sign_in(&session, "alice", &["customer"])?;

    let ctx = shop.container.begin_request_with(
        &session,
        vec![
            ExpressionBinding::new("orderForm.quantity", "7"),
            ExpressionBinding::new("orderTable.unknown", "ignored"),
        ],
    );
    let dispatch = shop.container.dispatch(&ctx, Method::Post, "/orders", None)?;

    let form = dispatch.bean("orderForm").expect("order form");
    assert_eq!(form.with(|f: &OrderForm| f.quantity), Some(7));
    assert!(form.with(|f: &OrderForm| f.catalog.is_some() && f.login.is_some()).unwrap_or(false));
    // значение без post preset hook остаётся невостребованным
    assert_eq!(ctx.pending_bindings().len(), 1);
    Ok(())
}

#[test]
fn test_invalid_request_value_rolls_back_construction() -> ContainerResult<()> {
    let shop = Shop::new();
    let session = shop.container.open_session();
    shop.sign_in(&session, "alice", &["customer"])?;

    let ctx = shop
        .container
        .begin_request_with(&session, vec![ExpressionBinding::new("orderForm.quantity", "many")]);
    let err = shop
        .container
        .dispatch(&ctx, Method::Post, "/orders", None)
        .unwrap_err();

    assert!(matches!(err, ContainerError::Instantiation { ref bean, .. } if bean == "orderForm"));
    assert!(session.bean("orderForm").is_none());
    assert!(session.page_scope("/orders").is_none());
    assert_eq!(shop.container.stats().failed_constructions, 1);
    Ok(())
}

#[test]
fn test_submit_to_unknown_action() -> ContainerResult<()> {
    let shop = Shop::new();
    let session = shop.container.open_session();
    shop.sign_in(&session, "alice", &["customer"])?;

    let ctx = shop.container.begin_request(&session);
    let unknown_action = shop
        .container
        .dispatch(&ctx, Method::Post, "/orders", Some(SubmitRequest::new("orderForm", "refund")))
        .unwrap_err();
    assert_eq!(unknown_action.category(), "action");

    let unknown_bean = shop
        .container
        .dispatch(&ctx, Method::Post, "/orders", Some(SubmitRequest::new("ghost", "place")))
        .unwrap_err();
    assert!(unknown_bean.to_string().contains("no such bean"));
    Ok(())
}

#[test]
fn test_submit_to_bean_outside_page() -> ContainerResult<()> {
    let shop = Shop::new();
    let session = shop.container.open_session();

    let ctx = shop.container.begin_request(&session);
    let err = shop
        .container
        .dispatch(&ctx, Method::Post, "/contact", Some(SubmitRequest::new("counter", "reset")))
        .unwrap_err();
    assert!(err.to_string().contains("no such action"));
    // bean был создан по имени в своём scope
    assert!(session.bean("counter").is_some());
    Ok(())
}

#[test]
fn test_post_construct_redirect_leaves_page() -> ContainerResult<()> {
    let shop = Shop::new();

    for method in [Method::Get, Method::Post] {
        let session = shop.container.open_session();
        let ctx = shop
            .container
            .begin_request_with(&session, vec![ExpressionBinding::new("promoBanner.target", "/contact")]);

        let dispatch = shop.container.dispatch(&ctx, method, "/promo", None)?;
        assert_eq!(dispatch.redirect_target(), Some("/contact"), "{} /promo", method);
        assert!(session.page_scope("/promo").is_none());
        assert!(session.bean("promoBanner").is_none());
        assert!(ctx.requested_redirect().is_none());
    }
    Ok(())
}

#[test]
fn test_post_construct_redirect_to_same_page_forwards() -> ContainerResult<()> {
    let shop = Shop::new();
    let session = shop.container.open_session();

    let ctx = shop
        .container
        .begin_request_with(&session, vec![ExpressionBinding::new("promoBanner.target", "/promo")]);
    let dispatch = shop.container.dispatch(&ctx, Method::Get, "/promo", None)?;

    assert!(dispatch.is_forward());
    let banner = dispatch.bean("promoBanner").expect("banner on page");
    assert_eq!(banner.with(|b: &PromoBanner| b.target.clone()), Some(Some("/promo".to_string())));
    assert_eq!(session.page_scope("/promo").map(|p| p.len()), Some(1));
    Ok(())
}

#[test]
fn test_page_without_redirect_forwards() -> ContainerResult<()> {
    let shop = Shop::new();
    let session = shop.container.open_session();

    let ctx = shop.container.begin_request(&session);
    let dispatch = shop.container.dispatch(&ctx, Method::Get, "/promo", None)?;
    assert!(dispatch.bean("promoBanner").is_some());
    assert!(session.page_scope("/promo").is_some());
    Ok(())
}
