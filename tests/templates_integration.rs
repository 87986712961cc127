//! Integration tests for the template catalog and rendering.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde_json::json;
use tokio_test::assert_ok;

use courier::error::Error;
use courier::storage::Storage;
use courier::templates::{
    LocalizedContent, NewTemplate, TemplateCategory, TemplateRenderer, TemplateUpdate, Variables,
};

async fn create_test_renderer() -> (TemplateRenderer, Storage) {
    let storage = Storage::new("sqlite::memory:").await.unwrap();
    let renderer = TemplateRenderer::new(storage.clone(), Duration::from_secs(3600));
    (renderer, storage)
}

fn vars(pairs: &[(&str, serde_json::Value)]) -> Variables {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn order_shipped() -> NewTemplate {
    NewTemplate {
        name: "Order shipped".to_string(),
        category: TemplateCategory::Business,
        content: BTreeMap::from([
            (
                "ar".to_string(),
                LocalizedContent::new("تم شحن الطلب {{order_id}}", "سيصل طلبك خلال {{days}} أيام"),
            ),
            (
                "en".to_string(),
                LocalizedContent::new("Order {{order_id}} shipped", "Arrives in {{days}} days"),
            ),
        ]),
        required_variables: BTreeSet::from(["order_id".to_string()]),
        ..NewTemplate::default()
    }
}

#[tokio::test]
async fn test_system_alert_renders_in_arabic() {
    let (renderer, _) = create_test_renderer().await;

    let rendered = renderer
        .create_notification_from_template(
            "SYSTEM_ALERT",
            &vars(&[("alert_type", json!("disk_full")), ("details", json!("95%"))]),
            "ar",
        )
        .await
        .unwrap();

    assert_eq!(rendered.language, "ar");
    assert!(rendered.body.contains("disk_full"));
    assert!(rendered.body.contains("95%"));
    assert!(!rendered.body.contains("{{"));
    assert_eq!(rendered.notification_type, TemplateCategory::System);
}

#[tokio::test]
async fn test_missing_required_variable_is_reported() {
    let (renderer, _) = create_test_renderer().await;

    let result = renderer
        .create_notification_from_template("SYSTEM_ALERT", &Variables::new(), "en")
        .await;

    match result {
        Err(Error::MissingVariables(names)) => assert_eq!(names, vec!["alert_type".to_string()]),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_template_and_language_fallback() {
    let (renderer, _) = create_test_renderer().await;

    let missing = renderer
        .create_notification_from_template("NO_SUCH_TEMPLATE", &Variables::new(), "en")
        .await;
    assert!(matches!(missing, Err(Error::NotFound(_))));

    let rendered = renderer
        .create_notification_from_template(
            "SYSTEM_ALERT",
            &vars(&[("alert_type", json!("cpu"))]),
            "fr",
        )
        .await
        .unwrap();
    assert_eq!(rendered.language, "en");
    assert_eq!(rendered.title, "System alert: cpu");
    // Optional placeholder left untouched when not supplied
    assert!(rendered.body.contains("{{details}}"));
}

#[tokio::test]
async fn test_custom_template_lifecycle() {
    let (renderer, storage) = create_test_renderer().await;

    let created = renderer.create_template(order_shipped()).await.unwrap();
    assert!(created.template_id.starts_with("CUSTOM_"));
    assert!(created.variables.contains("days"));

    let rendered = renderer
        .create_notification_from_template(
            &created.template_id,
            &vars(&[("order_id", json!(42)), ("days", json!(3))]),
            "en",
        )
        .await
        .unwrap();
    assert_eq!(rendered.title, "Order 42 shipped");
    assert_eq!(rendered.body, "Arrives in 3 days");

    let updated = renderer
        .update_template(
            &created.template_id,
            TemplateUpdate {
                name: Some("Order dispatched".to_string()),
                ..TemplateUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "Order dispatched");

    let fetched = renderer
        .get_template(&created.template_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.name, "Order dispatched");

    assert_ok!(renderer.delete_template(&created.template_id).await);
    assert!(
        renderer
            .get_template(&created.template_id)
            .await
            .unwrap()
            .is_none()
    );
    assert!(storage.find_template(&created.template_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_built_ins_are_read_only() {
    let (renderer, _) = create_test_renderer().await;

    let update = renderer
        .update_template("REMINDER", TemplateUpdate::default())
        .await;
    assert!(matches!(update, Err(Error::Validation(_))));

    let delete = renderer.delete_template("REMINDER").await;
    assert!(matches!(delete, Err(Error::Validation(_))));

    assert!(renderer.get_template("REMINDER").await.unwrap().is_some());
}

#[tokio::test]
async fn test_catalog_queries_include_custom_templates() {
    let (renderer, _) = create_test_renderer().await;
    let created = renderer.create_template(order_shipped()).await.unwrap();

    let all = renderer.get_all_templates().await.unwrap();
    assert_eq!(all.len(), 9);

    let business = renderer
        .get_templates_by_category(TemplateCategory::Business)
        .await
        .unwrap();
    assert!(business.iter().any(|t| t.template_id == created.template_id));
    assert!(business.iter().any(|t| t.template_id == "BUSINESS_UPDATE"));

    let found = renderer.search_templates("shipped", None).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].template_id, created.template_id);
}

#[tokio::test]
async fn test_usage_is_recorded_for_custom_templates() {
    let (renderer, storage) = create_test_renderer().await;
    let created = renderer.create_template(order_shipped()).await.unwrap();

    renderer
        .record_template_usage(&created.template_id, true)
        .await
        .unwrap();
    renderer
        .record_template_usage(&created.template_id, false)
        .await
        .unwrap();

    let stored = storage
        .find_template(&created.template_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.usage.count, 2);
    assert_eq!(stored.usage.success_rate, 50.0);
    assert!(stored.usage.last_used.is_some());

    assert_ok!(renderer.record_template_usage("SYSTEM_ALERT", true).await);
}
