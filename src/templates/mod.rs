//! Multilingual notification templates.
//!
//! [`TemplateRenderer`] resolves templates through a [`TemplateCache`]
//! backed by [`Storage`], manages custom templates, and renders localized
//! notification content from a variable bag.
//!
//! # Modules
//!
//! - [`model`]: template data types and content validation
//! - [`builtin`]: the built-in catalog
//! - [`cache`]: in-memory cache with per-entry expiry
//! - [`render`]: `{{name}}` placeholder substitution

pub mod builtin;
pub mod cache;
pub mod model;
pub mod render;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::{debug, info, instrument};

pub use cache::TemplateCache;
pub use model::{
    LocalizedContent, NewTemplate, Priority, RenderedNotification, Template, TemplateCategory,
    TemplateSettings, TemplateUpdate, TemplateUsage, Variables,
};

use crate::aggregation::round2;
use crate::error::{Error, Result};
use crate::storage::Storage;

/// Resolves, manages and renders notification templates.
///
/// Cloning is cheap; clones share one cache.
#[derive(Clone)]
pub struct TemplateRenderer {
    storage: Storage,
    cache: Arc<TemplateCache>,
}

impl TemplateRenderer {
    /// Create a renderer whose custom-template cache entries live for `ttl`.
    ///
    /// Built-in templates are loaded immediately.
    pub fn new(storage: Storage, ttl: Duration) -> Self {
        let renderer = Self {
            storage,
            cache: Arc::new(TemplateCache::new(ttl)),
        };
        renderer.load_built_in_templates();
        renderer
    }

    pub fn cache(&self) -> &TemplateCache {
        &self.cache
    }

    /// Put every built-in template into the cache. Returns how many were loaded.
    pub fn load_built_in_templates(&self) -> usize {
        let templates = builtin::built_in_templates();
        let loaded = templates.len();
        for template in templates {
            self.cache.insert_permanent(template);
        }
        debug!(loaded, "Built-in templates loaded");
        loaded
    }

    /// Cache-first lookup, falling back to active stored templates.
    ///
    /// A template that exists nowhere is `Ok(None)`, not an error.
    pub async fn get_template(&self, template_id: &str) -> Result<Option<Template>> {
        if let Some(template) = self.cache.get(template_id) {
            return Ok(Some(template));
        }

        let found = self.storage.find_active_template(template_id).await?;
        if let Some(template) = &found {
            debug!(template_id, "Template cached from storage");
            self.cache.insert(template.clone());
        }
        Ok(found)
    }

    /// Validate, persist and cache a new custom template.
    #[instrument(skip(self, new), fields(name = %new.name))]
    pub async fn create_template(&self, new: NewTemplate) -> Result<Template> {
        model::validate_content(&new.content)?;

        let now = Utc::now();
        let template_id = generate_template_id(now.timestamp_millis());

        let mut variables = new.variables;
        variables.extend(new.required_variables.iter().cloned());
        for content in new.content.values() {
            variables.extend(render::placeholders(&content.title));
            variables.extend(render::placeholders(&content.body));
        }

        let template = Template {
            name: if new.name.is_empty() {
                template_id.clone()
            } else {
                new.name
            },
            template_id,
            description: new.description,
            category: new.category,
            content: new.content,
            variables,
            required_variables: new.required_variables,
            settings: new.settings,
            is_active: new.is_active,
            is_built_in: false,
            usage: TemplateUsage::default(),
            created_at: now,
            updated_at: now,
        };

        self.storage.insert_template(&template).await?;
        self.cache.insert(template.clone());

        info!(template_id = %template.template_id, "Template created");
        Ok(template)
    }

    /// Persist a partial update and drop the cached copy.
    ///
    /// The next lookup re-reads storage instead of trusting a patched cache entry.
    #[instrument(skip(self, update))]
    pub async fn update_template(
        &self,
        template_id: &str,
        update: TemplateUpdate,
    ) -> Result<Template> {
        reject_built_in(template_id)?;

        let mut template = self
            .storage
            .find_template(template_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("template '{template_id}'")))?;

        template.apply(update, Utc::now())?;

        if !self.storage.replace_template(&template).await? {
            // Deleted between read and write
            return Err(Error::NotFound(format!("template '{template_id}'")));
        }
        self.cache.evict(template_id);

        info!(template_id, "Template updated");
        Ok(template)
    }

    #[instrument(skip(self))]
    pub async fn delete_template(&self, template_id: &str) -> Result<()> {
        reject_built_in(template_id)?;

        let deleted = self.storage.delete_template(template_id).await?;
        self.cache.evict(template_id);

        if !deleted {
            return Err(Error::NotFound(format!("template '{template_id}'")));
        }

        info!(template_id, "Template deleted");
        Ok(())
    }

    /// Active built-in templates followed by active stored templates.
    pub async fn get_all_templates(&self) -> Result<Vec<Template>> {
        let mut templates: Vec<Template> = builtin::built_in_templates()
            .into_iter()
            .filter(|t| t.is_active)
            .collect();
        templates.extend(self.storage.list_active_templates().await?);
        Ok(templates)
    }

    pub async fn get_templates_by_category(
        &self,
        category: TemplateCategory,
    ) -> Result<Vec<Template>> {
        let templates = self.get_all_templates().await?;
        Ok(templates
            .into_iter()
            .filter(|t| t.category == category)
            .collect())
    }

    /// Case-insensitive search over id, name, description and localized titles.
    ///
    /// An empty query matches every active template in `category`.
    pub async fn search_templates(
        &self,
        query: &str,
        category: Option<TemplateCategory>,
    ) -> Result<Vec<Template>> {
        let needle = query.trim().to_lowercase();
        let templates = self.get_all_templates().await?;

        Ok(templates
            .into_iter()
            .filter(|t| category.is_none_or(|c| t.category == c))
            .filter(|t| needle.is_empty() || matches_query(t, &needle))
            .collect())
    }

    /// Render a notification from a template.
    ///
    /// Fails with [`Error::NotFound`] for unknown templates and
    /// [`Error::MissingVariables`] when required variables are absent.
    /// Placeholders naming variables that were not supplied stay as-is.
    pub async fn create_notification_from_template(
        &self,
        template_id: &str,
        variables: &Variables,
        language: &str,
    ) -> Result<RenderedNotification> {
        let template = self
            .get_template(template_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("template '{template_id}'")))?;

        let missing = template.missing_variables(variables);
        if !missing.is_empty() {
            return Err(Error::MissingVariables(missing));
        }

        let (rendered_language, content) = template.content_for(language).ok_or_else(|| {
            Error::NotFound(format!(
                "template '{template_id}' has no '{language}' or '{}' content",
                model::FALLBACK_LANGUAGE
            ))
        })?;

        let fill = |text: &str| render::substitute(text, variables);

        Ok(RenderedNotification {
            template_id: template.template_id.clone(),
            language: rendered_language.to_string(),
            title: fill(&content.title),
            body: fill(&content.body),
            short_body: content.short_body.as_deref().map(fill),
            action_text: content.action_text.as_deref().map(fill),
            notification_type: template.category,
            channels: template.settings.channels.clone(),
            priority: template.settings.priority,
            silent: template.settings.silent,
        })
    }

    /// Fold one delivery outcome into a stored template's usage counters.
    ///
    /// Built-in templates are not persisted, so their usage is not tracked.
    pub async fn record_template_usage(&self, template_id: &str, success: bool) -> Result<()> {
        if builtin::is_built_in(template_id) {
            debug!(template_id, "Usage of built-in templates is not tracked");
            return Ok(());
        }

        let mut template = self
            .storage
            .find_template(template_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("template '{template_id}'")))?;

        let usage = &mut template.usage;
        let outcome = if success { 100.0 } else { 0.0 };
        usage.success_rate =
            round2((usage.success_rate * usage.count as f64 + outcome) / (usage.count + 1) as f64);
        usage.count += 1;
        usage.last_used = Some(Utc::now());

        self.storage.replace_template(&template).await?;
        self.cache.evict(template_id);
        Ok(())
    }

    /// Empty the cache, then restore the built-ins.
    pub fn clear_cache(&self) {
        self.cache.clear();
        self.load_built_in_templates();
        info!("Template cache cleared");
    }
}

fn reject_built_in(template_id: &str) -> Result<()> {
    if builtin::is_built_in(template_id) {
        return Err(Error::Validation(format!(
            "built-in template '{template_id}' cannot be modified"
        )));
    }
    Ok(())
}

fn generate_template_id(millis: i64) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("CUSTOM_{millis}_{suffix}")
}

fn matches_query(template: &Template, needle: &str) -> bool {
    let contains = |s: &str| s.to_lowercase().contains(needle);

    contains(&template.template_id)
        || contains(&template.name)
        || template.description.as_deref().is_some_and(contains)
        || template.content.values().any(|c| contains(&c.title))
}
