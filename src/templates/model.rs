//! Data types for notification templates.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::Channel;

/// Languages every template must provide.
pub const REQUIRED_LANGUAGES: [&str; 2] = ["ar", "en"];

/// Language used when the requested one is missing.
pub const FALLBACK_LANGUAGE: &str = "en";

/// Variable bag supplied at render time.
pub type Variables = HashMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateCategory {
    System,
    Business,
    Transaction,
    Security,
    Reminder,
    Warning,
    Success,
    Error,
    Custom,
}

impl TemplateCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateCategory::System => "system",
            TemplateCategory::Business => "business",
            TemplateCategory::Transaction => "transaction",
            TemplateCategory::Security => "security",
            TemplateCategory::Reminder => "reminder",
            TemplateCategory::Warning => "warning",
            TemplateCategory::Success => "success",
            TemplateCategory::Error => "error",
            TemplateCategory::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Title and body of a template in one language.
///
/// Missing fields deserialize as empty strings so that validation, not
/// parsing, reports them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalizedContent {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_text: Option<String>,
}

impl LocalizedContent {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            short_body: None,
            action_text: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSettings {
    pub channels: BTreeSet<Channel>,
    pub priority: Priority,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_days: Option<u32>,
    pub silent: bool,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            channels: BTreeSet::from([Channel::InApp]),
            priority: Priority::Medium,
            max_retries: 3,
            expiry_days: None,
            silent: false,
        }
    }
}

/// Usage counters, maintained outside of rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateUsage {
    pub count: u64,
    pub success_rate: f64,
    pub last_used: Option<DateTime<Utc>>,
}

/// A reusable, multilingual notification definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub template_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub category: TemplateCategory,
    /// Language code to localized content.
    pub content: BTreeMap<String, LocalizedContent>,
    /// Every variable the template knows about; a superset of `required_variables`.
    pub variables: BTreeSet<String>,
    pub required_variables: BTreeSet<String>,
    pub settings: TemplateSettings,
    pub is_active: bool,
    pub is_built_in: bool,
    pub usage: TemplateUsage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    /// Content for `language`, falling back to English.
    pub fn content_for(&self, language: &str) -> Option<(&str, &LocalizedContent)> {
        self.content
            .get_key_value(language)
            .or_else(|| self.content.get_key_value(FALLBACK_LANGUAGE))
            .map(|(lang, content)| (lang.as_str(), content))
    }

    /// Required variables absent from `variables`, in name order.
    pub fn missing_variables(&self, variables: &Variables) -> Vec<String> {
        self.required_variables
            .iter()
            .filter(|name| !variables.contains_key(name.as_str()))
            .cloned()
            .collect()
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, update: TemplateUpdate, now: DateTime<Utc>) -> Result<()> {
        if let Some(content) = update.content {
            validate_content(&content)?;
            self.content = content;
        }
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(description) = update.description {
            self.description = Some(description);
        }
        if let Some(category) = update.category {
            self.category = category;
        }
        if let Some(variables) = update.variables {
            self.variables = variables;
        }
        if let Some(required) = update.required_variables {
            self.required_variables = required;
        }
        if let Some(settings) = update.settings {
            self.settings = settings;
        }
        if let Some(is_active) = update.is_active {
            self.is_active = is_active;
        }

        self.variables.extend(self.required_variables.iter().cloned());
        self.updated_at = now;
        Ok(())
    }
}

/// Input for creating a custom template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewTemplate {
    pub name: String,
    pub description: Option<String>,
    pub category: TemplateCategory,
    pub content: BTreeMap<String, LocalizedContent>,
    pub variables: BTreeSet<String>,
    pub required_variables: BTreeSet<String>,
    pub settings: TemplateSettings,
    pub is_active: bool,
}

impl Default for NewTemplate {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: None,
            category: TemplateCategory::Custom,
            content: BTreeMap::new(),
            variables: BTreeSet::new(),
            required_variables: BTreeSet::new(),
            settings: TemplateSettings::default(),
            is_active: true,
        }
    }
}

/// Partial update of a custom template; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemplateUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<TemplateCategory>,
    pub content: Option<BTreeMap<String, LocalizedContent>>,
    pub variables: Option<BTreeSet<String>>,
    pub required_variables: Option<BTreeSet<String>>,
    pub settings: Option<TemplateSettings>,
    pub is_active: Option<bool>,
}

/// Notification content produced from a template.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedNotification {
    pub template_id: String,
    /// Language actually rendered, after fallback.
    pub language: String,
    pub title: String,
    pub body: String,
    pub short_body: Option<String>,
    pub action_text: Option<String>,
    #[serde(rename = "type")]
    pub notification_type: TemplateCategory,
    pub channels: BTreeSet<Channel>,
    pub priority: Priority,
    pub silent: bool,
}

/// Check that every required language has a non-empty title and body.
pub fn validate_content(content: &BTreeMap<String, LocalizedContent>) -> Result<()> {
    let mut problems = Vec::new();

    for language in REQUIRED_LANGUAGES {
        match content.get(language) {
            None => problems.push(format!("content.{language} is required")),
            Some(localized) => {
                if localized.title.trim().is_empty() {
                    problems.push(format!("content.{language}.title is required"));
                }
                if localized.body.trim().is_empty() {
                    problems.push(format!("content.{language}.body is required"));
                }
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(problems.join("; ")))
    }
}
