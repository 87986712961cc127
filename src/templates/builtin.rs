//! Templates shipped with the system.
//!
//! Built-ins are always present in the cache, never expire, and cannot be
//! updated or deleted.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use super::model::{
    LocalizedContent, Priority, Template, TemplateCategory, TemplateSettings, TemplateUsage,
};
use crate::model::Channel;

struct Text {
    title: &'static str,
    body: &'static str,
    short_body: &'static str,
    action_text: Option<&'static str>,
}

impl Text {
    fn localized(&self) -> LocalizedContent {
        LocalizedContent {
            title: self.title.to_string(),
            body: self.body.to_string(),
            short_body: Some(self.short_body.to_string()),
            action_text: self.action_text.map(str::to_string),
        }
    }
}

struct BuiltIn {
    id: &'static str,
    name: &'static str,
    category: TemplateCategory,
    priority: Priority,
    channels: &'static [Channel],
    required: &'static [&'static str],
    optional: &'static [&'static str],
    ar: Text,
    en: Text,
}

impl BuiltIn {
    fn into_template(self) -> Template {
        let required: BTreeSet<String> = self.required.iter().map(|v| v.to_string()).collect();
        let variables = self
            .optional
            .iter()
            .map(|v| v.to_string())
            .chain(required.iter().cloned())
            .collect();

        Template {
            template_id: self.id.to_string(),
            name: self.name.to_string(),
            description: None,
            category: self.category,
            content: BTreeMap::from([
                ("ar".to_string(), self.ar.localized()),
                ("en".to_string(), self.en.localized()),
            ]),
            variables,
            required_variables: required,
            settings: TemplateSettings {
                channels: self.channels.iter().copied().collect(),
                priority: self.priority,
                max_retries: 3,
                expiry_days: None,
                silent: false,
            },
            is_active: true,
            is_built_in: true,
            usage: TemplateUsage::default(),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

pub const BUILT_IN_IDS: [&str; 8] = [
    "SYSTEM_ALERT",
    "TRANSACTION_SUCCESS",
    "SECURITY_WARNING",
    "REMINDER",
    "ERROR_NOTIFICATION",
    "SUCCESS_NOTIFICATION",
    "BUSINESS_UPDATE",
    "WARNING_NOTICE",
];

pub fn is_built_in(template_id: &str) -> bool {
    BUILT_IN_IDS.contains(&template_id)
}

/// The full built-in catalog, in [`BUILT_IN_IDS`] order.
pub fn built_in_templates() -> Vec<Template> {
    catalog().into_iter().map(BuiltIn::into_template).collect()
}

fn catalog() -> Vec<BuiltIn> {
    vec![
        BuiltIn {
            id: "SYSTEM_ALERT",
            name: "System alert",
            category: TemplateCategory::System,
            priority: Priority::High,
            channels: &[Channel::InApp, Channel::Email, Channel::Dashboard],
            required: &["alert_type"],
            optional: &["details", "timestamp"],
            ar: Text {
                title: "تنبيه النظام: {{alert_type}}",
                body: "تم رصد تنبيه في النظام من نوع {{alert_type}}. التفاصيل: {{details}}",
                short_body: "تنبيه نظام: {{alert_type}}",
                action_text: Some("عرض التفاصيل"),
            },
            en: Text {
                title: "System alert: {{alert_type}}",
                body: "A system alert of type {{alert_type}} was raised. Details: {{details}}",
                short_body: "System alert: {{alert_type}}",
                action_text: Some("View details"),
            },
        },
        BuiltIn {
            id: "TRANSACTION_SUCCESS",
            name: "Transaction completed",
            category: TemplateCategory::Transaction,
            priority: Priority::Medium,
            channels: &[Channel::InApp, Channel::Email, Channel::Sms],
            required: &["amount", "transaction_id"],
            optional: &["currency", "date"],
            ar: Text {
                title: "تمت العملية بنجاح",
                body: "تمت العملية رقم {{transaction_id}} بمبلغ {{amount}} {{currency}} بنجاح.",
                short_body: "تمت العملية {{transaction_id}}",
                action_text: Some("عرض العملية"),
            },
            en: Text {
                title: "Transaction successful",
                body: "Transaction {{transaction_id}} for {{amount}} {{currency}} completed successfully.",
                short_body: "Transaction {{transaction_id}} completed",
                action_text: Some("View transaction"),
            },
        },
        BuiltIn {
            id: "SECURITY_WARNING",
            name: "Security warning",
            category: TemplateCategory::Security,
            priority: Priority::Critical,
            channels: &[Channel::InApp, Channel::Email, Channel::Sms, Channel::Push],
            required: &["event"],
            optional: &["ip_address", "location", "time"],
            ar: Text {
                title: "تحذير أمني",
                body: "تم رصد نشاط أمني: {{event}} من {{location}} ({{ip_address}}) في {{time}}.",
                short_body: "تحذير أمني: {{event}}",
                action_text: Some("تأمين الحساب"),
            },
            en: Text {
                title: "Security warning",
                body: "Security activity detected: {{event}} from {{location}} ({{ip_address}}) at {{time}}.",
                short_body: "Security warning: {{event}}",
                action_text: Some("Secure account"),
            },
        },
        BuiltIn {
            id: "REMINDER",
            name: "Reminder",
            category: TemplateCategory::Reminder,
            priority: Priority::Medium,
            channels: &[Channel::InApp, Channel::Push],
            required: &["task"],
            optional: &["due_date"],
            ar: Text {
                title: "تذكير: {{task}}",
                body: "نذكرك بـ {{task}} المستحق في {{due_date}}.",
                short_body: "تذكير: {{task}}",
                action_text: Some("فتح"),
            },
            en: Text {
                title: "Reminder: {{task}}",
                body: "This is a reminder about {{task}}, due {{due_date}}.",
                short_body: "Reminder: {{task}}",
                action_text: Some("Open"),
            },
        },
        BuiltIn {
            id: "ERROR_NOTIFICATION",
            name: "Error notification",
            category: TemplateCategory::Error,
            priority: Priority::High,
            channels: &[Channel::InApp, Channel::Dashboard],
            required: &["error_message"],
            optional: &["error_code"],
            ar: Text {
                title: "حدث خطأ",
                body: "حدث خطأ: {{error_message}} (الرمز: {{error_code}}).",
                short_body: "خطأ: {{error_message}}",
                action_text: Some("إعادة المحاولة"),
            },
            en: Text {
                title: "An error occurred",
                body: "An error occurred: {{error_message}} (code: {{error_code}}).",
                short_body: "Error: {{error_message}}",
                action_text: Some("Retry"),
            },
        },
        BuiltIn {
            id: "SUCCESS_NOTIFICATION",
            name: "Success notification",
            category: TemplateCategory::Success,
            priority: Priority::Low,
            channels: &[Channel::InApp],
            required: &["action"],
            optional: &["details"],
            ar: Text {
                title: "تمت العملية بنجاح",
                body: "تم {{action}} بنجاح. {{details}}",
                short_body: "تم {{action}}",
                action_text: None,
            },
            en: Text {
                title: "Success",
                body: "{{action}} completed successfully. {{details}}",
                short_body: "{{action}} completed",
                action_text: None,
            },
        },
        BuiltIn {
            id: "BUSINESS_UPDATE",
            name: "Business update",
            category: TemplateCategory::Business,
            priority: Priority::Medium,
            channels: &[Channel::InApp, Channel::Email],
            required: &["update_title"],
            optional: &["update_details", "department"],
            ar: Text {
                title: "تحديث: {{update_title}}",
                body: "تحديث من {{department}}: {{update_details}}",
                short_body: "تحديث: {{update_title}}",
                action_text: Some("قراءة المزيد"),
            },
            en: Text {
                title: "Update: {{update_title}}",
                body: "Update from {{department}}: {{update_details}}",
                short_body: "Update: {{update_title}}",
                action_text: Some("Read more"),
            },
        },
        BuiltIn {
            id: "WARNING_NOTICE",
            name: "Warning notice",
            category: TemplateCategory::Warning,
            priority: Priority::High,
            channels: &[Channel::InApp, Channel::Email, Channel::Whatsapp],
            required: &["warning_message"],
            optional: &["deadline"],
            ar: Text {
                title: "تنبيه مهم",
                body: "{{warning_message}}. يرجى اتخاذ الإجراء قبل {{deadline}}.",
                short_body: "تنبيه: {{warning_message}}",
                action_text: Some("اتخاذ إجراء"),
            },
            en: Text {
                title: "Important notice",
                body: "{{warning_message}}. Please take action before {{deadline}}.",
                short_body: "Notice: {{warning_message}}",
                action_text: Some("Take action"),
            },
        },
    ]
}
