//! Per-call execution context shared by read and write APIs.
//!
//! # Responsibility
//! - Carry the active version id, language fallback chain, currency and
//!   optional sales channel through searches, writes and events.
//!
//! # Invariants
//! - The language chain is never empty and always ends with the system
//!   language.
//! - Ids are 32-char lowercase hex strings.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Version id of the live (non-draft) dataset.
pub const LIVE_VERSION: &str = "0fa91ce3e96a4bc2be4bd9ce752c3425";
/// System language used as the last translation fallback.
pub const LANGUAGE_SYSTEM: &str = "2fbb5fe2e29a4d70aa5854ce7ce3e20b";
/// Currency seeded as the default currency.
pub const CURRENCY_DEFAULT: &str = "b7d2554b0ce847cd82f3ac9bd1c0dfca";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub version_id: String,
    pub language_chain: Vec<String>,
    pub currency_id: String,
    pub sales_channel_id: Option<String>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            version_id: LIVE_VERSION.to_string(),
            language_chain: vec![LANGUAGE_SYSTEM.to_string()],
            currency_id: CURRENCY_DEFAULT.to_string(),
            sales_channel_id: None,
        }
    }
}

impl Context {
    pub fn with_version(mut self, version_id: impl Into<String>) -> Self {
        self.version_id = version_id.into();
        self
    }

    /// Makes `language_id` the preferred language, falling back to system.
    pub fn with_language(mut self, language_id: impl Into<String>) -> Self {
        let language_id = language_id.into();
        self.language_chain = if language_id == LANGUAGE_SYSTEM {
            vec![LANGUAGE_SYSTEM.to_string()]
        } else {
            vec![language_id, LANGUAGE_SYSTEM.to_string()]
        };
        self
    }

    pub fn with_currency(mut self, currency_id: impl Into<String>) -> Self {
        self.currency_id = currency_id.into();
        self
    }

    pub fn with_sales_channel(mut self, sales_channel_id: impl Into<String>) -> Self {
        self.sales_channel_id = Some(sales_channel_id.into());
        self
    }

    /// Language writes without an explicit `translations` map land in.
    pub fn language_id(&self) -> &str {
        self.language_chain
            .first()
            .map_or(LANGUAGE_SYSTEM, String::as_str)
    }
}

/// Generates a fresh 32-char hex id.
pub fn random_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Current wall clock in epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}
