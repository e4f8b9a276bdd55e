//! Ad copy shared by every composite object in a batch.
//!
//! Uploaded as free text, one `key: value` pair per line:
//!
//! ```text
//! facebook_page_id: 1234
//! Headline: Walk again without pain
//! link: https://example.com/landing
//! utm_parameters: ?utm_source=Facebook
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const DEFAULT_MESSAGE: &str = "Default ad message";
const DEFAULT_CALL_TO_ACTION: &str = "SHOP_NOW";
pub const DEFAULT_UTM_PARAMETERS: &str = "?utm_source=Facebook&utm_medium={{adset.name}}&utm_campaign={{campaign.name}}&utm_content={{ad.name}}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreativeTemplate {
    pub page_id: String,
    pub headline: String,
    pub message: String,
    pub link: String,
    pub utm_parameters: String,
    pub call_to_action: String,
    pub link_description: Option<String>,
}

impl Default for CreativeTemplate {
    fn default() -> Self {
        Self {
            page_id: String::new(),
            headline: String::new(),
            message: DEFAULT_MESSAGE.to_string(),
            link: String::new(),
            utm_parameters: DEFAULT_UTM_PARAMETERS.to_string(),
            call_to_action: DEFAULT_CALL_TO_ACTION.to_string(),
            link_description: None,
        }
    }
}

impl CreativeTemplate {
    /// Lines without a `:` are ignored; keys are matched case-insensitively.
    pub fn parse(text: &str) -> Self {
        Self::parse_over(text, &Self::default())
    }

    /// Like [`parse`](Self::parse), with keys absent from `text` taken from `base`.
    pub fn parse_over(text: &str, base: &Self) -> Self {
        let pairs: HashMap<String, String> = text
            .lines()
            .filter_map(|line| line.split_once(':'))
            .map(|(key, value)| (key.trim().to_ascii_lowercase(), value.trim().to_string()))
            .filter(|(key, _)| !key.is_empty())
            .collect();

        let pick = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| pairs.get(*key))
                .filter(|value| !value.is_empty())
                .cloned()
        };

        let defaults = base.clone();
        Self {
            page_id: pick(&["facebook_page_id", "page_id"]).unwrap_or(defaults.page_id),
            headline: pick(&["headline", "title"]).unwrap_or(defaults.headline),
            message: pick(&["message"]).unwrap_or(defaults.message),
            link: pick(&["link"]).unwrap_or(defaults.link),
            utm_parameters: pick(&["utm_parameters", "utm"]).unwrap_or(defaults.utm_parameters),
            call_to_action: pick(&["call_to_action", "cta"]).unwrap_or(defaults.call_to_action),
            link_description: pick(&["link_description", "description"])
                .or(defaults.link_description),
        }
    }

    /// Keys a composite object cannot be created without, by their text name.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.page_id.trim().is_empty() {
            missing.push("facebook_page_id");
        }
        if self.link.trim().is_empty() {
            missing.push("link");
        }
        missing
    }

    pub fn landing_url(&self) -> String {
        format!("{}{}", self.link, self.utm_parameters)
    }
}
