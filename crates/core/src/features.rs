//! Adapter feature detection
//!
//! Detection is additive: a flag that is already set (by the adapter's
//! own declaration or by an earlier detection pass) is never re-derived.

use serde::{Deserialize, Serialize};

use crate::types::{Method, BASIC_INTERFACE, SUBTRANSACTIONS_INTERFACE, WRAP_INTERFACE};

/// Client method used when the adapter does not list any
pub const DEFAULT_CLIENT_METHOD: &str = "query";

/// Partially-known feature map, as stored on a facade
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Basic open/commit/rollback support
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic: Option<bool>,
    /// Nested sub-transaction support
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtransactions: Option<bool>,
    /// Call wrapping support
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrap: Option<bool>,
    /// Client methods that run inside the ambient transaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_methods: Option<Vec<String>>,
    /// Client attributes that are plain data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_data_attributes: Option<Vec<String>>,
}

/// Fully-resolved feature map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    /// Basic open/commit/rollback support
    pub basic: bool,
    /// Nested sub-transaction support
    pub subtransactions: bool,
    /// Call wrapping support
    pub wrap: bool,
    /// Client methods that run inside the ambient transaction
    pub client_methods: Vec<String>,
    /// Client attributes that are plain data
    pub client_data_attributes: Vec<String>,
}

impl FeatureFlags {
    /// Fill every unset flag from `methods` and return the resolved map
    ///
    /// A capability group is available only if every one of its methods
    /// is listed.
    pub fn detect(&mut self, methods: &[Method]) -> Features {
        self.client_methods
            .get_or_insert_with(|| vec![DEFAULT_CLIENT_METHOD.to_string()]);
        self.client_data_attributes.get_or_insert_with(Vec::new);

        let basic = *self
            .basic
            .get_or_insert_with(|| implements_all(methods, BASIC_INTERFACE));
        let subtransactions = *self
            .subtransactions
            .get_or_insert_with(|| implements_all(methods, SUBTRANSACTIONS_INTERFACE));
        let wrap = *self
            .wrap
            .get_or_insert_with(|| implements_all(methods, WRAP_INTERFACE));

        Features {
            basic,
            subtransactions,
            wrap,
            client_methods: self.client_methods.clone().unwrap_or_default(),
            client_data_attributes: self.client_data_attributes.clone().unwrap_or_default(),
        }
    }

    /// True once every flag has been resolved
    pub fn is_complete(&self) -> bool {
        self.basic.is_some()
            && self.subtransactions.is_some()
            && self.wrap.is_some()
            && self.client_methods.is_some()
            && self.client_data_attributes.is_some()
    }
}

fn implements_all(methods: &[Method], group: &[Method]) -> bool {
    group.iter().all(|m| methods.contains(m))
}
