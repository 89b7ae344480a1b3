//! OData query-string modifier accumulator
//!
//! Collects `$select`/`$expand`/`$filter`/`$top`/`$skiptoken`/`$orderby`
//! values and serializes them onto an endpoint URL. List-valued modifiers
//! append with comma dedup; singleton modifiers are last-write-wins.

use std::collections::BTreeMap;

/// Accumulated OData modifiers for one endpoint
#[derive(Debug, Clone, Default)]
pub struct ODataMods {
    mods: BTreeMap<&'static str, String>,
}

impl ODataMods {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append fields to `$select`
    pub fn add_select(&mut self, value: &str) -> &mut Self {
        self.append_csv("$select", value);
        self
    }

    /// Append navigation properties to `$expand`
    pub fn add_expand(&mut self, value: &str) -> &mut Self {
        self.append_csv("$expand", value);
        self
    }

    /// Append a predicate to `$filter`
    pub fn add_filter(&mut self, value: &str) -> &mut Self {
        self.append_csv("$filter", value);
        self
    }

    /// Set `$top`; replaces any previous value
    pub fn add_top(&mut self, top: usize) -> &mut Self {
        self.mods.insert("$top", top.to_string());
        self
    }

    /// Set `$skiptoken`; replaces any previous value
    pub fn add_skip(&mut self, skip_token: &str) -> &mut Self {
        self.mods.insert("$skiptoken", skip_token.to_string());
        self
    }

    /// Append a `field asc|desc` pair to `$orderby`
    pub fn add_order_by(&mut self, order_by: &str, ascending: bool) -> &mut Self {
        let direction = if ascending { "asc" } else { "desc" };
        self.append_csv("$orderby", &format!("{order_by} {direction}"));
        self
    }

    /// Current modifier map keyed by `$`-parameter name
    pub fn get(&self) -> &BTreeMap<&'static str, String> {
        &self.mods
    }

    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }

    fn append_csv(&mut self, key: &'static str, value: &str) {
        let entry = self.mods.entry(key).or_default();
        for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let exists = entry.split(',').any(|existing| existing == part);
            if !exists {
                if !entry.is_empty() {
                    entry.push(',');
                }
                entry.push_str(part);
            }
        }
    }
}

/// Endpoint URL with modifiers applied, preserving any query already present.
/// Modifier values win over same-named parameters on the endpoint.
pub fn to_url(endpoint: &str, mods: &ODataMods) -> String {
    if mods.is_empty() {
        return endpoint.to_string();
    }

    let (base, existing) = match endpoint.split_once('?') {
        Some((base, query)) => (base, query),
        None => (endpoint, ""),
    };

    let mut params: Vec<(String, String)> = Vec::new();
    for pair in existing.split('&').filter(|p| !p.is_empty()) {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        if !mods.get().contains_key(k) {
            params.push((k.to_string(), v.to_string()));
        }
    }
    for (k, v) in mods.get() {
        params.push((k.to_string(), urlencoding::encode(v).into_owned()));
    }

    let query = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    format!("{base}?{query}")
}
