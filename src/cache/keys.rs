//! Query key definitions.
//!
//! A `QueryKey` is a structural identifier: resource category, scope, and a
//! normalized parameter map. Parameters are kept in a `BTreeMap`, so two keys
//! built from the same parameters compare equal regardless of the order the
//! caller supplied them in. `KeyPattern` selects keys by category for bulk
//! invalidation.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::domain::types::{ApplicationId, HospitalId, JobId};

use super::error::CacheError;

/// Resource category of a cached query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    Application,
    Job,
    Hospital,
    Dashboard,
}

impl Resource {
    pub fn as_str(self) -> &'static str {
        match self {
            Resource::Application => "application",
            Resource::Job => "job",
            Resource::Hospital => "hospital",
            Resource::Dashboard => "dashboard",
        }
    }
}

/// Shape of the cached data within a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    /// A single resource, identified by an `id` parameter.
    Detail,
    /// A paginated list, parameterized by filters.
    List,
    /// A derived aggregate such as dashboard counters.
    Aggregate,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Detail => "detail",
            Scope::List => "list",
            Scope::Aggregate => "aggregate",
        }
    }
}

/// Normalized scalar parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(value) => write!(f, "{value}"),
            ParamValue::Int(value) => write!(f, "{value}"),
            ParamValue::Str(value) => f.write_str(value),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::Int(i64::from(value))
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

/// Filter records from the screen layer expose their fields through this trait.
///
/// `None` entries are unset filters and never reach the key.
pub trait QueryParams {
    fn query_params(&self) -> Vec<(&'static str, Option<ParamValue>)>;
}

/// Structural cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    resource: Resource,
    scope: Scope,
    params: BTreeMap<String, ParamValue>,
}

impl QueryKey {
    /// Build a key from a category and any set of parameters.
    pub fn build<I, K, V>(resource: Resource, scope: Scope, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ParamValue>,
    {
        Self {
            resource,
            scope,
            params: params
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }

    /// Build a key from a filter record, dropping unset fields.
    pub fn from_filter(resource: Resource, scope: Scope, filter: &impl QueryParams) -> Self {
        Self {
            resource,
            scope,
            params: filter
                .query_params()
                .into_iter()
                .filter_map(|(name, value)| value.map(|value| (name.to_string(), value)))
                .collect(),
        }
    }

    /// Build a key from a JSON object of filters.
    ///
    /// `null` members are dropped; nested arrays and objects are rejected.
    pub fn from_json(resource: Resource, scope: Scope, params: &Value) -> Result<Self, CacheError> {
        let object = match params {
            Value::Null => return Ok(Self::build(resource, scope, Vec::<(String, ParamValue)>::new())),
            Value::Object(object) => object,
            other => {
                return Err(CacheError::invalid_key(format!(
                    "parameters must be an object, got `{other}`"
                )));
            }
        };

        let mut normalized = BTreeMap::new();
        for (name, value) in object {
            let value = match value {
                Value::Null => continue,
                Value::Bool(flag) => ParamValue::Bool(*flag),
                Value::Number(number) => match number.as_i64() {
                    Some(int) => ParamValue::Int(int),
                    None => ParamValue::Str(number.to_string()),
                },
                Value::String(text) => ParamValue::Str(text.clone()),
                Value::Array(_) | Value::Object(_) => {
                    return Err(CacheError::invalid_key(format!(
                        "parameter `{name}` must be a scalar"
                    )));
                }
            };
            normalized.insert(name.clone(), value);
        }

        Ok(Self {
            resource,
            scope,
            params: normalized,
        })
    }

    pub fn application_detail(id: ApplicationId) -> Self {
        Self::build(Resource::Application, Scope::Detail, [("id", id.0)])
    }

    pub fn application_list(filter: &impl QueryParams) -> Self {
        Self::from_filter(Resource::Application, Scope::List, filter)
    }

    pub fn job_detail(id: JobId) -> Self {
        Self::build(Resource::Job, Scope::Detail, [("id", id.0)])
    }

    pub fn job_list(filter: &impl QueryParams) -> Self {
        Self::from_filter(Resource::Job, Scope::List, filter)
    }

    pub fn hospital_detail(id: HospitalId) -> Self {
        Self::build(Resource::Hospital, Scope::Detail, [("id", id.0)])
    }

    pub fn dashboard() -> Self {
        Self::build(
            Resource::Dashboard,
            Scope::Aggregate,
            Vec::<(String, ParamValue)>::new(),
        )
    }

    pub fn resource(&self) -> Resource {
        self.resource
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn params(&self) -> &BTreeMap<String, ParamValue> {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    /// Integer `id` parameter of a detail key.
    pub fn id(&self) -> Option<i64> {
        match self.params.get("id") {
            Some(ParamValue::Int(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn is_list(&self) -> bool {
        self.scope == Scope::List
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource.as_str(), self.scope.as_str())?;
        write_params(f, &self.params)
    }
}

fn write_params(f: &mut fmt::Formatter<'_>, params: &BTreeMap<String, ParamValue>) -> fmt::Result {
    if params.is_empty() {
        return Ok(());
    }
    f.write_str("{")?;
    for (index, (name, value)) in params.iter().enumerate() {
        if index > 0 {
            f.write_str(",")?;
        }
        write!(f, "{name}={value}")?;
    }
    f.write_str("}")
}

/// Selects a region of the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPattern {
    /// Exactly one key.
    Exact(QueryKey),
    /// Every key of a category whose parameters include `params`.
    Category {
        resource: Resource,
        scope: Option<Scope>,
        params: BTreeMap<String, ParamValue>,
    },
    /// Every key in the cache.
    All,
}

impl KeyPattern {
    pub fn exact(key: QueryKey) -> Self {
        KeyPattern::Exact(key)
    }

    /// All keys of a resource, any scope, any filters.
    pub fn resource(resource: Resource) -> Self {
        KeyPattern::Category {
            resource,
            scope: None,
            params: BTreeMap::new(),
        }
    }

    /// All keys of a resource and scope, any filters.
    pub fn category(resource: Resource, scope: Scope) -> Self {
        KeyPattern::Category {
            resource,
            scope: Some(scope),
            params: BTreeMap::new(),
        }
    }

    /// Narrow a category pattern to keys carrying `name = value`.
    pub fn with_param(self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        match self {
            KeyPattern::Category {
                resource,
                scope,
                mut params,
            } => {
                params.insert(name.into(), value.into());
                KeyPattern::Category {
                    resource,
                    scope,
                    params,
                }
            }
            other => other,
        }
    }

    pub fn matches(&self, key: &QueryKey) -> bool {
        match self {
            KeyPattern::Exact(expected) => expected == key,
            KeyPattern::Category {
                resource,
                scope,
                params,
            } => {
                *resource == key.resource
                    && scope.is_none_or(|scope| scope == key.scope)
                    && params
                        .iter()
                        .all(|(name, value)| key.params.get(name) == Some(value))
            }
            KeyPattern::All => true,
        }
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPattern::Exact(key) => write!(f, "{key}"),
            KeyPattern::Category {
                resource,
                scope,
                params,
            } => {
                let scope = scope.map(Scope::as_str).unwrap_or("*");
                write!(f, "{}:{}", resource.as_str(), scope)?;
                write_params(f, params)?;
                f.write_str("*")
            }
            KeyPattern::All => f.write_str("*"),
        }
    }
}

/// Free-function form of [`KeyPattern::matches`].
pub fn matches(key: &QueryKey, pattern: &KeyPattern) -> bool {
    pattern.matches(key)
}

/// Identifies a domain resource that may appear inside many cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceRef {
    Application(ApplicationId),
    Job(JobId),
    Hospital(HospitalId),
}

impl ResourceRef {
    /// Detail key that caches this resource on its own.
    pub fn detail_key(self) -> QueryKey {
        match self {
            ResourceRef::Application(id) => QueryKey::application_detail(id),
            ResourceRef::Job(id) => QueryKey::job_detail(id),
            ResourceRef::Hospital(id) => QueryKey::hospital_detail(id),
        }
    }

    pub fn resource(self) -> Resource {
        match self {
            ResourceRef::Application(_) => Resource::Application,
            ResourceRef::Job(_) => Resource::Job,
            ResourceRef::Hospital(_) => Resource::Hospital,
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceRef::Application(id) => write!(f, "application#{id}"),
            ResourceRef::Job(id) => write!(f, "job#{id}"),
            ResourceRef::Hospital(id) => write!(f, "hospital#{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn param_order_does_not_affect_equality() {
        let first = QueryKey::build(
            Resource::Application,
            Scope::List,
            [("status", ParamValue::from("pending")), ("page_size", 20u32.into())],
        );
        let second = QueryKey::build(
            Resource::Application,
            Scope::List,
            [("page_size", ParamValue::from(20u32)), ("status", "pending".into())],
        );
        assert_eq!(first, second);
        assert_eq!(first.to_string(), "application:list{page_size=20,status=pending}");
    }

    #[test]
    fn json_params_normalize_like_built_params() {
        let from_json = QueryKey::from_json(
            Resource::Application,
            Scope::List,
            &json!({ "status": "pending", "hospital": null }),
        )
        .expect("valid params");
        let built = QueryKey::build(Resource::Application, Scope::List, [("status", "pending")]);
        assert_eq!(from_json, built);
    }

    #[test]
    fn json_params_reject_nested_values() {
        let result = QueryKey::from_json(
            Resource::Job,
            Scope::List,
            &json!({ "tags": ["night", "icu"] }),
        );
        assert!(matches!(result, Err(CacheError::InvalidKey { .. })));

        let result = QueryKey::from_json(Resource::Job, Scope::List, &json!("status=pending"));
        assert!(result.is_err());
    }

    #[test]
    fn filtered_and_unfiltered_lists_share_a_category() {
        let pending = QueryKey::build(Resource::Application, Scope::List, [("status", "pending")]);
        let everything = QueryKey::from_json(Resource::Application, Scope::List, &json!({}))
            .expect("empty object");

        assert_ne!(pending, everything);

        let pattern = KeyPattern::category(Resource::Application, Scope::List);
        assert!(matches(&pending, &pattern));
        assert!(matches(&everything, &pattern));
        assert!(!pattern.matches(&QueryKey::application_detail(ApplicationId(1))));
        assert!(!pattern.matches(&QueryKey::dashboard()));
    }

    #[test]
    fn param_constrained_pattern() {
        let pattern =
            KeyPattern::category(Resource::Application, Scope::List).with_param("status", "pending");
        let pending = QueryKey::build(Resource::Application, Scope::List, [("status", "pending")]);
        let accepted = QueryKey::build(Resource::Application, Scope::List, [("status", "accepted")]);

        assert!(pattern.matches(&pending));
        assert!(!pattern.matches(&accepted));
        assert_eq!(pattern.to_string(), "application:list{status=pending}*");
    }

    #[test]
    fn resource_pattern_spans_scopes() {
        let pattern = KeyPattern::resource(Resource::Job);
        assert!(pattern.matches(&QueryKey::job_detail(JobId(7))));
        assert!(pattern.matches(&QueryKey::build(Resource::Job, Scope::List, [("bookmarked", true)])));
        assert!(!pattern.matches(&QueryKey::hospital_detail(HospitalId(7))));
        assert!(KeyPattern::All.matches(&QueryKey::dashboard()));
    }

    #[test]
    fn detail_keys_expose_their_id() {
        let key = ResourceRef::Job(JobId(7)).detail_key();
        assert_eq!(key, QueryKey::job_detail(JobId(7)));
        assert_eq!(key.id(), Some(7));
        assert_eq!(key.to_string(), "job:detail{id=7}");
        assert_eq!(QueryKey::dashboard().to_string(), "dashboard:aggregate");
    }
}
