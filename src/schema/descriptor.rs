use serde::{Deserialize, Serialize};

use crate::core::{Result, StoreError};

/// Wire kind of a declared property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyKind {
    Text,
    Int,
    Bool,
    Float,
    Time,
    Amount,
    Interval,
    Raw,
    StringList,
    StringSet,
    IntSet,
    KeyValue,
    Mixed,
    KeyMixed,
    SecureText,
    VerifyText,
    ExternalId,
    Translations,
    Email,
    Phone,
    EntityRef,
    /// Server-computed count, populated only on request.
    Count,
}

impl PropertyKind {
    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            Self::Text | Self::SecureText | Self::VerifyText | Self::Email | Self::Phone
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Float | Self::Amount | Self::Count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PropertyFlags {
    pub indexed: bool,
    pub unique: bool,
    pub lookup: bool,
    pub primary: bool,
    pub secure: bool,
    pub verify: bool,
    pub no_snapshot: bool,
    pub metric: bool,
    pub metric_filter: bool,
    pub pii: bool,
    pub child: bool,
    pub omit_empty: bool,
}

impl PropertyFlags {
    /// Flags that propagate from an annotated sub-structure to its fields.
    pub fn merge(&mut self, inherited: &PropertyFlags) {
        self.indexed |= inherited.indexed;
        self.lookup |= inherited.lookup;
        self.no_snapshot |= inherited.no_snapshot;
        self.metric |= inherited.metric;
        self.metric_filter |= inherited.metric_filter;
        self.pii |= inherited.pii;
        self.omit_empty |= inherited.omit_empty;
    }
}

/// Source of a synthetic count property.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CountSource {
    Relation(String),
    Descendant(String),
}

impl CountSource {
    pub fn path(&self) -> String {
        match self {
            Self::Relation(key) => format!("{}{}", COUNT_RELATION_PREFIX, key),
            Self::Descendant(schema) => format!("{}{}", COUNT_DESCENDANT_PREFIX, schema),
        }
    }
}

pub const COUNT_RELATION_PREFIX: &str = "_count_relation:";
pub const COUNT_DESCENDANT_PREFIX: &str = "_count_descendant:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub path: String,
    pub kind: PropertyKind,
    pub flags: PropertyFlags,
    pub count: Option<CountSource>,
}

impl PropertyDescriptor {
    pub fn new(path: impl Into<String>, kind: PropertyKind, flags: PropertyFlags) -> Self {
        Self {
            path: path.into(),
            kind,
            flags,
            count: None,
        }
    }

    /// Checks that the declared flags make sense for the property's kind.
    pub fn check(&self) -> Result<()> {
        let fail = |why: &str| Err(StoreError::Schema(format!("property '{}': {}", self.path, why)));

        if self.flags.child && !self.path.contains(".*.") {
            return fail("'child' requires a Children<T> field");
        }
        if self.flags.secure && self.kind != PropertyKind::SecureText {
            return fail("'secure' requires a SecureString field");
        }
        if self.flags.verify && self.kind != PropertyKind::VerifyText {
            return fail("'verify' requires a VerifyString field");
        }
        if (self.flags.metric || self.flags.metric_filter) && self.kind == PropertyKind::Raw {
            return fail("raw fields cannot take part in time-series aggregation");
        }
        if self.flags.primary && !(self.kind.is_textual() || self.kind == PropertyKind::Int) {
            return fail("'primary' requires a text or integer field");
        }
        if self.count.is_some() && self.kind != PropertyKind::Count {
            return fail("synthetic counts require an integer field");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TypeOptions {
    pub hashed_id: bool,
    pub immutable: bool,
    pub store_mutations: bool,
    pub time_series: bool,
}

/// Schema of one entity type as registered with the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub key: String,
    pub options: TypeOptions,
    pub properties: Vec<PropertyDescriptor>,
}

impl TypeDefinition {
    pub fn new(key: impl Into<String>, options: TypeOptions) -> Self {
        Self {
            key: key.into(),
            options,
            properties: Vec::new(),
        }
    }

    pub fn property(&self, path: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.path == path)
    }

    pub fn primary_paths(&self) -> Vec<&str> {
        self.properties
            .iter()
            .filter(|p| p.flags.primary)
            .map(|p| p.path.as_str())
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() || !self.key.contains('.') {
            return Err(StoreError::Schema(format!(
                "schema key '{}' must be '<package>.<type>'",
                self.key
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for property in &self.properties {
            if property.path.is_empty() {
                return Err(StoreError::Schema(format!(
                    "type '{}' declares a property with an empty name",
                    self.key
                )));
            }
            if !seen.insert(property.path.as_str()) {
                return Err(StoreError::Schema(format!(
                    "type '{}' declares property '{}' twice",
                    self.key, property.path
                )));
            }
            property.check()?;
        }

        if self.options.hashed_id && !self.primary_paths().is_empty() {
            return Err(StoreError::Schema(format!(
                "type '{}' cannot combine a hashed id with primary properties",
                self.key
            )));
        }
        Ok(())
    }
}

/// Builds the default schema key `<last module segment>.<kebab type name>`.
pub fn schema_key(module_path: &str, type_name: &str) -> String {
    let package = module_path.rsplit("::").next().unwrap_or(module_path);
    format!("{}.{}", package, to_kebab_case(type_name))
}

pub fn to_kebab_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let chars: Vec<char> = name.chars().collect();
    for (i, ch) in chars.iter().enumerate() {
        if ch.is_uppercase() {
            let prev_lower = i > 0 && (chars[i - 1].is_lowercase() || chars[i - 1].is_ascii_digit());
            let next_lower = chars.get(i + 1).is_some_and(|c| c.is_lowercase());
            let prev_upper = i > 0 && chars[i - 1].is_uppercase();
            if i > 0 && (prev_lower || (prev_upper && next_lower)) {
                out.push('-');
            }
            out.extend(ch.to_lowercase());
        } else if *ch == '_' {
            out.push('-');
        } else {
            out.push(*ch);
        }
    }
    out
}
