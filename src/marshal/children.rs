use std::collections::BTreeSet;

use crate::core::{Result, StoreError, Value, join_path};
use crate::schema::{FieldSpec, PropertyDescriptor, PropertyFlags, PropertyKind};

use super::{Decoder, Encoder, Properties, Property};

const CHILD_ID: &str = "_child_id";
const AGGREGATE: &str = "_aggregate";

/// A record stored as a child of its owning entity.
pub trait ChildRecord {
    /// Identifier unique among siblings. Must not contain `.`.
    fn child_id(&self) -> String;

    fn aggregate(&self) -> Option<f64> {
        None
    }

    /// Whether this record type reports an aggregate value.
    fn has_aggregate() -> bool {
        false
    }
}

/// Child ids become one segment of a property path.
fn check_child_id(id: &str) -> std::result::Result<(), String> {
    if id.is_empty() {
        return Err("child id cannot be empty".to_string());
    }
    if id.contains('.') {
        return Err(format!("child id '{}' contains '.'", id));
    }
    Ok(())
}

/// List of child records, stored under `<field>.<child id>.<property>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Children<T>(Vec<T>);

impl<T> Default for Children<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> Children<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self(items)
    }

    pub fn push(&mut self, item: T) {
        self.0.push(item);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.0
    }
}

impl<T> FromIterator<T> for Children<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<T: Properties + ChildRecord + Default> Property for Children<T> {
    fn describe(path: &str, spec: &FieldSpec, out: &mut Vec<PropertyDescriptor>) -> Result<()> {
        let mut flags = spec.flags()?;
        if flags.primary || flags.unique || flags.secure || flags.verify {
            return Err(StoreError::Schema(format!(
                "property '{}': option not supported on child records",
                path
            )));
        }
        flags.child = true;

        let item = join_path(path, "*");
        let start = out.len();
        T::describe_properties(&item, &flags, out)?;
        for descriptor in &mut out[start..] {
            descriptor.flags.child = true;
        }

        let marker = PropertyFlags {
            child: true,
            ..PropertyFlags::default()
        };
        out.push(PropertyDescriptor::new(join_path(&item, CHILD_ID), PropertyKind::Text, marker));
        if T::has_aggregate() {
            out.push(PropertyDescriptor::new(join_path(&item, AGGREGATE), PropertyKind::Float, marker));
        }
        Ok(())
    }

    fn encode(&self, path: &str, encoder: &mut Encoder<'_>) {
        let mut seen = BTreeSet::new();
        for child in &self.0 {
            let id = child.child_id();
            if let Err(reason) = check_child_id(&id) {
                encoder.reject(path, reason);
                continue;
            }
            if !seen.insert(id.clone()) {
                encoder.reject(path, format!("duplicate child id '{}'", id));
                continue;
            }
            let item = join_path(path, &id);
            encoder.put(&join_path(&item, CHILD_ID), Value::Text(id));
            child.encode_properties(&item, encoder);
            if let Some(aggregate) = child.aggregate() {
                encoder.put(&join_path(&item, AGGREGATE), Value::Float(aggregate));
            }
        }
    }

    fn decode(&mut self, path: &str, decoder: &Decoder<'_>) -> Result<()> {
        let prefix = format!("{}.", path);
        let ids: BTreeSet<String> = decoder
            .within(path)
            .filter_map(|(key, _)| key.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('.').next())
            .map(str::to_string)
            .collect();

        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            let mut child = T::default();
            child.decode_properties(&join_path(path, &id), decoder)?;
            child.mark_properties_clean();
            items.push(child);
        }
        self.0 = items;
        Ok(())
    }

    fn mark_clean(&mut self) {
        for child in &mut self.0 {
            child.mark_properties_clean();
        }
    }

    fn mark_selected_clean(&mut self, path: &str, selection: &[String]) {
        for child in &mut self.0 {
            let item = join_path(path, &child.child_id());
            child.mark_selected_properties_clean(&item, selection);
        }
    }
}
