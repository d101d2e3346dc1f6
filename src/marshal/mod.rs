//! Bidirectional conversion between entity values and property sets.

pub mod base;
pub mod children;
pub mod encoder;
pub mod record;
pub mod scalars;
pub mod sections;

pub use base::{BaseEntity, ChildLink, PendingWrites, TimeSeriesInput};
pub use children::{ChildRecord, Children};
pub use encoder::{Decoder, Delta, Encoded, Encoder, encode_entity, is_selected};
pub use record::{EntityRecord, decode_all};
pub use sections::{
    Document, DocumentOp, EventRecord, LabelChanges, LogEntry, LogLevel, Measurement, Relationship,
    RelationshipChanges, RevisionInfo, StoredObject, Summary, UploadRequest, UploadTarget,
};

use crate::core::{Result, StoreError, join_path};
use crate::schema::{
    FieldSpec, PropertyDescriptor, PropertyFlags, PropertyKind, TypeDefinition, TypeOptions,
};

/// A value that occupies one or more property paths.
pub trait Property {
    /// Appends the descriptors for a field of this type stored at `path`.
    fn describe(path: &str, spec: &FieldSpec, out: &mut Vec<PropertyDescriptor>) -> Result<()>;

    fn encode(&self, path: &str, encoder: &mut Encoder<'_>);

    /// Populates the value from `path`. A missing path resets it to its
    /// zero value.
    fn decode(&mut self, path: &str, decoder: &Decoder<'_>) -> Result<()>;

    /// Forgets pending deltas after a successful write or a fresh read.
    fn mark_clean(&mut self) {}

    /// Forgets only the deltas a write restricted to `selection` sent.
    fn mark_selected_clean(&mut self, path: &str, selection: &[String]) {
        if is_selected(path, selection) {
            self.mark_clean();
        }
    }
}

/// A structure whose fields are properties. Implemented by
/// `#[derive(Properties)]` and `#[derive(Entity)]`.
pub trait Properties {
    fn describe_properties(
        prefix: &str,
        inherited: &PropertyFlags,
        out: &mut Vec<PropertyDescriptor>,
    ) -> Result<()>;

    fn encode_properties(&self, prefix: &str, encoder: &mut Encoder<'_>);

    fn decode_properties(&mut self, prefix: &str, decoder: &Decoder<'_>) -> Result<()>;

    fn mark_properties_clean(&mut self);

    fn mark_selected_properties_clean(&mut self, prefix: &str, selection: &[String]);
}

/// A storable entity type. Optional capabilities are exposed as accessors
/// returning `None` when the type does not carry them.
pub trait Entity: Properties + Default + Send + Sync + 'static {
    fn schema_key() -> String;

    fn type_options() -> TypeOptions {
        TypeOptions::default()
    }

    fn type_definition() -> Result<TypeDefinition> {
        let mut definition = TypeDefinition::new(Self::schema_key(), Self::type_options());
        Self::describe_properties("", &PropertyFlags::default(), &mut definition.properties)?;
        Ok(definition)
    }

    fn base(&self) -> &BaseEntity;

    fn base_mut(&mut self) -> &mut BaseEntity;

    fn child_link(&self) -> Option<&ChildLink> {
        None
    }

    fn child_link_mut(&mut self) -> Option<&mut ChildLink> {
        None
    }

    fn time_series(&self) -> Option<&TimeSeriesInput> {
        None
    }

    fn time_series_mut(&mut self) -> Option<&mut TimeSeriesInput> {
        None
    }
}

/// Describes one annotated field of a [`Properties`] structure.
pub fn describe_field<T: Property>(
    prefix: &str,
    raw: &str,
    ident: &str,
    inherited: &PropertyFlags,
    out: &mut Vec<PropertyDescriptor>,
) -> Result<()> {
    let spec = FieldSpec::parse(raw, ident);
    if spec.is_skipped() {
        return Ok(());
    }
    let start = out.len();
    T::describe(&join_path(prefix, &spec.name), &spec, out)?;
    for descriptor in &mut out[start..] {
        descriptor.flags.merge(inherited);
    }
    Ok(())
}

/// Describes a synthetic `_count_relation:` or `_count_descendant:` field.
pub fn describe_count<T: Property>(
    raw: &str,
    ident: &str,
    out: &mut Vec<PropertyDescriptor>,
) -> Result<()> {
    let spec = FieldSpec::parse(raw, ident);
    let source = spec.count_source().ok_or_else(|| {
        StoreError::Schema(format!("field '{}' is not a synthetic count", ident))
    })?;

    let mut probe = Vec::new();
    T::describe(&spec.name, &FieldSpec::plain(ident), &mut probe)?;
    match probe.as_slice() {
        [only] if only.kind == PropertyKind::Int => {}
        _ => {
            return Err(StoreError::Schema(format!(
                "property '{}': synthetic counts require an integer field",
                spec.name
            )));
        }
    }

    let mut descriptor = PropertyDescriptor::new(spec.name.clone(), PropertyKind::Count, spec.flags()?);
    descriptor.count = Some(source);
    out.push(descriptor);
    Ok(())
}

/// Flags for a nested structure; options that only make sense on a single
/// value are rejected.
pub fn nested_flags(path: &str, spec: &FieldSpec) -> Result<PropertyFlags> {
    let flags = spec.flags()?;
    if flags.primary || flags.unique || flags.secure || flags.verify || flags.child {
        return Err(StoreError::Schema(format!(
            "property '{}': option not supported on a nested structure",
            path
        )));
    }
    Ok(flags)
}
