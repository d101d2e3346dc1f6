//! Type registry: property descriptors derived from fixture types.

pub mod annotation;
pub mod descriptor;
pub mod registry;

pub use annotation::FieldSpec;
pub use descriptor::{
    COUNT_DESCENDANT_PREFIX, COUNT_RELATION_PREFIX, CountSource, PropertyDescriptor, PropertyFlags,
    PropertyKind, TypeDefinition, TypeOptions, schema_key, to_kebab_case,
};
pub use registry::TypeRegistry;
