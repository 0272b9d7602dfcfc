//! Mapping model and runtime values

pub mod cascade_style;
pub mod collection;
pub mod descriptor;
pub mod entity;
pub mod types;
pub mod value;

pub use cascade_style::CascadeStyle;
pub use collection::{CollectionValue, PersistentCollection};
pub use descriptor::{
    AttributeMapping, EntityDescriptor, EntityDescriptorBuilder, IdStrategy, IdentifierMapping,
    VersionType,
};
pub use entity::{EntityRef, InstanceId, MergeMap, ProxyRef};
pub use types::TypeHandler;
pub use value::{IdType, Identifier, SqlValue, Value};
