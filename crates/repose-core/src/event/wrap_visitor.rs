use crate::model::collection::{CollectionValue, PersistentCollection};
use crate::model::descriptor::EntityDescriptor;
use crate::model::entity::EntityRef;
use crate::model::value::Value;
use crate::session::Session;

/// Replace raw collections in `values` with session-aware wrappers.
/// Returns whether any value was replaced.
pub fn wrap_collections(
    session: &mut Session,
    entity: &EntityRef,
    descriptor: &EntityDescriptor,
    values: &mut [Value],
) -> bool {
    let mut substituted = false;
    for (attribute, value) in descriptor.attributes().iter().zip(values.iter_mut()) {
        if !attribute.handler.is_collection_type() {
            continue;
        }
        if let Value::Collection(CollectionValue::Raw(elements)) = value {
            let role = format!("{}.{}", descriptor.entity_name(), attribute.name);
            let wrapped = PersistentCollection::new(role, std::mem::take(elements));
            session
                .persistence_context_mut()
                .add_new_collection(wrapped.clone());
            *value = Value::Collection(CollectionValue::Wrapped(wrapped));
            substituted = true;
        }
    }
    if substituted {
        tracing::trace!(
            entity_name = entity.entity_name(),
            "wrapped collections"
        );
    }
    substituted
}
