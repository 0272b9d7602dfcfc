//! Cascade walker
//!
//! Walks the associations of one parent instance and re-dispatches the
//! cascading action to each reachable child. Traversal is depth first and
//! strictly sequential: associations in declaration order, collection
//! elements in iteration order. Recursion goes through boxed local futures.
//!
//! Cycles end because a child that is already being saved is found in the
//! persistence context (its SAVING placeholder), or in the visited set of
//! the [`CascadeContext`].

use crate::engine::entry::LockMode;
use crate::errors::Result;
use crate::event::{delete, lock, merge, persist, refresh};
use crate::model::collection::CollectionValue;
use crate::model::descriptor::EntityDescriptor;
use crate::model::entity::{EntityRef, InstanceId, MergeMap};
use crate::model::types::TypeHandler;
use crate::model::value::Value;
use crate::session::Session;
use futures::future::{FutureExt, LocalBoxFuture};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Phase of an operation at which associations are walked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CascadePoint {
    /// To-one referents: before the parent insert, after the parent delete
    BeforeInsertAfterDelete,
    /// Collections: after the parent insert, before the parent delete
    AfterInsertBeforeDelete,
    BeforeFlush,
    BeforeRefresh,
    AfterLock,
}

impl CascadePoint {
    /// Whether associations of this kind are walked at this point
    pub fn applies_to(self, handler: &TypeHandler) -> bool {
        match self {
            CascadePoint::BeforeInsertAfterDelete => handler.is_entity_type(),
            CascadePoint::AfterInsertBeforeDelete => handler.is_collection_type(),
            CascadePoint::BeforeFlush | CascadePoint::BeforeRefresh | CascadePoint::AfterLock => {
                handler.is_association()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CascadingAction {
    Persist,
    /// Persist reached through a flush rather than an explicit call
    PersistOnFlush,
    Merge,
    Delete,
    Refresh,
    Lock,
}

impl fmt::Display for CascadingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CascadingAction::Persist => "persist",
            CascadingAction::PersistOnFlush => "persist_on_flush",
            CascadingAction::Merge => "merge",
            CascadingAction::Delete => "delete",
            CascadingAction::Refresh => "refresh",
            CascadingAction::Lock => "lock",
        };
        f.write_str(name)
    }
}

/// State shared by every step of one top-level operation
#[derive(Debug)]
pub struct CascadeContext {
    visited: HashSet<InstanceId>,
    merge_map: Option<MergeMap>,
    lock_mode: LockMode,
}

impl CascadeContext {
    pub fn new() -> Self {
        Self {
            visited: HashSet::new(),
            merge_map: None,
            lock_mode: LockMode::None,
        }
    }

    pub fn for_merge() -> Self {
        Self {
            merge_map: Some(MergeMap::new()),
            ..Self::new()
        }
    }

    pub fn for_lock(lock_mode: LockMode) -> Self {
        Self {
            lock_mode,
            ..Self::new()
        }
    }

    /// Record `entity` as visited; `false` if it already was
    pub fn visit(&mut self, entity: &EntityRef) -> bool {
        self.visited.insert(entity.instance_id())
    }

    pub fn is_visited(&self, entity: &EntityRef) -> bool {
        self.visited.contains(&entity.instance_id())
    }

    /// Action the save pipeline cascades with under this context
    pub fn save_action(&self) -> CascadingAction {
        if self.merge_map.is_some() {
            CascadingAction::Merge
        } else {
            CascadingAction::Persist
        }
    }

    pub fn merge_map(&self) -> Option<&MergeMap> {
        self.merge_map.as_ref()
    }

    pub fn merge_map_mut(&mut self) -> Option<&mut MergeMap> {
        self.merge_map.as_mut()
    }

    pub fn lock_mode(&self) -> LockMode {
        self.lock_mode
    }
}

impl Default for CascadeContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Cascade `action` from `parent` to every association that applies at
/// `point` and whose cascade style includes `action`
pub async fn cascade(
    session: &mut Session,
    action: CascadingAction,
    point: CascadePoint,
    descriptor: &Arc<EntityDescriptor>,
    parent: &EntityRef,
    ctx: &mut CascadeContext,
) -> Result<()> {
    for attribute in descriptor.attributes() {
        if !attribute.cascade.includes(action) || !point.applies_to(&attribute.handler) {
            continue;
        }
        let Some(target) = attribute.handler.associated_entity() else {
            continue;
        };

        let value = parent.get(&attribute.name);
        let children = match &value {
            Value::Null => Vec::new(),
            Value::Entity(child) => vec![child.clone()],
            Value::Proxy(proxy) => {
                if session
                    .persistence_context_mut()
                    .reassociate_proxy_if_necessary(&value, None)
                {
                    // Uninitialized: nothing loaded to walk
                    continue;
                }
                proxy.target().into_iter().collect()
            }
            Value::Collection(CollectionValue::Raw(elements)) => elements.clone(),
            Value::Collection(CollectionValue::Wrapped(collection)) => collection.elements(),
            _ => Vec::new(),
        };

        for child in children {
            tracing::trace!(
                cascade_action = %action,
                cascade_point = ?point,
                parent = descriptor.entity_name(),
                attribute = attribute.name.as_str(),
                "cascade to child"
            );
            cascade_to_child(session, action, child, target.to_string(), ctx).await?;
        }
    }
    Ok(())
}

fn cascade_to_child<'a>(
    session: &'a mut Session,
    action: CascadingAction,
    child: EntityRef,
    entity_name: String,
    ctx: &'a mut CascadeContext,
) -> LocalBoxFuture<'a, Result<()>> {
    async move {
        match action {
            CascadingAction::Persist | CascadingAction::PersistOnFlush => {
                persist::on_persist(session, &child, Some(&entity_name), ctx).await
            }
            CascadingAction::Merge => merge::on_merge(session, &child, Some(&entity_name), ctx)
                .await
                .map(|_| ()),
            CascadingAction::Delete => delete::on_delete(session, &child, Some(&entity_name), ctx).await,
            CascadingAction::Refresh => refresh::on_refresh(session, &child, ctx).await,
            CascadingAction::Lock => lock::on_lock(session, &child, ctx).await,
        }
    }
    .boxed_local()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_points_split_to_one_and_collections() {
        let to_one = TypeHandler::ManyToOne {
            entity: "Author".to_string(),
        };
        let many = TypeHandler::OneToMany {
            entity: "Book".to_string(),
        };
        assert!(CascadePoint::BeforeInsertAfterDelete.applies_to(&to_one));
        assert!(!CascadePoint::BeforeInsertAfterDelete.applies_to(&many));
        assert!(CascadePoint::AfterInsertBeforeDelete.applies_to(&many));
        assert!(!CascadePoint::AfterInsertBeforeDelete.applies_to(&to_one));
        assert!(CascadePoint::BeforeFlush.applies_to(&to_one));
        assert!(CascadePoint::BeforeFlush.applies_to(&many));
        assert!(!CascadePoint::BeforeFlush.applies_to(&TypeHandler::Text));
    }

    #[test]
    fn test_visited_is_identity_based() {
        let mut ctx = CascadeContext::new();
        let a = EntityRef::new("Book").with_id(1);
        let twin = EntityRef::new("Book").with_id(1);
        assert!(ctx.visit(&a));
        assert!(!ctx.visit(&a));
        assert!(!ctx.is_visited(&twin));
    }
}
