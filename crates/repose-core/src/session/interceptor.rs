use crate::errors::Result;
use crate::model::entity::EntityRef;
use crate::model::types::TypeHandler;
use crate::model::value::{Identifier, Value};

/// Application hook into the write pipelines
///
/// Hooks that receive `state` may modify it in place and return `true` to
/// have the modified state written back onto the entity. Returning an error
/// (typically [`ReposeError::InterceptorVeto`](crate::errors::ReposeError::InterceptorVeto))
/// aborts the operation.
pub trait Interceptor {
    /// Called by the save pipeline before the insert is queued. `id` is
    /// `None` for identity-generated entities.
    fn on_save(
        &self,
        _entity: &EntityRef,
        _id: Option<&Identifier>,
        _state: &mut [Value],
        _property_names: &[&str],
        _types: &[&TypeHandler],
    ) -> Result<bool> {
        Ok(false)
    }

    /// Called by flush for each dirty instance before its update is queued
    fn on_flush_dirty(
        &self,
        _entity: &EntityRef,
        _id: &Identifier,
        _current_state: &mut [Value],
        _previous_state: &[Value],
        _property_names: &[&str],
        _types: &[&TypeHandler],
    ) -> Result<bool> {
        Ok(false)
    }

    fn on_delete(
        &self,
        _entity: &EntityRef,
        _id: &Identifier,
        _state: &[Value],
        _property_names: &[&str],
        _types: &[&TypeHandler],
    ) -> Result<()> {
        Ok(())
    }
}

/// Interceptor that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyInterceptor;

impl Interceptor for EmptyInterceptor {}
