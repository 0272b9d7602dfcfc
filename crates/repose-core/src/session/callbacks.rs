//! Entity lifecycle callbacks
//!
//! Callbacks are registered per entity name and run on the session's own
//! task. A callback that returns an error aborts the operation that
//! triggered it.

use crate::errors::Result;
use crate::model::entity::EntityRef;
use std::collections::HashMap;

pub type Callback = Box<dyn Fn(&EntityRef) -> Result<()>>;

#[derive(Default)]
pub struct CallbackRegistry {
    pre_create: HashMap<String, Vec<Callback>>,
    pre_update: HashMap<String, Vec<Callback>>,
    post_load: HashMap<String, Vec<Callback>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_pre_create(
        mut self,
        entity_name: impl Into<String>,
        callback: impl Fn(&EntityRef) -> Result<()> + 'static,
    ) -> Self {
        self.pre_create
            .entry(entity_name.into())
            .or_default()
            .push(Box::new(callback));
        self
    }

    pub fn on_pre_update(
        mut self,
        entity_name: impl Into<String>,
        callback: impl Fn(&EntityRef) -> Result<()> + 'static,
    ) -> Self {
        self.pre_update
            .entry(entity_name.into())
            .or_default()
            .push(Box::new(callback));
        self
    }

    pub fn on_post_load(
        mut self,
        entity_name: impl Into<String>,
        callback: impl Fn(&EntityRef) -> Result<()> + 'static,
    ) -> Self {
        self.post_load
            .entry(entity_name.into())
            .or_default()
            .push(Box::new(callback));
        self
    }

    pub fn pre_create(&self, entity: &EntityRef) -> Result<()> {
        run(&self.pre_create, entity)
    }

    pub fn pre_update(&self, entity: &EntityRef) -> Result<()> {
        run(&self.pre_update, entity)
    }

    pub fn post_load(&self, entity: &EntityRef) -> Result<()> {
        run(&self.post_load, entity)
    }
}

fn run(callbacks: &HashMap<String, Vec<Callback>>, entity: &EntityRef) -> Result<()> {
    if let Some(registered) = callbacks.get(entity.entity_name()) {
        for callback in registered {
            callback(entity)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ReposeError;
    use crate::model::value::Value;

    #[test]
    fn test_callbacks_run_for_matching_entity_only() {
        let registry = CallbackRegistry::new().on_pre_create("Book", |e| {
            e.set("created", true);
            Ok(())
        });

        let book = EntityRef::new("Book");
        let author = EntityRef::new("Author");
        registry.pre_create(&book).unwrap();
        registry.pre_create(&author).unwrap();

        assert_eq!(book.get("created"), Value::Boolean(true));
        assert_eq!(author.get("created"), Value::Null);
    }

    #[test]
    fn test_callback_error_propagates() {
        let registry = CallbackRegistry::new().on_pre_update("Book", |_| {
            Err(ReposeError::InterceptorVeto {
                entity_name: "Book".to_string(),
                operation: "update".to_string(),
                reason: "frozen".to_string(),
            })
        });
        let err = registry.pre_update(&EntityRef::new("Book")).unwrap_err();
        assert!(matches!(err, ReposeError::InterceptorVeto { .. }));
    }
}
