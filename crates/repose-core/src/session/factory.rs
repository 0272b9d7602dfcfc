use crate::config::SessionSettings;
use crate::connection::ReactiveConnection;
use crate::errors::{ReposeError, Result};
use crate::loader::SnapshotLoader;
use crate::metamodel::MappingRegistry;
use crate::model::descriptor::EntityDescriptor;
use crate::session::callbacks::CallbackRegistry;
use crate::session::interceptor::{EmptyInterceptor, Interceptor};
use crate::session::Session;
use crate::sql::{Dialect, EntityStatements};
use repose_core_types::RequestContext;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

/// Per-entity statements and loader, built once per factory
#[derive(Debug)]
pub struct EntityPersister {
    descriptor: Arc<EntityDescriptor>,
    statements: EntityStatements,
    snapshot_loader: SnapshotLoader,
}

impl EntityPersister {
    fn new(descriptor: Arc<EntityDescriptor>, dialect: &dyn Dialect) -> Self {
        Self {
            statements: EntityStatements::new(&descriptor, dialect),
            snapshot_loader: SnapshotLoader::new(descriptor.clone(), dialect),
            descriptor,
        }
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    pub fn statements(&self) -> &EntityStatements {
        &self.statements
    }

    pub fn snapshot_loader(&self) -> &SnapshotLoader {
        &self.snapshot_loader
    }
}

/// Immutable, thread-safe session source
///
/// Holds the validated mapping, one [`EntityPersister`] per entity, the
/// dialect and the session settings. Sessions are cheap; the factory is
/// built once.
#[derive(Debug)]
pub struct SessionFactory {
    registry: MappingRegistry,
    persisters: HashMap<String, EntityPersister>,
    dialect: Arc<dyn Dialect>,
    settings: SessionSettings,
}

impl SessionFactory {
    /// # Errors
    ///
    /// [`ReposeError::InvalidMapping`] when an association or super entity
    /// points at an unregistered entity.
    pub fn new(
        registry: MappingRegistry,
        dialect: Arc<dyn Dialect>,
        settings: SessionSettings,
    ) -> Result<Arc<Self>> {
        registry.validate()?;
        let persisters = registry
            .iter()
            .map(|descriptor| {
                (
                    descriptor.entity_name().to_string(),
                    EntityPersister::new(descriptor.clone(), dialect.as_ref()),
                )
            })
            .collect();
        tracing::debug!(entities = registry.len(), "session factory built");
        Ok(Arc::new(Self {
            registry,
            persisters,
            dialect,
            settings,
        }))
    }

    pub fn registry(&self) -> &MappingRegistry {
        &self.registry
    }

    pub fn persister(&self, entity_name: &str) -> Result<&EntityPersister> {
        self.persisters
            .get(entity_name)
            .ok_or_else(|| ReposeError::UnknownEntity {
                entity_name: entity_name.to_string(),
            })
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn open_session(self: &Arc<Self>, connection: Rc<dyn ReactiveConnection>) -> Session {
        self.session_builder(connection).open()
    }

    pub fn session_builder(self: &Arc<Self>, connection: Rc<dyn ReactiveConnection>) -> SessionBuilder {
        SessionBuilder {
            factory: self.clone(),
            connection,
            interceptor: Rc::new(EmptyInterceptor),
            callbacks: Rc::new(CallbackRegistry::new()),
            request_context: RequestContext::new(),
        }
    }
}

pub struct SessionBuilder {
    factory: Arc<SessionFactory>,
    connection: Rc<dyn ReactiveConnection>,
    interceptor: Rc<dyn Interceptor>,
    callbacks: Rc<CallbackRegistry>,
    request_context: RequestContext,
}

impl SessionBuilder {
    pub fn interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptor = Rc::new(interceptor);
        self
    }

    pub fn callbacks(mut self, callbacks: CallbackRegistry) -> Self {
        self.callbacks = Rc::new(callbacks);
        self
    }

    pub fn request_context(mut self, request_context: RequestContext) -> Self {
        self.request_context = request_context;
        self
    }

    pub fn open(self) -> Session {
        Session::new(
            self.factory,
            self.connection,
            self.interceptor,
            self.callbacks,
            self.request_context,
        )
    }
}
