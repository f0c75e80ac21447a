//! Dashboard service facade.
//!
//! A [`Facade`] couples one shared [`Connection`] with a fixed registry of
//! service handles bound to it at open time.
//!
//! Typical flow:
//! - the caller lists the generated clients it wants in [`ServiceBindings`];
//! - [`Facade::open`] resolves the target, picks credentials, opens the
//!   connection and binds every entry to it;
//! - consumers fetch handles by service name and type with [`Facade::client`];
//! - [`Facade::close`] releases the connection. Handles obtained earlier keep
//!   existing but every call through them fails with "connection closed".
//!
//! Implementation details:
//! - Key = service name. Value = the handle stored as `Box<dyn Any + Send + Sync>`
//!   together with its `type_name`, downcast on read.
//! - Binding is pure; a facade is either fully built or not built at all.
//! - Binding the same name twice keeps the last handle.

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::fmt;

use serde_json::json;

use crate::connection::{Connection, ConnectionPolicy};
use crate::credentials::{TransportCredentials, select_credentials};
use crate::error::ClientError;
use crate::logging::LogFields;
use crate::options::ClientOptions;
use crate::target::resolve;

const CONNECTED_MESSAGE: &str = "Connected to dashboard service";
const CONNECT_FAILED_MESSAGE: &str = "Failed to connect to dashboard service";

/// A generated client that can be bound to a [`Connection`] by type.
///
/// ```ignore
/// impl ServiceStub for AuthServiceClient<Connection> {
///     const SERVICE_NAME: &'static str = "auth";
///     fn bind(connection: Connection) -> Self {
///         AuthServiceClient::new(connection)
///     }
/// }
/// ```
pub trait ServiceStub: Clone + Send + Sync + 'static {
    const SERVICE_NAME: &'static str;

    fn bind(connection: Connection) -> Self;
}

type Boxed = Box<dyn Any + Send + Sync>;
type Constructor = Box<dyn FnOnce(Connection) -> Boxed + Send>;

struct Binding {
    name: &'static str,
    type_name: &'static str,
    construct: Constructor,
}

/// Named stub constructors handed to [`Facade::open`].
#[derive(Default)]
pub struct ServiceBindings {
    entries: Vec<Binding>,
}

impl fmt::Debug for ServiceBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|b| (b.name, b.type_name)))
            .finish()
    }
}

impl ServiceBindings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the handle produced by `construct` under `name`.
    #[must_use]
    pub fn bind<T, F>(mut self, name: &'static str, construct: F) -> Self
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(Connection) -> T + Send + 'static,
    {
        self.entries.push(Binding {
            name,
            type_name: type_name::<T>(),
            construct: Box::new(move |conn| Box::new(construct(conn)) as Boxed),
        });
        self
    }

    /// Bind a [`ServiceStub`] under its own service name.
    #[must_use]
    pub fn with<T: ServiceStub>(self) -> Self {
        self.bind(T::SERVICE_NAME, T::bind)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ServiceRegistryError {
    #[error("service not bound: {name}")]
    NotFound { name: String },

    #[error("service '{name}' is bound as {registered}, not {requested}")]
    TypeMismatch {
        name: String,
        registered: &'static str,
        requested: &'static str,
    },
}

struct Entry {
    type_name: &'static str,
    handle: Boxed,
}

/// Immutable registry of handles keyed by service name.
pub struct ServiceRegistry {
    map: HashMap<&'static str, Entry>,
}

impl ServiceRegistry {
    fn bind_all(bindings: ServiceBindings, connection: &Connection) -> Self {
        let map = bindings
            .entries
            .into_iter()
            .map(|binding| {
                let handle = (binding.construct)(connection.clone());
                (
                    binding.name,
                    Entry {
                        type_name: binding.type_name,
                        handle,
                    },
                )
            })
            .collect();
        Self { map }
    }

    /// Fetch a clone of the handle bound under `name`.
    ///
    /// # Errors
    /// Returns [`ServiceRegistryError`] if nothing is bound under `name` or
    /// the bound handle is not a `T`.
    pub fn get<T>(&self, name: &str) -> Result<T, ServiceRegistryError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let entry = self
            .map
            .get(name)
            .ok_or_else(|| ServiceRegistryError::NotFound {
                name: name.to_owned(),
            })?;

        entry
            .handle
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| ServiceRegistryError::TypeMismatch {
                name: name.to_owned(),
                registered: entry.type_name,
                requested: type_name::<T>(),
            })
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Bound service names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.map.keys().copied().collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.map.iter().map(|(name, e)| (name, e.type_name)))
            .finish()
    }
}

/// One shared connection plus the service handles bound to it.
pub struct Facade {
    connection: Connection,
    services: ServiceRegistry,
}

impl fmt::Debug for Facade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Facade")
            .field("connection", &self.connection)
            .field("services", &self.services)
            .finish()
    }
}

impl Facade {
    /// Open a facade with the default [`ConnectionPolicy`].
    ///
    /// # Errors
    /// See [`Facade::open_with`].
    pub fn open(options: &ClientOptions, bindings: ServiceBindings) -> Result<Self, ClientError> {
        Self::open_with(options, bindings, &ConnectionPolicy::default())
    }

    /// Resolve the target, build credentials, open the shared connection and
    /// bind every service to it.
    ///
    /// Exactly one event is logged: an error carrying `target` and `error` on
    /// failure, or `"Connected to dashboard service"` carrying `target` on
    /// success. Nothing is retried.
    ///
    /// Must be called from within a Tokio runtime; otherwise it fails with
    /// [`crate::ConnectionOpenError::NoRuntime`].
    ///
    /// # Errors
    /// Returns [`ClientError::CredentialConstruction`] when discovery
    /// credentials cannot be built (no dial is attempted) and
    /// [`ClientError::ConnectionOpen`] when the channel cannot be created or
    /// no runtime is running.
    pub fn open_with(
        options: &ClientOptions,
        bindings: ServiceBindings,
        policy: &ConnectionPolicy,
    ) -> Result<Self, ClientError> {
        let target = resolve(&options.address);
        let mode = select_credentials(options.env.as_deref(), &target, !options.address.is_empty());

        let connection = TransportCredentials::build(mode, &policy.discovery_bootstrap)
            .and_then(|credentials| {
                Connection::open(&target, &credentials, policy).map_err(|source| {
                    ClientError::ConnectionOpen {
                        target: target.clone(),
                        source,
                    }
                })
            })
            .inspect_err(|err| {
                options.logger.error(
                    CONNECT_FAILED_MESSAGE,
                    &LogFields::from([
                        ("target".to_owned(), json!(target)),
                        ("error".to_owned(), json!(err.to_string())),
                    ]),
                );
            })?;

        options.logger.info(
            CONNECTED_MESSAGE,
            &LogFields::from([("target".to_owned(), json!(target))]),
        );

        let services = ServiceRegistry::bind_all(bindings, &connection);
        Ok(Self {
            connection,
            services,
        })
    }

    /// Handle bound under `name`.
    ///
    /// # Errors
    /// See [`ServiceRegistry::get`].
    pub fn client<T>(&self, name: &str) -> Result<T, ServiceRegistryError>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.services.get(name)
    }

    /// Handle of a [`ServiceStub`], looked up by its service name.
    ///
    /// # Errors
    /// See [`ServiceRegistry::get`].
    pub fn stub<T: ServiceStub>(&self) -> Result<T, ServiceRegistryError> {
        self.services.get(T::SERVICE_NAME)
    }

    #[must_use]
    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    #[must_use]
    pub fn target(&self) -> &str {
        self.connection.target()
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    /// Close the shared connection. Safe to call repeatedly; returns `true`
    /// only for the call that closed it.
    pub fn close(&self) -> bool {
        self.connection.close()
    }
}
