//! Dashboard client bootstrap.
//!
//! This crate decides how a client reaches the dashboard service and exposes
//! the generated service stubs over one shared connection:
//! - Target resolution (explicit address or the default discovery target)
//! - Transport credential selection (plaintext or discovery-backed)
//! - A [`Facade`] binding every requested stub to a single [`Connection`]
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use dashboard_client::{AppEnv, ClientOptions, Facade, ServiceBindings, TracingLogger};
//!
//! let options = ClientOptions::new(Arc::new(TracingLogger))
//!     .with_address("localhost:8080")
//!     .with_env(Arc::new(AppEnv::from_process_env()));
//!
//! let facade = Facade::open(
//!     &options,
//!     ServiceBindings::new()
//!         .bind("auth", AuthServiceClient::new)
//!         .bind("patient", PatientServiceClient::new),
//! )?;
//!
//! let mut auth: AuthServiceClient<_> = facade.client("auth")?;
//! // ...
//! facade.close();
//! ```

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod bootstrap;
pub mod connection;
pub mod credentials;
pub mod env;
pub mod error;
pub mod facade;
pub mod logging;
pub mod options;
pub mod target;

pub use bootstrap::{BootstrapConfig, BootstrapError, BootstrapSource};
pub use connection::{CONTEXT_TIMEOUT, Connection, ConnectionPolicy, LoadBalancingPolicy};
pub use credentials::{CredentialMode, TransportCredentials, select_credentials};
pub use env::{AppEnv, Environment};
pub use error::{ClientError, ConnectionClosed, ConnectionOpenError};
pub use facade::{Facade, ServiceBindings, ServiceRegistry, ServiceRegistryError, ServiceStub};
pub use logging::{LogFields, Logger, LoggingSettings, TracingLogger, init_tracing};
pub use options::{
    ClientOptions, ClientSettings, DEFAULT_DEVELOPMENT_ADDRESS, DEFAULT_PRODUCTION_ADDRESS,
    DEV_PORT,
};
pub use target::{DEFAULT_DISCOVERY_TARGET, DISCOVERY_SCHEME, resolve};
