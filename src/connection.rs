//! # Connection
//!
//! A [`Connection`] manages the security settings of one Cloud SQL instance.
//! Construction acquires an access token and fetches the instance; the
//! mutating methods then each submit one request and block until the
//! resulting operation is DONE.
//!
//! Mutations on the same connection are serialized: each holds the
//! connection's operation lock from submission until the operation
//! finishes. A `Connection` is `Send + Sync` and may be shared through an
//! `Arc`; connections to different instances share nothing.
//!
//! Log events go to the `tracing` dispatcher given to the builder, or the one
//! that was current when the connection was built.

use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Value, json};
use tracing::Dispatch;

use crate::config::Config;
use crate::credential::{Credential, CredentialProvider};
use crate::error::Result;
use crate::instance::{AuthorizedNetwork, SqlInstance, blacklist, whitelist};
use crate::operation::{CancelToken, Operation, OperationCoordinator};
use crate::template::{
    ACL_BODY, INSTANCE_URL, Method, PASSWORD_BODY, RequestTemplate, SSL_BODY, TemplateEngine,
    USERS_URL,
};
use crate::transport::{Transport, fetch};

pub struct Connection {
    project: String,
    instance_name: String,
    config: Config,
    engine: TemplateEngine,
    transport: Arc<dyn Transport>,
    provider: Arc<dyn CredentialProvider>,
    credential: RwLock<Arc<Credential>>,
    instance: RwLock<SqlInstance>,
    coordinator: OperationCoordinator,
    dispatch: Dispatch,
}

pub struct ConnectionBuilder {
    project: String,
    instance_name: String,
    config: Config,
    transport: Option<Arc<dyn Transport>>,
    provider: Option<Arc<dyn CredentialProvider>>,
    dispatch: Option<Dispatch>,
}

impl ConnectionBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn credential_provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Routes this connection's log events to `dispatch`.
    pub fn dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// Acquires a token and fetches the instance.
    pub fn connect(self) -> Result<Connection> {
        let dispatch = self
            .dispatch
            .unwrap_or_else(|| tracing::dispatcher::get_default(Dispatch::clone));
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport()?,
        };
        let provider = match self.provider {
            Some(provider) => provider,
            None => Arc::new(crate::credential::GcloudCli::new()),
        };

        tracing::dispatcher::with_default(&dispatch, || {
            let engine = TemplateEngine::new()?;
            let credential = Credential::acquire(
                provider.as_ref(),
                transport.as_ref(),
                &engine,
                &self.config.token_info_url,
            )?;
            let coordinator = OperationCoordinator::new(transport.clone(), self.config.poll.clone());

            let connection = Connection {
                project: self.project,
                instance_name: self.instance_name,
                config: self.config,
                engine,
                transport,
                provider,
                credential: RwLock::new(Arc::new(credential)),
                instance: RwLock::new(SqlInstance::default()),
                coordinator,
                dispatch: dispatch.clone(),
            };
            let instance = connection.fetch_instance()?;
            tracing::info!(
                project = %connection.project,
                instance = %connection.instance_name,
                state = %instance.state,
                networks = instance.authorized_networks().len(),
                "connected"
            );
            *connection.instance.write().unwrap_or_else(PoisonError::into_inner) = instance;
            Ok(connection)
        })
    }
}

#[cfg(feature = "reqwest")]
fn default_transport() -> Result<Arc<dyn Transport>> {
    Ok(Arc::new(crate::transport::HttpTransport::new()))
}

#[cfg(not(feature = "reqwest"))]
fn default_transport() -> Result<Arc<dyn Transport>> {
    Err(crate::error::Error::Config {
        key: "transport".to_string(),
        value: String::new(),
        message: "no transport given and the reqwest feature is disabled".to_string(),
    })
}

impl Connection {
    pub fn builder(project: impl Into<String>, instance_name: impl Into<String>) -> ConnectionBuilder {
        ConnectionBuilder {
            project: project.into(),
            instance_name: instance_name.into(),
            config: Config::default(),
            transport: None,
            provider: None,
            dispatch: None,
        }
    }

    /// Connects with `gcloud` credentials over HTTPS, configured from the environment.
    pub fn new(project: &str, instance_name: &str) -> Result<Self> {
        Self::builder(project, instance_name)
            .config(Config::from_env()?)
            .connect()
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// The local snapshot of the instance.
    pub fn instance(&self) -> SqlInstance {
        self.instance
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn public_ip(&self) -> Result<String> {
        self.instance().public_ip().map(str::to_string)
    }

    pub fn authorized_networks(&self) -> Vec<AuthorizedNetwork> {
        self.instance
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .authorized_networks()
            .to_vec()
    }

    pub fn credential(&self) -> Arc<Credential> {
        self.credential
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The last operation submitted on this connection, as last observed.
    pub fn last_operation(&self) -> Option<Operation> {
        self.coordinator.last_operation()
    }

    /// Token that aborts the mutation currently waiting on its operation.
    ///
    /// A cancel made while no mutation is waiting aborts the next one's wait.
    pub fn cancel_token(&self) -> CancelToken {
        self.coordinator.cancel_token()
    }

    pub fn enable_ssl(&self) -> Result<Operation> {
        self.in_scope(|| self.modify_ssl_policy(true))
    }

    pub fn disable_ssl(&self) -> Result<Operation> {
        self.in_scope(|| self.modify_ssl_policy(false))
    }

    /// Adds `value` (an address or CIDR) to the authorized networks under `name`.
    ///
    /// Whether an already-authorized value is added again is decided by the
    /// configured [`crate::WhitelistPolicy`]. When the policy skips it, the
    /// unchanged list is still submitted and the resulting operation awaited.
    pub fn whitelist_ip(&self, name: &str, value: &str) -> Result<Operation> {
        self.in_scope(|| {
            let session = self.coordinator.begin();
            let current = self.authorized_networks();
            let networks = whitelist(
                &current,
                AuthorizedNetwork::new(name, value),
                self.config.whitelist_policy,
            );
            if networks.len() == current.len() {
                tracing::warn!(value, "value is already authorized; sending list unchanged");
            }
            tracing::info!(label = name, value, "authorizing network");
            let credential = self.credential();
            let request = self.engine.render(
                Method::Patch,
                &self.instance_template().with_body(ACL_BODY, json!({ "networks": networks })),
                Some(&credential),
            )?;
            let operation = session.submit_and_wait(&request, &credential)?;
            self.update_snapshot(|i| i.settings.ip_configuration.authorized_networks = networks);
            Ok(operation)
        })
    }

    /// Removes every authorized network whose value equals `value`.
    pub fn blacklist_ip(&self, value: &str) -> Result<Operation> {
        self.in_scope(|| {
            let session = self.coordinator.begin();
            let current = self.authorized_networks();
            let networks = blacklist(&current, value);
            if networks.len() == current.len() {
                tracing::warn!(value, "value is not authorized; sending list unchanged");
            }
            tracing::info!(value, removed = current.len() - networks.len(), "revoking network");
            let credential = self.credential();
            let request = self.engine.render(
                Method::Patch,
                &self.instance_template().with_body(ACL_BODY, json!({ "networks": networks })),
                Some(&credential),
            )?;
            let operation = session.submit_and_wait(&request, &credential)?;
            self.update_snapshot(|i| i.settings.ip_configuration.authorized_networks = networks);
            Ok(operation)
        })
    }

    pub fn set_user_password(&self, user: &str, password: &str) -> Result<Operation> {
        self.in_scope(|| {
            let session = self.coordinator.begin();
            tracing::info!(user, "setting user password");
            let credential = self.credential();
            let template = RequestTemplate::new(
                USERS_URL,
                json!({
                    "api_base": self.config.api_base,
                    "project": self.project,
                    "instance": self.instance_name,
                    "user": user,
                }),
            )
            .with_body(PASSWORD_BODY, json!({ "user": user, "password": password }));
            let request = self.engine.render(Method::Put, &template, Some(&credential))?;
            session.submit_and_wait(&request, &credential)
        })
    }

    /// Polls the last submitted operation again, e.g. after a timeout.
    pub fn wait_last_operation(&self) -> Result<Operation> {
        self.in_scope(|| {
            let session = self.coordinator.begin();
            session.wait(&self.credential())
        })
    }

    /// Re-fetches the instance, replacing the local snapshot.
    pub fn refresh_instance(&self) -> Result<SqlInstance> {
        self.in_scope(|| {
            let _session = self.coordinator.begin();
            let instance = self.fetch_instance()?;
            *self.instance.write().unwrap_or_else(PoisonError::into_inner) = instance.clone();
            Ok(instance)
        })
    }

    /// Acquires a fresh token from the credential provider.
    pub fn refresh_credential(&self) -> Result<Arc<Credential>> {
        self.in_scope(|| {
            let credential = Arc::new(Credential::acquire(
                self.provider.as_ref(),
                self.transport.as_ref(),
                &self.engine,
                &self.config.token_info_url,
            )?);
            *self.credential.write().unwrap_or_else(PoisonError::into_inner) = credential.clone();
            Ok(credential)
        })
    }

    fn modify_ssl_policy(&self, require_ssl: bool) -> Result<Operation> {
        let session = self.coordinator.begin();
        tracing::info!(require_ssl, "updating ssl policy");
        let credential = self.credential();
        let request = self.engine.render(
            Method::Patch,
            &self.instance_template().with_body(SSL_BODY, json!({ "value": require_ssl })),
            Some(&credential),
        )?;
        let operation = session.submit_and_wait(&request, &credential)?;
        self.update_snapshot(|i| i.settings.ip_configuration.require_ssl = Some(require_ssl));
        Ok(operation)
    }

    fn fetch_instance(&self) -> Result<SqlInstance> {
        let credential = self.credential();
        let request = self
            .engine
            .render(Method::Get, &self.instance_template(), Some(&credential))?;
        fetch(self.transport.as_ref(), &request)
    }

    fn instance_template(&self) -> RequestTemplate {
        RequestTemplate::new(INSTANCE_URL, self.path_data())
    }

    fn path_data(&self) -> Value {
        json!({
            "api_base": self.config.api_base,
            "project": self.project,
            "instance": self.instance_name,
        })
    }

    fn update_snapshot(&self, f: impl FnOnce(&mut SqlInstance)) {
        f(&mut self.instance.write().unwrap_or_else(PoisonError::into_inner));
    }

    fn in_scope<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        tracing::dispatcher::with_default(&self.dispatch, || {
            let span = tracing::info_span!(
                "cloudsql",
                project = %self.project,
                instance = %self.instance_name
            );
            let _enter = span.enter();
            if self.credential().is_expired() {
                tracing::warn!("access token has expired; call refresh_credential");
            }
            f()
        })
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("project", &self.project)
            .field("instance_name", &self.instance_name)
            .field("config", &self.config)
            .field("last_operation", &self.last_operation())
            .finish_non_exhaustive()
    }
}
