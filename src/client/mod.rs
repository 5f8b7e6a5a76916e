//! Public client facade.
//!
//! [`Client`] wraps one [`Session`] and exposes the InterApplicationBus
//! operations on it; [`Client::system`] gives the system operations. Both
//! are built purely on [`Session::invoke`].
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use openfin_adapter::{Client, Config};
//! use serde_json::json;
//!
//! let client = Client::connect(&Config::load()?).await?;
//! client
//!     .subscribe("news", |message| println!("got {message}"))
//!     .await?;
//! client.publish("news", json!({"headline": "hello"})).await?;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod system;

use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

use crate::config::Config;
use crate::discovery;
use crate::dispatch::SubscriptionId;
use crate::error::{SessionError, SessionResult};
use crate::key::SubscriptionKey;
use crate::session::{ConnectionState, Session, SessionOptions};
use crate::ws;
use system::System;

/// Result of a subscribe call.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    /// Handle for removing exactly this callback later.
    pub id: SubscriptionId,
    /// Acknowledgement payload of the `subscribe` request.
    pub ack: Option<Value>,
}

/// How an unsubscribe was completed.
#[derive(Debug, Clone, PartialEq)]
pub enum Unsubscribed {
    /// Other callbacks still use the key; the runtime was not contacted.
    Local,
    /// The last callback for the key went away; `unsubscribe` was sent.
    Remote(Option<Value>),
}

/// Client for the runtime message bus.
#[derive(Debug)]
pub struct Client {
    url: String,
    options: SessionOptions,
    session: Session,
}

impl Client {
    /// Resolve the bus port (launching the runtime if configured) and start a
    /// session.
    ///
    /// The session is still handshaking when this returns; requests made now
    /// wait for it.
    pub async fn connect(config: &Config) -> Result<Self> {
        let port = discovery::resolve_port(config).await?;
        let url = ws::bus_url(&config.host, port);
        Ok(Self::connect_url(&url, config.session_options()))
    }

    /// Start a session against an explicit bus URL, skipping discovery.
    #[must_use]
    pub fn connect_url(url: &str, options: SessionOptions) -> Self {
        let session = Session::spawn(url, options.clone());
        Self {
            url: url.to_string(),
            options,
            session,
        }
    }

    /// Replace the session with a fresh one on the same URL.
    ///
    /// Subscriptions of the old session are not restored.
    pub async fn reconnect(&mut self) {
        self.session.close().await;
        self.session = Session::spawn(&self.url, self.options.clone());
        log::info!("[Session] Reconnected as {}", self.session.uuid());
    }

    /// Close the session, ending all subscriptions.
    pub async fn close(&self) {
        self.session.close().await;
    }

    /// Connection state of the current session.
    pub fn status(&self) -> ConnectionState {
        self.session.status()
    }

    /// This client's session id.
    pub fn uuid(&self) -> &str {
        self.session.uuid()
    }

    /// The underlying session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// System operations on this client's session.
    pub fn system(&self) -> System {
        System::new(self.session.clone())
    }

    fn check_status(&self) -> SessionResult<()> {
        if self.status() == ConnectionState::Closed {
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    /// Publish `message` to every subscriber of `topic`.
    ///
    /// A full key may be passed; only its topic is used.
    pub async fn publish(
        &self,
        topic: impl Into<SubscriptionKey>,
        message: Value,
    ) -> SessionResult<Option<Value>> {
        self.check_status()?;
        let key = topic.into();
        let payload = bus::publish_payload(self.uuid(), &key, message);
        self.session.invoke(bus::PUBLISH, payload).await
    }

    /// Send `message` to a specific destination.
    pub async fn send(
        &self,
        destination: impl Into<SubscriptionKey>,
        message: Value,
    ) -> SessionResult<Option<Value>> {
        self.check_status()?;
        let key = destination.into();
        let payload = bus::send_payload(self.uuid(), &key, message);
        self.session.invoke(bus::SEND, payload).await
    }

    /// Run `on_message` for every message sent to `source`.
    ///
    /// The callback is registered before the request goes out, so a message
    /// arriving before the acknowledgement is still delivered.
    pub async fn subscribe<F>(
        &self,
        source: impl Into<SubscriptionKey>,
        on_message: F,
    ) -> SessionResult<Registration>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.check_status()?;
        let key = source.into();
        log::debug!("[Dispatch] Adding subscription to {}", key);

        let id = self
            .session
            .add_subscription(key.clone(), Arc::new(on_message))
            .await?;
        let payload = bus::subscription_payload(self.uuid(), &key);
        match self.session.invoke(bus::SUBSCRIBE, payload).await {
            Ok(ack) => Ok(Registration { id, ack }),
            Err(e) => {
                log::debug!("[Dispatch] Subscribe to {} failed, dropping {}", key, id);
                // Fails only once the loop is gone, which drops the entry anyway.
                let _ = self.session.remove_subscriptions(key, Some(id)).await;
                Err(e)
            }
        }
    }

    /// Remove the callback `id` for `source`, or all of them when `None`.
    ///
    /// The runtime is only told once no callback for `source` remains.
    pub async fn unsubscribe(
        &self,
        source: impl Into<SubscriptionKey>,
        id: Option<SubscriptionId>,
    ) -> SessionResult<Unsubscribed> {
        let key = source.into();
        let remaining = self.session.remove_subscriptions(key.clone(), id).await?;
        if remaining > 0 {
            log::debug!(
                "[Dispatch] {} callback(s) left for {}, not unsubscribing",
                remaining,
                key
            );
            return Ok(Unsubscribed::Local);
        }

        log::debug!("[Dispatch] Removing subscription to {}", key);
        let payload = bus::subscription_payload(self.uuid(), &key);
        let ack = self.session.invoke(bus::UNSUBSCRIBE, payload).await?;
        Ok(Unsubscribed::Remote(ack))
    }
}
