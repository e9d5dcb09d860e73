//! The single-owner service loop.
//!
//! One task owns the [`AccountSyncCoordinator`]. Remote notifications and
//! explicit requests reach it through an `mpsc` channel, and the flush
//! deadline is a `sleep_until` armed from the scheduler. Avatar fetches are
//! the only work that runs outside the loop; their results come back in as
//! avatar-fetched events.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use roster_bridge_core::{
    AccountId, AccountMask, AvatarRequest, ContactHandle, ContactKey, ContactMask, LocalId,
    RemoteAccount, RemoteContact,
};
use roster_bridge_store::{ContactStore, SqliteStore};
use roster_bridge_sync::{
    AccountEvent, AccountSyncCoordinator, AvatarFetcher, ContactEvent, FlushReport, SyncConfig,
    SyncError,
};

use crate::error::{Result, ServiceError};

/// Service configuration: flush timings plus the contact database location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub sync: SyncConfig,
    /// Path of the SQLite contact database.
    pub database_path: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            database_path: PathBuf::from("contacts.db"),
        }
    }
}

impl ServiceConfig {
    /// Parse and validate a JSON configuration.
    ///
    /// ```
    /// use roster_bridge::ServiceConfig;
    ///
    /// let config = ServiceConfig::from_json_str(
    ///     r#"{ "database_path": "/tmp/roster.db", "sync": { "max_wait_ms": 800 } }"#,
    /// )
    /// .unwrap();
    /// assert_eq!(config.sync.max_wait_ms, 800);
    /// assert_eq!(config.sync.idle_window_ms, 150);
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SyncError::Configuration(e.to_string()))?;
        config.sync.validate()?;
        Ok(config)
    }
}

/// Emitted once per failed commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorSignal {
    pub code: u16,
    pub message: String,
}

impl ErrorSignal {
    fn from_error(err: &SyncError) -> Self {
        Self {
            code: err.code().as_u16(),
            message: err.to_string(),
        }
    }
}

type Reply<T> = oneshot::Sender<std::result::Result<T, SyncError>>;

enum Command {
    Request(Request),
    Shutdown { reply: Reply<FlushReport> },
}

/// Everything the loop handles without stopping.
enum Request {
    Account(AccountEvent),
    Contact(ContactEvent),
    CreateAccountContacts {
        account: AccountId,
        handles: Vec<ContactHandle>,
        local_id: Option<LocalId>,
        reply: Reply<()>,
    },
    RemoveAccountContacts {
        account: AccountId,
        handles: Vec<ContactHandle>,
        reply: Reply<()>,
    },
    Flush {
        reply: Reply<FlushReport>,
    },
}

/// Cloneable handle to a running roster bridge.
#[derive(Clone)]
pub struct RosterBridgeHandle {
    commands: mpsc::Sender<Command>,
    errors: broadcast::Sender<ErrorSignal>,
}

impl RosterBridgeHandle {
    // ─────────────────────────────────────────────────────────────────────────
    // Remote notifications
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn account_event(&self, event: AccountEvent) -> Result<()> {
        self.send(Command::Request(Request::Account(event))).await
    }

    pub async fn contact_event(&self, event: ContactEvent) -> Result<()> {
        self.send(Command::Request(Request::Contact(event))).await
    }

    pub async fn accounts_snapshot(&self, accounts: Vec<RemoteAccount>) -> Result<()> {
        self.account_event(AccountEvent::Snapshot(accounts)).await
    }

    pub async fn account_added(&self, account: RemoteAccount) -> Result<()> {
        self.account_event(AccountEvent::Added(account)).await
    }

    pub async fn account_updated(&self, account: RemoteAccount, mask: AccountMask) -> Result<()> {
        self.account_event(AccountEvent::Updated(account, mask)).await
    }

    pub async fn account_removed(&self, id: AccountId) -> Result<()> {
        self.account_event(AccountEvent::Removed(id)).await
    }

    pub async fn contact_added(&self, contact: RemoteContact) -> Result<()> {
        self.contact_event(ContactEvent::Added(contact)).await
    }

    pub async fn contact_updated(&self, contact: RemoteContact, mask: ContactMask) -> Result<()> {
        self.contact_event(ContactEvent::Updated(contact, mask)).await
    }

    pub async fn contact_removed(&self, key: ContactKey) -> Result<()> {
        self.contact_event(ContactEvent::Removed(key)).await
    }

    pub async fn roster_snapshot(
        &self,
        account: AccountId,
        contacts: Vec<RemoteContact>,
    ) -> Result<()> {
        self.contact_event(ContactEvent::RosterSnapshot { account, contacts })
            .await
    }

    pub async fn roster_delta(
        &self,
        account: AccountId,
        added: Vec<RemoteContact>,
        removed: Vec<ContactHandle>,
    ) -> Result<()> {
        self.contact_event(ContactEvent::RosterDelta {
            account,
            added,
            removed,
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Explicit requests
    // ─────────────────────────────────────────────────────────────────────────

    /// Link remote handles to `local_id`, or to one new contact each.
    pub async fn create_account_contacts(
        &self,
        account: AccountId,
        handles: Vec<ContactHandle>,
        local_id: Option<LocalId>,
    ) -> Result<()> {
        self.request(|reply| Request::CreateAccountContacts {
            account,
            handles,
            local_id,
            reply,
        })
        .await
    }

    pub async fn remove_account_contacts(
        &self,
        account: AccountId,
        handles: Vec<ContactHandle>,
    ) -> Result<()> {
        self.request(|reply| Request::RemoveAccountContacts {
            account,
            handles,
            reply,
        })
        .await
    }

    /// Flush pending changes without waiting for the idle window.
    pub async fn flush_now(&self) -> Result<FlushReport> {
        self.request(|reply| Request::Flush { reply }).await
    }

    /// Flush pending changes and stop the loop.
    pub async fn shutdown(&self) -> Result<FlushReport> {
        self.call(|reply| Command::Shutdown { reply }).await
    }

    /// Subscribe to commit failures.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<ErrorSignal> {
        self.errors.subscribe()
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ServiceError::Stopped)
    }

    async fn request<T>(&self, request: impl FnOnce(Reply<T>) -> Request) -> Result<T> {
        self.call(|reply| Command::Request(request(reply))).await
    }

    async fn call<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(command(tx)).await?;
        let result = rx.await.map_err(|_| ServiceError::Stopped)?;
        Ok(result?)
    }
}

/// The owner of the sync state.
pub struct RosterBridge<S: ContactStore> {
    coordinator: AccountSyncCoordinator<S>,
    commands: mpsc::Receiver<Command>,
    /// For avatar fetch results; weak so dropped handles still close the loop.
    loopback: mpsc::WeakSender<Command>,
    errors: broadcast::Sender<ErrorSignal>,
    fetcher: Arc<dyn AvatarFetcher>,
    fetch_avatars: bool,
}

impl RosterBridge<SqliteStore> {
    /// Open the SQLite database named by `config` and start the loop.
    pub async fn open(
        config: ServiceConfig,
        fetcher: Arc<dyn AvatarFetcher>,
    ) -> Result<(RosterBridgeHandle, JoinHandle<()>)> {
        let store = SqliteStore::open(&config.database_path).map_err(|e| {
            SyncError::Configuration(format!(
                "cannot open contact database {}: {}",
                config.database_path.display(),
                e
            ))
        })?;
        info!(path = %config.database_path.display(), "contact database opened");
        Self::spawn(Arc::new(store), config.sync, fetcher).await
    }
}

impl<S: ContactStore + 'static> RosterBridge<S> {
    /// Check the store and spawn the owner loop.
    ///
    /// An unreachable store is a configuration error returned to the caller.
    pub async fn spawn(
        store: Arc<S>,
        config: SyncConfig,
        fetcher: Arc<dyn AvatarFetcher>,
    ) -> Result<(RosterBridgeHandle, JoinHandle<()>)> {
        config.validate()?;
        store
            .check()
            .await
            .map_err(|e| SyncError::Configuration(format!("contact store unavailable: {}", e)))?;

        let (commands_tx, commands_rx) = mpsc::channel(config.event_channel_capacity);
        let (errors_tx, _) = broadcast::channel(config.error_channel_capacity);

        let bridge = RosterBridge {
            coordinator: AccountSyncCoordinator::new(store, &config),
            commands: commands_rx,
            loopback: commands_tx.downgrade(),
            errors: errors_tx.clone(),
            fetcher,
            fetch_avatars: config.fetch_avatars,
        };
        let task = tokio::spawn(bridge.run());

        let handle = RosterBridgeHandle {
            commands: commands_tx,
            errors: errors_tx,
        };
        Ok((handle, task))
    }

    async fn run(mut self) {
        info!("roster bridge started");

        loop {
            let deadline = self.coordinator.deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        let result = self.flush().await;
                        let _ = reply.send(result);
                        break;
                    }
                    Some(Command::Request(request)) => self.dispatch(request).await,
                    None => {
                        if self.coordinator.has_pending() {
                            let _ = self.flush().await;
                        }
                        break;
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {}
            }

            if self.coordinator.flush_due(Instant::now()) {
                let _ = self.flush().await;
            }
        }

        info!("roster bridge stopped");
    }

    async fn dispatch(&mut self, request: Request) {
        match request {
            Request::Account(event) => {
                if let Err(e) = self.coordinator.handle_account_event(event).await {
                    warn!(error = %e, "account event rejected");
                }
            }
            Request::Contact(event) => {
                if let Err(e) = self.coordinator.handle_contact_event(event).await {
                    warn!(error = %e, "contact event rejected");
                }
            }
            Request::CreateAccountContacts {
                account,
                handles,
                local_id,
                reply,
            } => {
                let result = self
                    .coordinator
                    .create_account_contacts(&account, &handles, local_id);
                let _ = reply.send(result);
            }
            Request::RemoveAccountContacts {
                account,
                handles,
                reply,
            } => {
                let result = self.coordinator.remove_account_contacts(&account, &handles);
                let _ = reply.send(result);
            }
            Request::Flush { reply } => {
                let result = self.flush().await;
                let _ = reply.send(result);
            }
        }
    }

    async fn flush(&mut self) -> std::result::Result<FlushReport, SyncError> {
        match self.coordinator.commit().await {
            Ok(report) => {
                for request in self.report_requests(&report) {
                    self.spawn_fetch(request);
                }
                Ok(report)
            }
            Err(e) => {
                error!(code = e.code().as_u16(), error = %e, "commit failed, change set dropped");
                // No subscribers is fine.
                let _ = self.errors.send(ErrorSignal::from_error(&e));
                Err(e)
            }
        }
    }

    fn report_requests(&self, report: &FlushReport) -> Vec<AvatarRequest> {
        if self.fetch_avatars {
            report.avatar_requests.clone()
        } else {
            Vec::new()
        }
    }

    fn spawn_fetch(&self, request: AvatarRequest) {
        let fetcher = Arc::clone(&self.fetcher);
        let loopback = self.loopback.clone();

        tokio::spawn(async move {
            let AvatarRequest { key, token, url } = request;
            match fetcher.fetch(&url).await {
                Ok(data) => {
                    let Some(commands) = loopback.upgrade() else {
                        return;
                    };
                    let event = ContactEvent::AvatarFetched { key, token, data };
                    if commands.send(Command::Request(Request::Contact(event))).await.is_err() {
                        debug!(url = %url, "bridge stopped before avatar arrived");
                    }
                }
                Err(e) => warn!(key = %key, url = %url, error = %e, "avatar fetch failed"),
            }
        });
    }
}
