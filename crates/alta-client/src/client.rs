//! The client supervisor.
//!
//! The supervisor bootstraps authentication, the REST gateway, and the
//! subscription router, listens for account-level events (invites, group
//! create/delete), reconciles group managers against the allow/deny
//! lists, and exposes the public surface: `start`, `stop`, the event
//! receiver, dynamic allow/deny, and the manual console path for user
//! principals.

use crate::auth::{Credentials, Principal, TokenManager};
use crate::config::ClientConfig;
use crate::console::ConsoleConnection;
use crate::error::{ClientError, Result};
use crate::events::ClientEvent;
use crate::group::GroupManager;
use crate::logging::Logger;
use crate::rest::{GroupInfo, GroupInviteInfo, GroupMemberInfo, JoinedGroupInfo, RestGateway};
use crate::socket::{SubscriptionHandler, SubscriptionRouter};
use crate::workers::WorkerPool;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, RwLock};

/// Lifecycle state of the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientReadyState {
    /// Not started, or stopped
    Stopped,
    /// Bootstrapping: token obtained, groups being reconciled
    Starting,
    /// Bootstrap complete; events flowing
    Ready,
}

/// Federates a fleet of game-server group accounts behind one identity.
///
/// Invariants: `start` is a no-op unless the state is `Stopped`, and the
/// allow and deny lists are disjoint after every public mutation.
pub struct Client {
    weak_self: Weak<Self>,
    config: Arc<ClientConfig>,
    log: Logger,
    tokens: Arc<TokenManager>,
    rest: Arc<RestGateway>,
    workers: Arc<WorkerPool>,
    router: Arc<SubscriptionRouter>,
    state: RwLock<ClientReadyState>,
    groups: RwLock<HashMap<i64, Arc<GroupManager>>>,
    allow_list: RwLock<HashSet<i64>>,
    deny_list: RwLock<HashSet<i64>>,
    events: broadcast::Sender<ClientEvent>,
}

impl Client {
    /// Builds a client from configuration.
    ///
    /// Credential problems surface synchronously here as configuration
    /// errors; nothing touches the network until `start`.
    pub fn new(config: ClientConfig) -> Result<Arc<Self>> {
        let credentials = Credentials::from_config(&config)?;
        let config = Arc::new(config);
        let log = Logger::new(config.log_verbosity, config.log_prefix.clone());

        let tokens = TokenManager::new(config.clone(), log.clone(), credentials);
        let rest = Arc::new(RestGateway::new(config.clone(), log.clone(), tokens.clone()));
        let workers = Arc::new(WorkerPool::new(config.max_worker_concurrency, &log));
        let router = Arc::new(SubscriptionRouter::new(
            config.clone(),
            log.clone(),
            tokens.clone(),
            workers.clone(),
        ));
        let (events, _) = broadcast::channel(256);

        let allow_list: HashSet<i64> = config.included_groups.iter().copied().collect();
        // The allowlist wins over the denylist, and the two stay disjoint.
        let deny_list: HashSet<i64> = config
            .excluded_groups
            .iter()
            .copied()
            .filter(|id| !allow_list.contains(id))
            .collect();

        Ok(Arc::new_cyclic(|weak| Self {
            weak_self: weak.clone(),
            config,
            log,
            tokens,
            rest,
            workers,
            router,
            state: RwLock::new(ClientReadyState::Stopped),
            groups: RwLock::new(HashMap::new()),
            allow_list: RwLock::new(allow_list),
            deny_list: RwLock::new(deny_list),
            events,
        }))
    }

    /// The current lifecycle state.
    pub async fn ready_state(&self) -> ClientReadyState {
        *self.state.read().await
    }

    /// Subscribes to the public event stream (`Ready`, `Connect`).
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// The group manager for `group_id`, if tracked.
    pub async fn group(&self, group_id: i64) -> Option<Arc<GroupManager>> {
        self.groups.read().await.get(&group_id).cloned()
    }

    /// All tracked group managers.
    pub async fn groups(&self) -> Vec<Arc<GroupManager>> {
        self.groups.read().await.values().cloned().collect()
    }

    /// Starts the client: authenticates, wires the account-level
    /// channels, and bootstraps groups from REST.
    ///
    /// A no-op unless the client is stopped. Streamed-pipeline failures
    /// during the bootstrap are logged, not propagated; the client still
    /// reaches `Ready` so later events can repair the state.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != ClientReadyState::Stopped {
                self.log.warn("start ignored: client is not stopped");
                return Ok(());
            }
            *state = ClientReadyState::Starting;
        }
        self.log.info("Starting client");

        self.tokens.refresh().await?;
        let principal = self.tokens.principal().await?;
        match &principal {
            Principal::Bot(sub) => {
                let sub = sub.clone();
                self.start_bot(&sub).await;
            }
            Principal::User(_) => {
                self.log.info(
                    "User principal: automation disabled, only open_server_connection is \
                     available",
                );
            }
        }

        *self.state.write().await = ClientReadyState::Ready;
        let _ = self.events.send(ClientEvent::Ready);
        self.log.info("Client ready");
        Ok(())
    }

    /// Stops the client: cancels the refresh timer and disposes every
    /// group and socket. Idempotent.
    pub async fn stop(&self) {
        {
            let mut state = self.state.write().await;
            if *state == ClientReadyState::Stopped {
                return;
            }
            *state = ClientReadyState::Stopped;
        }
        self.log.info("Stopping client");

        self.tokens.cancel_refresh().await;
        let groups: Vec<_> = {
            let mut groups = self.groups.write().await;
            std::mem::take(&mut *groups).into_values().collect()
        };
        for group in groups {
            group.dispose().await;
        }
        self.router.dispose().await;
        self.log.info("Client stopped");
    }

    /// Removes `group_id` from the denylist and, when the allowlist is
    /// already in use or `force` is set, adds it there.
    ///
    /// The force flag exists because inserting into an empty allowlist
    /// would silently flip the "empty allowlist means allow-all"
    /// semantics for every other group.
    pub async fn allow_group(&self, group_id: i64, force: bool) {
        {
            let mut deny = self.deny_list.write().await;
            let mut allow = self.allow_list.write().await;
            deny.remove(&group_id);
            if !allow.is_empty() || force {
                allow.insert(group_id);
            }
        }
        self.log.info(format!("Group {group_id} allowed"));

        if self.groups.read().await.contains_key(&group_id) {
            return;
        }
        let principal = match self.tokens.principal().await {
            Ok(principal) => principal,
            Err(_) => return, // not authenticated yet; bootstrap will pick it up
        };
        match self.fetch_group(group_id, principal.key()).await {
            Ok((group, member)) => self.add_group(group, member).await,
            Err(e) => self
                .log
                .warn(format!("Could not materialize group {group_id}: {e}")),
        }
    }

    /// Adds `group_id` to the denylist, removes it from the allowlist,
    /// and disposes its manager if one is active.
    pub async fn deny_group(&self, group_id: i64) {
        {
            let mut deny = self.deny_list.write().await;
            let mut allow = self.allow_list.write().await;
            allow.remove(&group_id);
            deny.insert(group_id);
        }
        self.log.info(format!("Group {group_id} denied"));
        self.remove_group(group_id).await;
    }

    /// Starts tracking a group, respecting dedup and the allow/deny
    /// lists.
    pub async fn add_group(&self, group: GroupInfo, member: GroupMemberInfo) {
        let group_id = group.id;
        if self.groups.read().await.contains_key(&group_id) {
            return;
        }
        if !self.group_admitted(group_id).await {
            self.log
                .info(format!("Group {group_id} filtered by allow/deny lists"));
            return;
        }

        let manager = GroupManager::new(
            group,
            member,
            self.config.clone(),
            &self.log,
            self.rest.clone(),
            self.router.clone(),
            self.events.clone(),
        )
        .await;

        {
            let mut groups = self.groups.write().await;
            if groups.contains_key(&group_id) {
                manager.dispose().await;
                return;
            }
            groups.insert(group_id, manager.clone());
        }

        if let Err(e) = manager.init().await {
            self.log
                .error(format!("Group {group_id} channel setup failed: {e}"));
        }
        self.log.info(format!("Group {group_id} added"));
    }

    /// Stops tracking a group and disposes its manager.
    pub async fn remove_group(&self, group_id: i64) {
        let manager = self.groups.write().await.remove(&group_id);
        if let Some(manager) = manager {
            manager.dispose().await;
            self.log.info(format!("Group {group_id} removed"));
        }
    }

    /// Manually opens a console connection to one server.
    ///
    /// This is the only automation available to user principals. The
    /// server's group is materialized on demand (without channel
    /// subscriptions) and the console is connected if it is not already.
    pub async fn open_server_connection(
        &self,
        server_id: i64,
    ) -> Result<Arc<ConsoleConnection>> {
        if *self.state.read().await != ClientReadyState::Ready {
            return Err(ClientError::InvalidUsage(
                "open_server_connection requires a ready client".to_string(),
            ));
        }

        let info = self.rest.get_server_info(server_id).await?;
        let group_id = info.group_id.ok_or_else(|| {
            ClientError::ConsoleRefused(format!("Server {server_id} has no owning group"))
        })?;

        let manager = match self.group(group_id).await {
            Some(manager) => manager,
            None => {
                let principal = self.tokens.principal().await?;
                let (group, member) = self.fetch_group(group_id, principal.key()).await?;
                let manager = GroupManager::new(
                    group,
                    member,
                    self.config.clone(),
                    &self.log,
                    self.rest.clone(),
                    self.router.clone(),
                    self.events.clone(),
                )
                .await;
                self.groups
                    .write()
                    .await
                    .entry(group_id)
                    .or_insert_with(|| manager.clone())
                    .clone()
            }
        };

        let server = manager.server(server_id).await.ok_or_else(|| {
            ClientError::ConsoleRefused(format!(
                "Server {server_id} is not part of group {group_id}"
            ))
        })?;
        server.connect().await
    }

    /// Wires the three account-level channels and bootstraps groups and
    /// invites from REST.
    async fn start_bot(&self, sub: &str) {
        for (channel, handler) in [
            (
                "me-group-invite-create",
                self.handler(Self::on_invite_create),
            ),
            ("me-group-create", self.handler(Self::on_group_create)),
            ("me-group-delete", self.handler(Self::on_group_delete)),
        ] {
            if let Err(e) = self.router.subscribe(channel, sub, handler).await {
                self.log
                    .error(format!("Account channel {channel} failed: {e}"));
            }
        }

        match self.rest.list_joined_groups().await {
            Ok(joined) => {
                self.log.info(format!("Joined groups: {}", joined.len()));
                futures::future::join_all(joined.into_iter().map(|entry| {
                    self.workers
                        .run(self.add_group(entry.group, entry.member))
                }))
                .await;
            }
            Err(e) => self.log.error(format!("Joined-group bootstrap failed: {e}")),
        }

        match self.rest.list_pending_group_invites().await {
            Ok(invites) => {
                self.log.info(format!("Pending invites: {}", invites.len()));
                futures::future::join_all(invites.into_iter().map(|invite| {
                    self.workers.run(async move {
                        if let Err(e) = self.rest.accept_group_invite(invite.id).await {
                            self.log
                                .error(format!("Invite {} not accepted: {e}", invite.id));
                        }
                    })
                }))
                .await;
            }
            Err(e) => self.log.error(format!("Invite bootstrap failed: {e}")),
        }
    }

    /// Whether the allow/deny lists admit a group: a non-empty allowlist
    /// admits only its members, otherwise anything not denied.
    async fn group_admitted(&self, group_id: i64) -> bool {
        let allow = self.allow_list.read().await;
        if !allow.is_empty() {
            return allow.contains(&group_id);
        }
        !self.deny_list.read().await.contains(&group_id)
    }

    /// Fetches a group's descriptor plus the client's own membership.
    async fn fetch_group(
        &self,
        group_id: i64,
        user_id: &str,
    ) -> Result<(GroupInfo, GroupMemberInfo)> {
        let group = self.rest.get_group_info(group_id).await?;
        let member = self.rest.get_group_member(group_id, user_id).await?;
        Ok((group, member))
    }

    /// Wraps an event method into a subscription handler holding a weak
    /// back-reference.
    fn handler(
        &self,
        method: fn(Arc<Self>, Value) -> BoxFuture<'static, ()>,
    ) -> SubscriptionHandler {
        let weak = self.weak_self.clone();
        Arc::new(move |content| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(client) = weak.upgrade() {
                    method(client, content).await;
                }
            })
        })
    }

    /// `me-group-invite-create`: accept the invite; membership arrives as
    /// a subsequent `me-group-create`.
    fn on_invite_create(client: Arc<Self>, content: Value) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let invite: GroupInviteInfo = match serde_json::from_value(content) {
                Ok(invite) => invite,
                Err(e) => {
                    client.log.warn(format!("Malformed group invite: {e}"));
                    return;
                }
            };
            if let Err(e) = client.rest.accept_group_invite(invite.id).await {
                client
                    .log
                    .error(format!("Invite {} not accepted: {e}", invite.id));
            }
        })
    }

    /// `me-group-create`: start tracking the group.
    fn on_group_create(client: Arc<Self>, content: Value) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let entry: JoinedGroupInfo = match serde_json::from_value(content) {
                Ok(entry) => entry,
                Err(e) => {
                    client.log.warn(format!("Malformed me-group-create: {e}"));
                    return;
                }
            };
            client.add_group(entry.group, entry.member).await;
        })
    }

    /// `me-group-delete`: dispose and stop tracking the group.
    fn on_group_delete(client: Arc<Self>, content: Value) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let group: GroupInfo = match serde_json::from_value(content) {
                Ok(group) => group,
                Err(e) => {
                    client.log.warn(format!("Malformed me-group-delete: {e}"));
                    return;
                }
            };
            client.remove_group(group.id).await;
        })
    }

    #[cfg(test)]
    pub(crate) async fn allow_list_snapshot(&self) -> HashSet<i64> {
        self.allow_list.read().await.clone()
    }

    #[cfg(test)]
    pub(crate) async fn deny_list_snapshot(&self) -> HashSet<i64> {
        self.deny_list.read().await.clone()
    }
}
