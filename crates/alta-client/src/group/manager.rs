//! Per-group state tracking and event handling.
//!
//! A group manager tracks the group's roles and the client's effective
//! permissions within it, owns a server manager per game server, and
//! subscribes to the six group-scoped channels that drive server liveness
//! and console reconciliation.

use crate::config::ClientConfig;
use crate::error::Result;
use crate::events::ClientEvent;
use crate::group::server::{ServerConnectionStatus, ServerManager};
use crate::logging::Logger;
use crate::rest::{GroupInfo, GroupMemberInfo, GroupRoleInfo, RestGateway, ServerStatus};
use crate::socket::{SubscriptionHandler, SubscriptionRouter};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, RwLock};

/// The permission string gating console access.
const CONSOLE_PERMISSION: &str = "Console";

/// The six group-scoped channels a manager subscribes to.
const GROUP_CHANNELS: [&str; 6] = [
    "group-update",
    "group-member-update",
    "group-server-status",
    "group-server-heartbeat",
    "group-server-create",
    "group-server-delete",
];

/// Tracks one group and its servers.
///
/// Invariant: `permissions` is always the effective permission set of the
/// member's role within `roles`, or empty when the role is unknown.
pub struct GroupManager {
    weak_self: Weak<Self>,
    id: i64,
    user_id: String,
    config: Arc<ClientConfig>,
    log: Logger,
    rest: Arc<RestGateway>,
    router: Arc<SubscriptionRouter>,
    events: broadcast::Sender<ClientEvent>,
    name: RwLock<Option<String>>,
    description: RwLock<Option<String>>,
    roles: RwLock<Vec<GroupRoleInfo>>,
    role_id: RwLock<i64>,
    permissions: RwLock<HashSet<String>>,
    servers: RwLock<HashMap<i64, Arc<ServerManager>>>,
    subscribed: AtomicBool,
    disposed: AtomicBool,
}

impl GroupManager {
    /// Creates a manager from a group descriptor and the client's
    /// membership, synchronously adding a server manager for every server
    /// in the descriptor.
    pub async fn new(
        group: GroupInfo,
        member: GroupMemberInfo,
        config: Arc<ClientConfig>,
        log: &Logger,
        rest: Arc<RestGateway>,
        router: Arc<SubscriptionRouter>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Arc<Self> {
        let log = log.with_context(&format!("group-{}", group.id));
        let permissions = effective_permissions(&group.roles, member.role_id);
        if !permissions.contains(CONSOLE_PERMISSION) {
            log.warn(format!(
                "Member role {} lacks the {CONSOLE_PERMISSION} permission; consoles will not \
                 be opened",
                member.role_id
            ));
        }

        let manager = Arc::new_cyclic(|weak| Self {
            weak_self: weak.clone(),
            id: group.id,
            user_id: member.user_id.clone(),
            config,
            log,
            rest,
            router,
            events,
            name: RwLock::new(group.name.clone()),
            description: RwLock::new(group.description.clone()),
            roles: RwLock::new(group.roles.clone()),
            role_id: RwLock::new(member.role_id),
            permissions: RwLock::new(permissions),
            servers: RwLock::new(HashMap::new()),
            subscribed: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        });

        for server in &group.servers {
            manager.add_server(server.id, server.name.clone()).await;
        }
        manager
    }

    /// The group's id.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// The client's user id within this group.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The group's display name.
    pub async fn name(&self) -> Option<String> {
        self.name.read().await.clone()
    }

    /// The client's effective permissions in this group.
    pub async fn permissions(&self) -> HashSet<String> {
        self.permissions.read().await.clone()
    }

    /// The server manager for `server_id`, if known.
    pub async fn server(&self, server_id: i64) -> Option<Arc<ServerManager>> {
        self.servers.read().await.get(&server_id).cloned()
    }

    /// All server managers of this group.
    pub async fn servers(&self) -> Vec<Arc<ServerManager>> {
        self.servers.read().await.values().cloned().collect()
    }

    /// Subscribes the six group-scoped channels through the router.
    pub async fn init(&self) -> Result<()> {
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let key = self.id.to_string();

        self.router
            .subscribe("group-update", &key, self.handler(Self::on_group_update))
            .await?;
        self.router
            .subscribe(
                "group-member-update",
                &key,
                self.handler(Self::on_member_update),
            )
            .await?;
        self.router
            .subscribe(
                "group-server-status",
                &key,
                self.handler(Self::on_server_status),
            )
            .await?;
        self.router
            .subscribe(
                "group-server-heartbeat",
                &key,
                self.handler(Self::on_server_heartbeat),
            )
            .await?;
        self.router
            .subscribe(
                "group-server-create",
                &key,
                self.handler(Self::on_server_create),
            )
            .await?;
        self.router
            .subscribe(
                "group-server-delete",
                &key,
                self.handler(Self::on_server_delete),
            )
            .await?;

        self.log.info("Group channels subscribed");
        Ok(())
    }

    /// Unsubscribes every channel and disposes every server manager.
    /// Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        if self.subscribed.load(Ordering::SeqCst) {
            let key = self.id.to_string();
            for channel in GROUP_CHANNELS {
                if let Err(e) = self.router.unsubscribe(channel, &key).await {
                    self.log
                        .debug(format!("Unsubscribe {channel}/{key} failed: {e}"));
                }
            }
        }

        let servers: Vec<_> = {
            let mut servers = self.servers.write().await;
            std::mem::take(&mut *servers).into_values().collect()
        };
        for server in servers {
            server.dispose().await;
        }
        self.log.info("Group disposed");
    }

    /// Handles one heartbeat: refreshes the liveness budget, then
    /// reconciles the console connection.
    pub async fn handle_heartbeat(&self, status: ServerStatus) {
        if status.is_online {
            let server = self.resolve_server(status.id, status.name.clone()).await;
            server.reset_missed_heartbeats();
            server.arm_heartbeat_timer().await;
        }
        self.manage_server_connection(status).await;
    }

    /// Reconciles a server's console connection against the latest
    /// status.
    ///
    /// A console may be opened only when the member has the console
    /// permission and the server's fleet is supported; it is opened when
    /// the server is online with players aboard, and torn down when
    /// either precondition lapses.
    pub async fn manage_server_connection(&self, status: ServerStatus) {
        let server = self.resolve_server(status.id, status.name.clone()).await;

        let has_console = self
            .permissions
            .read()
            .await
            .contains(CONSOLE_PERMISSION);
        let fleet = match status.fleet.clone() {
            Some(fleet) => Some(fleet),
            None => server.fleet().await,
        };
        let fleet_supported = fleet
            .map(|fleet| self.config.supported_server_fleets.contains(&fleet))
            .unwrap_or(false);
        let may_connect = has_console && fleet_supported;

        let current = server.status().await;
        if current == ServerConnectionStatus::Disconnected
            && may_connect
            && status.is_online
            && !status.online_players.is_empty()
        {
            let server = server.clone();
            let log = self.log.clone();
            tokio::spawn(async move {
                if let Err(e) = server.connect().await {
                    log.error(format!("Console connect for server {} failed: {e}", server.id()));
                }
            });
        } else if current != ServerConnectionStatus::Disconnected
            && (!may_connect || !status.is_online)
        {
            server.clear_heartbeat_timer().await;
            server.disconnect().await;
        }

        server.update(&status).await;
    }

    /// Looks up or creates the server manager for `server_id`.
    async fn resolve_server(&self, server_id: i64, name: Option<String>) -> Arc<ServerManager> {
        if let Some(server) = self.servers.read().await.get(&server_id) {
            return server.clone();
        }
        self.add_server(server_id, name).await
    }

    /// Adds a server manager, returning the existing one on a duplicate.
    async fn add_server(&self, server_id: i64, name: Option<String>) -> Arc<ServerManager> {
        let mut servers = self.servers.write().await;
        if let Some(server) = servers.get(&server_id) {
            return server.clone();
        }
        let server = ServerManager::new(
            server_id,
            name,
            self.config.clone(),
            &self.log,
            self.rest.clone(),
            self.events.clone(),
        );
        servers.insert(server_id, server.clone());
        self.log.debug(format!("Tracking server {server_id}"));
        server
    }

    /// Wraps an event method into a subscription handler holding a weak
    /// back-reference, so a dropped group stops handling events.
    fn handler(
        &self,
        method: fn(Arc<Self>, Value) -> BoxFuture<'static, ()>,
    ) -> SubscriptionHandler {
        let weak = self.weak_self.clone();
        Arc::new(move |content| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(group) = weak.upgrade() {
                    method(group, content).await;
                }
            })
        })
    }

    /// `group-update`: refresh name, description, and roles.
    ///
    /// Permissions are deliberately not recomputed here; refreshing them
    /// from a bare group update caused spurious lost-console churn on
    /// large groups. Only a member update for the own member does that.
    fn on_group_update(group: Arc<Self>, content: Value) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let info: GroupInfo = match serde_json::from_value(content) {
                Ok(info) => info,
                Err(e) => {
                    group.log.warn(format!("Malformed group-update: {e}"));
                    return;
                }
            };
            *group.name.write().await = info.name;
            *group.description.write().await = info.description;
            if !info.roles.is_empty() {
                *group.roles.write().await = info.roles;
            }
            group.log.debug("Group descriptor refreshed");
        })
    }

    /// `group-member-update`: when the own membership changes, re-fetch
    /// the group and recompute effective permissions.
    fn on_member_update(group: Arc<Self>, content: Value) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let member: GroupMemberInfo = match serde_json::from_value(content) {
                Ok(member) => member,
                Err(e) => {
                    group.log.warn(format!("Malformed group-member-update: {e}"));
                    return;
                }
            };
            if member.user_id != group.user_id {
                return;
            }

            match group.rest.get_group_info(group.id).await {
                Ok(info) => {
                    *group.name.write().await = info.name;
                    *group.description.write().await = info.description;
                    *group.roles.write().await = info.roles;
                }
                Err(e) => {
                    group
                        .log
                        .warn(format!("Group refresh after member update failed: {e}"));
                }
            }

            *group.role_id.write().await = member.role_id;
            let permissions =
                effective_permissions(&*group.roles.read().await, member.role_id);
            let lost_console = !permissions.contains(CONSOLE_PERMISSION);
            *group.permissions.write().await = permissions;
            if lost_console {
                group.log.warn(format!(
                    "Member role {} no longer grants {CONSOLE_PERMISSION}",
                    member.role_id
                ));
            }
            group.log.info("Membership refreshed");
        })
    }

    /// `group-server-status`: reconcile the affected server's console.
    fn on_server_status(group: Arc<Self>, content: Value) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let status: ServerStatus = match serde_json::from_value(content) {
                Ok(status) => status,
                Err(e) => {
                    group.log.warn(format!("Malformed group-server-status: {e}"));
                    return;
                }
            };
            group.manage_server_connection(status).await;
        })
    }

    /// `group-server-heartbeat`: feed the liveness budget.
    fn on_server_heartbeat(group: Arc<Self>, content: Value) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let status: ServerStatus = match serde_json::from_value(content) {
                Ok(status) => status,
                Err(e) => {
                    group
                        .log
                        .warn(format!("Malformed group-server-heartbeat: {e}"));
                    return;
                }
            };
            group.handle_heartbeat(status).await;
        })
    }

    /// `group-server-create`: start tracking a new server.
    ///
    /// This path was never observed in the wild against a live platform,
    /// hence the prominent warning when it fires.
    fn on_server_create(group: Arc<Self>, content: Value) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            group
                .log
                .warn("group-server-create received; this path is not battle-tested");
            let status: ServerStatus = match serde_json::from_value(content) {
                Ok(status) => status,
                Err(e) => {
                    group.log.warn(format!("Malformed group-server-create: {e}"));
                    return;
                }
            };
            group.resolve_server(status.id, status.name.clone()).await;
        })
    }

    /// `group-server-delete`: stop tracking a server.
    ///
    /// Same caveat as `group-server-create`.
    fn on_server_delete(group: Arc<Self>, content: Value) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            group
                .log
                .warn("group-server-delete received; this path is not battle-tested");
            let status: ServerStatus = match serde_json::from_value(content) {
                Ok(status) => status,
                Err(e) => {
                    group.log.warn(format!("Malformed group-server-delete: {e}"));
                    return;
                }
            };
            let server = group.servers.write().await.remove(&status.id);
            if let Some(server) = server {
                server.dispose().await;
                group.log.info(format!("Server {} removed", status.id));
            }
        })
    }
}

/// Computes the effective permission set for a role id, empty when the
/// role is unknown.
fn effective_permissions(roles: &[GroupRoleInfo], role_id: i64) -> HashSet<String> {
    roles
        .iter()
        .find(|role| role.role_id == role_id)
        .map(|role| role.permissions.iter().cloned().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Credentials, TokenManager};
    use crate::logging::{LogVerbosity, Logger};
    use crate::workers::WorkerPool;

    fn group_fixture() -> (GroupInfo, GroupMemberInfo) {
        let group: GroupInfo = serde_json::from_value(serde_json::json!({
            "id": 42,
            "name": "G",
            "servers": [{"id": 7, "name": "S"}],
            "roles": [
                {"role_id": 1, "name": "Admin", "permissions": ["Console", "Invite"]},
                {"role_id": 2, "name": "Member", "permissions": []},
            ],
        }))
        .unwrap();
        let member: GroupMemberInfo = serde_json::from_value(serde_json::json!({
            "group_id": 42,
            "user_id": "U1",
            "role_id": 1,
        }))
        .unwrap();
        (group, member)
    }

    async fn build(group: GroupInfo, member: GroupMemberInfo) -> Arc<GroupManager> {
        let config = Arc::new(ClientConfig {
            client_id: Some("id".to_string()),
            client_secret: Some("secret".to_string()),
            ..ClientConfig::default()
        });
        let log = Logger::new(LogVerbosity::Quiet, "");
        let credentials = Credentials::from_config(&config).unwrap();
        let tokens = TokenManager::new(config.clone(), log.clone(), credentials);
        let rest = Arc::new(RestGateway::new(config.clone(), log.clone(), tokens.clone()));
        let workers = Arc::new(WorkerPool::new(5, &log));
        let router = Arc::new(SubscriptionRouter::new(
            config.clone(),
            log.clone(),
            tokens,
            workers,
        ));
        let (events, _) = broadcast::channel(16);
        GroupManager::new(group, member, config, &log, rest, router, events).await
    }

    #[test]
    fn test_effective_permissions() {
        let roles: Vec<GroupRoleInfo> = serde_json::from_value(serde_json::json!([
            {"role_id": 1, "permissions": ["Console"]},
            {"role_id": 2, "permissions": []},
        ]))
        .unwrap();

        assert!(effective_permissions(&roles, 1).contains("Console"));
        assert!(effective_permissions(&roles, 2).is_empty());
        // Unknown role falls back to the empty set.
        assert!(effective_permissions(&roles, 9).is_empty());
    }

    #[tokio::test]
    async fn test_construction_adds_descriptor_servers() {
        let (group, member) = group_fixture();
        let manager = build(group, member).await;

        assert_eq!(manager.id(), 42);
        assert_eq!(manager.user_id(), "U1");
        assert_eq!(manager.name().await, Some("G".to_string()));
        assert!(manager.permissions().await.contains("Console"));
        assert!(manager.server(7).await.is_some());
        assert_eq!(manager.servers().await.len(), 1);
    }

    #[tokio::test]
    async fn test_group_update_keeps_permissions() {
        let (group, member) = group_fixture();
        let manager = build(group, member).await;

        // The update strips the Console permission from role 1, but a
        // bare group update must not recompute the effective set.
        GroupManager::on_group_update(
            manager.clone(),
            serde_json::json!({
                "id": 42,
                "name": "Renamed",
                "roles": [{"role_id": 1, "permissions": []}],
            }),
        )
        .await;

        assert_eq!(manager.name().await, Some("Renamed".to_string()));
        assert!(manager.permissions().await.contains("Console"));
    }

    #[tokio::test]
    async fn test_member_update_for_other_member_is_ignored() {
        let (group, member) = group_fixture();
        let manager = build(group, member).await;

        GroupManager::on_member_update(
            manager.clone(),
            serde_json::json!({"user_id": "someone-else", "role_id": 2}),
        )
        .await;
        assert!(manager.permissions().await.contains("Console"));
    }

    #[tokio::test]
    async fn test_heartbeat_creates_unknown_server() {
        let (group, member) = group_fixture();
        let manager = build(group, member).await;

        let status: ServerStatus = serde_json::from_value(serde_json::json!({
            "id": 8,
            "name": "New",
            "isOnline": true,
            "online_players": [],
            "fleet": "att-release",
        }))
        .unwrap();
        manager.handle_heartbeat(status).await;

        let server = manager.server(8).await.expect("server must be created");
        assert_eq!(server.fleet().await, Some("att-release".to_string()));
        server.clear_heartbeat_timer().await;
        manager.dispose().await;
    }

    #[tokio::test]
    async fn test_offline_status_does_not_connect() {
        let (group, member) = group_fixture();
        let manager = build(group, member).await;

        let status: ServerStatus = serde_json::from_value(serde_json::json!({
            "id": 7,
            "isOnline": false,
            "online_players": [],
            "fleet": "att-release",
        }))
        .unwrap();
        manager.manage_server_connection(status).await;

        let server = manager.server(7).await.unwrap();
        assert_eq!(server.status().await, ServerConnectionStatus::Disconnected);
        manager.dispose().await;
    }

    #[tokio::test]
    async fn test_unsupported_fleet_does_not_connect() {
        let (group, member) = group_fixture();
        let manager = build(group, member).await;

        let status: ServerStatus = serde_json::from_value(serde_json::json!({
            "id": 7,
            "isOnline": true,
            "online_players": [{"id": 99}],
            "fleet": "att-internal",
        }))
        .unwrap();
        manager.manage_server_connection(status).await;

        let server = manager.server(7).await.unwrap();
        assert_eq!(server.status().await, ServerConnectionStatus::Disconnected);
        manager.dispose().await;
    }

    #[tokio::test]
    async fn test_server_delete_disposes_manager() {
        let (group, member) = group_fixture();
        let manager = build(group, member).await;

        GroupManager::on_server_delete(manager.clone(), serde_json::json!({"id": 7})).await;
        assert!(manager.server(7).await.is_none());
        manager.dispose().await;
    }
}
