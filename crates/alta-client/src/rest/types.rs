//! Typed payloads for the REST gateway and streamed account events.
//!
//! Wire names are snake_case except where the platform deviates
//! (`isOnline` on heartbeats); serde renames cover the deviations.

use serde::{Deserialize, Serialize};

/// A group's descriptor as returned by the platform.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GroupInfo {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub member_count: Option<u32>,
    #[serde(default)]
    pub servers: Vec<GroupServerInfo>,
    #[serde(default)]
    pub roles: Vec<GroupRoleInfo>,
}

/// A server entry inside a group descriptor.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GroupServerInfo {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub scene_index: Option<i64>,
}

/// A role inside a group, carrying the permission strings that gate
/// console access.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GroupRoleInfo {
    pub role_id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// A group member, in particular the client's own membership.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GroupMemberInfo {
    #[serde(default)]
    pub group_id: Option<i64>,
    pub user_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub role_id: i64,
}

/// A joined-group listing entry: the group plus the client's membership.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JoinedGroupInfo {
    pub group: GroupInfo,
    pub member: GroupMemberInfo,
}

/// A pending group invite.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GroupInviteInfo {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

/// A server descriptor as returned by the platform.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerInfo {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default)]
    pub fleet: Option<String>,
    #[serde(default)]
    pub playability: Option<f64>,
    #[serde(default)]
    pub online_players: Vec<ServerPlayerInfo>,
}

/// A player currently on a server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerPlayerInfo {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

/// A streamed server status, carried by heartbeat and status events.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerStatus {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default)]
    pub fleet: Option<String>,
    #[serde(default)]
    pub playability: Option<f64>,
    #[serde(default, rename = "isOnline")]
    pub is_online: bool,
    #[serde(default)]
    pub online_players: Vec<ServerPlayerInfo>,
}

/// The result of requesting console connection details for a server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerJoinResult {
    #[serde(default)]
    pub allowed: bool,
    #[serde(default)]
    pub connection: Option<ConsoleAccess>,
    #[serde(default)]
    pub token: Option<String>,
}

/// Console endpoint coordinates inside a join result.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsoleAccess {
    pub address: String,
    pub websocket_port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_status_wire_shape() {
        // The heartbeat payload mixes camelCase (`isOnline`) with
        // snake_case (`online_players`).
        let status: ServerStatus = serde_json::from_value(serde_json::json!({
            "id": 7,
            "isOnline": true,
            "online_players": [{"id": 99, "username": "P"}],
            "fleet": "att-release",
        }))
        .unwrap();
        assert_eq!(status.id, 7);
        assert!(status.is_online);
        assert_eq!(status.online_players.len(), 1);
        assert_eq!(status.online_players[0].id, 99);
    }

    #[test]
    fn test_join_result_defaults() {
        let result: ServerJoinResult = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(!result.allowed);
        assert!(result.connection.is_none());
        assert!(result.token.is_none());

        let result: ServerJoinResult = serde_json::from_value(serde_json::json!({
            "allowed": true,
            "connection": {"address": "10.0.0.1", "websocket_port": 9001},
            "token": "CT",
        }))
        .unwrap();
        assert!(result.allowed);
        assert_eq!(result.connection.unwrap().websocket_port, 9001);
    }

    #[test]
    fn test_joined_group_entry() {
        let entry: JoinedGroupInfo = serde_json::from_value(serde_json::json!({
            "group": {
                "id": 42,
                "name": "G",
                "servers": [{"id": 7}],
                "roles": [{"role_id": 1, "permissions": ["Console"]}],
            },
            "member": {"user_id": "U1", "role_id": 1},
        }))
        .unwrap();
        assert_eq!(entry.group.id, 42);
        assert_eq!(entry.group.servers[0].id, 7);
        assert_eq!(entry.member.user_id, "U1");
        assert_eq!(entry.group.roles[0].permissions, vec!["Console".to_string()]);
    }
}
