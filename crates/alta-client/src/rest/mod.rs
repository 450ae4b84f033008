//! REST gateway and typed payloads.

pub mod gateway;
pub mod types;

pub use gateway::RestGateway;
pub use types::{
    ConsoleAccess, GroupInfo, GroupInviteInfo, GroupMemberInfo, GroupRoleInfo, GroupServerInfo,
    JoinedGroupInfo, ServerInfo, ServerJoinResult, ServerPlayerInfo, ServerStatus,
};
