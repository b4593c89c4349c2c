use std::sync::Arc;

use domain::{
    ActiveMembers, ConnectionId, RoomId, RoomMemberJoinedPayload, RoomMemberLeftPayload,
    RoomStats, ServerEvent, UserId,
};
use tracing::{debug, warn};

use crate::error::ApplicationError;
use crate::hub::{ConnectionHub, ConnectionSnapshot};
use crate::presence::PresenceRegistry;

/// 房间活跃人数处理器
///
/// 活跃集合独立于频道订阅，仅作为在线信号。写入与计数是两次注册表操作，
/// 并发时可能产生一次过时的广播，下一次变更会立即修正。
pub struct RoomPresenceHandler {
    hub: Arc<ConnectionHub>,
    registry: Arc<dyn PresenceRegistry>,
}

impl RoomPresenceHandler {
    pub fn new(hub: Arc<ConnectionHub>, registry: Arc<dyn PresenceRegistry>) -> Self {
        Self { hub, registry }
    }

    /// 用户在房间中变为活跃，返回广播出去的人数
    pub async fn member_joined_active(
        &self,
        connection_id: ConnectionId,
        payload: RoomMemberJoinedPayload,
    ) -> Result<u64, ApplicationError> {
        self.registry
            .add_active(payload.room_id, payload.user_id)
            .await?;
        self.hub.mark_active(connection_id, payload.room_id).await;

        self.publish_count(payload.room_id).await
    }

    /// 用户在房间中不再活跃。同一用户的其他连接仍活跃时保留其活跃状态
    pub async fn member_left_active(
        &self,
        connection_id: ConnectionId,
        payload: RoomMemberLeftPayload,
    ) -> Result<u64, ApplicationError> {
        self.hub.clear_active(connection_id, payload.room_id).await;
        if !self
            .hub
            .user_active_elsewhere(payload.user_id, payload.room_id, connection_id)
            .await
        {
            self.registry
                .remove_active(payload.room_id, payload.user_id)
                .await?;
        }

        self.publish_count(payload.room_id).await
    }

    /// 只把活跃成员列表发给请求方
    pub async fn query_active(
        &self,
        connection_id: ConnectionId,
        room_id: RoomId,
    ) -> Result<Vec<UserId>, ApplicationError> {
        let members = self.registry.active_members(room_id).await?;
        self.hub
            .send_to_connection(
                connection_id,
                ServerEvent::ActiveMembers(ActiveMembers {
                    room_id,
                    members: members.clone(),
                }),
            )
            .await;
        Ok(members)
    }

    /// 连接断开后释放其声明过的活跃房间
    pub async fn release(&self, snapshot: &ConnectionSnapshot) {
        for room_id in &snapshot.active_rooms {
            if self
                .hub
                .user_active_elsewhere(snapshot.user_id, *room_id, snapshot.connection_id)
                .await
            {
                debug!(room_id = %room_id, user_id = %snapshot.user_id, "用户仍有其他活跃连接");
                continue;
            }
            if let Err(err) = self.registry.remove_active(*room_id, snapshot.user_id).await {
                warn!(room_id = %room_id, user_id = %snapshot.user_id, error = %err, "释放活跃状态失败");
                continue;
            }
            if let Err(err) = self.publish_count(*room_id).await {
                warn!(room_id = %room_id, error = %err, "广播房间人数失败");
            }
        }
    }

    async fn publish_count(&self, room_id: RoomId) -> Result<u64, ApplicationError> {
        let active_members = self.registry.active_count(room_id).await?;
        let delivered = self
            .hub
            .broadcast_to_room(
                room_id,
                ServerEvent::RoomStatsUpdated(RoomStats {
                    room_id,
                    active_members,
                }),
                None,
            )
            .await;

        debug!(room_id = %room_id, active_members, delivered, "房间人数已更新");
        Ok(active_members)
    }
}
