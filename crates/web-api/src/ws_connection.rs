use crate::error::ApiError;
use crate::state::AppState;
use application::OutboundReceiver;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{ClientEvent, ConnectionId, ServerEvent, UserId};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// WebSocket 连接
///
/// 封装单个 WebSocket 连接的生命周期：
/// - 注册到连接分发中心并绑定在线状态
/// - 转发发送队列中的服务端事件
/// - 解析并顺序分发客户端事件
/// - 心跳刷新在线状态
/// - 断开时统一清理
pub struct WebSocketConnection {
    state: AppState,
    connection_id: ConnectionId,
    user_id: UserId,
    outbound: OutboundReceiver,
}

impl WebSocketConnection {
    /// 注册新连接，握手时验证过的用户身份在连接存活期间不变
    pub async fn accept(state: AppState, user_id: UserId) -> Result<Self, ApiError> {
        let connection_id = ConnectionId::generate();

        let outbound = state
            .hub
            .register(connection_id, user_id)
            .await
            .map_err(ApiError::from)?;

        tracing::info!(connection_id = %connection_id, user_id = %user_id, "WebSocket 连接已建立");

        Ok(Self {
            state,
            connection_id,
            user_id,
            outbound,
        })
    }

    /// 运行连接主循环，返回前总会执行断开清理
    pub async fn run(self, socket: WebSocket) {
        let Self {
            state,
            connection_id,
            user_id,
            mut outbound,
        } = self;

        let (mut sender, mut incoming) = socket.split();

        // 创建 mpsc channel 来解耦对 sender 的访问
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

        let heartbeat_interval = state.heartbeat_interval;

        // 发送任务：统一处理所有对 WebSocket sender 的写操作，并定期发送 ping
        let send_task = tokio::spawn(async move {
            let mut heartbeat =
                interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = heartbeat.tick() => {
                        if sender.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                            tracing::warn!("Failed to send heartbeat ping");
                            break;
                        }
                    }
                    Some(cmd) = cmd_rx.recv() => {
                        let frame = match cmd {
                            WsCommand::SendText(text) => WsMessage::Text(text.into()),
                            WsCommand::SendPong(data) => WsMessage::Pong(data.into()),
                        };
                        if sender.send(frame).await.is_err() {
                            tracing::warn!("Failed to send websocket frame");
                            break;
                        }
                    }
                    event = outbound.recv() => {
                        // 发送队列被关闭：连接已注销或因处理过慢被断开
                        let Some(event) = event else {
                            let _ = sender.send(WsMessage::Close(None)).await;
                            break;
                        };
                        let Some(payload) = encode(&event) else {
                            continue;
                        };
                        if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                            tracing::warn!("Failed to send server event");
                            break;
                        }
                    }
                }
            }
            tracing::debug!("WebSocket发送任务结束");
        });

        // 接收任务：同一连接上的事件按到达顺序依次处理
        let recv_task = {
            let state = state.clone();
            tokio::spawn(async move {
                loop {
                    let message = tokio::select! {
                        message = incoming.next() => message,
                        _ = cmd_tx.closed() => break,
                    };
                    let Some(Ok(message)) = message else {
                        break;
                    };
                    if Self::handle_incoming(&state, connection_id, message, &cmd_tx)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                tracing::debug!("WebSocket接收任务结束");
            })
        };

        if let Err(err) = recv_task.await {
            tracing::error!(connection_id = %connection_id, error = %err, "WebSocket接收任务异常退出");
        }
        send_task.abort();

        // 断开清理是唯一的清理路径
        state.dispatcher.disconnect(connection_id).await;

        tracing::info!(connection_id = %connection_id, user_id = %user_id, "WebSocket连接已断开，在线状态已清理");
    }

    /// 处理来自客户端的帧
    async fn handle_incoming(
        state: &AppState,
        connection_id: ConnectionId,
        message: WsMessage,
        cmd_tx: &mpsc::Sender<WsCommand>,
    ) -> Result<(), ()> {
        match message {
            WsMessage::Close(_) => {
                tracing::info!("WebSocket收到关闭消息");
                return Err(());
            }
            WsMessage::Ping(data) => {
                tracing::debug!("收到ping消息，刷新在线状态并回应pong");
                state.dispatcher.heartbeat(connection_id).await;
                if cmd_tx
                    .send(WsCommand::SendPong(data.to_vec()))
                    .await
                    .is_err()
                {
                    tracing::warn!("Failed to send pong command");
                    return Err(());
                }
            }
            WsMessage::Pong(_) => {
                tracing::debug!("收到pong消息，刷新在线状态");
                state.dispatcher.heartbeat(connection_id).await;
            }
            WsMessage::Text(text) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                Ok(event) => state.dispatcher.dispatch(connection_id, event).await,
                Err(err) => {
                    tracing::debug!(connection_id = %connection_id, error = %err, "无法解析客户端事件");
                    let reply = ServerEvent::error("BAD_REQUEST", format!("malformed event: {err}"));
                    if let Some(payload) = encode(&reply) {
                        if cmd_tx.send(WsCommand::SendText(payload)).await.is_err() {
                            return Err(());
                        }
                    }
                }
            },
            WsMessage::Binary(_) => {
                tracing::debug!(connection_id = %connection_id, "忽略二进制消息");
            }
        }
        Ok(())
    }
}

fn encode(event: &ServerEvent) -> Option<String> {
    serde_json::to_string(event)
        .map_err(|err| tracing::warn!(error = %err, event = event.name(), "failed to serialize websocket payload"))
        .ok()
}

/// WebSocket 写操作命令
///
/// 使用命令模式统一管理所有对 WebSocket sender 的写操作
#[derive(Debug)]
enum WsCommand {
    SendText(String),
    SendPong(Vec<u8>),
}
