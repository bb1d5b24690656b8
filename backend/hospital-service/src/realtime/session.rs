use actix::{Actor, ActorContext, ActorFutureExt, AsyncContext, StreamHandler, WrapFuture};
use actix_web_actors::ws;
use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::hub::{department_audience, Channel, ChannelHub, ConnectionId};
use super::messages::{ClientMessage, RealtimeEvent};
use crate::middleware::AuthUser;
use crate::models::normalize_department;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Wrapper so hub events and socket frames get separate stream handlers.
pub struct HubEvent(RealtimeEvent);

// WebSocket Actor
pub struct RealtimeSession {
    connection_id: ConnectionId,
    user: AuthUser,
    hub: ChannelHub,
    events: Option<UnboundedReceiver<RealtimeEvent>>,
    hb: Instant,
}

impl RealtimeSession {
    pub fn new(
        connection_id: ConnectionId,
        user: AuthUser,
        hub: ChannelHub,
        events: UnboundedReceiver<RealtimeEvent>,
    ) -> Self {
        Self {
            connection_id,
            user,
            hub,
            events: Some(events),
            hb: Instant::now(),
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!(user_id = %act.user.id, "WebSocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn send_event(ctx: &mut ws::WebsocketContext<Self>, event: &RealtimeEvent) {
        match event.to_json() {
            Ok(text) => ctx.text(text),
            Err(e) => tracing::error!("Failed to serialize realtime event: {}", e),
        }
    }

    fn department_or_reject(raw: &str, ctx: &mut ws::WebsocketContext<Self>) -> Option<String> {
        match normalize_department(raw) {
            Ok(department) => Some(department),
            Err(e) => {
                Self::send_event(ctx, &RealtimeEvent::error("invalid_department", e.to_string()));
                None
            }
        }
    }

    fn handle_client_message(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match msg {
            ClientMessage::Ping { .. } => {
                Self::send_event(ctx, &RealtimeEvent::pong());
            }

            ClientMessage::SubscribeDepartment { department } => {
                let Some(department) = Self::department_or_reject(&department, ctx) else {
                    return;
                };
                let channel = Channel::Department(department);
                let hub = self.hub.clone();
                let id = self.connection_id;
                let joined = channel.clone();
                ctx.spawn(
                    async move { hub.join(id, joined).await }
                        .into_actor(self)
                        .map(move |_, _act, ctx| {
                            Self::send_event(
                                ctx,
                                &RealtimeEvent::Subscribed {
                                    channel: channel.to_string(),
                                },
                            );
                        }),
                );
            }

            ClientMessage::UnsubscribeDepartment { department } => {
                let Some(department) = Self::department_or_reject(&department, ctx) else {
                    return;
                };
                let channel = Channel::Department(department);
                let hub = self.hub.clone();
                let id = self.connection_id;
                let left = channel.clone();
                ctx.spawn(
                    async move { hub.leave(id, &left).await }
                        .into_actor(self)
                        .map(move |_, _act, ctx| {
                            Self::send_event(
                                ctx,
                                &RealtimeEvent::Unsubscribed {
                                    channel: channel.to_string(),
                                },
                            );
                        }),
                );
            }

            ClientMessage::PatientStatusUpdate {
                patient_id,
                visit_id,
                status,
            } => {
                let event = RealtimeEvent::PatientStatusChanged {
                    patient_id,
                    visit_id,
                    previous: None,
                    status,
                    changed_by: self.user.id,
                };
                let hub = self.hub.clone();
                actix::spawn(async move {
                    hub.broadcast(&event).await;
                });
            }

            ClientMessage::QueueUpdate { department, data } => {
                let Some(department) = Self::department_or_reject(&department, ctx) else {
                    return;
                };
                let event = RealtimeEvent::QueueChanged {
                    department: department.clone(),
                    data,
                    changed_by: self.user.id,
                };
                let hub = self.hub.clone();
                actix::spawn(async move {
                    hub.send_to(&department_audience(&department), &event).await;
                });
            }
        }
    }
}

impl Actor for RealtimeSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            user_id = %self.user.id,
            role = %self.user.role,
            "WebSocket session started"
        );

        self.hb(ctx);

        if let Some(events) = self.events.take() {
            ctx.add_stream(UnboundedReceiverStream::new(events).map(HubEvent));
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(user_id = %self.user.id, "WebSocket session stopped");

        // Cleanup: drop every channel membership
        let hub = self.hub.clone();
        let id = self.connection_id;
        actix::spawn(async move {
            hub.disconnect(id).await;
        });
    }
}

// Forward hub events to the socket
impl StreamHandler<HubEvent> for RealtimeSession {
    fn handle(&mut self, event: HubEvent, ctx: &mut Self::Context) {
        Self::send_event(ctx, &event.0);
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        // The hub dropped our sender; the connection is no longer routable
        ctx.stop();
    }
}

// Handle WebSocket protocol messages
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RealtimeSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(msg) => self.handle_client_message(msg, ctx),
                    Err(e) => {
                        tracing::warn!("Failed to parse WS message: {:?}", e);
                        Self::send_event(
                            ctx,
                            &RealtimeEvent::error("invalid_message", "unrecognized message"),
                        );
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!("Binary WebSocket messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!("WebSocket close message received: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                tracing::warn!("WebSocket protocol error: {}", e);
                ctx.stop();
            }
            _ => {}
        }
    }
}
