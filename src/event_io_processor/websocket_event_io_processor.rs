//! The websocket host surface.\
//! \
//! `ws://host:port/<session>/websocket`: raises 'websocket.connect' when a
//! client connects, parses each text frame as a JSON envelope onto the
//! session's external queue and raises 'websocket.disconnect' on close.
//! Outbound frames drain the session's '#_websocket' queue.

use std::fmt::Debug;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;

use crate::common::{error, info, warn};
use crate::datamodel::GlobalDataAccess;
use crate::event_io_processor::{wire, EventIOProcessor};
use crate::fsm::{Event, SessionId};
use crate::fsm_executor::ExecutorStateArc;

pub const WEBSOCKET_PROCESSOR_SHORT_TYPE: &str = "websocket";

const TYPES: &[&str] = &[WEBSOCKET_PROCESSOR_SHORT_TYPE];

#[derive(Debug, Clone)]
pub struct WebSocketEventIOProcessor {
    pub location: String,
    pub terminate_flag: Arc<AtomicBool>,
    local_adr: SocketAddr,
    executor_state: ExecutorStateArc,
}

impl WebSocketEventIOProcessor {
    pub fn new(
        addr: SocketAddr,
        location_name: &str,
        executor_state: ExecutorStateArc,
    ) -> WebSocketEventIOProcessor {
        let terminate_flag = Arc::new(AtomicBool::new(false));
        let server_flag = terminate_flag.clone();
        let server_state = executor_state.clone();
        thread::Builder::new()
            .name("ws_server".to_string())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(2)
                    .enable_all()
                    .build()
                    .expect("failed to build websocket runtime");
                runtime.block_on(async move {
                    let listener = match TcpListener::bind(addr).await {
                        Ok(listener) => listener,
                        Err(err) => {
                            error!("websocket server can't bind {}: {}", addr, err);
                            return;
                        }
                    };
                    info!("websocket server at {}", addr);
                    loop {
                        let (stream, _peer) = match listener.accept().await {
                            Ok(accepted) => accepted,
                            Err(_) => continue,
                        };
                        if server_flag.load(Ordering::Relaxed) {
                            break;
                        }
                        let state = server_state.clone();
                        tokio::task::spawn(async move {
                            handle_socket(stream, state).await;
                        });
                    }
                    info!("websocket server stopped");
                });
            })
            .expect("failed to spawn websocket server thread");
        WebSocketEventIOProcessor {
            location: format!("ws://{}:{}", location_name, addr.port()),
            terminate_flag,
            local_adr: addr,
            executor_state,
        }
    }
}

/// Extracts the session id from a '/<session>/websocket' path.
fn session_of_path(path: &str) -> Option<SessionId> {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    if parts.len() == 2 && parts[1] == WEBSOCKET_PROCESSOR_SHORT_TYPE {
        parts[0].parse().ok()
    } else {
        None
    }
}

async fn handle_socket(stream: tokio::net::TcpStream, state: ExecutorStateArc) {
    let request_path: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));
    let path_capture = request_path.clone();
    let callback = move |request: &Request, response: Response| {
        if let Ok(mut path) = path_capture.lock() {
            *path = request.uri().path().to_string();
        }
        Ok(response)
    };
    let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws_stream) => ws_stream,
        Err(err) => {
            warn!("websocket handshake failed: {}", err);
            return;
        }
    };
    let path = request_path.lock().map(|p| p.clone()).unwrap_or_default();
    let session_id = match session_of_path(&path) {
        Some(session_id) => session_id,
        None => {
            warn!("websocket: unknown path '{}'", path);
            return;
        }
    };
    let (sender, global) = {
        let guard = state.lock().expect("executor state lock poisoned");
        match guard.sessions.get(&session_id) {
            None => {
                warn!("websocket: unknown session #{}", session_id);
                return;
            }
            Some(session) => (session.sender.clone(), session.global_data.clone()),
        }
    };

    let _ = sender.send(Box::new(Event::new_external("websocket.connect")));

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let outbound_queue = global.lock().websocket_queue.clone();
    let closed = Arc::new(AtomicBool::new(false));
    let writer_closed = closed.clone();
    let writer = tokio::task::spawn(async move {
        while !writer_closed.load(Ordering::Relaxed) {
            let queue = outbound_queue.clone();
            let frame = tokio::task::spawn_blocking(move || {
                queue.dequeue_timeout(Duration::from_millis(250))
            })
            .await
            .ok()
            .flatten();
            if let Some(text) = frame {
                if ws_sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    while let Some(message) = ws_receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match wire::from_json(text.as_str()) {
                Ok(event) => {
                    let _ = sender.send(Box::new(event));
                }
                Err(message) => {
                    warn!("websocket: dropped malformed frame: {}", message);
                }
            },
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }
    closed.store(true, Ordering::Relaxed);
    let _ = writer.await;
    let _ = sender.send(Box::new(Event::new_external("websocket.disconnect")));
}

impl EventIOProcessor for WebSocketEventIOProcessor {
    fn get_location(&self, id: SessionId) -> String {
        format!(
            "{}/{}/{}",
            self.location, id, WEBSOCKET_PROCESSOR_SHORT_TYPE
        )
    }

    fn get_types(&self) -> &[&str] {
        TYPES
    }

    /// Outbound 'websocket' typed send: enqueue the JSON envelope on the
    /// sending session's websocket queue, same as target '#_websocket'.
    fn send(&mut self, global: &GlobalDataAccess, target: &str, event: Event) -> bool {
        let envelope = wire::to_json(&event, Some(target));
        let queue = global.lock().websocket_queue.clone();
        queue.enqueue(envelope);
        true
    }

    fn shutdown(&mut self) {
        info!("websocket event I/O processor shutdown");
        self.terminate_flag.store(true, Ordering::Relaxed);
        let _ = TcpStream::connect(self.local_adr);
    }
}
