//! The HTTP host surface and the 'basichttp' I/O processor.\
//! \
//! Inbound surface (hyper, http1):
//! - `POST /<session>/basichttp`: form fields become the data of an
//!   'http.post' event; a '_content' field is parsed as an XML envelope.
//! - `POST /<session>/scxml`: the body is an XML envelope.
//! - `GET /info`: plaintext table of the sessions.
//!
//! Unknown session or path: 403. Malformed envelope: 400. A response-mode
//! server blocks on the session's '#_response' rendezvous and replies with
//! the content body, the hints merged into the headers.

use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt::Debug;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

#[cfg(feature = "Debug")]
use crate::common::debug;
use crate::common::{error, info};
use crate::datamodel::{Data, GlobalDataAccess};
use crate::event_io_processor::{wire, EventIOProcessor};
use crate::fsm::{Event, ParamPair, SessionId};
use crate::fsm_executor::ExecutorStateArc;

pub const BASIC_HTTP_EVENT_PROCESSOR: &str =
    "http://www.w3.org/TR/scxml/#BasicHTTPEventProcessor";
pub const BASIC_HTTP_EVENT_PROCESSOR_SHORT_TYPE: &str = "basichttp";

/// Form field carrying the event name of an outbound basichttp send.
pub const SCXML_EVENT_NAME: &str = "_scxmleventname";
/// Form field carrying a serialized envelope.
pub const SCXML_EVENT_CONTENT: &str = "_content";

/// Timeout of the '#_response' rendezvous.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

const TYPES: &[&str] = &[
    BASIC_HTTP_EVENT_PROCESSOR_SHORT_TYPE,
    BASIC_HTTP_EVENT_PROCESSOR,
];

/// Whether a request is answered right away or from the '#_response'
/// rendezvous of the session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServerType {
    Default,
    Response,
}

#[derive(Debug, Clone)]
pub struct BasicHTTPEventIOProcessor {
    pub location: String,
    pub server_type: ServerType,
    pub terminate_flag: Arc<AtomicBool>,
    local_adr: SocketAddr,
    executor_state: ExecutorStateArc,
}

impl BasicHTTPEventIOProcessor {
    pub fn new(
        addr: SocketAddr,
        location_name: &str,
        server_type: ServerType,
        executor_state: ExecutorStateArc,
    ) -> BasicHTTPEventIOProcessor {
        let terminate_flag = Arc::new(AtomicBool::new(false));
        let server_flag = terminate_flag.clone();
        let server_state = executor_state.clone();
        thread::Builder::new()
            .name("http_server".to_string())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(2)
                    .enable_all()
                    .build()
                    .expect("failed to build http runtime");
                runtime.block_on(async move {
                    let listener = match TcpListener::bind(addr).await {
                        Ok(listener) => listener,
                        Err(err) => {
                            error!("HTTP server can't bind {}: {}", addr, err);
                            return;
                        }
                    };
                    info!("HTTP server at {}", addr);
                    loop {
                        let (stream, _peer) = match listener.accept().await {
                            Ok(accepted) => accepted,
                            Err(_) => continue,
                        };
                        if server_flag.load(Ordering::Relaxed) {
                            break;
                        }
                        let io = TokioIo::new(stream);
                        let state = server_state.clone();
                        tokio::task::spawn(async move {
                            let service = service_fn(move |request| {
                                handle_request(request, state.clone(), server_type)
                            });
                            if let Err(err) =
                                http1::Builder::new().serve_connection(io, service).await
                            {
                                #[cfg(feature = "Debug")]
                                debug!("error serving connection: {:?}", err);
                                let _ = err;
                            }
                        });
                    }
                    info!("HTTP server stopped");
                });
            })
            .expect("failed to spawn http server thread");
        BasicHTTPEventIOProcessor {
            location: format!("http://{}:{}", location_name, addr.port()),
            server_type,
            terminate_flag,
            local_adr: addr,
            executor_state,
        }
    }
}

fn plain_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-type", "text/plain")
        .body(Full::new(Bytes::from(body)))
        .expect("static response")
}

fn response_with_headers(
    body: String,
    headers: &HashMap<String, String>,
) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(StatusCode::OK);
    if !headers.contains_key("Content-type") {
        builder = builder.header("Content-type", "text/plain");
    }
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    match builder.body(Full::new(Bytes::from(body))) {
        Ok(response) => response,
        Err(err) => plain_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("malformed response headers: {}", err),
        ),
    }
}

async fn handle_request(
    request: Request<Incoming>,
    state: ExecutorStateArc,
    server_type: ServerType,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = request.into_parts();
    let path: Vec<String> = parts
        .uri
        .path()
        .split('/')
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect();

    if parts.method == Method::GET && path.len() == 1 && path[0] == "info" {
        let text = tokio::task::spawn_blocking(move || info_text(&state))
            .await
            .unwrap_or_default();
        return Ok(plain_response(StatusCode::OK, text));
    }

    if path.len() != 2 {
        return Ok(plain_response(StatusCode::FORBIDDEN, String::new()));
    }
    let session_id: SessionId = match path[0].parse() {
        Ok(session_id) => session_id,
        Err(_) => return Ok(plain_response(StatusCode::FORBIDDEN, String::new())),
    };
    let kind = path[1].clone();
    if kind != BASIC_HTTP_EVENT_PROCESSOR_SHORT_TYPE && kind != "scxml" {
        return Ok(plain_response(StatusCode::FORBIDDEN, String::new()));
    }
    if parts.method != Method::POST {
        return Ok(plain_response(StatusCode::BAD_REQUEST, String::new()));
    }
    let body_bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => return Ok(plain_response(StatusCode::BAD_REQUEST, String::new())),
    };
    let form: HashMap<String, String> = form_urlencoded::parse(body_bytes.as_ref())
        .into_owned()
        .collect();
    let raw_body = String::from_utf8_lossy(body_bytes.as_ref()).to_string();

    let result = tokio::task::spawn_blocking(move || {
        deliver(&state, session_id, &kind, form, raw_body, server_type)
    })
    .await;
    let response = match result {
        Err(_) => plain_response(StatusCode::INTERNAL_SERVER_ERROR, String::new()),
        Ok(Err(status)) => plain_response(status, String::new()),
        Ok(Ok((body, headers))) => response_with_headers(body, &headers),
    };
    Ok(response)
}

/// Looks up the session, builds the event and enqueues it. Response-mode
/// servers then block on the session's response rendezvous.
fn deliver(
    state: &ExecutorStateArc,
    session_id: SessionId,
    kind: &str,
    form: HashMap<String, String>,
    raw_body: String,
    server_type: ServerType,
) -> Result<(String, HashMap<String, String>), StatusCode> {
    let (sender, global): (std::sync::mpsc::Sender<Box<Event>>, GlobalDataAccess) = {
        let guard = state.lock().expect("executor state lock poisoned");
        match guard.sessions.get(&session_id) {
            None => return Err(StatusCode::FORBIDDEN),
            Some(session) => (session.sender.clone(), session.global_data.clone()),
        }
    };

    let event = if kind == "scxml" {
        let envelope = form
            .get(SCXML_EVENT_CONTENT)
            .cloned()
            .unwrap_or(raw_body);
        match wire::from_xml(&envelope) {
            Ok(event) => event,
            Err(message) => {
                error!("malformed envelope on /{}/scxml: {}", session_id, message);
                return Err(StatusCode::BAD_REQUEST);
            }
        }
    } else if let Some(envelope) = form.get(SCXML_EVENT_CONTENT) {
        match wire::from_xml(envelope) {
            Ok(event) => event,
            Err(message) => {
                error!(
                    "malformed envelope on /{}/basichttp: {}",
                    session_id, message
                );
                return Err(StatusCode::BAD_REQUEST);
            }
        }
    } else {
        let mut event = Event::new_external("http.post");
        if !form.is_empty() {
            event.param_values = Some(
                form.into_iter()
                    .map(|(name, value)| ParamPair::new_moved(name, Data::String(value)))
                    .collect(),
            );
        }
        event
    };

    if sender.send(Box::new(event)).is_err() {
        return Err(StatusCode::FORBIDDEN);
    }
    match server_type {
        ServerType::Default => Ok((String::new(), HashMap::new())),
        ServerType::Response => {
            let response_queue = global.lock().response_queue.clone();
            match response_queue.dequeue_timeout(RESPONSE_TIMEOUT) {
                None => Err(StatusCode::INTERNAL_SERVER_ERROR),
                Some(entry) => Ok((entry.content.to_string(), entry.hints)),
            }
        }
    }
}

/// Plaintext session table for 'GET /info'.
fn info_text(state: &ExecutorStateArc) -> String {
    let guard = state.lock().expect("executor state lock poisoned");
    let mut sessions: Vec<_> = guard.sessions.values().collect();
    sessions.sort_by_key(|session| session.session_id);
    let mut text = String::new();
    for session in sessions {
        let global = session.global_data.lock();
        let configuration = match &global.final_configuration {
            Some(configuration) => configuration.join(","),
            None => global.configuration_names.join(","),
        };
        text.push_str(&format!(
            "session {}: configuration=[{}] finished={}\n",
            session.session_id, configuration, global.finished
        ));
    }
    text
}

impl EventIOProcessor for BasicHTTPEventIOProcessor {
    fn get_location(&self, id: SessionId) -> String {
        format!(
            "{}/{}/{}",
            self.location, id, BASIC_HTTP_EVENT_PROCESSOR_SHORT_TYPE
        )
    }

    fn get_types(&self) -> &[&str] {
        TYPES
    }

    /// Outbound 'basichttp' send: POST of the event as form fields to the
    /// target URL.
    /// *W3C says*: if no target is specified, 'error.communication' goes to
    /// the internal event queue of the sending session.
    fn send(&mut self, global: &GlobalDataAccess, target: &str, event: Event) -> bool {
        if target.is_empty() || !(target.starts_with("http://") || target.starts_with("https://")) {
            global
                .lock()
                .enqueue_internal(Event::error_communication(&format!(
                    "basichttp: invalid target '{}'",
                    target
                )));
            return false;
        }
        let mut form: Vec<(String, String)> = vec![(SCXML_EVENT_NAME.to_string(), event.name.clone())];
        if let Some(params) = &event.param_values {
            for pair in params {
                form.push((pair.name.clone(), pair.value.to_string()));
            }
        }
        let form_refs: Vec<(&str, &str)> = form
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        match ureq::post(target).send_form(&form_refs) {
            Ok(_) => true,
            Err(err) => {
                error!("basichttp POST to '{}' failed: {}", target, err);
                global
                    .lock()
                    .enqueue_internal(Event::error_communication(&format!(
                        "POST to '{}' failed: {}",
                        target, err
                    )));
                false
            }
        }
    }

    fn shutdown(&mut self) {
        info!("HTTP event I/O processor shutdown");
        self.terminate_flag.store(true, Ordering::Relaxed);
        // Unblock the accept loop.
        let _ = TcpStream::connect(self.local_adr);
    }
}
