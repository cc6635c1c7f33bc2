//! Unix-socket server for the image service.
//!
//! One task per connection. Calls on a connection are handled in order, and
//! a writer task owns the socket's write half so partial and terminal
//! replies go out in the order they were produced.

use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc::{self, UnboundedSender};
use wharf_core::error::{Result, WharfError};

use crate::coordinator::ReplyStream;
use crate::error::{error_reply, invalid_parameter, method_not_found};
use crate::image_service::ImageService;
use crate::protocol::{
    read_message, single_field, write_message, ProtocolError, Reply, Request, INTERFACE,
    METHOD_GET_INFO,
};
use crate::types::{
    BuildInfo, CommitParams, ExportImageParams, ImportImageParams, PullImageParams,
    PushImageParams, Runlabel,
};

/// Image service server configuration.
pub struct WharfServer {
    /// Path to the Unix domain socket.
    socket_path: PathBuf,
    service: Arc<ImageService>,
}

impl WharfServer {
    pub fn new(socket_path: PathBuf, service: Arc<ImageService>) -> Self {
        Self {
            socket_path,
            service,
        }
    }

    /// Bind the socket, replacing a stale socket file.
    pub fn bind(&self) -> Result<UnixListener> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(UnixListener::bind(&self.socket_path)?)
    }

    /// Serve calls until accepting a connection fails.
    pub async fn serve(&self) -> Result<()> {
        let listener = self.bind()?;
        tracing::info!(socket = %self.socket_path.display(), "Image service listening");
        serve_listener(listener, self.service.clone()).await
    }
}

/// Accept connections on an already bound listener.
pub async fn serve_listener(listener: UnixListener, service: Arc<ImageService>) -> Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let service = service.clone();
        let connection = uuid::Uuid::new_v4();
        tokio::spawn(async move {
            tracing::debug!(%connection, "Client connected");
            match handle_connection(stream, service).await {
                Ok(()) => tracing::debug!(%connection, "Client disconnected"),
                Err(e) => tracing::warn!(%connection, error = %e, "Connection failed"),
            }
        });
    }
}

async fn handle_connection(
    stream: UnixStream,
    service: Arc<ImageService>,
) -> std::result::Result<(), ProtocolError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let (tx, mut rx) = mpsc::unbounded_channel::<Reply>();
    let writer = tokio::spawn(async move {
        while let Some(reply) = rx.recv().await {
            if let Err(e) = write_message(&mut write_half, &reply).await {
                tracing::debug!(error = %e, "Failed to write reply");
                break;
            }
        }
    });

    let result = loop {
        let request: Request = match read_message(&mut reader).await {
            Ok(Some(request)) => request,
            Ok(None) => break Ok(()),
            Err(ProtocolError::Malformed(e)) => {
                send(&tx, invalid_parameter(&e.to_string()));
                continue;
            }
            Err(e) => break Err(e),
        };
        dispatch(&service, request, &tx).await;
    };

    drop(tx);
    if let Err(e) = writer.await {
        tracing::warn!(error = %e, "Reply writer task failed");
    }
    result
}

fn send(sink: &UnboundedSender<Reply>, reply: Reply) {
    if sink.send(reply).is_err() {
        tracing::debug!("Caller gone, dropping reply");
    }
}

/// Handle one call, sending its terminal reply unless the call is oneway.
pub async fn dispatch(service: &ImageService, request: Request, sink: &UnboundedSender<Reply>) {
    tracing::debug!(method = %request.method, more = request.more, "Handling call");
    let reply = match handle(service, &request, sink).await {
        Ok(reply) | Err(reply) => reply,
    };
    if let Some(error) = &reply.error {
        tracing::debug!(method = %request.method, error = %error, "Call failed");
    }
    if !request.oneway {
        send(sink, reply);
    }
}

#[derive(Deserialize)]
struct IdParams {
    id: String,
}

#[derive(Deserialize)]
struct NameParams {
    name: String,
}

#[derive(Deserialize)]
struct TagParams {
    name: String,
    tagged: String,
}

#[derive(Deserialize)]
struct RemoveParams {
    name: String,
    #[serde(default)]
    force: bool,
}

#[derive(Deserialize)]
struct SearchParams {
    query: String,
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Deserialize)]
struct BuildParams {
    build: BuildInfo,
}

#[derive(Deserialize)]
struct RunlabelParams {
    runlabel: Runlabel,
}

#[derive(Deserialize)]
struct PruneParams {
    #[serde(default)]
    all: bool,
}

fn decode<T: DeserializeOwned>(request: &Request) -> std::result::Result<T, Reply> {
    request
        .decode_parameters()
        .map_err(|e| invalid_parameter(&e.to_string()))
}

/// Terminal reply `{field: value}` or the error's reply.
fn terminal<T: Serialize>(field: &str, result: Result<T>) -> Reply {
    match result.and_then(|value| single_field(field, &value).map_err(WharfError::from)) {
        Ok(parameters) => Reply::ok(parameters),
        Err(e) => error_reply(&e),
    }
}

async fn handle(
    service: &ImageService,
    request: &Request,
    sink: &UnboundedSender<Reply>,
) -> std::result::Result<Reply, Reply> {
    let make_stream = |field: &'static str| {
        if request.oneway {
            ReplyStream::terminal_only(field)
        } else {
            ReplyStream::new(field, request.more, sink.clone())
        }
    };

    let Some(method) = request.method.strip_prefix(INTERFACE).and_then(|m| m.strip_prefix('.'))
    else {
        if request.method == METHOD_GET_INFO {
            return Ok(Reply::ok(service_info()));
        }
        return Ok(method_not_found(&request.method));
    };

    let reply = match method {
        "ListImages" => terminal("images", service.list_images().await),
        "GetImage" => {
            let p: IdParams = decode(request)?;
            terminal("image", service.get_image(&p.id).await)
        }
        "InspectImage" => {
            let p: NameParams = decode(request)?;
            terminal("image", service.inspect_image(&p.name).await)
        }
        "HistoryImage" => {
            let p: NameParams = decode(request)?;
            terminal("history", service.history_image(&p.name).await)
        }
        "BuildImage" => {
            let p: BuildParams = decode(request)?;
            let stream = make_stream("image");
            terminal(stream.field(), service.build_image(p.build, &stream).await)
        }
        "PushImage" => {
            let p: PushImageParams = decode(request)?;
            let stream = make_stream("reply");
            terminal(stream.field(), service.push_image(p, &stream).await)
        }
        "TagImage" => {
            let p: TagParams = decode(request)?;
            terminal("image", service.tag_image(&p.name, &p.tagged).await)
        }
        "RemoveImage" => {
            let p: RemoveParams = decode(request)?;
            terminal("image", service.remove_image(&p.name, p.force).await)
        }
        "SearchImages" => {
            let p: SearchParams = decode(request)?;
            terminal("results", service.search_images(&p.query, p.limit).await)
        }
        "DeleteUnusedImages" => terminal("images", service.delete_unused_images().await),
        "Commit" => {
            let p: CommitParams = decode(request)?;
            terminal("image", service.commit(p).await)
        }
        "ImportImage" => {
            let p: ImportImageParams = decode(request)?;
            terminal("image", service.import_image(p).await)
        }
        "ExportImage" => {
            let p: ExportImageParams = decode(request)?;
            terminal("image", service.export_image(p).await)
        }
        "PullImage" => {
            let p: PullImageParams = decode(request)?;
            terminal("id", service.pull_image(p).await)
        }
        "ImageExists" => {
            let p: NameParams = decode(request)?;
            terminal("exists", service.image_exists(&p.name).await)
        }
        "ContainerRunlabel" => {
            let p: RunlabelParams = decode(request)?;
            match service.container_runlabel(p.runlabel).await {
                Ok(()) => Reply::ok(json!({})),
                Err(e) => error_reply(&e),
            }
        }
        "ImagesPrune" => {
            let p: PruneParams = decode(request)?;
            terminal("pruned", service.images_prune(p.all).await)
        }
        _ => method_not_found(&request.method),
    };
    Ok(reply)
}

fn service_info() -> serde_json::Value {
    json!({
        "vendor": "Wharf",
        "product": "wharfd",
        "version": crate::VERSION,
        "url": "https://github.com/wharf-rs/wharf",
        "interfaces": ["org.varlink.service", INTERFACE],
    })
}
