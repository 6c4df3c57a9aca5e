use anyhow::{Context, Result};
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
    routing::get,
    Router,
};
use std::{net::SocketAddr, path::PathBuf};
use tokio::sync::broadcast;
use tower_http::services::ServeDir;

/// Route the injected script connects to.
pub const LIVERELOAD_PATH: &str = "/__livereload";

const RELOAD_MESSAGE: &str = "reload";

/// Configuration for the live development server
#[derive(Debug, Clone)]
pub struct LiveServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to serve on
    pub port: u16,
    /// Directory to serve
    pub root: PathBuf,
    /// Auto-open browser
    pub open: bool,
}

impl Default for LiveServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            root: PathBuf::from("./dist"),
            open: false,
        }
    }
}

impl LiveServerConfig {
    pub fn address(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

/// Tells connected browsers to reload. Cheap to clone; hand one to whatever
/// rebuilds the site.
#[derive(Debug, Clone)]
pub struct Reloader {
    tx: broadcast::Sender<String>,
}

impl Reloader {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    /// Ask every connected page to reload. Returns how many were notified.
    pub fn reload(&self) -> usize {
        let notified = self.tx.send(RELOAD_MESSAGE.to_string()).unwrap_or(0);
        tracing::debug!(clients = notified, "sent reload signal");
        notified
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

/// A static file server for the output directory with live reload.
pub struct LiveServer {
    config: LiveServerConfig,
    reloader: Reloader,
}

impl LiveServer {
    pub fn new(config: LiveServerConfig) -> Self {
        Self {
            config,
            reloader: Reloader::new(),
        }
    }

    pub fn reloader(&self) -> Reloader {
        self.reloader.clone()
    }

    /// Serve until the process is stopped.
    pub async fn run(self) -> Result<()> {
        if !self.config.root.is_dir() {
            anyhow::bail!("output directory does not exist: {}", self.config.root.display());
        }

        let app = router(&self.config, self.reloader.clone());
        let addr = self.config.address()?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;

        tracing::info!("Serving {} at http://{}", self.config.root.display(), addr);
        tracing::debug!("Live reload listening at ws://{}{}", addr, LIVERELOAD_PATH);

        if self.config.open {
            if let Err(e) = open::that(format!("http://{addr}")) {
                tracing::warn!("Failed to open browser: {e}");
            }
        }

        axum::serve(listener, app).await?;

        Ok(())
    }
}

fn router(config: &LiveServerConfig, reloader: Reloader) -> Router {
    Router::new()
        .route(LIVERELOAD_PATH, get(websocket_handler))
        .fallback_service(ServeDir::new(&config.root))
        .with_state(reloader)
}

async fn websocket_handler(ws: WebSocketUpgrade, State(reloader): State<Reloader>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| websocket_connection(socket, reloader.subscribe()))
}

async fn websocket_connection(mut socket: WebSocket, mut rx: broadcast::Receiver<String>) {
    tracing::trace!("live reload client connected");
    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Ok(msg) = msg else { break };
                if socket.send(Message::Text(msg.into())).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                if !matches!(msg, Some(Ok(_))) {
                    break;
                }
            }
        }
    }
    tracing::trace!("live reload client disconnected");
}

/// Inject the live reload script before `</body>`, or at the end of
/// documents without one.
pub fn inject_livereload_script(html: &str) -> String {
    let script = format!(
        r#"
<script>
(function() {{
    const socket = new WebSocket('ws://' + location.host + '{LIVERELOAD_PATH}');
    socket.onmessage = function(event) {{
        if (event.data === '{RELOAD_MESSAGE}') {{
            location.reload();
        }}
    }};
    socket.onclose = function() {{
        console.log('Live reload disconnected');
    }};
}})();
</script>
"#
    );

    match html.rfind("</body>") {
        Some(pos) => {
            let mut result = String::with_capacity(html.len() + script.len());
            result.push_str(&html[..pos]);
            result.push_str(&script);
            result.push_str(&html[pos..]);
            result
        }
        None => format!("{html}{script}"),
    }
}
