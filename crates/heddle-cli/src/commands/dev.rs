//! `heddle dev` command implementation.
//!
//! Development server with live-update notifications over a WebSocket. The bundling
//! engine (`heddle_core`) is entirely synchronous; this command is the async edge that
//! bridges its blocking watcher and subscriber-based [`UpdateNotifier`] onto an axum
//! server and a `tokio::sync::broadcast` channel for connected clients.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use heddle_core::bundler::notifier::UpdateMessage;
use heddle_core::bundler::{BundleOptions, Bundler};
use miette::{IntoDiagnostic, Result};
use tokio::sync::{broadcast, Mutex};
use tower_http::cors::CorsLayer;

/// Dev server action.
#[derive(Debug, Clone)]
pub struct DevAction {
    pub entry: PathBuf,
    pub cwd: PathBuf,
    pub out_dir: PathBuf,
    pub port: u16,
    pub host: String,
    pub open: bool,
}

struct DevState {
    bundler: Mutex<Bundler>,
    current_bundle: tokio::sync::RwLock<PathBuf>,
    update_tx: broadcast::Sender<String>,
}

/// Run the dev server.
pub async fn run(action: DevAction) -> Result<()> {
    let options = BundleOptions::new(&action.entry)
        .with_cwd(&action.cwd)
        .with_out_dir(&action.out_dir);
    let mut bundler = Bundler::new(options);

    println!("  Building {}...", action.entry.display());
    let initial = bundler.bundle().into_diagnostic()?;
    let entry_bundle = initial
        .bundles
        .first()
        .map(|b| b.path.clone())
        .unwrap_or_else(|| action.out_dir.join("index.js"));

    let (update_tx, _) = broadcast::channel::<String>(16);
    bundler.notifier.subscribe({
        let update_tx = update_tx.clone();
        move |msg: &UpdateMessage| {
            if let Ok(json) = serde_json::to_string(msg) {
                let _ = update_tx.send(json);
            }
        }
    });

    let state = Arc::new(DevState {
        bundler: Mutex::new(bundler),
        current_bundle: tokio::sync::RwLock::new(entry_bundle),
        update_tx,
    });

    let watcher = heddle_core::bundler::watch::Watcher::new(&action.cwd).into_diagnostic()?;
    let (bridge_tx, mut bridge_rx) = tokio::sync::mpsc::channel::<Vec<PathBuf>>(16);
    std::thread::spawn(move || {
        for changed in watcher.changes {
            if bridge_tx.blocking_send(changed).is_err() {
                break;
            }
        }
    });

    let rebuild_state = Arc::clone(&state);
    tokio::spawn(async move {
        while let Some(changed) = bridge_rx.recv().await {
            println!("  File changed: {}", changed[0].display());
            let mut bundler = rebuild_state.bundler.lock().await;
            match bundler.rebuild(&changed) {
                Ok(result) => {
                    if let Some(bundle) = result.bundles.first() {
                        *rebuild_state.current_bundle.write().await = bundle.path.clone();
                    }
                    println!("  Rebuilt ({} assets)", result.asset_count);
                }
                Err(e) => eprintln!("  Build error: {e}"),
            }
        }
    });

    let app = Router::new()
        .route("/", get(serve_index))
        .route("/bundle.js", get(serve_bundle))
        .route("/__update", get(update_websocket))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let host_ip = if action.host == "localhost" {
        "127.0.0.1".to_string()
    } else {
        action.host.clone()
    };
    let addr: SocketAddr = format!("{host_ip}:{}", action.port).parse().into_diagnostic()?;

    println!();
    println!("  Dev server running at http://localhost:{}", action.port);
    println!("  Press Ctrl+C to stop");
    println!();

    if action.open {
        let _ = open_browser(&format!("http://{}:{}", action.host, action.port));
    }

    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    axum::serve(listener, app).await.into_diagnostic()?;
    Ok(())
}

async fn serve_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn serve_bundle(State(state): State<Arc<DevState>>) -> impl IntoResponse {
    let path = state.current_bundle.read().await.clone();
    match tokio::fs::read_to_string(&path).await {
        Ok(code) => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "application/javascript")
            .header("Cache-Control", "no-cache")
            .body(inject_update_runtime(&code))
            .unwrap()
            .into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn update_websocket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<DevState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_update_socket(socket, state))
}

async fn handle_update_socket(mut socket: WebSocket, state: Arc<DevState>) {
    let mut rx = state.update_tx.subscribe();
    let _ = socket
        .send(Message::Text(r#"{"type":"connected"}"#.to_string()))
        .await;
    while let Ok(json) = rx.recv().await {
        if socket.send(Message::Text(json)).await.is_err() {
            break;
        }
    }
}

fn inject_update_runtime(code: &str) -> String {
    format!("{UPDATE_RUNTIME}\n\n{code}")
}

fn open_browser(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg(url).spawn()?;
    }
    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open").arg(url).spawn()?;
    }
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/C", "start", url])
            .spawn()?;
    }
    Ok(())
}

const UPDATE_RUNTIME: &str = r#"
(function() {
  const ws = new WebSocket('ws://' + location.host + '/__update');
  let connected = false;
  ws.onopen = () => { connected = true; };
  ws.onmessage = (event) => {
    const msg = JSON.parse(event.data);
    if (msg.type === 'update' || msg.type === 'reload') {
      location.reload();
    } else if (msg.type === 'error') {
      console.error('[heddle] build error:', msg.message);
    }
  };
  ws.onclose = () => {
    if (connected) setTimeout(() => location.reload(), 1000);
  };
})();
"#;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>heddle dev</title>
</head>
<body>
  <div id="root"></div>
  <script type="module" src="/bundle.js"></script>
</body>
</html>
"#;
