//! HTTP surface, served with warp:
//!
//! - `GET /` redirects (301) to the configured page;
//! - `GET /data.json` legacy flat array;
//! - `GET /data/aircraft.json`, `GET /chunks/chunks.json` envelope;
//! - `GET /data/receiver.json` receiver descriptor;
//! - `GET /data/stats.json` service counters;
//! - `GET /favicon.png`, `GET /favicon.ico` embedded icon;
//! - `GET /echo` WebSocket upgrade, echoing the first text frame;
//! - anything else is looked up in the static web root.
//!
//! Every JSON reply carries `Access-Control-Allow-Origin: *`.

use crate::feed::Stats;
use crate::json;
use crate::registry::Registry;
use futures_util::{SinkExt, StreamExt};
use rx1090::decode::cpr::Position;
use rx1090::decode::time::now;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use warp::http::Uri;
use warp::ws::{Message, WebSocket};
use warp::Filter;

/// Refresh interval suggested to JSON pollers, in milliseconds
pub const REFRESH_MS: u64 = 1000;

/// 1x1 transparent PNG, served for both favicon flavours
pub const FAVICON: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d,
    0x49, 0x48, 0x44, 0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01,
    0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4, 0x89, 0x00, 0x00, 0x00,
    0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x60, 0x00, 0x00, 0x00,
    0x02, 0x00, 0x01, 0xff, 0xff, 0x03, 0x00, 0x00, 0x06, 0x00, 0x05, 0x57,
    0xbf, 0xab, 0xd4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae,
    0x42, 0x60, 0x82,
];

/// State shared by the HTTP handlers
pub struct WebState {
    pub registry: Arc<Mutex<Registry>>,
    pub stats: Arc<Stats>,
    pub home: Option<Position>,
    pub metric: bool,
}

async fn aircraft(
    state: Arc<WebState>,
) -> Result<warp::reply::Json, Infallible> {
    let (snapshot, messages) = {
        let registry = state.registry.lock().await;
        (registry.snapshot(), registry.messages())
    };
    Ok(warp::reply::json(&json::aircraft_json(
        &snapshot,
        now(),
        messages,
        state.metric,
    )))
}

async fn legacy(
    state: Arc<WebState>,
) -> Result<warp::reply::Json, Infallible> {
    let snapshot = state.registry.lock().await.snapshot();
    Ok(warp::reply::json(&json::legacy_json(&snapshot, now())))
}

async fn stats(
    state: Arc<WebState>,
) -> Result<warp::reply::Json, Infallible> {
    let count = state.registry.lock().await.len();
    Ok(warp::reply::json(&json::stats_json(&state.stats, count)))
}

/// Echo the first text frame, then close
async fn echo(websocket: WebSocket) {
    let (mut tx, mut rx) = websocket.split();
    while let Some(Ok(message)) = rx.next().await {
        if message.is_text() {
            let _ = tx.send(message).await;
            break;
        }
    }
    let _ = tx.send(Message::close()).await;
}

/// Assemble the route tree
pub fn routes(
    state: Arc<WebState>,
    web_page: String,
    web_root: PathBuf,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone
{
    let with_state = {
        let state = state.clone();
        warp::any().map(move || state.clone())
    };

    let redirect_uri: Uri = format!("/{web_page}")
        .parse()
        .expect("invalid web page");
    let root = warp::path::end()
        .map(move || warp::redirect(redirect_uri.clone()));

    let legacy_data = warp::path!("data.json")
        .and(with_state.clone())
        .and_then(legacy);

    let aircraft_data = warp::path!("data" / "aircraft.json")
        .and(with_state.clone())
        .and_then(aircraft);

    let chunks = warp::path!("chunks" / "chunks.json")
        .and(with_state.clone())
        .and_then(aircraft);

    let receiver = {
        let home = state.home;
        warp::path!("data" / "receiver.json").map(move || {
            warp::reply::json(&json::receiver_json(home, REFRESH_MS))
        })
    };

    let stats_data = warp::path!("data" / "stats.json")
        .and(with_state.clone())
        .and_then(stats);

    let favicon = warp::path!("favicon.png")
        .or(warp::path!("favicon.ico"))
        .map(|_| {
            warp::reply::with_header(FAVICON, "content-type", "image/png")
        });

    let websocket = warp::path!("echo")
        .and(warp::ws())
        .map(|ws: warp::ws::Ws| ws.on_upgrade(echo));

    let cors = warp::cors().allow_any_origin();

    root.or(websocket)
        .or(warp::get().and(
            legacy_data
                .or(aircraft_data)
                .or(chunks)
                .or(receiver)
                .or(stats_data)
                .or(favicon),
        ))
        .or(warp::fs::dir(web_root))
        .with(cors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> Arc<WebState> {
        Arc::new(WebState {
            registry: Arc::new(Mutex::new(Registry::new(None, 0., false))),
            stats: Arc::new(Stats::default()),
            home: Some(Position {
                latitude: 43.6,
                longitude: 1.43,
            }),
            metric: false,
        })
    }

    #[tokio::test]
    async fn root_redirects_to_the_web_page() {
        let routes =
            routes(state(), "gmap.html".to_string(), PathBuf::from("."));
        let reply = warp::test::request().path("/").reply(&routes).await;
        assert_eq!(reply.status(), 301);
        assert_eq!(reply.headers()["location"], "/gmap.html");
        assert!(reply.body().is_empty());
    }

    #[tokio::test]
    async fn receiver_descriptor_is_served() {
        let routes =
            routes(state(), "gmap.html".to_string(), PathBuf::from("."));
        let reply = warp::test::request()
            .path("/data/receiver.json")
            .reply(&routes)
            .await;
        assert_eq!(reply.status(), 200);
        let value: serde_json::Value =
            serde_json::from_slice(reply.body()).unwrap();
        assert_eq!(value["lat"], 43.6);
    }

    #[tokio::test]
    async fn aircraft_envelope_is_served_with_cors() {
        let routes =
            routes(state(), "gmap.html".to_string(), PathBuf::from("."));
        let reply = warp::test::request()
            .path("/data/aircraft.json")
            .header("origin", "http://localhost:1234")
            .reply(&routes)
            .await;
        assert_eq!(reply.status(), 200);
        assert_eq!(
            reply.headers()["access-control-allow-origin"],
            "*"
        );
        let value: serde_json::Value =
            serde_json::from_slice(reply.body()).unwrap();
        assert_eq!(value["messages"], 0);
        assert!(value["aircraft"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let routes =
            routes(state(), "gmap.html".to_string(), PathBuf::from("."));
        let reply = warp::test::request()
            .path("/no/such/file.json")
            .reply(&routes)
            .await;
        assert_eq!(reply.status(), 404);
    }

    #[tokio::test]
    async fn websocket_echoes_the_first_text_frame() {
        let routes =
            routes(state(), "gmap.html".to_string(), PathBuf::from("."));
        let mut client = warp::test::ws()
            .path("/echo")
            .handshake(routes)
            .await
            .expect("handshake");
        client.send_text("ping").await;
        let reply = client.recv().await.expect("echo reply");
        assert_eq!(reply.to_str(), Ok("ping"));
    }
}
