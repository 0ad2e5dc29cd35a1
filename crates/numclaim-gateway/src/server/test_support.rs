//! Throwaway HTTP servers for exercising the real client paths.

use axum::Router;
use reqwest::Url;
use tokio::net::TcpListener;

/// Serves `router` on an ephemeral loopback port and returns its base URL.
pub async fn spawn_http(router: Router) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    Url::parse(&format!("http://{addr}")).unwrap()
}

/// A loopback URL nothing is listening on.
pub async fn unused_local_url() -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    Url::parse(&format!("http://{addr}")).unwrap()
}
