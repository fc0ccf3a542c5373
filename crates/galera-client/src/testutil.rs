//! Loopback axum server for exercising the reqwest-backed collaborators.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use tokio::net::TcpListener;

/// One canned reply: status, content type, body.
pub(crate) type Reply = (u16, &'static str, String);

/// A request as the server saw it.
#[derive(Debug, Clone)]
pub(crate) struct Received {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: String,
}

impl Received {
    /// `METHOD target`, as on the request line. Proxied requests keep their absolute form.
    pub fn line(&self) -> String {
        format!("{} {}", self.method, self.uri)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// Requests received so far, in arrival order.
#[derive(Clone, Default)]
pub(crate) struct Requests(Arc<Mutex<Vec<Received>>>);

impl Requests {
    pub fn all(&self) -> Vec<Received> {
        self.0.lock().unwrap().clone()
    }

    pub fn first(&self) -> Received {
        self.all().into_iter().next().expect("no request received")
    }
}

#[derive(Clone)]
struct Canned {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    received: Requests,
}

async fn answer(
    State(canned): State<Canned>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    canned.received.0.lock().unwrap().push(Received {
        method,
        uri,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    });
    let next = canned.replies.lock().unwrap().pop_front();
    match next {
        Some((status, content_type, body)) => (
            StatusCode::from_u16(status).unwrap(),
            [(header::CONTENT_TYPE, content_type)],
            body,
        )
            .into_response(),
        None => (StatusCode::INTERNAL_SERVER_ERROR, "no canned reply left").into_response(),
    }
}

/// Answers every request, whatever its path, with the next of `replies`.
///
/// Returns the base URL (`http://127.0.0.1:<port>`) and the requests log.
pub(crate) async fn serve(replies: Vec<Reply>) -> (String, Requests) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let received = Requests::default();
    let canned = Canned {
        replies: Arc::new(Mutex::new(replies.into())),
        received: received.clone(),
    };
    let router = Router::new().fallback(answer).with_state(canned);
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

    (base, received)
}

/// Single-reply shorthand returning a full URL.
pub(crate) async fn serve_once(status: u16, content_type: &'static str, body: &str) -> (String, Requests) {
    let (base, requests) = serve(vec![(status, content_type, body.to_string())]).await;
    (format!("{base}/"), requests)
}
