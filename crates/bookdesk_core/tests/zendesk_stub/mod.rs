use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

/// One canned reply. `{base}` in the body is replaced with the stub's base url.
#[derive(Debug, Clone)]
pub struct StubReply {
    pub status: u16,
    pub body: String,
    pub retry_after: Option<String>,
}

impl StubReply {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            body: body.to_string(),
            retry_after: None,
        }
    }

    pub fn empty(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
            retry_after: None,
        }
    }

    pub fn rate_limited(retry_after: &str) -> Self {
        Self {
            status: 429,
            body: String::new(),
            retry_after: Some(retry_after.to_owned()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub body: String,
    pub authorization: Option<String>,
}

type Script = HashMap<(String, String), VecDeque<StubReply>>;

pub struct ZendeskStub {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ZendeskStub {
    /// Replies are served in order per `(method, path-with-query)`; the last
    /// reply for a route repeats once the queue is down to one.
    pub fn spawn(routes: Vec<(&str, &str, Vec<StubReply>)>) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start zendesk stub server");
        let base_url = format!("http://{}", server.server_addr());

        let mut script: Script = HashMap::new();
        for (method, path, replies) in routes {
            script
                .entry((method.to_owned(), path.to_owned()))
                .or_default()
                .extend(replies);
        }

        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);
        let base = base_url.clone();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let method = request.method().to_string();
                let url = request.url().to_string();
                let authorization = request
                    .headers()
                    .iter()
                    .find(|header| header.field.equiv("Authorization"))
                    .map(|header| header.value.to_string());
                let mut body = String::new();
                let _ = request.as_reader().read_to_string(&mut body);
                recorded.lock().expect("requests lock").push(RecordedRequest {
                    method: method.clone(),
                    url: url.clone(),
                    body,
                    authorization,
                });

                let reply = match script.get_mut(&(method, url)) {
                    Some(queue) if queue.len() > 1 => queue.pop_front(),
                    Some(queue) => queue.front().cloned(),
                    None => None,
                };
                let Some(reply) = reply else {
                    let _ = request.respond(
                        tiny_http::Response::from_string("not found").with_status_code(404),
                    );
                    continue;
                };

                let mut response = tiny_http::Response::from_string(
                    reply.body.replace("{base}", &base),
                )
                .with_status_code(reply.status);
                if !reply.body.is_empty() {
                    let header = tiny_http::Header::from_bytes(
                        &b"Content-Type"[..],
                        &b"application/json"[..],
                    )
                    .expect("content-type header");
                    response = response.with_header(header);
                }
                if let Some(wait) = reply.retry_after.as_deref() {
                    let header =
                        tiny_http::Header::from_bytes(&b"Retry-After"[..], wait.as_bytes())
                            .expect("retry-after header");
                    response = response.with_header(header);
                }
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl Drop for ZendeskStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
