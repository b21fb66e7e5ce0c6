//! Scripted planner: a raw TCP listener answering each connection with the
//! next reply in its script and recording what it was sent.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone)]
pub enum Reply {
    /// Status line (e.g. `200 OK`) and body.
    Respond(&'static str, String),
    /// Hold the connection open without answering.
    Stall(Duration),
}

impl Reply {
    pub fn ok(body: &str) -> Self {
        Reply::Respond("200 OK", body.to_string())
    }

    pub fn status(status_line: &'static str, body: &str) -> Self {
        Reply::Respond(status_line, body.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct Recorded {
    /// e.g. `POST /plan`
    pub request_line: String,
    /// Raw header block, lowercased.
    pub headers: String,
    pub body: Vec<u8>,
    /// When the full request had been read.
    pub received_at: Instant,
}

pub struct ScriptedPlanner {
    pub base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl ScriptedPlanner {
    pub async fn start(script: Vec<Reply>) -> Self {
        let listener = match TcpListener::bind("127.0.0.1:0").await {
            Ok(listener) => listener,
            Err(err) => panic!("listener should bind: {err}"),
        };
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(err) => panic!("listener should expose local addr: {err}"),
        };

        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&requests);
        let mut script: VecDeque<Reply> = script.into();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let reply = script
                    .pop_front()
                    .unwrap_or_else(|| Reply::status("500 Internal Server Error", "script exhausted"));
                let recorder = Arc::clone(&recorder);
                tokio::spawn(async move {
                    serve(socket, reply, recorder).await;
                });
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            requests,
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_lines(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|r| r.request_line)
            .collect()
    }
}

/// Base URL of a port nothing listens on.
pub async fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

async fn serve(mut socket: TcpStream, reply: Reply, recorder: Arc<Mutex<Vec<Recorded>>>) {
    if let Some(recorded) = read_request(&mut socket).await {
        recorder.lock().unwrap().push(recorded);
    }

    match reply {
        Reply::Respond(status_line, body) => {
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
        Reply::Stall(duration) => {
            tokio::time::sleep(duration).await;
        }
    }
}

async fn read_request(socket: &mut TcpStream) -> Option<Recorded> {
    let mut buf = Vec::new();
    let mut chunk = [0_u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or_default();
    let request_line = request_line
        .rsplit_once(' ')
        .map(|(line, _version)| line.to_string())
        .unwrap_or_else(|| request_line.to_string());
    let headers = lines.collect::<Vec<_>>().join("\n").to_lowercase();

    let content_length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let end = buf.len().min(header_end + content_length);

    Some(Recorded {
        request_line,
        headers,
        body: buf[header_end..end].to_vec(),
        received_at: Instant::now(),
    })
}
