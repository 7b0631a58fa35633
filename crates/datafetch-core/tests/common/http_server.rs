//! Minimal HTTP/1.1 file server for integration tests.
//!
//! Serves a fixed path -> body map. Paths ending in `/` get an Apache-style
//! index page linking every file under that directory. A path registered with
//! [`Route::Stall`] sends its headers and a first chunk, then holds the
//! connection open without finishing the body.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Route {
    File(Vec<u8>),
    /// Content-Length of `total`, but only `sent` bytes are ever written.
    Stall { sent: Vec<u8>, total: usize },
    /// Listed in the index, but every request gets this status line.
    Status(&'static str),
}

/// Starts the server on an ephemeral port and returns its base URL
/// (e.g. "http://127.0.0.1:12345"). Runs until the process exits.
pub fn start(routes: HashMap<String, Route>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let routes = Arc::new(routes);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let routes = Arc::clone(&routes);
            thread::spawn(move || handle(stream, &routes));
        }
    });
    format!("http://127.0.0.1:{}", port)
}

/// Convenience: every entry is a complete file.
pub fn start_files(files: &[(&str, &[u8])]) -> String {
    start(
        files
            .iter()
            .map(|(path, body)| (path.to_string(), Route::File(body.to_vec())))
            .collect(),
    )
}

fn index_page(dir: &str, routes: &HashMap<String, Route>) -> Option<String> {
    let mut names: Vec<&str> = routes
        .keys()
        .filter_map(|p| p.strip_prefix(dir))
        .filter(|rest| !rest.is_empty() && !rest.contains('/'))
        .collect();
    if names.is_empty() {
        return None;
    }
    names.sort_unstable();
    let mut html = String::from("<html><body>\n<a href=\"?C=N;O=D\">Name</a>\n<a href=\"../\">Parent Directory</a>\n");
    for name in names {
        html.push_str(&format!("<a href=\"{0}\">{0}</a>\n", name));
    }
    html.push_str("</body></html>\n");
    Some(html)
}

fn handle(mut stream: TcpStream, routes: &HashMap<String, Route>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let request = String::from_utf8_lossy(&buf[..n]);
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();

    if path.ends_with('/') {
        match index_page(&path, routes) {
            Some(html) => respond(&mut stream, "200 OK", "text/html", html.as_bytes()),
            None => respond(&mut stream, "404 Not Found", "text/plain", b"not found"),
        }
        return;
    }
    match routes.get(&path) {
        Some(Route::File(body)) => {
            respond(&mut stream, "200 OK", "application/octet-stream", body)
        }
        Some(Route::Status(status)) => respond(&mut stream, status, "text/plain", b"unavailable"),
        Some(Route::Stall { sent, total }) => {
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                total
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(sent);
            let _ = stream.flush();
            // Hold the connection until the client gives up.
            let _ = stream.set_read_timeout(Some(Duration::from_secs(60)));
            let _ = stream.read(&mut buf);
        }
        None => respond(&mut stream, "404 Not Found", "text/plain", b"not found"),
    }
}

fn respond(stream: &mut TcpStream, status: &str, content_type: &str, body: &[u8]) {
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        content_type,
        body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(body);
    let _ = stream.flush();
}
