//! Local HTTP callback server for OAuth authentication.
//!
//! Provides a temporary localhost server to receive the OAuth redirect,
//! display a short result page in the browser, and hand the callback URL back.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
use url::Url;

/// Default port used for the OAuth callback server.
pub const DEFAULT_CALLBACK_PORT: u16 = 28491;

/// Result from the callback server.
#[derive(Debug)]
pub enum CallbackResult {
    /// Successfully received callback with the full URL.
    Success(String),
    /// No callback arrived before the deadline.
    TimedOut,
    /// Error occurred.
    Error(String),
}

/// Extract the loopback port from a redirect URI.
pub fn callback_port(redirect_uri: &str) -> u16 {
    Url::parse(redirect_uri)
        .ok()
        .and_then(|u| u.port())
        .unwrap_or(DEFAULT_CALLBACK_PORT)
}

/// Bind the loopback listener. Done before the browser is opened so the redirect cannot race it.
pub fn bind(port: u16) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(("127.0.0.1", port))?;
    listener.set_nonblocking(true)?;
    info!("OAuth callback server listening on 127.0.0.1:{}", port);
    Ok(listener)
}

/// Wait for a single OAuth callback on an already bound listener.
///
/// Returns the full callback URL (including query parameters) when received.
pub fn wait_for_callback(listener: TcpListener, timeout: Duration) -> CallbackResult {
    let port = listener
        .local_addr()
        .map(|a| a.port())
        .unwrap_or(DEFAULT_CALLBACK_PORT);
    let deadline = Instant::now() + timeout;

    loop {
        if Instant::now() >= deadline {
            info!("Callback server timed out");
            return CallbackResult::TimedOut;
        }

        match listener.accept() {
            Ok((stream, peer_addr)) => {
                debug!("Connection from {}", peer_addr);
                if let Some(path) = handle_connection(stream) {
                    info!("OAuth callback received");
                    return CallbackResult::Success(format!("http://localhost:{}{}", port, path));
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
                return CallbackResult::Error(format!("Connection error: {}", e));
            }
        }
    }
}

/// Handle an incoming HTTP connection.
///
/// Returns the request path if this was a valid OAuth callback, None otherwise.
fn handle_connection(mut stream: TcpStream) -> Option<String> {
    let _ = stream.set_nonblocking(false);
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));

    let mut buffer = [0; 4096];
    let bytes_read = match stream.read(&mut buffer) {
        Ok(n) => n,
        Err(e) => {
            debug!("Failed to read request: {}", e);
            return None;
        }
    };

    let request = String::from_utf8_lossy(&buffer[..bytes_read]);
    let request_line = request.lines().next()?;
    let parts: Vec<&str> = request_line.split_whitespace().collect();

    if parts.len() < 2 {
        send_response(&mut stream, 400, "Bad Request", "text/plain", "Bad Request");
        return None;
    }

    let (method, path) = (parts[0], parts[1]);

    if method != "GET" {
        send_response(&mut stream, 405, "Method Not Allowed", "text/plain", "Method Not Allowed");
        return None;
    }

    if !path.starts_with("/callback") {
        send_response(&mut stream, 404, "Not Found", "text/plain", "Not Found");
        return None;
    }

    if path.contains("error=") {
        send_response(&mut stream, 200, "OK", "text/html; charset=utf-8", &result_page(false));
        // Still return the path so the caller can surface the error
        return Some(path.to_string());
    }

    if !path.contains("code=") {
        send_response(&mut stream, 400, "Bad Request", "text/plain", "Missing authorization code");
        return None;
    }

    send_response(&mut stream, 200, "OK", "text/html; charset=utf-8", &result_page(true));
    Some(path.to_string())
}

fn result_page(success: bool) -> String {
    let (title, message) = if success {
        ("Signed in", "You are signed in to the Azure Admin Console.")
    } else {
        ("Sign-in failed", "Authentication was cancelled or failed.")
    };
    format!(
        "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"UTF-8\"><title>{title}</title></head>\
         <body style=\"font-family:sans-serif;text-align:center;margin-top:4rem\">\
         <h1>{title}</h1><p>{message}</p><p>You can close this tab and return to the console.</p>\
         </body></html>"
    )
}

fn send_response(stream: &mut TcpStream, status: u16, reason: &str, content_type: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        content_type,
        body.len(),
        body
    );

    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}
