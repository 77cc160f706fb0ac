//! Executing `HttpRequest` values.
//!
//! # Design
//! `Transport` is the only place the client touches the network. The default
//! `UreqTransport` owns one `ureq::Agent`, whose connection pool is shared by
//! every thread that uses the client and is released when the transport is
//! dropped. Status codes come back as data, redirects are not followed, and
//! failures without a response are classified as connect or read errors for
//! retry accounting.

use std::io;

use crate::config::HttpClientConfig;
use crate::error::TransportError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// Performs one HTTP round-trip.
pub trait Transport: Send + Sync {
    /// Every HTTP status, including 4xx and 5xx, is `Ok`.
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Blocking transport backed by a pooled `ureq::Agent`.
///
/// Timeouts are set per phase rather than as one overall deadline, so a
/// stalled connect is reported as a connect timeout and never eats into the
/// read budget.
#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(config: &HttpClientConfig) -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .max_redirects(0)
            .max_idle_connections(config.pool_max_size)
            .max_idle_connections_per_host(config.pool_connections)
            .timeout_resolve(Some(config.timeout))
            .timeout_connect(Some(config.timeout))
            .timeout_recv_response(Some(config.timeout))
            .timeout_recv_body(Some(config.timeout))
            .build()
            .new_agent();
        Self { agent }
    }
}

impl Transport for UreqTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = request.url.as_str();
        let result = match (request.method, request.body.as_deref()) {
            (HttpMethod::Get, None) => prepare(self.agent.get(url), request).call(),
            (HttpMethod::Get, Some(body)) => prepare(self.agent.get(url), request)
                .force_send_body()
                .send(body),
            (HttpMethod::Delete, None) => prepare(self.agent.delete(url), request).call(),
            (HttpMethod::Delete, Some(body)) => prepare(self.agent.delete(url), request)
                .force_send_body()
                .send(body),
            (HttpMethod::Post, None) => prepare(self.agent.post(url), request).send_empty(),
            (HttpMethod::Post, Some(body)) => prepare(self.agent.post(url), request).send(body),
            (HttpMethod::Patch, None) => prepare(self.agent.patch(url), request).send_empty(),
            (HttpMethod::Patch, Some(body)) => prepare(self.agent.patch(url), request).send(body),
        };

        let mut response = result.map_err(classify)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        // No size cap: once a status arrived the call has happened, and a
        // large item listing must not turn into a send failure.
        let bytes = response
            .body_mut()
            .with_config()
            .limit(u64::MAX)
            .read_to_vec()
            .map_err(classify)?;
        let body = String::from_utf8_lossy(&bytes).into_owned();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn prepare<B>(mut builder: ureq::RequestBuilder<B>, request: &HttpRequest) -> ureq::RequestBuilder<B> {
    for (key, value) in &request.query {
        builder = builder.query(key, value);
    }
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

/// Map a ureq failure onto the connect/read taxonomy.
fn classify(error: ureq::Error) -> TransportError {
    let message = error.to_string();
    match error {
        ureq::Error::HostNotFound | ureq::Error::ConnectionFailed => TransportError::connect(message),
        ureq::Error::Timeout(timeout) => match timeout {
            ureq::Timeout::Resolve | ureq::Timeout::Connect => TransportError::connect(message),
            _ => TransportError::read(message),
        },
        ureq::Error::Io(io_error) => match io_error.kind() {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::NotFound => TransportError::connect(message),
            io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => TransportError::read(message),
            _ => TransportError::other(message),
        },
        _ => TransportError::other(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    use crate::error::TransportErrorKind;

    /// Serve one raw HTTP exchange on a local port. `respond` gets the
    /// accepted stream after the request head has been read.
    fn serve_once<F>(respond: F) -> u16
    where
        F: FnOnce(&mut std::net::TcpStream) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    return;
                }
                head.extend_from_slice(&buf[..n]);
            }
            respond(&mut stream);
        });
        port
    }

    fn respond_with(stream: &mut std::net::TcpStream, body: &[u8]) {
        let head = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
            body.len()
        );
        // The client may hang up early on failure; the test asserts on its side.
        let _ = stream.write_all(head.as_bytes());
        let _ = stream.write_all(body);
    }

    fn get(port: u16) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url: format!("http://127.0.0.1:{port}/items"),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    #[test]
    fn host_not_found_is_a_connect_error() {
        assert_eq!(classify(ureq::Error::HostNotFound).kind, TransportErrorKind::Connect);
        assert_eq!(classify(ureq::Error::ConnectionFailed).kind, TransportErrorKind::Connect);
    }

    #[test]
    fn timeouts_split_on_phase() {
        assert_eq!(
            classify(ureq::Error::Timeout(ureq::Timeout::Connect)).kind,
            TransportErrorKind::Connect
        );
        assert_eq!(
            classify(ureq::Error::Timeout(ureq::Timeout::Resolve)).kind,
            TransportErrorKind::Connect
        );
        assert_eq!(
            classify(ureq::Error::Timeout(ureq::Timeout::RecvResponse)).kind,
            TransportErrorKind::Read
        );
        assert_eq!(
            classify(ureq::Error::Timeout(ureq::Timeout::RecvBody)).kind,
            TransportErrorKind::Read
        );
        assert_eq!(
            classify(ureq::Error::Timeout(ureq::Timeout::Global)).kind,
            TransportErrorKind::Read
        );
    }

    #[test]
    fn io_errors_follow_kind() {
        let refused = ureq::Error::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert_eq!(classify(refused).kind, TransportErrorKind::Connect);

        let reset = ureq::Error::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert_eq!(classify(reset).kind, TransportErrorKind::Read);

        let other = ureq::Error::Io(io::Error::new(io::ErrorKind::InvalidData, "bad"));
        assert_eq!(classify(other).kind, TransportErrorKind::Other);
    }

    #[test]
    fn connection_refused_is_reported_as_connect_error() {
        // Bind then drop to get a port nothing listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let transport = UreqTransport::new(&HttpClientConfig::default());
        let request = HttpRequest {
            method: HttpMethod::Get,
            url: format!("http://127.0.0.1:{port}/items"),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        };
        let err = transport.execute(&request).unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Connect, "{err}");
    }

    #[test]
    fn large_response_body_is_read_in_full() {
        let mut body = b"{\"items\":\"".to_vec();
        body.resize(body.len() + 11 * 1024 * 1024, b'x');
        body.extend_from_slice(b"\"}");
        let expected_len = body.len();
        let port = serve_once(move |stream| respond_with(stream, &body));

        let transport = UreqTransport::new(&HttpClientConfig::default());
        let response = transport.execute(&get(port)).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body.len(), expected_len);
    }

    #[test]
    fn large_success_is_not_a_send_failure() {
        let mut body = b"{\"items\":\"".to_vec();
        body.resize(body.len() + 11 * 1024 * 1024, b'x');
        body.extend_from_slice(b"\"}");
        let port = serve_once(move |stream| respond_with(stream, &body));

        let client = crate::HttpClient::new(
            HttpClientConfig::default(),
            std::sync::Arc::new(crate::Token::new("t")),
        );
        let outcomes = client
            .send_with_retries(crate::Request::get(format!("http://127.0.0.1:{port}/items")))
            .unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(
            matches!(&outcomes[0], crate::Outcome::Success(s) if s.code == 200),
            "{:?}",
            outcomes[0]
        );
    }

    #[test]
    fn non_utf8_body_still_yields_a_response() {
        let port = serve_once(|stream| respond_with(stream, &[b'o', b'k', 0xff, 0xfe]));

        let transport = UreqTransport::new(&HttpClientConfig::default());
        let response = transport.execute(&get(port)).unwrap();
        assert_eq!(response.status, 200);
        assert!(response.body.starts_with("ok"));
    }

    #[test]
    fn stalled_response_is_reported_as_read_error() {
        let port = serve_once(|_stream| thread::sleep(Duration::from_secs(2)));

        let config = HttpClientConfig::default().with_timeout(Duration::from_millis(200));
        let transport = UreqTransport::new(&config);
        let err = transport.execute(&get(port)).unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Read, "{err}");
    }
}
