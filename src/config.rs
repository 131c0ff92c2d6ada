use std::time::Duration;

use rpc_calls::Deadline;

/// Configuration for the person service client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address, `host:port` or a full `http://` URI.
    pub addr: String,

    /// Timeout for establishing the connection.
    pub connect_timeout: Duration,

    /// Default deadline for unary calls.
    pub unary_timeout: Duration,

    /// Default deadline for a whole server stream.
    pub server_stream_timeout: Duration,

    /// Default deadline for client-streaming calls.
    pub client_stream_timeout: Duration,

    /// Default deadline for bidirectional calls.
    pub bidi_timeout: Duration,

    /// Outbound requests buffered per streaming call before `send` suspends.
    pub stream_buffer: usize,

    /// Pause between consecutive sends when the driver paces a stream.
    pub send_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: "localhost:8081".to_string(),
            connect_timeout: Duration::from_secs(5),
            unary_timeout: Deadline::UNARY,
            server_stream_timeout: Deadline::SERVER_STREAM,
            client_stream_timeout: Deadline::STREAMING,
            bidi_timeout: Deadline::STREAMING,
            stream_buffer: 16,
            send_interval: Duration::from_secs(1),
        }
    }
}

impl ClientConfig {
    /// Create a new config for the given server address.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Default::default()
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_unary_timeout(mut self, timeout: Duration) -> Self {
        self.unary_timeout = timeout;
        self
    }

    pub fn with_server_stream_timeout(mut self, timeout: Duration) -> Self {
        self.server_stream_timeout = timeout;
        self
    }

    pub fn with_client_stream_timeout(mut self, timeout: Duration) -> Self {
        self.client_stream_timeout = timeout;
        self
    }

    pub fn with_bidi_timeout(mut self, timeout: Duration) -> Self {
        self.bidi_timeout = timeout;
        self
    }

    pub fn with_stream_buffer(mut self, capacity: usize) -> Self {
        self.stream_buffer = capacity;
        self
    }

    pub fn with_send_interval(mut self, interval: Duration) -> Self {
        self.send_interval = interval;
        self
    }

    /// The endpoint URI, defaulting to plaintext `http` when no scheme is given.
    pub(crate) fn endpoint_uri(&self) -> String {
        if self.addr.contains("://") {
            self.addr.clone()
        } else {
            format!("http://{}", self.addr)
        }
    }
}
