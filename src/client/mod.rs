//! Reconnecting connection to the PHD2 event server.
//!
//! One [`Client`] owns the [`Dispatcher`] for the lifetime of the process, so
//! the session context, RMS windows and pending requests carry over when the
//! guider restarts or the socket drops.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::Phd2Config;
use crate::labels::LabelSet;
use crate::phd2::dispatch::{DispatchError, Dispatcher};
use crate::phd2::rpc::{Request, RequestSender, SendError};
use crate::phd2::Record;
use crate::sink::MetricSink;

/// Counter bumped on every read poll, timeouts included.
pub const METRIC_READS: &str = "reads";
/// Counter bumped on every failure, labelled with its category.
pub const METRIC_ERROR: &str = "error";

/// Failures that end a session.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("connecting to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("connecting to {addr}: timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("reading from PHD2: {0}")]
    Io(#[from] io::Error),

    #[error("decoding record: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("sending request: {0}")]
    Send(#[from] SendError),
}

impl ClientError {
    /// Coarse label for the failure counter.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connect { .. } | Self::ConnectTimeout { .. } => "connect",
            Self::Io(_) => "io",
            Self::Decode(_) => "decode",
            Self::Send(_) => "send",
        }
    }

    /// Whether the peer actively refused the connection.
    pub fn is_refused(&self) -> bool {
        matches!(self, Self::Connect { source, .. } if source.kind() == io::ErrorKind::ConnectionRefused)
    }
}

/// [`RequestSender`] feeding the connection's writer task.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSender {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }
}

impl RequestSender for ChannelSender {
    fn send(&self, request: &Request) -> Result<(), SendError> {
        let line = request.encode()?;
        self.tx.send(line).map_err(|_| SendError::Closed)
    }
}

/// Drives sessions against one PHD2 instance until cancelled.
pub struct Client<S> {
    cfg: Phd2Config,
    dispatcher: Dispatcher<S>,
    refused_logged: bool,
}

impl<S: MetricSink> Client<S> {
    pub fn new(cfg: Phd2Config, dispatcher: Dispatcher<S>) -> Self {
        Self {
            cfg,
            dispatcher,
            refused_logged: false,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<S> {
        &self.dispatcher
    }

    /// Connects, reads until the session ends, waits, and reconnects.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(addr = %self.cfg.endpoint(), "phd2 client started");

        while !cancel.is_cancelled() {
            if let Err(e) = self.session(&cancel).await {
                self.report(&e);
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.cfg.reconnect_delay) => {}
            }
        }

        info!("phd2 client stopped");
    }

    /// One connection lifetime. Returns `Ok` on EOF or cancellation.
    pub async fn session(&mut self, cancel: &CancellationToken) -> Result<(), ClientError> {
        let addr = self.cfg.endpoint();

        let connect = tokio::time::timeout(self.cfg.connect_timeout, TcpStream::connect(&addr));
        let stream = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            result = connect => match result {
                Err(_) => {
                    return Err(ClientError::ConnectTimeout {
                        addr,
                        timeout: self.cfg.connect_timeout,
                    })
                }
                Ok(Err(source)) => return Err(ClientError::Connect { addr, source }),
                Ok(Ok(stream)) => stream,
            },
        };

        self.refused_logged = false;
        info!(addr = %addr, "connected to phd2");

        let (read_half, mut write_half) = stream.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let writer = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if let Err(e) = write_half.write_all(line.as_bytes()).await {
                    debug!(error = %e, "writer stopped");
                    return;
                }
            }
        });

        let sender = ChannelSender::new(tx);
        let mut reader = BufReader::new(read_half);
        let mut buf = Vec::new();

        let result = loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                read = tokio::time::timeout(
                    self.cfg.read_timeout,
                    reader.read_until(b'\n', &mut buf),
                ) => read,
            };

            self.tick_reads();

            match read {
                // A partial line stays in `buf` until the rest arrives.
                Err(_) => continue,
                Ok(Ok(0)) => {
                    info!(addr = %addr, "phd2 closed the connection");
                    break Ok(());
                }
                Ok(Ok(_)) => {
                    let handled = self.handle_line(&buf, &sender);
                    buf.clear();
                    if let Err(e) = handled {
                        break Err(e);
                    }
                }
                Ok(Err(e)) => break Err(e.into()),
            }
        };

        drop(sender);
        writer.abort();

        result
    }

    /// Decodes one line and dispatches it.
    ///
    /// Metric failures are logged and counted; only decode and send
    /// failures end the session.
    pub fn handle_line(
        &mut self,
        line: &[u8],
        sender: &dyn RequestSender,
    ) -> Result<(), ClientError> {
        let line = line.trim_ascii();
        if line.is_empty() {
            return Ok(());
        }

        let record: Record = serde_json::from_slice(line)?;

        match self.dispatcher.handle_record(&record, sender) {
            Ok(()) => Ok(()),
            Err(DispatchError::Send(e)) => Err(e.into()),
            Err(e) => {
                warn!(error = %e, "handling record");
                self.count_error(dispatch_category(&e));
                Ok(())
            }
        }
    }

    fn report(&mut self, e: &ClientError) {
        if e.is_refused() {
            if self.refused_logged {
                debug!(error = %e, "phd2 still refusing connections");
            } else {
                warn!(error = %e, "phd2 refused connection, retrying quietly");
                self.refused_logged = true;
            }
        } else {
            error!(error = %e, category = e.category(), "phd2 session failed");
        }

        self.count_error(e.category());
    }

    fn tick_reads(&self) {
        // A family's label keys are fixed on first use, so liveness is only
        // counted once the guider has identified itself.
        let Some(labels) = self.dispatcher.session().labels() else {
            trace!("read poll before identity");
            return;
        };

        if let Err(e) = self.dispatcher.sink().increment(METRIC_READS, &labels) {
            debug!(error = %e, "counting read");
        }
    }

    fn count_error(&self, category: &'static str) {
        let labels = LabelSet::new().with("type", category);
        if let Err(e) = self.dispatcher.sink().increment(METRIC_ERROR, &labels) {
            debug!(error = %e, "counting failure");
        }
    }
}

fn dispatch_category(e: &DispatchError) -> &'static str {
    match e {
        DispatchError::Sink(_) => "sink",
        DispatchError::Send(_) => "send",
        DispatchError::Registry(_) => "registry",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::phd2::rpc::Method;
    use crate::sink::MemorySink;

    fn client() -> Client<MemorySink> {
        Client::new(
            Phd2Config::default(),
            Dispatcher::new(MemorySink::new(), 3),
        )
    }

    struct Sent(parking_lot::Mutex<Vec<Request>>);

    impl RequestSender for Sent {
        fn send(&self, request: &Request) -> Result<(), SendError> {
            self.0.lock().push(*request);
            Ok(())
        }
    }

    #[test]
    fn test_categories() {
        let refused = ClientError::Connect {
            addr: "127.0.0.1:4400".to_string(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert_eq!(refused.category(), "connect");
        assert!(refused.is_refused());

        let reset = ClientError::Io(io::Error::from(io::ErrorKind::ConnectionReset));
        assert_eq!(reset.category(), "io");
        assert!(!reset.is_refused());

        assert_eq!(ClientError::Send(SendError::Closed).category(), "send");
    }

    #[test]
    fn test_channel_sender_writes_crlf_lines() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sender = ChannelSender::new(tx);

        sender
            .send(&Request {
                method: Method::GetConnected,
                id: 12,
            })
            .expect("send");

        let line = rx.try_recv().expect("queued line");
        assert!(line.ends_with("\r\n"));
        let value: Value = serde_json::from_str(line.trim_end()).expect("json");
        assert_eq!(value["method"], "get_connected");
        assert_eq!(value["id"], 12);
    }

    #[test]
    fn test_channel_sender_closed() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        let err = ChannelSender::new(tx)
            .send(&Request {
                method: Method::GetConnected,
                id: 1,
            })
            .unwrap_err();
        assert!(matches!(err, SendError::Closed));
    }

    #[test]
    fn test_handle_line_skips_blank_lines() {
        let mut client = client();
        let sent = Sent(parking_lot::Mutex::new(Vec::new()));

        client.handle_line(b"\r\n", &sent).expect("blank line");
        client.handle_line(b"   ", &sent).expect("whitespace");
        assert!(client.dispatcher().sink().is_empty());
    }

    #[test]
    fn test_handle_line_decode_error_is_fatal() {
        let mut client = client();
        let sent = Sent(parking_lot::Mutex::new(Vec::new()));

        let err = client.handle_line(b"{not json\r\n", &sent).unwrap_err();
        assert_eq!(err.category(), "decode");

        let err = client.handle_line(b"[1, 2]\r\n", &sent).unwrap_err();
        assert_eq!(err.category(), "decode");
    }

    #[test]
    fn test_handle_line_dispatches() {
        let mut client = client();
        let sent = Sent(parking_lot::Mutex::new(Vec::new()));

        client
            .handle_line(
                b"{\"Event\":\"AppState\",\"Host\":\"Rig\",\"Inst\":1,\"State\":\"Guiding\"}\r\n",
                &sent,
            )
            .expect("handled");

        assert_eq!(sent.0.lock().len(), 3);
        let identity = client.dispatcher().session().identity().expect("identity");
        assert_eq!(identity.host, "rig");
    }

    #[test]
    fn test_refused_logged_once_until_connected() {
        let mut client = client();
        let refused = ClientError::Connect {
            addr: "127.0.0.1:4400".to_string(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };

        client.report(&refused);
        assert!(client.refused_logged);
        client.report(&refused);
        assert!(client.refused_logged);

        assert_eq!(
            client
                .dispatcher()
                .sink()
                .counter(METRIC_ERROR, &LabelSet::new().with("type", "connect")),
            2.0
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let mut client = client();
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), client.run(cancel))
            .await
            .expect("run returns promptly");
    }
}
