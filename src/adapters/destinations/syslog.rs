//! Syslog destination.
//!
//! Formats each message as an RFC 5424 line:
//!
//! ```text
//! <PRI>1 TIMESTAMP HOSTNAME APP-NAME PROCID MSGID - MSG
//! <134>1 2024-05-01T10:00:00.000Z host n8n 4242 n8n.workflow.success - {"eventName":...}
//! ```
//!
//! `PRI = facility * 8 + severity`, where severity is 3 (error) for event
//! names ending in `error` and 6 (informational) otherwise. The socket is
//! opened on first use and dropped after a failed write, so the next
//! attempt reconnects. TCP frames are newline-terminated.

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::domain::destination::{DestinationOptions, SyslogOptions, SyslogProtocol};
use crate::domain::message::EventMessage;
use crate::ports::{ConfirmSent, MessageEventBusDestination};

const SEVERITY_ERROR: u8 = 3;
const SEVERITY_INFO: u8 = 6;

/// RFC 5424 caps MSGID at 32 printable characters.
const MSGID_MAX: usize = 32;

enum Connection {
    Udp(UdpSocket),
    Tcp(TcpStream),
}

impl Connection {
    async fn open(options: &SyslogOptions) -> std::io::Result<Self> {
        let address = format!("{}:{}", options.host, options.port);
        match options.protocol {
            SyslogProtocol::Udp => {
                let socket = UdpSocket::bind("0.0.0.0:0").await?;
                socket.connect(&address).await?;
                Ok(Connection::Udp(socket))
            }
            SyslogProtocol::Tcp => Ok(Connection::Tcp(TcpStream::connect(&address).await?)),
        }
    }

    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        match self {
            Connection::Udp(socket) => {
                socket.send(line.as_bytes()).await?;
            }
            Connection::Tcp(stream) => {
                stream.write_all(line.as_bytes()).await?;
                stream.write_all(b"\n").await?;
                stream.flush().await?;
            }
        }
        Ok(())
    }
}

pub struct SyslogDestination {
    options: DestinationOptions,
    syslog: SyslogOptions,
    hostname: String,
    connection: Mutex<Option<Connection>>,
}

impl SyslogDestination {
    pub fn new(syslog: SyslogOptions) -> Self {
        let hostname = syslog
            .hostname
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| "-".to_string());
        Self {
            options: DestinationOptions::Syslog(syslog.clone()),
            syslog,
            hostname,
            connection: Mutex::new(None),
        }
    }

    /// One RFC 5424 line for `message`, without framing.
    pub fn format(&self, message: &EventMessage) -> String {
        let severity = if message.event_name().is_error() {
            SEVERITY_ERROR
        } else {
            SEVERITY_INFO
        };
        let pri = u16::from(self.syslog.facility) * 8 + u16::from(severity);
        let msgid: String = message
            .event_name()
            .as_str()
            .chars()
            .take(MSGID_MAX)
            .collect();
        let body = serde_json::to_string(message).unwrap_or_else(|_| msgid.clone());

        format!(
            "<{}>1 {} {} {} {} {} - {}",
            pri,
            message.timestamp().to_rfc3339(),
            self.hostname,
            self.syslog.app_name,
            std::process::id(),
            msgid,
            body
        )
    }

    async fn write(&self, line: &str) -> std::io::Result<()> {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            let connection = Connection::open(&self.syslog).await?;
            info!(
                destination = %self.options.id(),
                host = %self.syslog.host,
                port = self.syslog.port,
                "Syslog connection opened"
            );
            *guard = Some(connection);
        }

        let result = match guard.as_mut() {
            Some(connection) => connection.write_line(line).await,
            None => Ok(()),
        };
        if result.is_err() {
            *guard = None;
        }
        result
    }
}

#[async_trait]
impl MessageEventBusDestination for SyslogDestination {
    fn options(&self) -> &DestinationOptions {
        &self.options
    }

    async fn receive_from_event_bus(
        &self,
        message: &EventMessage,
        confirm: &dyn ConfirmSent,
    ) -> bool {
        let line = self.format(message);
        match self.write(&line).await {
            Ok(()) => {
                confirm.confirm_sent(message, self.id()).await;
                true
            }
            Err(e) => {
                debug!(
                    destination = %self.id(),
                    message_id = %message.id(),
                    error = %e,
                    "Syslog delivery failed"
                );
                false
            }
        }
    }

    async fn close(&self) {
        if let Some(Connection::Tcp(mut stream)) = self.connection.lock().await.take() {
            let _ = stream.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::DestinationId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    struct CountingConfirm(AtomicUsize);

    #[async_trait]
    impl ConfirmSent for CountingConfirm {
        async fn confirm_sent(&self, _: &EventMessage, _: DestinationId) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn destination(port: u16, protocol: SyslogProtocol) -> SyslogDestination {
        let mut options = SyslogOptions::new("127.0.0.1");
        options.port = port;
        options.protocol = protocol;
        options.hostname = Some("testhost".into());
        SyslogDestination::new(options)
    }

    #[test]
    fn priority_follows_error_suffix() {
        let dest = destination(514, SyslogProtocol::Udp);

        let error = EventMessage::named("n8n.workflow.error").unwrap();
        let info = EventMessage::named("n8n.workflow.success").unwrap();

        assert!(dest.format(&error).starts_with("<131>1 "));
        assert!(dest.format(&info).starts_with("<134>1 "));
    }

    #[test]
    fn line_carries_header_fields() {
        let dest = destination(514, SyslogProtocol::Udp);
        let message = EventMessage::named("n8n.workflow.success").unwrap();

        let line = dest.format(&message);
        let fields: Vec<&str> = line.splitn(8, ' ').collect();

        assert_eq!(fields[2], "testhost");
        assert_eq!(fields[3], "n8n");
        assert_eq!(fields[5], "n8n.workflow.success");
        assert_eq!(fields[6], "-");
        assert!(fields[7].contains("\"eventName\":\"n8n.workflow.success\""));
    }

    #[tokio::test]
    async fn tcp_delivery_confirms_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let reader = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            lines.next_line().await.unwrap().unwrap()
        });

        let dest = destination(port, SyslogProtocol::Tcp);
        let confirm = CountingConfirm(AtomicUsize::new(0));
        let message = EventMessage::named("n8n.node.finished").unwrap();

        assert!(dest.receive_from_event_bus(&message, &confirm).await);
        assert_eq!(confirm.0.load(Ordering::SeqCst), 1);

        let line = reader.await.unwrap();
        assert!(line.contains("n8n.node.finished"));
        dest.close().await;
    }

    #[tokio::test]
    async fn unreachable_server_reports_false() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let dest = destination(port, SyslogProtocol::Tcp);
        let confirm = CountingConfirm(AtomicUsize::new(0));
        let message = EventMessage::named("n8n.node.finished").unwrap();

        assert!(!dest.receive_from_event_bus(&message, &confirm).await);
        assert_eq!(confirm.0.load(Ordering::SeqCst), 0);
    }
}
