use std::{
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::{mpsc, oneshot, watch},
    time,
};

use crate::{
    connection::{self, Command, Connection, ConnectionState},
    frame::MAX_CONTROL_PAYLOAD,
    handshake::{Handshake, Upgraded},
    CloseFrame, Envelope, Frame, Options, Payload, PayloadFormat, Result, WebSocketError,
};

/// Size of a single read while waiting for the upgrade response.
const HANDSHAKE_CHUNK_SIZE: usize = 1024;

/// Something that happened on the connection.
///
/// Events are delivered in the order they happened. [`Event::Close`] is always the last one.
#[derive(Debug)]
pub enum Event {
    /// The handshake completed. `protocol` is the subprotocol the server selected, if any.
    Open { protocol: Option<String> },
    /// The server sent a message envelope.
    Message(Payload),
    /// The server sent a notification envelope. If it asked for a response, the
    /// acknowledgment was already sent.
    Notification(Payload),
    /// The connection is closed.
    ///
    /// Carries the close frame that ended the connection: the server's when it closed first,
    /// ours on disconnect or protocol failure, `None` when the transport went away.
    Close(Option<CloseFrame>),
    /// Something went wrong. See [`WebSocketError::is_fatal`].
    Error(WebSocketError),
}

/// Handle to a WebSocket connection.
///
/// The connection runs on its own tokio task. The handle sends envelopes and control frames
/// to it and receives its [`Event`]s, either with [`next_event`](Self::next_event) or through
/// the [`futures::Stream`] implementation.
///
/// Dropping the handle disconnects.
///
/// # Example
/// ```no_run
/// use futures::StreamExt;
/// use yawn::{Client, Event, Options, PayloadFormat};
///
/// async fn listen() -> yawn::Result<()> {
///     let options = Options::new("127.0.0.1", 9000).with_format(PayloadFormat::Binary);
///     let mut client = Client::connect(options).await?;
///
///     client.send_notification(vec![1u8, 2, 3], true).await?;
///
///     while let Some(event) = client.next().await {
///         if let Event::Close(frame) = event {
///             println!("closed: {frame:?}");
///         }
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Client {
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<Event>,
    state: watch::Receiver<ConnectionState>,
    format: PayloadFormat,
    protocol: Option<String>,
}

impl Client {
    /// Opens a TCP connection to `options.host:options.port` and performs the handshake.
    ///
    /// # Errors
    /// - I/O errors while connecting.
    /// - Any error from [`Client::handshake`].
    pub async fn connect(options: Options) -> Result<Self> {
        let stream = TcpStream::connect((options.host.as_str(), options.port)).await?;
        let _ = stream.set_nodelay(true);

        Self::handshake(stream, options).await
    }

    /// Performs the handshake over an established transport and starts the connection task.
    ///
    /// Use this to run the client over TLS or any other byte stream.
    ///
    /// # Errors
    /// - `WebSocketError::HandshakeTimeout` if the server did not answer in time.
    /// - A handshake error if the server response is not a valid upgrade.
    /// - `WebSocketError::ConnectionClosed` if the server hung up during the handshake.
    /// - `WebSocketError::ControlFrameTooLarge` if the heartbeat payload exceeds 125 bytes.
    ///   Nothing is written to the transport in that case.
    ///
    /// The transport is dropped on error.
    pub async fn handshake<S>(mut io: S, options: Options) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        if options.heartbeat_payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(WebSocketError::ControlFrameTooLarge);
        }

        let (state_tx, state) = watch::channel(ConnectionState::Connecting);

        let upgrade = Self::upgrade(&mut io, &options, &state_tx);
        let upgraded = match options.handshake_timeout {
            Some(limit) => time::timeout(limit, upgrade)
                .await
                .unwrap_or(Err(WebSocketError::HandshakeTimeout)),
            None => upgrade.await,
        };

        let upgraded = match upgraded {
            Ok(upgraded) => upgraded,
            Err(err) => {
                #[cfg(feature = "logging")]
                log::debug!("<Client>: handshake failed: {err}");

                connection::advance(&state_tx, ConnectionState::Closed);
                return Err(err);
            }
        };

        let protocol = upgraded.protocol.clone();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();

        let connection = Connection::new(io, upgraded, &options, state_tx, command_rx, event_tx)?;
        connection.open();
        tokio::spawn(connection.run());

        Ok(Self {
            commands,
            events,
            state,
            format: options.format,
            protocol,
        })
    }

    async fn upgrade<S>(
        io: &mut S,
        options: &Options,
        state: &watch::Sender<ConnectionState>,
    ) -> Result<Upgraded>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut handshake = Handshake::new(options);
        io.write_all(&handshake.request()).await?;
        io.flush().await?;
        connection::advance(state, ConnectionState::AwaitingHandshake);

        let mut chunk = [0; HANDSHAKE_CHUNK_SIZE];
        loop {
            let n = io.read(&mut chunk).await?;
            if n == 0 {
                return Err(WebSocketError::ConnectionClosed);
            }

            if let Some(upgraded) = handshake.feed(&chunk[..n])? {
                return Ok(upgraded);
            }
        }
    }

    /// Sends a message envelope.
    pub async fn send_message(&self, payload: impl Into<Payload>) -> Result<()> {
        self.send_envelope(&Envelope::message(payload)).await
    }

    /// Sends a notification envelope. With `response_required` the server is expected to
    /// acknowledge it.
    pub async fn send_notification(
        &self,
        payload: impl Into<Payload>,
        response_required: bool,
    ) -> Result<()> {
        self.send_envelope(&Envelope::notification(payload, response_required))
            .await
    }

    /// Sends a ping frame.
    ///
    /// # Errors
    /// `WebSocketError::ControlFrameTooLarge` if the payload exceeds 125 bytes.
    pub async fn ping(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.send_control(Frame::ping(payload)).await
    }

    /// Sends an unsolicited pong frame.
    ///
    /// Pings from the server are answered automatically.
    pub async fn pong(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.send_control(Frame::pong(payload)).await
    }

    /// Closes the connection with a normal close code and waits for the connection task to
    /// finish. Calling it on a closed connection does nothing.
    pub async fn disconnect(&self) {
        let (done, finished) = oneshot::channel();
        if self.commands.send(Command::Disconnect(done)).is_ok() {
            let _ = finished.await;
        }
    }

    /// Current state of the connection.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Returns a receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// The subprotocol selected by the server during the handshake.
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Waits for the next event. Returns `None` once the connection task finished and every
    /// event was delivered.
    pub async fn next_event(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    async fn send_envelope(&self, envelope: &Envelope) -> Result<()> {
        let frame = self.format.encode(envelope)?;
        self.send_frame(frame).await
    }

    async fn send_control(&self, frame: Frame) -> Result<()> {
        if frame.payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(WebSocketError::ControlFrameTooLarge);
        }
        self.send_frame(frame).await
    }

    async fn send_frame(&self, frame: Frame) -> Result<()> {
        if self.state() >= ConnectionState::Closing {
            return Err(WebSocketError::ConnectionClosed);
        }

        let (done, written) = oneshot::channel();
        self.commands
            .send(Command::Send { frame, done })
            .map_err(|_| WebSocketError::ConnectionClosed)?;

        written.await.map_err(|_| WebSocketError::ConnectionClosed)?
    }
}

impl futures::Stream for Client {
    type Item = Event;

    /// Polls for the next [`Event`]. The stream ends after [`Event::Close`].
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}
