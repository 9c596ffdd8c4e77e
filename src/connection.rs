use std::ops::ControlFlow;

use bytes::Bytes;
use futures::SinkExt;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadHalf, WriteHalf},
    sync::{mpsc, oneshot, watch},
};
use tokio_util::codec::FramedWrite;

use crate::{
    client::Event,
    codec::Encoder,
    handshake::Upgraded,
    heartbeat::HeartbeatMonitor,
    reassembler::StreamReassembler,
    router::{MessageRouter, Route},
    CloseCode, CloseFrame, Frame, OpCode, Options, Result, WebSocketError,
};

/// Size of a single read from the transport.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Lifecycle of a connection.
///
/// States only move forward, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// The transport is being established.
    Connecting,
    /// The upgrade request was sent, waiting for the server response.
    AwaitingHandshake,
    /// Frames flow in both directions.
    Open,
    /// Teardown started, no application frame is sent anymore.
    Closing,
    /// The transport is released.
    Closed,
}

/// Moves `state` to `next` unless it is already there or further.
pub(crate) fn advance(state: &watch::Sender<ConnectionState>, next: ConnectionState) -> bool {
    state.send_if_modified(|current| {
        if next > *current {
            #[cfg(feature = "logging")]
            log::debug!("<Connection>: {current:?} -> {next:?}");

            *current = next;
            true
        } else {
            false
        }
    })
}

/// Requests sent by the client handle to the connection task.
#[derive(Debug)]
pub(crate) enum Command {
    /// Write a frame, reporting the outcome on `done`.
    Send {
        frame: Frame,
        done: oneshot::Sender<Result<()>>,
    },
    /// Close the connection, `done` fires once the task finished.
    Disconnect(oneshot::Sender<()>),
}

/// Why the connection loop stopped.
enum Stop {
    /// Local disconnect, explicit or because every handle was dropped.
    Disconnect(Option<oneshot::Sender<()>>),
    /// The server sent a Close frame.
    Remote(Option<CloseFrame>),
    /// The transport reached end of stream without a closing handshake.
    Eof,
    Fail(WebSocketError),
}

type Flow = ControlFlow<Stop>;

/// The connection engine.
///
/// Owns both halves of the transport and runs on its own task: reads, commands from the
/// handle and heartbeat ticks are handled one at a time, so writes never interleave.
pub(crate) struct Connection<S> {
    reader: ReadHalf<S>,
    writer: FramedWrite<WriteHalf<S>, Encoder>,
    chunk: Vec<u8>,
    reassembler: StreamReassembler,
    router: MessageRouter,
    heartbeat: HeartbeatMonitor,
    protocol: Option<String>,
    state: watch::Sender<ConnectionState>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<Event>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Wraps an upgraded transport. Bytes the server sent right after its handshake response
    /// are decoded first.
    pub(crate) fn new(
        io: S,
        upgraded: Upgraded,
        options: &Options,
        state: watch::Sender<ConnectionState>,
        commands: mpsc::UnboundedReceiver<Command>,
        events: mpsc::UnboundedSender<Event>,
    ) -> Result<Self> {
        let (reader, writer) = tokio::io::split(io);

        let mut reassembler = StreamReassembler::new(options.payload_limit(), options.buffer_limit());
        reassembler.extend(&upgraded.trailing)?;

        Ok(Self {
            reader,
            writer: FramedWrite::new(writer, Encoder::new(options.mask_frames)),
            chunk: vec![0; READ_CHUNK_SIZE],
            reassembler,
            router: MessageRouter::new(options.format, options.buffer_limit()),
            heartbeat: HeartbeatMonitor::new(
                options.heartbeat_interval,
                options.heartbeat_payload.clone(),
                options.max_missed_pongs,
            ),
            protocol: upgraded.protocol,
            state,
            commands,
            events,
        })
    }

    /// Runs the connection until it closes.
    /// Marks the connection open. Called before the task is spawned.
    pub(crate) fn open(&self) {
        advance(&self.state, ConnectionState::Open);
    }

    pub(crate) async fn run(mut self) {
        self.emit(Event::Open {
            protocol: self.protocol.clone(),
        });
        self.heartbeat.start();

        let mut flow = self.drain().await;
        while flow.is_continue() {
            flow = tokio::select! {
                read = self.reader.read(&mut self.chunk) => match read {
                    Ok(0) => ControlFlow::Break(Stop::Eof),
                    Ok(n) => match self.reassembler.extend(&self.chunk[..n]) {
                        Ok(()) => self.drain().await,
                        Err(err) => ControlFlow::Break(Stop::Fail(err)),
                    },
                    Err(err) => ControlFlow::Break(Stop::Fail(err.into())),
                },
                command = self.commands.recv() => match command {
                    Some(Command::Send { frame, done }) => match self.write(frame).await {
                        Ok(()) => {
                            let _ = done.send(Ok(()));
                            ControlFlow::Continue(())
                        }
                        Err(err) => {
                            let _ = done.send(Err(WebSocketError::ConnectionClosed));
                            ControlFlow::Break(Stop::Fail(err))
                        }
                    },
                    Some(Command::Disconnect(done)) => ControlFlow::Break(Stop::Disconnect(Some(done))),
                    None => ControlFlow::Break(Stop::Disconnect(None)),
                },
                ping = self.heartbeat.tick() => match ping {
                    Ok(frame) => self.write_or_fail(frame).await,
                    Err(err) => ControlFlow::Break(Stop::Fail(err)),
                },
            };
        }

        if let ControlFlow::Break(stop) = flow {
            self.teardown(stop).await;
        }
    }

    /// Handles every complete frame in the reassembler.
    async fn drain(&mut self) -> Flow {
        loop {
            match self.reassembler.next_frame() {
                Ok(Some(frame)) => self.on_frame(frame).await?,
                Ok(None) => return ControlFlow::Continue(()),
                Err(err) if !err.is_fatal() => self.emit(Event::Error(err)),
                Err(err) => return ControlFlow::Break(Stop::Fail(err)),
            }
        }
    }

    async fn on_frame(&mut self, frame: Frame) -> Flow {
        match frame.opcode {
            OpCode::Ping => self.write_or_fail(Frame::pong(frame.payload)).await,
            OpCode::Pong => {
                self.heartbeat.on_pong();
                ControlFlow::Continue(())
            }
            OpCode::Close => match frame.close_frame() {
                Ok(close) => ControlFlow::Break(Stop::Remote(close)),
                Err(err) => ControlFlow::Break(Stop::Fail(err)),
            },
            OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                for route in self.router.route(&frame.payload) {
                    match route {
                        Route::Reply(envelope) => {
                            match self.router.format().encode(&envelope) {
                                Ok(reply) => self.write_or_fail(reply).await?,
                                Err(err) => self.emit(Event::Error(err)),
                            }
                        }
                        Route::Message(payload) => self.emit(Event::Message(payload)),
                        Route::Notification(payload) => self.emit(Event::Notification(payload)),
                        Route::Error(err) => self.emit(Event::Error(err)),
                    }
                }
                ControlFlow::Continue(())
            }
        }
    }

    async fn write(&mut self, frame: Frame) -> Result<()> {
        self.writer.send(frame).await
    }

    async fn write_or_fail(&mut self, frame: Frame) -> Flow {
        match self.write(frame).await {
            Ok(()) => ControlFlow::Continue(()),
            Err(err) => ControlFlow::Break(Stop::Fail(err)),
        }
    }

    /// Closes the connection. The heartbeat is cancelled before anything else happens and
    /// the `Close` event is the last event emitted.
    async fn teardown(mut self, stop: Stop) {
        self.heartbeat.cancel();
        advance(&self.state, ConnectionState::Closing);

        let (close, reported, done) = match stop {
            Stop::Disconnect(done) => (
                Some(Frame::close(CloseCode::Normal, "")),
                Some(CloseFrame::new(CloseCode::Normal, "")),
                done,
            ),
            // echo the status code without the reason
            Stop::Remote(close) => {
                let echo = match &close {
                    Some(close) => Frame::close(close.code, ""),
                    None => Frame::close_raw(Bytes::new()),
                };
                (Some(echo), close, None)
            }
            Stop::Eof => {
                self.emit(Event::Error(WebSocketError::ConnectionClosed));
                (None, None, None)
            }
            Stop::Fail(err) => {
                let reported = match err {
                    WebSocketError::IoError(_) | WebSocketError::ConnectionClosed => None,
                    ref err => Some(CloseFrame::new(err.close_code(), err.to_string())),
                };
                self.emit(Event::Error(err));
                let close = reported
                    .as_ref()
                    .map(|close| Frame::close_raw(close.to_payload()));
                (close, reported, None)
            }
        };

        if let Some(close) = close {
            #[cfg(feature = "logging")]
            log::debug!("<Connection>: sending close {:?}", close.close_frame());

            if let Err(_err) = self.write(close).await {
                #[cfg(feature = "logging")]
                log::debug!("<Connection>: could not send close: {_err}");
            }
        }

        if let Err(_err) = SinkExt::close(&mut self.writer).await {
            #[cfg(feature = "logging")]
            log::debug!("<Connection>: transport shutdown failed: {_err}");
        }

        advance(&self.state, ConnectionState::Closed);
        self.emit(Event::Close(reported));

        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    fn emit(&self, event: Event) {
        // the handle may be gone already, nobody is listening then
        let _ = self.events.send(event);
    }
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_only_moves_forward() {
        let (tx, rx) = watch::channel(ConnectionState::Connecting);

        assert!(advance(&tx, ConnectionState::Open));
        assert!(!advance(&tx, ConnectionState::AwaitingHandshake));
        assert_eq!(*rx.borrow(), ConnectionState::Open);

        assert!(advance(&tx, ConnectionState::Closed));
        assert!(!advance(&tx, ConnectionState::Closing));
        assert!(!advance(&tx, ConnectionState::Closed));
        assert_eq!(*rx.borrow(), ConnectionState::Closed);
    }

    #[test]
    fn test_state_order() {
        assert!(ConnectionState::Connecting < ConnectionState::AwaitingHandshake);
        assert!(ConnectionState::AwaitingHandshake < ConnectionState::Open);
        assert!(ConnectionState::Open < ConnectionState::Closing);
        assert!(ConnectionState::Closing < ConnectionState::Closed);
        assert!(ConnectionState::Open.is_open());
        assert!(!ConnectionState::Closing.is_open());
    }
}
