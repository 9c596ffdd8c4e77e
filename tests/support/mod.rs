//! In-process WebSocket server used to drive a [`Client`] over `tokio::io::duplex`.
#![allow(dead_code)]

use bytes::BytesMut;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use yawn::{
    codec, handshake::accept_key, reassembler::StreamReassembler, Client, Event, Frame, Options,
    MAX_PAYLOAD_READ, MAX_READ_BUFFER,
};

const PIPE_SIZE: usize = 64 * 1024;

pub struct FakeServer {
    pub io: DuplexStream,
    frames: StreamReassembler,
}

impl FakeServer {
    pub fn new(io: DuplexStream) -> Self {
        Self {
            io,
            frames: StreamReassembler::new(MAX_PAYLOAD_READ, MAX_READ_BUFFER),
        }
    }

    /// Reads the upgrade request head, byte by byte so nothing after it is consumed.
    pub async fn read_request(&mut self) -> String {
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            self.io.read_exact(&mut byte).await.expect("request");
            head.push(byte[0]);
        }
        String::from_utf8(head).expect("utf8 request")
    }

    /// Answers the upgrade request with a valid response. `extra` holds additional header
    /// lines, each terminated by `\r\n`, and `trailing` is written in the same chunk right
    /// after the response.
    pub async fn accept_with(&mut self, extra: &str, trailing: &[u8]) -> String {
        let request = self.read_request().await;
        let key = header(&request, "sec-websocket-key").expect("key");

        let mut response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\
             {extra}\r\n",
            accept_key(&key)
        )
        .into_bytes();
        response.extend_from_slice(trailing);

        self.io.write_all(&response).await.expect("response");
        request
    }

    pub async fn accept(&mut self) -> String {
        self.accept_with("", &[]).await
    }

    pub async fn send(&mut self, frame: Frame) {
        let mut buf = BytesMut::new();
        codec::encode_frame(&frame, &mut buf);
        self.send_raw(&buf).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.io.write_all(bytes).await.expect("write");
    }

    /// Next frame sent by the client, `None` once the client shut the transport down.
    pub async fn recv(&mut self) -> Option<Frame> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(frame) = self.frames.next_frame().expect("client frame") {
                return Some(frame);
            }

            let n = self.io.read(&mut chunk).await.expect("read");
            if n == 0 {
                return None;
            }
            self.frames.extend(&chunk[..n]).expect("buffer");
        }
    }
}

/// Value of a header in a request head, looked up case-insensitively.
pub fn header(head: &str, name: &str) -> Option<String> {
    head.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().to_string())
    })
}

/// Connects a client to a fake server that accepts the upgrade.
pub async fn connect(options: Options) -> (Client, FakeServer) {
    let (client_io, server_io) = duplex(PIPE_SIZE);
    let mut server = FakeServer::new(server_io);

    let (client, _) = tokio::join!(Client::handshake(client_io, options), server.accept());
    (client.expect("handshake"), server)
}

/// Connects and consumes the `Open` event.
pub async fn open(options: Options) -> (Client, FakeServer) {
    let (mut client, server) = connect(options).await;
    match client.next_event().await {
        Some(Event::Open { .. }) => {}
        other => panic!("expected open event, got {other:?}"),
    }
    (client, server)
}

pub fn pipe() -> (DuplexStream, DuplexStream) {
    duplex(PIPE_SIZE)
}

/// Test options: no heartbeat unless a test asks for one.
pub fn options() -> Options {
    Options::new("localhost", 9000).without_heartbeat()
}

pub fn init_logger() {
    let _ = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Debug)
        .init();
}
