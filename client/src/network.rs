//! Connection to the relay server

use crate::input::{format_message, parse_line};
use log::{debug, info, warn};
use shared::{Frame, Message, ReceivePipeline, StreamError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Receive buffers start small; the pipeline grows them for large frames
const INITIAL_RECEIVE_CAPACITY: usize = 4096;

pub struct ChatClient<R, W> {
    name: String,
    incoming: ReceivePipeline<R>,
    outgoing: W,
}

impl ChatClient<OwnedReadHalf, OwnedWriteHalf> {
    pub async fn connect(server_addr: &str, name: impl Into<String>) -> Result<Self, StreamError> {
        let stream = TcpStream::connect(server_addr).await?;
        stream.set_nodelay(true)?;
        info!("Connected to {}", stream.peer_addr()?);

        let (reader, writer) = stream.into_split();
        Ok(Self::new(reader, writer, name))
    }
}

impl<R, W> ChatClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            incoming: ReceivePipeline::new(reader, INITIAL_RECEIVE_CAPACITY),
            outgoing: writer,
        }
    }

    pub async fn send(&mut self, message: &Message) -> Result<(), StreamError> {
        let frame = Frame::encode(message)?;
        self.outgoing.write_all(frame.as_bytes()).await?;
        self.outgoing.flush().await?;
        Ok(())
    }

    pub async fn next_message(&mut self) -> Result<Message, StreamError> {
        self.incoming.next_message().await
    }

    /// Sends each input line and prints each received message until the
    /// input ends or the server closes the connection
    pub async fn run<I, O>(mut self, input: I, mut output: O) -> Result<(), StreamError>
    where
        I: AsyncBufRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        debug!("Input closed");
                        break;
                    };
                    if let Some(message) = parse_line(&line, &self.name) {
                        self.send(&message).await?;
                    }
                }
                message = self.incoming.next_message() => {
                    match message {
                        Ok(message) => {
                            for line in format_message(&message) {
                                output.write_all(line.as_bytes()).await?;
                                output.write_all(b"\n").await?;
                            }
                            output.flush().await?;
                        }
                        Err(StreamError::Closed) => {
                            info!("Server closed the connection");
                            break;
                        }
                        Err(e) => {
                            warn!("Lost connection to server: {}", e);
                            return Err(e);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
