//! TCP listener that hands accepted sockets to the dispatcher

use crate::commands::CommandTable;
use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use log::{error, info, warn};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

/// Accepts connections and registers them with its [`Dispatcher`]
pub struct Server {
    listener: TcpListener,
    dispatcher: Dispatcher,
}

impl Server {
    /// Binds the listener and starts the command workers
    pub async fn bind(config: ServerConfig, commands: CommandTable) -> io::Result<Self> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            dispatcher: Dispatcher::new(config, commands),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Accepts connections until the returned future is dropped
    pub async fn run(&self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("Failed to disable Nagle for {}: {}", addr, e);
                    }

                    let (reader, writer) = stream.into_split();
                    let id = self.dispatcher.connect(reader, writer).await;
                    info!("Client {} connected from {}", id, addr);
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}
