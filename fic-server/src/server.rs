use std::{
    io::{self, ErrorKind},
    ops::ControlFlow,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use fic_protocol::{
    Command, FicStatus, LoadMode, Reply, SelectMapWidth,
    framed::{Request, RequestCodec},
};
use futures::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream, ToSocketAddrs},
    sync::watch,
};
use tokio_util::codec::Framed;

use crate::{
    Gpio,
    board::{Board, BoardConfig, run_blocking},
    pins::PinMap,
    register::TransferWidth,
    status,
};

#[derive(Debug, Clone)]
pub struct Config {
    pub board: BoardConfig,
    /// Interval of the background status refresh.
    pub status_period: Duration,
    /// Longest wait for a complete bitstream body after `PROG`.
    pub body_timeout: Duration,
    pub max_bitstream_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            board: BoardConfig::default(),
            status_period: Duration::from_secs(5),
            body_timeout: Duration::from_secs(30),
            max_bitstream_size: 256 * 1024 * 1024,
        }
    }
}

/// Builder to create a [Server] instance and modify configuration options
///
/// # Example
///
/// ```ignore
/// use fic_server::server::Builder;
/// use std::time::Duration;
///
/// let server = Builder::new()
///     .lock_file("/run/lock/gpio.lock")
///     .comm_timeout(Duration::from_millis(500))
///     .build(gpio, PinMap::default());
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Marker file shared with every other program driving the bus.
    pub fn lock_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.board.lock.path = path.into();
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.board.lock.timeout = timeout;
        self
    }

    /// Age after which a lock marker is considered abandoned.
    pub fn lock_expire(mut self, expire: Duration) -> Self {
        self.config.board.lock.expire = expire;
        self
    }

    pub fn lock_poll_interval(mut self, interval: Duration) -> Self {
        self.config.board.lock.poll_interval = interval;
        self
    }

    /// Set the handshake acknowledge timeout
    pub fn comm_timeout(mut self, timeout: Duration) -> Self {
        self.config.board.comm_timeout = timeout;
        self
    }

    pub fn transfer_width(mut self, width: TransferWidth) -> Self {
        self.config.board.transfer_width = width;
        self
    }

    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.config.board.timing.init_timeout = timeout;
        self
    }

    pub fn done_timeout(mut self, timeout: Duration) -> Self {
        self.config.board.timing.done_timeout = timeout;
        self
    }

    pub fn status_period(mut self, period: Duration) -> Self {
        self.config.status_period = period;
        self
    }

    pub fn body_timeout(mut self, timeout: Duration) -> Self {
        self.config.body_timeout = timeout;
        self
    }

    /// Set the largest bitstream a `PROG` command may announce.
    pub fn max_bitstream_size(mut self, size: usize) -> Self {
        self.config.max_bitstream_size = size;
        self
    }

    /// Build and return the server
    pub fn build<G: Gpio + 'static>(self, gpio: G, pins: PinMap) -> Server<G> {
        Server::new(gpio, pins, self.config)
    }
}

pub struct Server<G: Gpio> {
    board: Arc<Board<G>>,
    config: Config,
    status: watch::Sender<FicStatus>,
}

impl<G: Gpio + 'static> Server<G> {
    pub fn new(gpio: G, pins: PinMap, config: Config) -> Server<G> {
        let board = Arc::new(Board::new(gpio, pins, config.board.clone()));
        let (status, _) = watch::channel(FicStatus::default());
        Server {
            board,
            config,
            status,
        }
    }

    pub async fn listen(self, addr: impl ToSocketAddrs) -> io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Accepts clients on `listener` forever. Every connection runs in its own task.
    pub async fn serve(self, listener: TcpListener) -> io::Result<()> {
        log::info!("Server listening on {}", listener.local_addr()?);
        let receiver = self.status.subscribe();
        tokio::spawn(status::monitor(
            Arc::clone(&self.board),
            self.status,
            self.config.status_period,
        ));

        loop {
            match listener.accept().await {
                Ok((tcp, peer_addr)) => {
                    log::info!("New client connection from {}", peer_addr);
                    let session = Session {
                        board: Arc::clone(&self.board),
                        status: receiver.clone(),
                        body_timeout: self.config.body_timeout,
                    };
                    let max_bitstream_size = self.config.max_bitstream_size;
                    tokio::spawn(async move {
                        if let Err(e) = session.handle_client(tcp, max_bitstream_size).await {
                            log::error!("Client error: {}", e);
                        }
                        log::info!("Client {} disconnected", peer_addr);
                    });
                }
                Err(e) => log::error!("Connection error: {}", e),
            }
        }
    }
}

type Connection = Framed<TcpStream, RequestCodec>;

/// State of one client connection.
struct Session<G: Gpio> {
    board: Arc<Board<G>>,
    status: watch::Receiver<FicStatus>,
    body_timeout: Duration,
}

impl<G: Gpio + 'static> Session<G> {
    async fn handle_client(&self, tcp: TcpStream, max_bitstream_size: usize) -> io::Result<()> {
        let mut framed = Framed::new(tcp, RequestCodec::new(max_bitstream_size));

        loop {
            framed.send(Reply::Ready).await?;
            let request = match framed.next().await {
                Some(Ok(request)) => request,
                Some(Err(err))
                    if err.kind() == ErrorKind::ConnectionAborted
                        || err.kind() == ErrorKind::ConnectionReset =>
                {
                    break;
                } // Client disconnected
                Some(Err(err)) => {
                    // Overlong line, the stream cannot be resynchronized
                    let _ = framed.send(Reply::Error).await;
                    return Err(err);
                }
                None => break,
            };
            let flow = match request {
                Request::Command(command) => self.process_command(command, &mut framed).await?,
                Request::Invalid(err) => {
                    log::warn!("Rejected command: {}", err);
                    framed.send(Reply::Error).await?;
                    ControlFlow::Continue(())
                }
                Request::Bitstream(body) => {
                    log::error!("Unexpected bitstream of {} bytes", body.len());
                    framed.send(Reply::Error).await?;
                    ControlFlow::Break(())
                }
            };
            if flow.is_break() {
                break;
            }
        }
        Ok(())
    }

    /// Process each command, forwarding hardware work to the board.
    async fn process_command(
        &self,
        command: Command,
        framed: &mut Connection,
    ) -> io::Result<ControlFlow<()>> {
        match command {
            Command::Stat => {
                log::debug!("Received STAT");
                let status = *self.status.borrow();
                match serde_json::to_string(&status) {
                    Ok(json) => framed.send(Reply::Json(json)).await?,
                    Err(e) => {
                        log::error!("Cannot encode status: {}", e);
                        framed.send(Reply::Error).await?;
                    }
                }
            }
            Command::Program { size, width, mode } => {
                return self.program(command, size, width, mode, framed).await;
            }
            Command::Write { addr, data } => {
                log::debug!("Received WRITE addr={:04x} data={:02x}", addr, data);
                if let Err(e) = run_blocking(&self.board, move |board| board.write8(addr, data)).await {
                    log::error!("WRITE {:04x} failed: {}", addr, e);
                    framed.send(Reply::Error).await?;
                }
            }
            Command::Read { addr } => {
                log::debug!("Received READ addr={:04x}", addr);
                match run_blocking(&self.board, move |board| board.read8(addr)).await {
                    Ok(value) => framed.send(Reply::Value(value)).await?,
                    Err(e) => {
                        log::error!("READ {:04x} failed: {}", addr, e);
                        framed.send(Reply::Error).await?;
                    }
                }
            }
            Command::Init => {
                log::info!("Received INIT");
                if let Err(e) = run_blocking(&self.board, |board| board.reset_fpga()).await {
                    log::error!("INIT failed: {}", e);
                    framed.send(Reply::Error).await?;
                }
            }
            Command::Help => {
                framed
                    .send(Reply::Text(Command::HELP_TEXT.to_string()))
                    .await?;
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Receives the bitstream body and loads it. A short body ends the session.
    async fn program(
        &self,
        command: Command,
        size: usize,
        width: SelectMapWidth,
        mode: LoadMode,
        framed: &mut Connection,
    ) -> io::Result<ControlFlow<()>> {
        log::info!("Received {} for {} bytes", command.name(), size);
        // Size accepted, then ready for the body
        framed.send(Reply::Ready).await?;
        framed.send(Reply::Ready).await?;

        let bitstream: Bytes = match tokio::time::timeout(self.body_timeout, framed.next()).await {
            Ok(Some(Ok(Request::Bitstream(bitstream)))) => bitstream,
            Ok(Some(Ok(other))) => {
                log::error!("Expected bitstream, got {:?}", other);
                framed.send(Reply::Error).await?;
                return Ok(ControlFlow::Break(()));
            }
            Ok(Some(Err(e))) => {
                log::error!("Bitstream transfer failed: {}", e);
                let _ = framed.send(Reply::Error).await;
                return Ok(ControlFlow::Break(()));
            }
            Ok(None) => {
                log::error!("Client closed during bitstream transfer");
                return Ok(ControlFlow::Break(()));
            }
            Err(_) => {
                log::error!(
                    "Bitstream transfer timed out after {:?}, {} of {} bytes received",
                    self.body_timeout,
                    framed.read_buffer().len(),
                    size
                );
                framed.send(Reply::Error).await?;
                return Ok(ControlFlow::Break(()));
            }
        };
        log::debug!("Received {} bitstream bytes", bitstream.len());

        match run_blocking(&self.board, move |board| board.load(&bitstream, width, mode)).await {
            Ok(()) => log::info!("{} done", command.name()),
            Err(e) => {
                log::error!("{} failed: {}", command.name(), e);
                framed.send(Reply::Error).await?;
            }
        }
        Ok(ControlFlow::Continue(()))
    }
}
