//! UDP transport and event loop.
//!
//! Binds the server port, joins the All-DHCP-Servers multicast group,
//! and feeds datagrams to the [`Engine`] one at a time. The engine is
//! synchronous and single-owner, so there is no per-packet task and no
//! locking; a control-socket connection is serviced between packets by
//! the same loop.

use std::net::{SocketAddr, SocketAddrV6};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UdpSocket, UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::cli::ControlInterface;
use crate::config::Config;
use crate::engine::{ALL_DHCP_SERVERS, Engine};
use crate::error::{Error, Result};
use crate::lease::{MemoryStore, StoreStats};

/// Port servers and relay agents listen on.
pub const SERVER_PORT: u16 = 547;

/// Receive buffer size; comfortably above any datagram we accept.
const RECV_BUF_LEN: usize = 4096;

pub struct Server {
    socket: UdpSocket,
    control: Option<(UnixListener, ControlInterface)>,
    engine: Engine,
    interface_index: u32,
}

impl Server {
    pub fn new(config: &Config, control: ControlInterface) -> Result<Self> {
        config.validate()?;

        let socket = Self::create_socket(config)?;
        let store = Box::new(MemoryStore::new(config.store_capacity));
        let engine = Engine::new(config, store)?;

        let control = match &config.control_socket {
            Some(path) => {
                // A stale socket file from a previous run blocks the bind.
                let _ = std::fs::remove_file(path);
                let listener = UnixListener::bind(path).map_err(|error| {
                    Error::Socket(format!("Failed to bind control socket {}: {}", path, error))
                })?;
                info!("Control socket listening on {}", path);
                Some((listener, control))
            }
            None => None,
        };

        Ok(Self {
            socket,
            control,
            engine,
            interface_index: config.interface_index,
        })
    }

    fn create_socket(config: &Config) -> Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|error| Error::Socket(format!("Failed to create socket: {}", error)))?;

        socket
            .set_only_v6(true)
            .map_err(|error| Error::Socket(format!("Failed to set IPV6_V6ONLY: {}", error)))?;

        socket
            .set_reuse_address(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_REUSEADDR: {}", error)))?;

        socket
            .set_nonblocking(true)
            .map_err(|error| Error::Socket(format!("Failed to set non-blocking: {}", error)))?;

        let bind_addr = SocketAddrV6::new(std::net::Ipv6Addr::UNSPECIFIED, SERVER_PORT, 0, 0);
        socket
            .bind(&bind_addr.into())
            .map_err(|error| Error::Socket(format!("Failed to bind to {}: {}", bind_addr, error)))?;

        // Unicast still works when the join fails (unprivileged runs,
        // containers without multicast routes).
        if let Err(error) = socket.join_multicast_v6(&ALL_DHCP_SERVERS, config.interface_index) {
            warn!(
                "Failed to join {} on interface {}: {}",
                ALL_DHCP_SERVERS, config.interface_index, error
            );
        }

        let std_socket: std::net::UdpSocket = socket.into();
        UdpSocket::from_std(std_socket)
            .map_err(|error| Error::Socket(format!("Failed to register socket: {}", error)))
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            socket,
            control,
            mut engine,
            interface_index,
        } = self;

        info!("DHCPv6 server listening on [::]:{}", SERVER_PORT);
        let mut buffer = vec![0u8; RECV_BUF_LEN];

        match control {
            Some((listener, interface)) => loop {
                tokio::select! {
                    received = socket.recv_from(&mut buffer) => {
                        let (len, peer) = received?;
                        handle_datagram(&mut engine, &socket, &buffer[..len], peer, interface_index)
                            .await;
                    }
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, _)) => {
                                handle_control(stream, &interface, engine.stats()).await;
                            }
                            Err(error) => warn!("Control socket accept failed: {}", error),
                        }
                    }
                }
            },
            None => loop {
                let (len, peer) = socket.recv_from(&mut buffer).await?;
                handle_datagram(&mut engine, &socket, &buffer[..len], peer, interface_index).await;
            },
        }
    }
}

async fn handle_datagram(
    engine: &mut Engine,
    socket: &UdpSocket,
    data: &[u8],
    peer: SocketAddr,
    interface_index: u32,
) {
    let peer = match peer {
        SocketAddr::V6(peer) => peer,
        SocketAddr::V4(peer) => {
            debug!("Ignoring IPv4 datagram from {}", peer);
            return;
        }
    };

    // Prefer the interface the packet actually arrived on; link-local
    // sources carry it in their scope id.
    let ifindex = if peer.scope_id() != 0 {
        peer.scope_id()
    } else {
        interface_index
    };

    if let Some(outbound) = engine.handle_packet(data, peer, ifindex)
        && let Err(error) = socket.send_to(&outbound.payload, outbound.destination).await
    {
        warn!("Failed to send reply to {}: {}", outbound.destination, error);
    }
}

/// One command per connection: read a line, answer, hang up.
async fn handle_control(stream: UnixStream, interface: &ControlInterface, stats: StoreStats) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    if let Err(error) = reader.read_line(&mut line).await {
        warn!("Control socket read failed: {}", error);
        return;
    }

    let response = interface.dispatch(&line, stats);
    let mut stream = reader.into_inner();
    if let Err(error) = stream.write_all(response.as_bytes()).await {
        warn!("Control socket write failed: {}", error);
    }
}
