//! Integration test common infrastructure.
//!
//! Spawns a real gateway on an ephemeral port and provides a tiny client
//! for the one-command-per-connection protocol.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use kawana::network::Gateway;
use kawana::store::IpStore;

pub const CMD_LOG_IP: u8 = 0x01;
pub const CMD_FORGIVE_IP: u8 = 0x02;
pub const CMD_BLACK_WHITE_IP: u8 = 0x03;

/// A running kawana gateway over a throwaway data directory.
pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<IpStore>,
    _data_dir: Option<TempDir>,
}

impl TestServer {
    /// Spawn a server over a fresh temporary data directory.
    pub async fn spawn() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let mut server = Self::spawn_in(dir.path()).await;
        server._data_dir = Some(dir);
        server
    }

    /// Spawn a server over an existing data directory, loading whatever
    /// snapshot it holds.
    pub async fn spawn_in(data_dir: &Path) -> Self {
        let store = Arc::new(IpStore::open(data_dir).expect("open store"));
        let gateway = Gateway::bind(0, Arc::clone(&store))
            .await
            .expect("bind gateway");
        let addr = gateway.local_addr().expect("local addr");
        tokio::spawn(gateway.run());

        Self {
            addr,
            store,
            _data_dir: None,
        }
    }

    /// Send one command and collect the reply bytes (empty when the server
    /// closed without replying).
    pub async fn send(&self, command: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(self.addr).await.expect("connect");
        stream.write_all(command).await.expect("write command");

        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.expect("read reply");
        reply
    }

    /// Send a partial command and half-close, provoking a short read on the
    /// server side.
    pub async fn send_truncated(&self, partial: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(self.addr).await.expect("connect");
        stream.write_all(partial).await.expect("write partial");
        stream.shutdown().await.expect("shutdown write side");

        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.expect("read reply");
        reply
    }
}

/// Build a LogIP command.
pub fn log_ip(ip: u32, amount: u32) -> Vec<u8> {
    let mut cmd = vec![CMD_LOG_IP];
    cmd.extend_from_slice(&ip.to_le_bytes());
    cmd.extend_from_slice(&amount.to_le_bytes());
    cmd
}

/// Build a ForgiveIP command.
pub fn forgive_ip(ip: u32, five_min: u32, hour: u32, day: u32) -> Vec<u8> {
    let mut cmd = vec![CMD_FORGIVE_IP];
    cmd.extend_from_slice(&ip.to_le_bytes());
    cmd.extend_from_slice(&five_min.to_le_bytes());
    cmd.extend_from_slice(&hour.to_le_bytes());
    cmd.extend_from_slice(&day.to_le_bytes());
    cmd
}

/// Build a BlackWhiteIP command.
pub fn black_white_ip(ip: u32, modifier: u8) -> Vec<u8> {
    let mut cmd = vec![CMD_BLACK_WHITE_IP];
    cmd.extend_from_slice(&ip.to_le_bytes());
    cmd.push(modifier);
    cmd
}

/// Decoded 15-byte reply.
#[derive(Debug, PartialEq, Eq)]
pub struct Reply {
    pub max_five_min: u32,
    pub max_hour: u32,
    pub max_day: u32,
    pub forgiven: u16,
    pub flags: u8,
}

impl Reply {
    pub fn parse(bytes: &[u8]) -> Self {
        assert_eq!(bytes.len(), 15, "reply must be exactly 15 bytes");
        Self {
            max_five_min: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            max_hour: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            max_day: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            forgiven: u16::from_le_bytes(bytes[12..14].try_into().unwrap()),
            flags: bytes[14],
        }
    }
}
