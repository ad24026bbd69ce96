//! Command dispatcher for a single client connection.
//!
//! The protocol is one command per connection: a one-byte opcode, a small
//! fixed-size little-endian payload, then a 15-byte reply describing the
//! record state after the command. All reads must finish within the read
//! deadline. Protocol errors close the connection without a reply.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::error::ProtocolError;
use crate::metrics;
use crate::store::record::{FlagModifier, ImpactRecord, ImpactTriple};
use crate::store::IpStore;

/// Budget for reading the opcode and payload off one connection.
pub const READ_DEADLINE: Duration = Duration::from_secs(5);

/// Reply length: maximum impact triple, forgiveness count, flag byte.
pub const REPLY_LEN: usize = 15;

const CMD_LOG_IP: u8 = 0x01;
const CMD_FORGIVE_IP: u8 = 0x02;
const CMD_BLACK_WHITE_IP: u8 = 0x03;

/// One decoded command off the wire.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Log { ip: u32, amount: u32 },
    Forgive { ip: u32, amounts: ImpactTriple },
    BlackWhite { ip: u32, modifier: u8 },
}

/// Handle one connection: read a command, apply it, write the reply.
#[instrument(skip(stream, store), name = "connection", fields(%addr))]
pub async fn handle(
    mut stream: TcpStream,
    addr: SocketAddr,
    store: Arc<IpStore>,
) -> Result<(), ProtocolError> {
    let command = match timeout(READ_DEADLINE, read_command(&mut stream)).await {
        Ok(Ok(command)) => command,
        Ok(Err(e)) => {
            metrics::record_protocol_error(match e {
                ProtocolError::UnknownCommand(_) => "unknown_command",
                _ => "short_read",
            });
            return Err(e);
        }
        Err(elapsed) => {
            metrics::record_protocol_error("deadline");
            return Err(elapsed.into());
        }
    };
    debug!(?command, "command received");

    let reply = dispatch(&store, command, unix_now());
    stream.write_all(&reply).await?;
    Ok(())
}

/// Read and decode one command. Counts every opcode toward the dispatch
/// rate, including ones we end up rejecting.
async fn read_command<R>(stream: &mut R) -> Result<Command, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut opcode = [0u8; 1];
    stream.read_exact(&mut opcode).await?;
    metrics::record_dispatch();

    match opcode[0] {
        CMD_LOG_IP => {
            let mut buf = [0u8; 8];
            stream.read_exact(&mut buf).await?;
            Ok(Command::Log {
                ip: le_u32(&buf[0..4]),
                amount: le_u32(&buf[4..8]),
            })
        }
        CMD_FORGIVE_IP => {
            let mut buf = [0u8; 16];
            stream.read_exact(&mut buf).await?;
            Ok(Command::Forgive {
                ip: le_u32(&buf[0..4]),
                amounts: ImpactTriple {
                    five_min: le_u32(&buf[4..8]),
                    hour: le_u32(&buf[8..12]),
                    day: le_u32(&buf[12..16]),
                },
            })
        }
        CMD_BLACK_WHITE_IP => {
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).await?;
            Ok(Command::BlackWhite {
                ip: le_u32(&buf[0..4]),
                modifier: buf[4],
            })
        }
        other => Err(ProtocolError::UnknownCommand(other)),
    }
}

/// Apply a command to the store and build the reply.
fn dispatch(store: &IpStore, command: Command, now: u32) -> [u8; REPLY_LEN] {
    let record = match command {
        Command::Log { ip, amount } => {
            metrics::record_command("log_ip");
            store.log_ip(ip, amount, FlagModifier::Nop, now)
        }
        Command::Forgive { ip, amounts } => {
            metrics::record_command("forgive_ip");
            store.forgive_ip(ip, amounts)
        }
        Command::BlackWhite { ip, modifier } => {
            metrics::record_command("black_white_ip");
            let modifier = FlagModifier::from_wire(modifier).unwrap_or_else(|| {
                warn!(modifier, "unknown flag modifier, flags left unchanged");
                FlagModifier::Nop
            });
            store.log_ip(ip, 0, modifier, now)
        }
    };
    encode_reply(&record)
}

/// Pack the post-command record state into the 15-byte reply.
pub fn encode_reply(record: &ImpactRecord) -> [u8; REPLY_LEN] {
    let mut buf = [0u8; REPLY_LEN];
    buf[0..4].copy_from_slice(&record.maximum.five_min.to_le_bytes());
    buf[4..8].copy_from_slice(&record.maximum.hour.to_le_bytes());
    buf[8..12].copy_from_slice(&record.maximum.day.to_le_bytes());
    buf[12..14].copy_from_slice(&record.forgiven.to_le_bytes());
    buf[14] = record.flags;
    buf
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(bytes.try_into().expect("4-byte slice"))
}

/// Current wall clock as u32 UNIX seconds.
fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0) as u32
}
